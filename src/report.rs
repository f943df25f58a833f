use crate::error::Error;
use crate::gaql::{ColumnSource, GaqlQuery};
use datafusion::arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, ListBuilder, RecordBatch,
    StringBuilder,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use serde_json::Value;
use std::sync::Arc;

/// Separator used when a multi-valued cell is flattened into text.
pub const LIST_SEPARATOR: &str = " | ";

/// A single report value.
#[derive(Clone, Debug, PartialEq)]
pub enum Cell {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    List(Vec<String>),
}

impl Cell {
    /// Flattens lists into `a | b` text; every other cell is returned unchanged.
    pub fn flatten_list(self) -> Cell {
        match self {
            Cell::List(values) => Cell::Text(values.join(LIST_SEPARATOR)),
            other => other,
        }
    }

    fn to_text(&self) -> Option<String> {
        match self {
            Cell::Null => None,
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(v.to_string()),
            Cell::Bool(v) => Some(v.to_string()),
            Cell::Text(v) => Some(v.clone()),
            Cell::List(values) => Some(values.join(LIST_SEPARATOR)),
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<i64> for Cell {
    fn from(value: i64) -> Self {
        Cell::Int(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Cell>,
}

/// A column-oriented table; rows are implicit by position.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Report {
    columns: Vec<Column>,
}

impl Report {
    pub fn new() -> Self {
        Report::default()
    }

    /// Adds a column, replacing any column with the same name.
    pub fn with_column(mut self, name: &str, values: Vec<Cell>) -> Self {
        self.set_column(name, values);
        self
    }

    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(column) => column.values = values,
            None => self.columns.push(Column {
                name: name.to_string(),
                values,
            }),
        }
    }

    pub fn column(&self, name: &str) -> Option<&[Cell]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Vec<Cell>> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.values)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    /// Appends one row given in column order.
    pub fn push_row(&mut self, row: Vec<Cell>) {
        for (column, cell) in self.columns.iter_mut().zip(row) {
            column.values.push(cell);
        }
    }

    /// Builds a report from API result rows, one column per selected query item.
    ///
    /// When no rows come back a single placeholder row is produced: `0` for ids and
    /// metrics, an empty string for everything else, constants as selected.
    pub fn from_api_rows(query: &GaqlQuery, rows: &[Value]) -> Report {
        let mut report = Report::new();
        for column in query.columns() {
            report.set_column(&column.alias, Vec::with_capacity(rows.len().max(1)));
        }

        for row in rows {
            let cells = query
                .columns()
                .iter()
                .map(|column| match &column.source {
                    ColumnSource::Constant(value) => Cell::Text(value.clone()),
                    ColumnSource::Field { path, nested } => {
                        extract_field(row, path, nested.as_deref())
                    }
                })
                .collect();
            report.push_row(cells);
        }

        if rows.is_empty() {
            let placeholder = query
                .columns()
                .iter()
                .map(|column| match &column.source {
                    ColumnSource::Constant(value) => Cell::Text(value.clone()),
                    ColumnSource::Field { path, .. } => default_cell(path),
                })
                .collect();
            report.push_row(placeholder);
        }

        report
    }

    /// Converts the report to an Arrow [`RecordBatch`], inferring one type per column.
    pub fn to_record_batch(&self) -> Result<RecordBatch, Error> {
        let mut fields = Vec::with_capacity(self.columns.len());
        let mut arrays: Vec<ArrayRef> = Vec::with_capacity(self.columns.len());

        for column in &self.columns {
            let (data_type, array) = build_array(&column.values);
            fields.push(Field::new(&column.name, data_type, true));
            arrays.push(array);
        }

        let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
        Ok(batch)
    }
}

fn default_cell(path: &str) -> Cell {
    if is_numeric_field(path) {
        Cell::Int(0)
    } else {
        Cell::Text(String::new())
    }
}

fn is_numeric_field(path: &str) -> bool {
    let leaf = path.rsplit('.').next().unwrap_or(path);
    leaf == "id" || leaf.ends_with("_id") || path.starts_with("metrics.")
}

/// Converts a snake_case field segment into the lowerCamelCase key used in API JSON.
pub fn camel_case(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    let mut upper = false;
    for c in segment.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}

/// Looks up a dotted snake_case field path in an API result row.
pub fn lookup<'a>(row: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(row, |value, segment| value.get(camel_case(segment)))
}

/// Reads a field of an API result row as a [`Cell`].
///
/// The API leaves out fields holding their default value, so a missing field reads as
/// that default: an empty list for repeated fields narrowed with `nested`, `0` for ids
/// and metrics, an empty string otherwise.
pub fn extract_field(row: &Value, path: &str, nested: Option<&str>) -> Cell {
    let Some(value) = lookup(row, path) else {
        return match nested {
            Some(_) => Cell::List(Vec::new()),
            None => default_cell(path),
        };
    };

    match (value, nested) {
        (Value::Array(items), Some(nested)) => Cell::List(
            items
                .iter()
                .filter_map(|item| lookup(item, nested))
                .map(json_to_text)
                .collect(),
        ),
        (Value::Array(items), None) => Cell::List(items.iter().map(json_to_text).collect()),
        (value, Some(nested)) => match lookup(value, nested) {
            Some(inner) => json_to_cell(inner, is_numeric_field(nested)),
            None => default_cell(nested),
        },
        (value, None) => json_to_cell(value, is_numeric_field(path)),
    }
}

fn json_to_cell(value: &Value, numeric: bool) -> Cell {
    match value {
        Value::Null => Cell::Null,
        Value::Bool(v) => Cell::Bool(*v),
        Value::Number(n) => match n.as_i64() {
            Some(v) => Cell::Int(v),
            None => n.as_f64().map_or(Cell::Null, Cell::Float),
        },
        Value::String(s) if numeric => {
            if let Ok(v) = s.parse::<i64>() {
                Cell::Int(v)
            } else if let Ok(v) = s.parse::<f64>() {
                Cell::Float(v)
            } else {
                Cell::Text(s.clone())
            }
        }
        Value::String(s) => Cell::Text(s.clone()),
        Value::Array(items) => Cell::List(items.iter().map(json_to_text).collect()),
        Value::Object(_) => Cell::Text(value.to_string()),
    }
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Inferred {
    Unknown,
    Int,
    Float,
    Bool,
    List,
    Text,
}

fn infer(values: &[Cell]) -> Inferred {
    values.iter().fold(Inferred::Unknown, |acc, cell| {
        let this = match cell {
            Cell::Null => return acc,
            Cell::Int(_) => Inferred::Int,
            Cell::Float(_) => Inferred::Float,
            Cell::Bool(_) => Inferred::Bool,
            Cell::List(_) => Inferred::List,
            Cell::Text(_) => Inferred::Text,
        };
        match (acc, this) {
            (Inferred::Unknown, t) => t,
            (a, t) if a == t => a,
            (Inferred::Int, Inferred::Float) | (Inferred::Float, Inferred::Int) => Inferred::Float,
            _ => Inferred::Text,
        }
    })
}

fn build_array(values: &[Cell]) -> (DataType, ArrayRef) {
    match infer(values) {
        Inferred::Int => {
            let mut builder = Int64Builder::with_capacity(values.len());
            for cell in values {
                match cell {
                    Cell::Int(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            (DataType::Int64, Arc::new(builder.finish()))
        }
        Inferred::Float => {
            let mut builder = Float64Builder::with_capacity(values.len());
            for cell in values {
                match cell {
                    Cell::Int(v) => builder.append_value(*v as f64),
                    Cell::Float(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            (DataType::Float64, Arc::new(builder.finish()))
        }
        Inferred::Bool => {
            let mut builder = BooleanBuilder::with_capacity(values.len());
            for cell in values {
                match cell {
                    Cell::Bool(v) => builder.append_value(*v),
                    _ => builder.append_null(),
                }
            }
            (DataType::Boolean, Arc::new(builder.finish()))
        }
        Inferred::List => {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for cell in values {
                match cell {
                    Cell::List(items) => {
                        for item in items {
                            builder.values().append_value(item);
                        }
                        builder.append(true);
                    }
                    _ => builder.append(false),
                }
            }
            let item = Arc::new(Field::new("item", DataType::Utf8, true));
            (DataType::List(item), Arc::new(builder.finish()))
        }
        Inferred::Text | Inferred::Unknown => {
            let mut builder = StringBuilder::with_capacity(values.len(), values.len() * 16);
            for cell in values {
                builder.append_option(cell.to_text());
            }
            (DataType::Utf8, Arc::new(builder.finish()))
        }
    }
}
