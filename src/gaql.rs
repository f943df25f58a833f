//! Google Ads Query Language files.
//!
//! Query files use the reporting-toolkit dialect of GAQL: every selected item may carry an
//! alias (`customer.id AS customer_id`), repeated messages may be narrowed to one of their
//! fields (`asset.policy_summary.policy_topic_entries:topic`) and quoted constants may be
//! selected alongside API fields. Only the plain field paths are sent to the API.

use crate::error::Error;
use chrono::NaiveDate;
use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::Chars;

const TODAY_PLACEHOLDER: &str = "{{ today }}";

/// Where the values of a result column come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ColumnSource {
    /// An API field path, optionally narrowed to a field of each repeated element.
    Field { path: String, nested: Option<String> },
    /// A literal selected as-is for every row.
    Constant(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryColumn {
    pub alias: String,
    pub source: ColumnSource,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GaqlQuery {
    columns: Vec<QueryColumn>,
    api_query: String,
}

impl GaqlQuery {
    /// Parses a query, stripping its comments first.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let text = strip_comments(text);
        let lower = text.to_ascii_lowercase();

        let select = find_keyword(&lower, "select", 0).ok_or_else(|| invalid("missing SELECT"))?;
        let items_start = select + "select".len();
        let from = find_keyword(&lower, "from", items_start).ok_or_else(|| invalid("missing FROM"))?;

        let columns = split_outside_quotes(&text[items_start..from], ',')
            .into_iter()
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(parse_item)
            .collect::<Result<Vec<_>, _>>()?;

        let mut fields: Vec<&str> = Vec::new();
        for column in &columns {
            if let ColumnSource::Field { path, .. } = &column.source {
                if !fields.contains(&path.as_str()) {
                    fields.push(path);
                }
            }
        }
        if fields.is_empty() {
            return Err(invalid("no API fields are selected"));
        }

        let api_query = format!(
            "SELECT {} FROM {}",
            fields.join(", "),
            text[from + "from".len()..].trim()
        );

        Ok(GaqlQuery { columns, api_query })
    }

    /// Reads a query file, fills the `{{ today }}` placeholder and parses it.
    pub fn from_file(path: impl AsRef<Path>, today: NaiveDate) -> Result<Self, Error> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&render_today(&raw, today))
    }

    pub fn columns(&self) -> &[QueryColumn] {
        &self.columns
    }

    /// The query text as the Ads API expects it.
    pub fn api_query(&self) -> &str {
        &self.api_query
    }
}

/// Replaces the `{{ today }}` placeholder with a quoted `YYYY-MM-DD` date.
pub fn render_today(query: &str, today: NaiveDate) -> String {
    query.replace(
        TODAY_PLACEHOLDER,
        &format!("\"{}\"", today.format("%Y-%m-%d")),
    )
}

/// Removes `--`, `#` and `/* */` comments that are not inside quotes.
///
/// Lines left empty are dropped and trailing whitespace is trimmed.
pub fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            '-' if chars.peek() == Some(&'-') => skip_line(&mut chars, &mut out),
            '#' => skip_line(&mut chars, &mut out),
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = ' ';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
            }
            _ => out.push(c),
        }
    }

    out.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn skip_line(chars: &mut Peekable<Chars<'_>>, out: &mut String) {
    for c in chars.by_ref() {
        if c == '\n' {
            out.push('\n');
            break;
        }
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidQuery {
        message: message.to_string(),
    }
}

/// Finds `keyword` as a whole word outside quotes in an already lower-cased query.
fn find_keyword(lower: &str, keyword: &str, from: usize) -> Option<usize> {
    let bytes = lower.as_bytes();
    let mut quote: Option<char> = None;

    for (position, c) in lower.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if position >= from && lower[position..].starts_with(keyword) => {
                let end = position + keyword.len();
                let before_ok = position == 0 || bytes[position - 1].is_ascii_whitespace();
                let after_ok = end == bytes.len() || bytes[end].is_ascii_whitespace();
                if before_ok && after_ok {
                    return Some(position);
                }
            }
            None => {}
        }
    }

    None
}

fn split_outside_quotes(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, c) in text.char_indices() {
        match quote {
            Some(open) if c == open => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == separator => {
                parts.push(&text[start..index]);
                start = index + c.len_utf8();
            }
            None => {}
        }
    }
    parts.push(&text[start..]);

    parts
}

fn parse_item(item: &str) -> Result<QueryColumn, Error> {
    let tokens: Vec<&str> = item.split_whitespace().collect();
    let (expression, alias) = match tokens.as_slice() {
        [.., as_keyword, alias] if tokens.len() >= 3 && as_keyword.eq_ignore_ascii_case("as") => {
            (tokens[..tokens.len() - 2].join(" "), Some(alias.to_string()))
        }
        _ => (tokens.join(" "), None),
    };

    if let Some(constant) = unquote(&expression) {
        let alias = alias.ok_or_else(|| {
            invalid(&format!("constant {} needs an alias", expression))
        })?;
        return Ok(QueryColumn {
            alias,
            source: ColumnSource::Constant(constant.to_string()),
        });
    }

    if expression.is_empty() || expression.contains(char::is_whitespace) {
        return Err(invalid(&format!("cannot read select item '{}'", item)));
    }

    let (path, nested) = match expression.split_once(':') {
        Some((path, nested)) => (path.to_string(), Some(nested.to_string())),
        None => (expression, None),
    };

    Ok(QueryColumn {
        alias: alias.unwrap_or_else(|| path.replace('.', "_")),
        source: ColumnSource::Field { path, nested },
    })
}

fn unquote(expression: &str) -> Option<&str> {
    ['"', '\''].into_iter().find_map(|quote| {
        expression
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let query = "-- Fetch the customers\n\
                     SELECT\n  \
                     customer.id, -- numeric id\n  \
                     customer.descriptive_name\n\
                     /* all ads */\n\
                     FROM\n  \
                     ad_group_ad\n";

        assert_eq!(
            strip_comments(query),
            "SELECT\n  customer.id,\n  customer.descriptive_name\nFROM\n  ad_group_ad"
        );
    }

    #[test]
    fn test_strip_comments_keeps_quoted_text() {
        let query = "SELECT campaign.id FROM campaign WHERE campaign.name = 'spring -- sale #1'";
        assert_eq!(strip_comments(query), query);
    }

    #[test]
    fn test_render_today() {
        let today = NaiveDate::from_ymd_opt(2023, 10, 26).unwrap();
        assert_eq!(
            render_today("SELECT {{ today }} AS event_date, customer.id FROM customer", today),
            "SELECT \"2023-10-26\" AS event_date, customer.id FROM customer"
        );
    }

    #[test]
    fn test_parse_aliases_constants_and_nested_fields() {
        let query = GaqlQuery::parse(
            "SELECT\n  \
               \"2023-10-26\" AS event_date,\n  \
               customer.id AS customer_id,\n  \
               asset.policy_summary.policy_topic_entries:topic AS topics,\n  \
               campaign.id\n\
             FROM campaign_asset\n\
             WHERE asset.type = 'CALLOUT'",
        )
        .unwrap();

        assert_eq!(
            query.columns(),
            &[
                QueryColumn {
                    alias: "event_date".to_string(),
                    source: ColumnSource::Constant("2023-10-26".to_string()),
                },
                QueryColumn {
                    alias: "customer_id".to_string(),
                    source: ColumnSource::Field {
                        path: "customer.id".to_string(),
                        nested: None,
                    },
                },
                QueryColumn {
                    alias: "topics".to_string(),
                    source: ColumnSource::Field {
                        path: "asset.policy_summary.policy_topic_entries".to_string(),
                        nested: Some("topic".to_string()),
                    },
                },
                QueryColumn {
                    alias: "campaign_id".to_string(),
                    source: ColumnSource::Field {
                        path: "campaign.id".to_string(),
                        nested: None,
                    },
                },
            ]
        );
        assert_eq!(
            query.api_query(),
            "SELECT customer.id, asset.policy_summary.policy_topic_entries, campaign.id \
             FROM campaign_asset\nWHERE asset.type = 'CALLOUT'"
        );
    }

    #[test]
    fn test_parse_rejects_query_without_from() {
        assert!(matches!(
            GaqlQuery::parse("SELECT customer.id").unwrap_err(),
            Error::InvalidQuery { .. }
        ));
    }

    #[test]
    fn test_parse_rejects_constant_only_query() {
        assert!(matches!(
            GaqlQuery::parse("SELECT 'x' AS x FROM customer").unwrap_err(),
            Error::InvalidQuery { .. }
        ));
    }

    #[test]
    fn test_keyword_inside_field_name_is_not_matched() {
        let query = GaqlQuery::parse("SELECT customer.id, metrics.from_value FROM customer").unwrap();
        assert_eq!(
            query.api_query(),
            "SELECT customer.id, metrics.from_value FROM customer"
        );
    }

    #[test]
    fn test_keyword_inside_quoted_constant_is_not_matched() {
        let query =
            GaqlQuery::parse("SELECT \"from here\" AS note, customer.id FROM customer").unwrap();

        assert_eq!(
            query.columns()[0].source,
            ColumnSource::Constant("from here".to_string())
        );
        assert_eq!(query.api_query(), "SELECT customer.id FROM customer");
    }
}
