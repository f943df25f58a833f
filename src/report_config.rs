use crate::error::Error;
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::fs;
use std::path::Path;

/// What happens to rows already in the destination table.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    WriteAppend,
    WriteTruncate,
    WriteEmpty,
}

impl WriteDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::WriteAppend => "WRITE_APPEND",
            WriteDisposition::WriteTruncate => "WRITE_TRUNCATE",
            WriteDisposition::WriteEmpty => "WRITE_EMPTY",
        }
    }
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ReportConfig {
    pub table_name: String,
    pub write_disposition: WriteDisposition,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(default)]
    pub builtin_query_name: Option<String>,
    #[serde(default, alias = "gaql_filename", deserialize_with = "one_or_many")]
    pub gaql_filenames: Vec<String>,
    #[serde(default)]
    pub is_asset_report: bool,
    /// When set, the report is rolled up into daily counts of this column before writing.
    #[serde(default)]
    pub time_series_variable_column: Option<String>,
}

impl ReportConfig {
    fn validate(&self) -> Result<(), Error> {
        let message = if self.is_builtin {
            self.builtin_query_name
                .is_none()
                .then_some("built-in reports need a builtin_query_name")
        } else if self.is_asset_report {
            self.gaql_filenames
                .is_empty()
                .then_some("asset reports need at least one GAQL file")
        } else {
            (self.gaql_filenames.len() != 1).then_some("reports need exactly one GAQL file")
        };

        match message {
            Some(message) => Err(Error::InvalidReportConfig {
                table_name: self.table_name.clone(),
                message: message.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Deserialize)]
struct ReportConfigFile {
    reports: Vec<ReportConfig>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(filename) => vec![filename],
        OneOrMany::Many(filenames) => filenames,
    })
}

/// Loads the report definitions, in file order, from a JSON configuration file.
///
/// # Arguments
/// * `path` - Path of a file shaped like `{"reports": [...]}`
///
/// # Returns
/// A Result containing either the validated report configs or an [`Error`]
pub fn load_report_configs(path: impl AsRef<Path>) -> Result<Vec<ReportConfig>, Error> {
    let raw = fs::read_to_string(path)?;
    let file: ReportConfigFile = serde_json::from_str(&raw)?;

    for report in &file.reports {
        report.validate()?;
    }

    Ok(file.reports)
}

/// Looks a report up by its table name.
pub fn find_report<'a>(reports: &'a [ReportConfig], name: &str) -> Result<&'a ReportConfig, Error> {
    reports
        .iter()
        .find(|report| report.table_name == name)
        .ok_or_else(|| Error::UnknownReport {
            name: name.to_string(),
        })
}
