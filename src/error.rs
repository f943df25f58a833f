use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("API responded with error: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{message}")]
    InvalidPayload { message: String },

    #[error("Invalid GAQL query: {message}")]
    InvalidQuery { message: String },

    #[error("Report '{table_name}' is misconfigured: {message}")]
    InvalidReportConfig { table_name: String, message: String },

    #[error("Report '{name}' is not defined in the report configuration")]
    UnknownReport { name: String },

    #[error("Built-in query '{name}' does not exist")]
    UnknownBuiltinQuery { name: String },

    #[error("Column '{column}' is missing from the report")]
    MissingColumn { column: String },

    #[error("Credential '{name}' was not supplied")]
    MissingCredential { name: String },

    #[error("Google Ads API failed for customer {customer_id} with {status}: {message}")]
    AdsApiFailure {
        customer_id: i64,
        status: u16,
        message: String,
    },

    #[error("Authentication failed: {message}")]
    Auth { message: String },

    #[error("BigQuery load job {job_id} failed: {message}")]
    LoadJobFailed { job_id: String, message: String },

    #[error("Table {table} already holds data")]
    TableNotEmpty { table: String },
}
