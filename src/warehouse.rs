use crate::auth::metadata_access_token;
use crate::config::Config;
use crate::error::Error;
use crate::payload::Secret;
use crate::report_config::WriteDisposition;
use chrono::Utc;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::json::LineDelimitedWriter;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::DataFrame;
use log::{info, warn};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

const MULTIPART_BOUNDARY: &str = "ads_policy_monitor_load_job";
const LOAD_JOB_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LOAD_JOB_MAX_POLLS: usize = 300;

/// A warehouse table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    pub project: String,
    pub dataset: String,
    pub table: String,
    pub location: Option<String>,
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.dataset, self.table)
    }
}

#[async_trait::async_trait]
pub trait WarehouseWriter: Send + Sync + 'static {
    /// Writes a DataFrame to a warehouse table.
    ///
    /// # Arguments
    /// * `df` - The rows to write.
    /// * `destination` - The table written to.
    /// * `disposition` - Whether rows are appended, replace the table, or need an empty table.
    ///
    /// # Returns
    /// A Result containing either `()` or an Error.
    async fn write(
        &self,
        df: DataFrame,
        destination: &Destination,
        disposition: WriteDisposition,
    ) -> Result<(), Error>;
}

/// Picks the Parquet writer when an output directory is configured, BigQuery otherwise.
pub fn writer_from_config(config: &Config) -> Box<dyn WarehouseWriter> {
    match &config.output_dir {
        Some(output_dir) => Box::new(ParquetWriter::new(output_dir)),
        None => Box::new(BigQueryWriter::new(config)),
    }
}

/// Loads rows into BigQuery through newline-delimited JSON load jobs.
pub struct BigQueryWriter {
    client: Client,
    base_url: String,
    token: Option<Secret>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: JobStatus,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    #[serde(default)]
    state: String,
    #[serde(default)]
    error_result: Option<JobError>,
}

#[derive(Deserialize)]
struct JobError {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl BigQueryWriter {
    pub fn new(config: &Config) -> Self {
        BigQueryWriter {
            client: Client::new(),
            base_url: config.bigquery_url.to_string(),
            token: config.bigquery_token.clone().map(Secret::new),
        }
    }

    async fn access_token(&self) -> Result<Secret, Error> {
        match &self.token {
            Some(token) => Ok(token.clone()),
            None => metadata_access_token(&self.client).await,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn fetch_job(
        &self,
        project: &str,
        reference: JobReference,
        token: &Secret,
    ) -> Result<Job, Error> {
        let mut url = self.url(&[
            "bigquery",
            "v2",
            "projects",
            project,
            "jobs",
            reference.job_id.as_str(),
        ])?;
        if let Some(location) = &reference.location {
            url.query_pairs_mut().append_pair("location", location);
        }

        let job = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(job)
    }
}

/// Whether a load job has finished; a job that reports an error fails.
fn job_finished(job: &Job) -> Result<bool, Error> {
    if let Some(error) = &job.status.error_result {
        return Err(Error::LoadJobFailed {
            job_id: job.job_reference.job_id.clone(),
            message: format!("{}: {}", error.reason, error.message),
        });
    }
    Ok(job.status.state == "DONE")
}

/// Refreshes `job` every `interval` until it is done, at most `max_polls` times.
async fn wait_for_job<F, Fut>(
    mut job: Job,
    max_polls: usize,
    interval: Duration,
    mut refresh: F,
) -> Result<(), Error>
where
    F: FnMut(JobReference) -> Fut,
    Fut: Future<Output = Result<Job, Error>>,
{
    let mut polls = 0;
    loop {
        if job_finished(&job)? {
            return Ok(());
        }
        if polls == max_polls {
            return Err(Error::LoadJobFailed {
                job_id: job.job_reference.job_id,
                message: "timed out waiting for the job to finish".to_string(),
            });
        }
        polls += 1;

        tokio::time::sleep(interval).await;
        job = refresh(job.job_reference.clone()).await?;
    }
}

#[async_trait::async_trait]
impl WarehouseWriter for BigQueryWriter {
    async fn write(
        &self,
        df: DataFrame,
        destination: &Destination,
        disposition: WriteDisposition,
    ) -> Result<(), Error> {
        let batches = df.collect().await?;
        let num_rows: usize = batches.iter().map(|b| b.num_rows()).sum();
        if num_rows == 0 {
            warn!("Nothing to write to {}", destination);
            return Ok(());
        }

        info!("Writing {} rows to BigQuery: {}", num_rows, destination);

        let data = to_ndjson(&batches)?;
        let metadata = load_job_config(destination, disposition);
        let (content_type, body) = multipart_related(&metadata, &data);

        let mut url = self.url(&[
            "upload",
            "bigquery",
            "v2",
            "projects",
            destination.project.as_str(),
            "jobs",
        ])?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let token = self.access_token().await?;
        let job: Job = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .header(CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Waiting for load job {}", job.job_reference.job_id);
        wait_for_job(job, LOAD_JOB_MAX_POLLS, LOAD_JOB_POLL_INTERVAL, |reference| {
            self.fetch_job(&destination.project, reference, &token)
        })
        .await
    }
}

fn load_job_config(destination: &Destination, disposition: WriteDisposition) -> Value {
    let mut job = json!({
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": destination.project,
                    "datasetId": destination.dataset,
                    "tableId": destination.table,
                },
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": disposition.as_str(),
                "createDisposition": "CREATE_IF_NEEDED",
                "autodetect": true,
            }
        }
    });
    if let Some(location) = &destination.location {
        job["jobReference"] = json!({
            "projectId": destination.project,
            "location": location,
        });
    }
    job
}

fn to_ndjson(batches: &[RecordBatch]) -> Result<Vec<u8>, Error> {
    let mut writer = LineDelimitedWriter::new(Vec::new());
    writer.write_batches(&batches.iter().collect::<Vec<_>>())?;
    writer.finish()?;
    Ok(writer.into_inner())
}

/// Builds a `multipart/related` upload body: job metadata first, then the data.
fn multipart_related(metadata: &Value, data: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::with_capacity(data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{m}\r\n\
             --{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            m = metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());

    (
        format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
        body,
    )
}

/// Writes tables as Parquet files under `<output_dir>/<dataset>/<table>/`.
#[derive(Clone)]
pub struct ParquetWriter {
    output_dir: PathBuf,
}

impl ParquetWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        ParquetWriter {
            output_dir: output_dir.into(),
        }
    }

    fn table_dir(&self, destination: &Destination) -> PathBuf {
        self.output_dir
            .join(&destination.dataset)
            .join(&destination.table)
    }

    fn staging_dir(&self, destination: &Destination) -> PathBuf {
        self.output_dir
            .join(&destination.dataset)
            .join(format!(".{}.staging", destination.table))
    }
}

#[async_trait::async_trait]
impl WarehouseWriter for ParquetWriter {
    async fn write(
        &self,
        df: DataFrame,
        destination: &Destination,
        disposition: WriteDisposition,
    ) -> Result<(), Error> {
        let num_rows = df.clone().count().await?;
        if num_rows == 0 {
            warn!("Nothing to write to {}", destination);
            return Ok(());
        }

        let table_dir = self.table_dir(destination);
        let holds_data = fs::read_dir(&table_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);

        if disposition == WriteDisposition::WriteEmpty && holds_data {
            return Err(Error::TableNotEmpty {
                table: destination.to_string(),
            });
        }

        // A truncating write lands in a staging directory that replaces the table only once complete.
        let replace = disposition == WriteDisposition::WriteTruncate && holds_data;
        let write_dir = if replace {
            self.staging_dir(destination)
        } else {
            table_dir.clone()
        };
        if replace && write_dir.exists() {
            fs::remove_dir_all(&write_dir)?;
        }
        fs::create_dir_all(&write_dir)?;

        let path = write_dir.join(format!("{}.parquet", Utc::now().format("%Y%m%dT%H%M%S%.6f")));
        info!("Writing {} rows to {}", num_rows, path.display());

        let written = df
            .write_parquet(
                &path.to_string_lossy(),
                DataFrameWriteOptions::new().with_single_file_output(true),
                None,
            )
            .await;

        if let Err(err) = written {
            if replace {
                let _ = fs::remove_dir_all(&write_dir);
            }
            return Err(err.into());
        }

        if replace {
            fs::remove_dir_all(&table_dir)?;
            fs::rename(&write_dir, &table_dir)?;
        }

        Ok(())
    }
}
