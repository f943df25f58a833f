use crate::ad_policy::{fetch_data_from_accounts_stream, load_gaql_query, process_ads_policy_data};
use crate::api_client::{AdsApi, AdsCredentials, ApiClient};
use crate::auth::OAuthCredentials;
use crate::config::Config;
use crate::error::Error;
use crate::fetch::run_report;
use crate::payload::{AdPolicyDataPayload, PolicyMonitorPayload};
use crate::report_config::{find_report, load_report_configs, ReportConfig, WriteDisposition};
use crate::warehouse::{writer_from_config, Destination, WarehouseWriter};
use chrono::{Local, NaiveDate};
use datafusion::prelude::SessionContext;
use log::info;
use std::path::Path;

const AD_POLICY_QUERY_FILE: &str = "get_ad_policy_data.sql";

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Builds the external clients a run talks to.
pub trait ClientFactory: Send + Sync + 'static {
    fn ads_api(&self, credentials: AdsCredentials) -> Box<dyn AdsApi>;

    fn warehouse_writer(&self) -> Box<dyn WarehouseWriter>;
}

/// Clients for the real Google Ads API and the configured warehouse.
pub struct LiveClients {
    config: Config,
}

impl LiveClients {
    pub fn new(config: Config) -> Self {
        LiveClients { config }
    }
}

impl ClientFactory for LiveClients {
    fn ads_api(&self, credentials: AdsCredentials) -> Box<dyn AdsApi> {
        Box::new(ApiClient::new(&self.config, credentials))
    }

    fn warehouse_writer(&self) -> Box<dyn WarehouseWriter> {
        writer_from_config(&self.config)
    }
}

/// Runs the Ads Policy Monitor reports requested by `payload`.
pub async fn run_policy_monitor(
    config: &Config,
    clients: &dyn ClientFactory,
    payload: PolicyMonitorPayload,
) -> Result<(), Error> {
    info!("Running the orchestration for payload: {:?}", payload);

    let credentials = AdsCredentials::from_config(config, payload.google_ads_login_customer_id)?;
    let api = clients.ads_api(credentials);
    let writer = clients.warehouse_writer();
    let report_configs = load_report_configs(&config.report_config)?;

    run_reports(
        api.as_ref(),
        writer.as_ref(),
        &report_configs,
        &payload,
        Path::new(&config.gaql_dir),
        today(),
    )
    .await
}

/// Runs every selected report and writes each one to its own table.
///
/// An absent or empty `reports_to_run` selects every configured report, in configuration order.
pub async fn run_reports(
    api: &dyn AdsApi,
    writer: &dyn WarehouseWriter,
    report_configs: &[ReportConfig],
    payload: &PolicyMonitorPayload,
    gaql_dir: &Path,
    today: NaiveDate,
) -> Result<(), Error> {
    let selected: Vec<&ReportConfig> = match &payload.reports_to_run {
        Some(names) if !names.is_empty() => names
            .iter()
            .map(|name| find_report(report_configs, name))
            .collect::<Result<_, _>>()?,
        _ => report_configs.iter().collect(),
    };

    let ctx = SessionContext::new();

    for report_config in selected {
        let df = run_report(
            &ctx,
            api,
            report_config,
            &payload.customer_ids,
            gaql_dir,
            today,
        )
        .await?;

        let destination = Destination {
            project: payload.project_id.clone(),
            dataset: payload.bq_output_dataset.clone(),
            table: report_config.table_name.clone(),
            location: Some(payload.region.clone()),
        };
        writer
            .write(df, &destination, report_config.write_disposition)
            .await?;
    }

    info!("Done.");
    Ok(())
}

/// Pulls every ad with its policy information and appends it to the payload's table.
pub async fn run_ad_policy_data(
    config: &Config,
    clients: &dyn ClientFactory,
    payload: AdPolicyDataPayload,
) -> Result<(), Error> {
    info!("Running the orchestration for config: {:?}", payload);

    let credentials = AdsCredentials {
        developer_token: payload.developer_token.clone(),
        login_customer_id: payload.login_customer_id,
        oauth: OAuthCredentials {
            client_id: payload.client_id.clone(),
            client_secret: payload.client_secret.clone(),
            refresh_token: payload.refresh_token.clone(),
        },
    };
    let api = clients.ads_api(credentials);
    let writer = clients.warehouse_writer();

    collect_ad_policy_data(
        api.as_ref(),
        writer.as_ref(),
        &payload,
        &Path::new(&config.gaql_dir).join(AD_POLICY_QUERY_FILE),
        today(),
    )
    .await
}

pub async fn collect_ad_policy_data(
    api: &dyn AdsApi,
    writer: &dyn WarehouseWriter,
    payload: &AdPolicyDataPayload,
    query_path: &Path,
    today: NaiveDate,
) -> Result<(), Error> {
    info!("Getting ad policy data from Google Ads.");

    let query = load_gaql_query(query_path)?;
    let rows = fetch_data_from_accounts_stream(api, &payload.customer_ids, &query).await;
    let report = process_ads_policy_data(&rows, today);
    info!("Found {} rows of data", report.num_rows());

    let ctx = SessionContext::new();
    let df = ctx.read_batch(report.to_record_batch()?)?;

    let destination = Destination {
        project: payload.bq_output_project.clone(),
        dataset: payload.bq_output_dataset.clone(),
        table: payload.bq_output_table.clone(),
        location: None,
    };
    writer
        .write(df, &destination, WriteDisposition::WriteAppend)
        .await?;

    info!("Done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::MockAdsApi;
    use crate::data::tests::rows_of;
    use crate::payload::Secret;
    use datafusion::arrow::array::RecordBatch;
    use datafusion::prelude::DataFrame;
    use serde_json::json;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingWriter {
        written: Mutex<Vec<(Destination, WriteDisposition, Vec<RecordBatch>)>>,
    }

    #[async_trait::async_trait]
    impl WarehouseWriter for RecordingWriter {
        async fn write(
            &self,
            df: DataFrame,
            destination: &Destination,
            disposition: WriteDisposition,
        ) -> Result<(), Error> {
            let batches = df.collect().await?;
            self.written
                .lock()
                .unwrap()
                .push((destination.clone(), disposition, batches));
            Ok(())
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 10, 26).unwrap()
    }

    fn report_configs() -> Vec<ReportConfig> {
        serde_json::from_value(json!([
            {
                "table_name": "Ocid",
                "write_disposition": "WRITE_TRUNCATE",
                "is_builtin": true,
                "builtin_query_name": "ocid_mapping"
            },
            {
                "table_name": "Accounts",
                "write_disposition": "WRITE_APPEND",
                "gaql_filenames": "accounts.sql"
            }
        ]))
        .unwrap()
    }

    fn payload(reports_to_run: Option<Vec<&str>>) -> PolicyMonitorPayload {
        PolicyMonitorPayload {
            reports_to_run: reports_to_run
                .map(|names| names.into_iter().map(String::from).collect()),
            project_id: "my-project".to_string(),
            bq_output_dataset: "ads_policy_monitor".to_string(),
            region: "europe-west2".to_string(),
            google_ads_login_customer_id: 1234567890,
            customer_ids: vec![111],
        }
    }

    fn mock_api() -> MockAdsApi {
        let mut api = MockAdsApi::new();
        api.expect_search_stream().returning(|customer_id, query| {
            if query.contains("optimization_score_url") {
                Ok(vec![json!({
                    "customer": {"id": customer_id.to_string()},
                    "metrics": {"optimizationScoreUrl": "https://ads.google.com/aw/overview?ocid=555"}
                })])
            } else {
                Ok(vec![json!({
                    "customer": {"id": customer_id.to_string(), "descriptiveName": "Customer A"}
                })])
            }
        });
        api
    }

    fn gaql_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join("accounts.sql"),
            "SELECT customer.id AS customer_id, customer.descriptive_name AS name FROM customer",
        )
        .unwrap();
        temp_dir
    }

    #[tokio::test]
    async fn test_run_reports_runs_every_configured_report() -> Result<(), Error> {
        let gaql = gaql_dir();
        let writer = RecordingWriter::default();

        run_reports(
            &mock_api(),
            &writer,
            &report_configs(),
            &payload(None),
            gaql.path(),
            today(),
        )
        .await?;

        let written = writer.written.lock().unwrap();
        assert_eq!(written.len(), 2);

        let (destination, disposition, batches) = &written[0];
        assert_eq!(destination.to_string(), "ads_policy_monitor.Ocid");
        assert_eq!(destination.project, "my-project");
        assert_eq!(destination.location.as_deref(), Some("europe-west2"));
        assert_eq!(*disposition, WriteDisposition::WriteTruncate);
        assert_eq!(rows_of(batches), vec![vec!["111".to_string(), "555".to_string()]]);

        let (destination, disposition, batches) = &written[1];
        assert_eq!(destination.table, "Accounts");
        assert_eq!(*disposition, WriteDisposition::WriteAppend);
        assert_eq!(
            rows_of(batches),
            vec![vec!["111".to_string(), "Customer A".to_string()]]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reports_only_runs_requested_reports() -> Result<(), Error> {
        let gaql = gaql_dir();
        let writer = RecordingWriter::default();

        run_reports(
            &mock_api(),
            &writer,
            &report_configs(),
            &payload(Some(vec!["Accounts"])),
            gaql.path(),
            today(),
        )
        .await?;

        let written = writer.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].0.table, "Accounts");
        Ok(())
    }

    #[tokio::test]
    async fn test_run_reports_unknown_report() {
        let gaql = gaql_dir();
        let writer = RecordingWriter::default();

        let result = run_reports(
            &MockAdsApi::new(),
            &writer,
            &report_configs(),
            &payload(Some(vec!["Keywords"])),
            gaql.path(),
            today(),
        )
        .await;

        assert!(matches!(
            result.unwrap_err(),
            Error::UnknownReport { name } if name == "Keywords"
        ));
        assert!(writer.written.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_collect_ad_policy_data() -> Result<(), Error> {
        let temp_dir = TempDir::new().unwrap();
        let query_path = temp_dir.path().join(AD_POLICY_QUERY_FILE);
        fs::write(
            &query_path,
            "-- every ad\nSELECT ad_group_ad.ad.id, ad_group_ad.policy_summary.policy_topic_entries FROM ad_group_ad",
        )?;

        let mut api = MockAdsApi::new();
        api.expect_search_stream()
            .withf(|_, query| {
                query == "SELECT ad_group_ad.ad.id, ad_group_ad.policy_summary.policy_topic_entries FROM ad_group_ad"
            })
            .returning(|_, _| {
                Ok(vec![json!({
                    "customer": {"id": "12345"},
                    "adGroupAd": {
                        "ad": {"id": "100"},
                        "policySummary": {"policyTopicEntries": [
                            {"topic": "TRADEMARKS_IN_AD_TEXT", "type": "LIMITED"},
                            {"topic": "ALCOHOL", "type": "LIMITED"}
                        ]}
                    }
                })])
            });

        let payload = AdPolicyDataPayload {
            bq_output_project: "my_project".to_string(),
            bq_output_dataset: "my_dataset".to_string(),
            bq_output_table: "AdPolicyData".to_string(),
            developer_token: Secret::new("abc-123"),
            refresh_token: Secret::new("1//abc123"),
            client_id: "abc123.apps.googleusercontent.com".to_string(),
            client_secret: Secret::new("client_secret"),
            login_customer_id: 1234567890,
            customer_ids: vec![111122222],
        };

        let writer = RecordingWriter::default();
        collect_ad_policy_data(&api, &writer, &payload, &query_path, today()).await?;

        let written = writer.written.lock().unwrap();
        assert_eq!(written.len(), 1);
        let (destination, disposition, batches) = &written[0];
        assert_eq!(destination.project, "my_project");
        assert_eq!(destination.to_string(), "my_dataset.AdPolicyData");
        assert_eq!(*disposition, WriteDisposition::WriteAppend);
        assert_eq!(batches.iter().map(|b| b.num_rows()).sum::<usize>(), 2);
        Ok(())
    }
}
