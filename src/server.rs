use crate::config::Config;
use crate::error::Error;
use crate::payload::{AD_POLICY_DATA_SCHEMA, POLICY_MONITOR_SCHEMA};
use crate::runner::{run_ad_policy_data, run_policy_monitor, ClientFactory, LiveClients};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use log::{error, info};
use serde_json::{json, Value};
use std::sync::Arc;

type Reply = (StatusCode, Json<Value>);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clients: Arc<dyn ClientFactory>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ads-policy-monitor", post(ads_policy_monitor))
        .route("/get-ad-policy-data", post(get_ad_policy_data))
        .with_state(state)
}

/// Serves the HTTP triggers until the process is stopped.
pub async fn serve(config: Config, host: &str, port: u16) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind((host, port)).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    let state = AppState {
        clients: Arc::new(LiveClients::new(config.clone())),
        config: Arc::new(config),
    };
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

async fn ads_policy_monitor(State(state): State<AppState>, body: Bytes) -> Reply {
    let payload = match POLICY_MONITOR_SCHEMA.parse(request_json(&body)) {
        Ok(payload) => payload,
        Err(err) => return failed(StatusCode::BAD_REQUEST, err),
    };

    match run_policy_monitor(&state.config, state.clients.as_ref(), payload).await {
        Ok(()) => succeeded(),
        Err(err) => {
            error!("Ads Policy Monitor run failed: {}", err);
            failed(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

async fn get_ad_policy_data(State(state): State<AppState>, body: Bytes) -> Reply {
    let payload = match AD_POLICY_DATA_SCHEMA.parse(request_json(&body)) {
        Ok(payload) => payload,
        Err(err) => return failed(StatusCode::BAD_REQUEST, err),
    };

    match run_ad_policy_data(&state.config, state.clients.as_ref(), payload).await {
        Ok(()) => succeeded(),
        Err(err) => {
            error!("Ad policy data run failed: {}", err);
            failed(StatusCode::INTERNAL_SERVER_ERROR, err)
        }
    }
}

/// Anything that is not JSON validates as `null`.
fn request_json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn succeeded() -> Reply {
    (
        StatusCode::OK,
        Json(json!({"status": "Success", "message": "Execution ran successfully"})),
    )
}

fn failed(status: StatusCode, err: Error) -> Reply {
    (
        status,
        Json(json!({"status": "Failed", "message": err.to_string()})),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_client::{AdsApi, AdsCredentials, MockAdsApi};
    use crate::warehouse::{ParquetWriter, WarehouseWriter};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct MockClients {
        output_dir: PathBuf,
    }

    impl ClientFactory for MockClients {
        fn ads_api(&self, _credentials: AdsCredentials) -> Box<dyn AdsApi> {
            let mut api = MockAdsApi::new();
            api.expect_search_stream().returning(|customer_id, _| {
                Ok(vec![serde_json::json!({
                    "customer": {"id": customer_id.to_string()},
                    "metrics": {"optimizationScoreUrl": "https://ads.google.com/aw/overview?ocid=555"}
                })])
            });
            Box::new(api)
        }

        fn warehouse_writer(&self) -> Box<dyn WarehouseWriter> {
            Box::new(ParquetWriter::new(&self.output_dir))
        }
    }

    async fn call(config: Config, path: &str, body: &str) -> (StatusCode, Value) {
        let clients = Arc::new(LiveClients::new(config.clone()));
        call_with(config, clients, path, body).await
    }

    async fn call_with(
        config: Config,
        clients: Arc<dyn ClientFactory>,
        path: &str,
        body: &str,
    ) -> (StatusCode, Value) {
        let state = AppState {
            config: Arc::new(config),
            clients,
        };
        let response = build_router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn ad_policy_body() -> String {
        json!({
            "bq_output_project": "my_project",
            "bq_output_dataset": "my_dataset",
            "bq_output_table": "AdPolicyData",
            "developer_token": "abc-123",
            "refresh_token": "1//abc123",
            "client_id": "abc123.apps.googleusercontent.com",
            "client_secret": "client_secret",
            "login_customer_id": 1234567890,
            "customer_ids": [111122222]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_missing_required_property_is_bad_request() {
        let (status, body) = call(
            Config::for_tests(),
            "/ads-policy-monitor",
            r#"{"project_id": "my-project", "bq_output_dataset": "apm", "region": "EU", "google_ads_login_customer_id": 1}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            json!({"status": "Failed", "message": "'customer_ids' is a required property"})
        );
    }

    #[tokio::test]
    async fn test_unparseable_body_is_bad_request() {
        let (status, body) = call(Config::for_tests(), "/get-ad-policy-data", "not json").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "null is not of type 'object'");
    }

    #[tokio::test]
    async fn test_wrong_type_is_bad_request() {
        let (status, body) = call(
            Config::for_tests(),
            "/ads-policy-monitor",
            r#"{"project_id": "my-project", "bq_output_dataset": "apm", "region": "EU",
                "google_ads_login_customer_id": 1, "customer_ids": 123}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "123 is not of type 'array'");
    }

    #[tokio::test]
    async fn test_missing_credentials_is_server_error() {
        let (status, body) = call(
            Config::for_tests(),
            "/ads-policy-monitor",
            r#"{"project_id": "my-project", "bq_output_dataset": "apm", "region": "EU",
                "google_ads_login_customer_id": 1, "customer_ids": [123]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "Failed");
    }

    #[tokio::test]
    async fn test_missing_query_file_is_server_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::for_tests();
        config.gaql_dir = temp_dir.path().to_string_lossy().to_string();

        let (status, body) = call(config, "/get-ad-policy-data", &ad_policy_body()).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["status"], "Failed");
    }

    #[tokio::test]
    async fn test_successful_run_replies_success() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{"reports": [{
                "table_name": "Ocid",
                "write_disposition": "WRITE_TRUNCATE",
                "is_builtin": true,
                "builtin_query_name": "ocid_mapping"
            }]}"#,
        )
        .unwrap();

        let mut config = Config::for_tests();
        config.report_config = config_path.to_string_lossy().to_string();
        config.developer_token = Some("abc-123".to_string());
        config.client_id = Some("abc123.apps.googleusercontent.com".to_string());
        config.client_secret = Some("client_secret".to_string());
        config.refresh_token = Some("1//abc123".to_string());

        let output_dir = temp_dir.path().join("out");
        let clients = Arc::new(MockClients {
            output_dir: output_dir.clone(),
        });

        let (status, body) = call_with(
            config,
            clients,
            "/ads-policy-monitor",
            r#"{"project_id": "my-project", "bq_output_dataset": "apm", "region": "EU",
                "google_ads_login_customer_id": 1, "customer_ids": [123],
                "reports_to_run": ["Ocid"]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "Success", "message": "Execution ran successfully"})
        );
        assert_eq!(fs::read_dir(output_dir.join("apm").join("Ocid")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_synthetic_data_flag_of_wrong_type_is_bad_request() {
        let (status, body) = call(
            Config::for_tests(),
            "/ads-policy-monitor",
            r#"{"project_id": "my-project", "bq_output_dataset": "apm", "region": "EU",
                "google_ads_login_customer_id": 1, "customer_ids": [123],
                "use_synthetic_data": "yes"}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "\"yes\" is not of type 'boolean'");
    }
}
