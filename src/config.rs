use clap::Args as ClapArgs;

const DEFAULT_ADS_API_URL: &str = "https://googleads.googleapis.com";
const DEFAULT_ADS_API_VERSION: &str = "v14";
const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com";
const REPORT_CONFIG_PATH: &str = "config.json";
const GAQL_DIR: &str = "gaql";

#[derive(ClapArgs, Clone, Debug)]
pub struct Config {
    #[arg(long, default_value = DEFAULT_ADS_API_URL, env = "GOOGLE_ADS_API_URL")]
    pub(crate) ads_api_url: String,

    #[arg(long, default_value = DEFAULT_ADS_API_VERSION, env = "GOOGLE_ADS_API_VERSION")]
    pub(crate) ads_api_version: String,

    #[arg(long, env = "GOOGLE_ADS_DEVELOPER_TOKEN", hide_env_values = true)]
    pub(crate) developer_token: Option<String>,

    #[arg(long, env = "GOOGLE_ADS_REFRESH_TOKEN", hide_env_values = true)]
    pub(crate) refresh_token: Option<String>,

    #[arg(long, env = "GOOGLE_ADS_CLIENT_ID")]
    pub(crate) client_id: Option<String>,

    #[arg(long, env = "GOOGLE_ADS_CLIENT_SECRET", hide_env_values = true)]
    pub(crate) client_secret: Option<String>,

    #[arg(long, default_value = DEFAULT_OAUTH_TOKEN_URL, env = "OAUTH_TOKEN_URL")]
    pub(crate) oauth_token_url: String,

    #[arg(long, default_value = REPORT_CONFIG_PATH, env = "REPORT_CONFIG")]
    pub(crate) report_config: String,

    #[arg(long, default_value = GAQL_DIR, env = "GAQL_DIR")]
    pub(crate) gaql_dir: String,

    #[arg(long, default_value = DEFAULT_BIGQUERY_URL, env = "BIGQUERY_API_URL")]
    pub(crate) bigquery_url: String,

    /// Static BigQuery access token; the metadata server is asked when unset.
    #[arg(long, env = "BIGQUERY_ACCESS_TOKEN", hide_env_values = true)]
    pub(crate) bigquery_token: Option<String>,

    /// Write Parquet files under this directory instead of loading into BigQuery.
    #[arg(long, env = "OUTPUT_DIR")]
    pub(crate) output_dir: Option<String>,
}

#[cfg(test)]
impl Config {
    pub(crate) fn for_tests() -> Self {
        Config {
            ads_api_url: DEFAULT_ADS_API_URL.to_string(),
            ads_api_version: DEFAULT_ADS_API_VERSION.to_string(),
            developer_token: None,
            refresh_token: None,
            client_id: None,
            client_secret: None,
            oauth_token_url: DEFAULT_OAUTH_TOKEN_URL.to_string(),
            report_config: REPORT_CONFIG_PATH.to_string(),
            gaql_dir: GAQL_DIR.to_string(),
            bigquery_url: DEFAULT_BIGQUERY_URL.to_string(),
            bigquery_token: None,
            output_dir: None,
        }
    }
}
