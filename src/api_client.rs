use crate::auth::{refresh_access_token, OAuthCredentials};
use crate::config::Config;
use crate::error::Error;
use crate::payload::Secret;
use log::info;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait AdsApi: Send + Sync + 'static {
    /// Runs a GAQL query for one customer account.
    /// # Arguments
    /// * `customer_id` - The account the query runs against.
    /// * `query` - The query text, already free of aliases and comments.
    /// # Returns
    /// A Result containing either every result row, as returned by the API, or an Error.
    async fn search_stream(&self, customer_id: i64, query: &str) -> Result<Vec<Value>, Error>;
}

/// Everything the Google Ads API needs to authorise a request.
#[derive(Clone, Debug)]
pub struct AdsCredentials {
    pub developer_token: Secret,
    pub login_customer_id: i64,
    pub oauth: OAuthCredentials,
}

impl AdsCredentials {
    /// Builds credentials from the process configuration.
    pub fn from_config(config: &Config, login_customer_id: i64) -> Result<Self, Error> {
        Ok(AdsCredentials {
            developer_token: Secret::new(required(&config.developer_token, "GOOGLE_ADS_DEVELOPER_TOKEN")?),
            login_customer_id,
            oauth: OAuthCredentials {
                client_id: required(&config.client_id, "GOOGLE_ADS_CLIENT_ID")?,
                client_secret: Secret::new(required(&config.client_secret, "GOOGLE_ADS_CLIENT_SECRET")?),
                refresh_token: Secret::new(required(&config.refresh_token, "GOOGLE_ADS_REFRESH_TOKEN")?),
            },
        })
    }
}

fn required(value: &Option<String>, name: &str) -> Result<String, Error> {
    value.clone().ok_or_else(|| Error::MissingCredential {
        name: name.to_string(),
    })
}

pub struct ApiClient {
    client: Client,
    base_url: String,
    api_version: String,
    token_url: String,
    credentials: AdsCredentials,
    access_token: OnceCell<Secret>,
}

#[derive(Deserialize)]
struct SearchStreamBatch {
    #[serde(default)]
    results: Vec<Value>,
}

impl ApiClient {
    pub fn new(config: &Config, credentials: AdsCredentials) -> Self {
        ApiClient {
            client: Client::new(),
            base_url: config.ads_api_url.to_string(),
            api_version: config.ads_api_version.to_string(),
            token_url: config.oauth_token_url.to_string(),
            credentials,
            access_token: OnceCell::new(),
        }
    }

    async fn access_token(&self) -> Result<&Secret, Error> {
        self.access_token
            .get_or_try_init(|| {
                refresh_access_token(&self.client, &self.token_url, &self.credentials.oauth)
            })
            .await
    }

    fn search_stream_url(&self, customer_id: i64) -> Result<Url, Error> {
        let customer = customer_id.to_string();
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| Error::UrlParsingFailed(url::ParseError::SetHostOnCannotBeABaseUrl))?
            .pop_if_empty()
            .extend([
                self.api_version.as_str(),
                "customers",
                customer.as_str(),
                "googleAds:searchStream",
            ]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl AdsApi for ApiClient {
    async fn search_stream(&self, customer_id: i64, query: &str) -> Result<Vec<Value>, Error> {
        let url = self.search_stream_url(customer_id)?;
        let token = self.access_token().await?;

        info!("Fetching data from Google Ads for customer: {}", customer_id);

        let resp = self
            .client
            .post(url)
            .bearer_auth(token.expose())
            .header("developer-token", self.credentials.developer_token.expose())
            .header(
                "login-customer-id",
                self.credentials.login_customer_id.to_string(),
            )
            .json(&json!({ "query": query }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(Error::AdsApiFailure {
                customer_id,
                status: status.as_u16(),
                message,
            });
        }

        let batches: Vec<SearchStreamBatch> = resp.json().await?;

        Ok(batches
            .into_iter()
            .flat_map(|batch| batch.results)
            .collect())
    }
}
