use crate::error::Error;
use crate::payload::Secret;
use log::info;
use reqwest::Client;
use serde::Deserialize;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// OAuth client credentials plus the refresh token granted to them.
#[derive(Clone, Debug)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: Secret,
    pub refresh_token: Secret,
}

/// Exchanges a refresh token for an access token.
pub async fn refresh_access_token(
    client: &Client,
    token_url: &str,
    credentials: &OAuthCredentials,
) -> Result<Secret, Error> {
    info!("Requesting OAuth access token");

    let resp = client
        .post(token_url)
        .form(&[
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.expose()),
            ("refresh_token", credentials.refresh_token.expose()),
            ("grant_type", "refresh_token"),
        ])
        .send()
        .await?;

    read_token(resp).await
}

/// Asks the GCE metadata server for the default service account's access token.
pub async fn metadata_access_token(client: &Client) -> Result<Secret, Error> {
    let resp = client
        .get(METADATA_TOKEN_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?;

    read_token(resp).await
}

async fn read_token(resp: reqwest::Response) -> Result<Secret, Error> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::Auth {
            message: format!("token endpoint responded with {}: {}", status, body),
        });
    }

    let token: TokenResponse = resp.json().await?;
    Ok(Secret::new(token.access_token))
}
