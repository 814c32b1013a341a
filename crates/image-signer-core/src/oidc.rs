//! Identity tokens from the Sigstore OIDC issuer.
//!
//! Two flows are supported:
//! - device authorization grant (RFC 8628), for headless environments
//! - out-of-band authorization code flow with PKCE: the user opens the
//!   printed link in any browser and pastes the code back
//!
//! Both print instructions for the user; that prompt is the point of the
//! flow and is not suppressed.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use url::Url;

use crate::auth::{TokenFlow, TokenIssuer, TokenRequest};
use crate::error::{SignerError, SignerResult};

const OOB_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";
const SCOPES: &str = "openid email";
const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const DEFAULT_POLL_INTERVAL: u64 = 5;
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Subset of the OpenID provider metadata used here.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DeviceAuthorization {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    verification_uri_complete: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// PKCE verifier/challenge pair plus anti-replay values.
#[derive(Debug, Clone)]
struct Pkce {
    verifier: String,
    challenge: String,
    state: String,
    nonce: String,
}

impl Pkce {
    fn generate() -> Self {
        let verifier = random_token();
        let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
        Self {
            verifier,
            challenge,
            state: random_token(),
            nonce: random_token(),
        }
    }
}

fn random_token() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn auth_error(message: impl Into<String>) -> SignerError {
    SignerError::Authentication {
        message: message.into(),
    }
}

/// Token issuer talking to a Sigstore-style (Dex) OIDC issuer over HTTP.
#[derive(Debug, Clone)]
pub struct SigstoreOidcIssuer {
    client: reqwest::Client,
}

impl SigstoreOidcIssuer {
    pub fn new() -> SignerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("image-signer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SignerError::Config {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }

    /// Fetch `/.well-known/openid-configuration` for `issuer`.
    pub async fn discover(&self, issuer: &str) -> SignerResult<ProviderMetadata> {
        let url = format!(
            "{}/.well-known/openid-configuration",
            issuer.trim_end_matches('/')
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| auth_error(format!("OIDC discovery failed for {issuer}: {e}")))?;

        if !response.status().is_success() {
            return Err(auth_error(format!(
                "OIDC discovery failed for {issuer}: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| auth_error(format!("invalid OIDC discovery document: {e}")))
    }

    async fn device_flow(
        &self,
        metadata: &ProviderMetadata,
        request: &TokenRequest,
    ) -> SignerResult<String> {
        let endpoint = metadata
            .device_authorization_endpoint
            .as_deref()
            .ok_or_else(|| auth_error("issuer does not support the device flow"))?;
        let pkce = Pkce::generate();

        let response = self
            .client
            .post(endpoint)
            .form(&[
                ("client_id", request.client_id.as_str()),
                ("scope", SCOPES),
                ("code_challenge", pkce.challenge.as_str()),
                ("code_challenge_method", "S256"),
            ])
            .send()
            .await
            .map_err(|e| auth_error(format!("device authorization request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(format!(
                "device authorization failed: HTTP {status} - {body}"
            )));
        }

        let device: DeviceAuthorization = response
            .json()
            .await
            .map_err(|e| auth_error(format!("invalid device authorization response: {e}")))?;

        match &device.verification_uri_complete {
            Some(complete) => println!(
                "To sign in, open {complete}\n(or visit {} and enter code {})",
                device.verification_uri, device.user_code
            ),
            None => println!(
                "To sign in, visit {} and enter code {}",
                device.verification_uri, device.user_code
            ),
        }

        let mut interval = Duration::from_secs(device.interval.unwrap_or(DEFAULT_POLL_INTERVAL));
        let deadline = tokio::time::Instant::now() + Duration::from_secs(device.expires_in);

        loop {
            tokio::time::sleep(interval).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(auth_error("device code expired before authorization"));
            }

            let response = self
                .client
                .post(&metadata.token_endpoint)
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("device_code", device.device_code.as_str()),
                    ("client_id", request.client_id.as_str()),
                    ("code_verifier", pkce.verifier.as_str()),
                ])
                .send()
                .await
                .map_err(|e| auth_error(format!("token request failed: {e}")))?;

            if response.status().is_success() {
                return extract_id_token(response).await;
            }

            let body = response.text().await.unwrap_or_default();
            let error: TokenErrorResponse = serde_json::from_str(&body)
                .map_err(|_| auth_error(format!("token request failed: {body}")))?;

            match error.error.as_str() {
                "authorization_pending" => debug!("device authorization pending"),
                "slow_down" => {
                    interval += SLOW_DOWN_INCREMENT;
                    warn!(interval_secs = interval.as_secs(), "issuer asked to slow down polling");
                }
                "expired_token" => return Err(auth_error("device code expired")),
                "access_denied" => return Err(auth_error("authorization denied by user")),
                other => {
                    return Err(auth_error(format!(
                        "token request failed: {other}{}",
                        error
                            .error_description
                            .map(|d| format!(" ({d})"))
                            .unwrap_or_default()
                    )))
                }
            }
        }
    }

    async fn interactive_flow(
        &self,
        metadata: &ProviderMetadata,
        request: &TokenRequest,
        connector_id: Option<&str>,
    ) -> SignerResult<String> {
        let pkce = Pkce::generate();
        let url = authorization_url(metadata, request, connector_id, &pkce)?;

        println!("Go to the following link in a browser:\n\n\t{url}\n");
        println!("Enter verification code:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|e| auth_error(format!("failed to read verification code: {e}")))?;
        let code = line.trim();
        if code.is_empty() {
            return Err(auth_error("no verification code entered"));
        }

        let response = self
            .client
            .post(&metadata.token_endpoint)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", OOB_REDIRECT_URI),
                ("client_id", request.client_id.as_str()),
                ("code_verifier", pkce.verifier.as_str()),
            ])
            .send()
            .await
            .map_err(|e| auth_error(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(auth_error(format!(
                "code exchange failed: HTTP {status} - {body}"
            )));
        }

        extract_id_token(response).await
    }
}

#[async_trait]
impl TokenIssuer for SigstoreOidcIssuer {
    async fn issue(&self, request: &TokenRequest) -> SignerResult<String> {
        let metadata = self.discover(&request.issuer).await?;
        match request.flow {
            TokenFlow::Device => self.device_flow(&metadata, request).await,
            TokenFlow::Interactive { connector_id } => {
                self.interactive_flow(&metadata, request, connector_id).await
            }
        }
    }
}

async fn extract_id_token(response: reqwest::Response) -> SignerResult<String> {
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| auth_error(format!("invalid token response: {e}")))?;
    token
        .id_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| auth_error("token response did not contain an id_token"))
}

fn authorization_url(
    metadata: &ProviderMetadata,
    request: &TokenRequest,
    connector_id: Option<&str>,
    pkce: &Pkce,
) -> SignerResult<Url> {
    let mut url = Url::parse(&metadata.authorization_endpoint)
        .map_err(|e| auth_error(format!("invalid authorization endpoint: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", &request.client_id)
            .append_pair("redirect_uri", OOB_REDIRECT_URI)
            .append_pair("scope", SCOPES)
            .append_pair("state", &pkce.state)
            .append_pair("nonce", &pkce.nonce)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");
        if let Some(connector) = connector_id {
            query.append_pair("connector_id", connector);
        }
    }
    Ok(url)
}
