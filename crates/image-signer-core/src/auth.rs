//! Identity-token acquisition and caching.
//!
//! Signing needs a short-lived OIDC identity token. Obtaining one can open a
//! browser or print a device code, so a run must do it at most once per
//! `(provider, device_flow)` pair. [`CredentialCache`] owns that guarantee:
//!
//! ```no_run
//! use std::sync::Arc;
//! use image_signer_core::{CredentialCache, SigstoreOidcIssuer, SigstoreEndpoints};
//!
//! # async fn example() -> image_signer_core::SignerResult<()> {
//! let cache = CredentialCache::new(
//!     Arc::new(SigstoreOidcIssuer::new()?),
//!     &SigstoreEndpoints::default(),
//! );
//! let first = cache.get_token("google", true).await?;
//! let second = cache.get_token("google", true).await?; // no second prompt
//! assert_eq!(first.token(), second.token());
//! # Ok(())
//! # }
//! ```
//!
//! Tokens are never refreshed: a run is assumed to finish well within the
//! token lifetime.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{SignerError, SignerResult};
use crate::types::SigstoreEndpoints;

/// OIDC identity provider behind the Sigstore issuer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OidcProvider {
    /// Let the user pick on the issuer's selection page.
    Default,
    Google,
    Github,
    Microsoft,
}

impl OidcProvider {
    /// Parse a provider name. The empty string selects [`OidcProvider::Default`].
    pub fn parse(provider: &str) -> SignerResult<Self> {
        match provider {
            "" => Ok(Self::Default),
            "google" => Ok(Self::Google),
            "github" => Ok(Self::Github),
            "microsoft" => Ok(Self::Microsoft),
            other => Err(SignerError::UnsupportedProvider {
                provider: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "",
            Self::Google => "google",
            Self::Github => "github",
            Self::Microsoft => "microsoft",
        }
    }

    /// Connector the Sigstore issuer should route the login to.
    pub fn connector_id(self) -> Option<&'static str> {
        match self {
            Self::Default => None,
            Self::Google => Some("https://accounts.google.com"),
            Self::Github => Some("https://github.com/login/oauth"),
            Self::Microsoft => Some("https://login.microsoftonline.com"),
        }
    }
}

impl FromStr for OidcProvider {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// How the token should be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenFlow {
    /// Device authorization grant against the issuer; provider-agnostic.
    Device,

    /// Browser-based authorization, optionally pinned to a connector.
    Interactive { connector_id: Option<&'static str> },
}

/// One token issuance request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub issuer: String,
    pub client_id: String,
    pub flow: TokenFlow,
}

/// Identity-token issuer.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    /// Run the flow and return the raw identity token (JWT).
    async fn issue(&self, request: &TokenRequest) -> SignerResult<String>;
}

/// Issuer returning a token obtained out of band (e.g. `SIGSTORE_ID_TOKEN`).
#[derive(Clone)]
pub struct StaticTokenIssuer {
    token: String,
}

impl StaticTokenIssuer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenIssuer for StaticTokenIssuer {
    async fn issue(&self, _request: &TokenRequest) -> SignerResult<String> {
        debug!("using provided identity token");
        Ok(self.token.clone())
    }
}

/// An identity token and the parameters that produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
    provider: OidcProvider,
    device_flow: bool,
}

impl Credential {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn provider(&self) -> OidcProvider {
        self.provider
    }

    pub fn device_flow(&self) -> bool {
        self.device_flow
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("provider", &self.provider)
            .field("device_flow", &self.device_flow)
            .finish()
    }
}

type CredentialCell = Arc<OnceCell<SignerResult<Credential>>>;

/// Process-lifetime cache of identity tokens, keyed by `(provider, device_flow)`.
///
/// The first caller for a key runs the flow; concurrent callers for the same
/// key wait on it and all observe the single outcome, success or failure.
/// Failures are cached too and never retried within the run.
pub struct CredentialCache {
    issuer: Arc<dyn TokenIssuer>,
    oidc_issuer: String,
    client_id: String,
    cells: Mutex<HashMap<(String, bool), CredentialCell>>,
}

impl CredentialCache {
    pub fn new(issuer: Arc<dyn TokenIssuer>, endpoints: &SigstoreEndpoints) -> Self {
        Self {
            issuer,
            oidc_issuer: endpoints.oidc_issuer.clone(),
            client_id: endpoints.oidc_client_id.clone(),
            cells: Mutex::new(HashMap::new()),
        }
    }

    /// Get the token for `(provider, device_flow)`, running the flow at most once.
    pub async fn get_token(&self, provider: &str, device_flow: bool) -> SignerResult<Credential> {
        let cell = {
            let mut cells = self
                .cells
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            cells
                .entry((provider.to_string(), device_flow))
                .or_default()
                .clone()
        };

        cell.get_or_init(|| self.resolve(provider, device_flow))
            .await
            .clone()
    }

    /// Number of distinct keys requested so far.
    pub fn len(&self) -> usize {
        self.cells
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn resolve(&self, provider: &str, device_flow: bool) -> SignerResult<Credential> {
        let provider = OidcProvider::parse(provider)?;

        // Device flow always goes through the issuer itself, whatever the provider.
        let flow = if device_flow {
            TokenFlow::Device
        } else {
            TokenFlow::Interactive {
                connector_id: provider.connector_id(),
            }
        };

        let request = TokenRequest {
            issuer: self.oidc_issuer.clone(),
            client_id: self.client_id.clone(),
            flow,
        };

        info!(provider = %provider, device_flow, issuer = %request.issuer, "obtaining identity token");
        let token = self.issuer.issue(&request).await?;

        Ok(Credential {
            token,
            provider,
            device_flow,
        })
    }
}
