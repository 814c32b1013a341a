//! Shared data types: signature state, identity policy, payload schemas and
//! configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Type tag carried in `critical.type` of a legacy cosign signature payload.
pub const COSIGN_SIGNATURE_TYPE: &str = "cosign container image signature";

/// In-toto predicate type of a bundled cosign signature.
pub const COSIGN_SIGN_PREDICATE_TYPE: &str = "https://sigstore.dev/cosign/sign/v1";

/// Public-good Sigstore endpoints.
pub const DEFAULT_FULCIO_URL: &str = "https://fulcio.sigstore.dev";
pub const DEFAULT_REKOR_URL: &str = "https://rekor.sigstore.dev";
pub const DEFAULT_OIDC_ISSUER: &str = "https://oauth2.sigstore.dev/auth";
pub const DEFAULT_OIDC_CLIENT_ID: &str = "sigstore";

/// Observed signature state of one image.
///
/// A snapshot taken during inspection; nothing stops another signer from
/// changing the image afterwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignatureStatus {
    pub has_legacy: bool,
    pub has_bundle: bool,
}

impl SignatureStatus {
    /// Both formats are present.
    pub fn is_fully_signed(&self) -> bool {
        self.has_legacy && self.has_bundle
    }
}

/// Accepted signer identity: an OIDC issuer plus a subject regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub issuer: String,
    pub subject_regexp: String,
}

impl Identity {
    pub fn new(issuer: impl Into<String>, subject_regexp: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            subject_regexp: subject_regexp.into(),
        }
    }
}

/// Root material defining which CAs and transparency logs are trusted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustedRoot {
    /// The public Sigstore root, as distributed via TUF.
    #[default]
    Public,

    /// An explicit `trusted_root.json`.
    File(PathBuf),
}

impl TrustedRoot {
    pub fn from_option(path: Option<PathBuf>) -> Self {
        path.map_or(Self::Public, Self::File)
    }

    /// Path to pass to the backend, if not the public root.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Public => None,
            Self::File(path) => Some(path),
        }
    }
}

/// Verification policy shared by every image in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyPolicy {
    pub identities: Vec<Identity>,
    pub trusted_root: TrustedRoot,
}

impl VerifyPolicy {
    pub fn new(identities: Vec<Identity>, trusted_root: TrustedRoot) -> Self {
        Self {
            identities,
            trusted_root,
        }
    }
}

/// Legacy ("simple signing") cosign payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleContainerImage {
    pub critical: Critical,

    #[serde(default)]
    pub optional: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `critical` section of a simple-signing payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critical {
    #[serde(default)]
    pub identity: CriticalIdentity,
    #[serde(default)]
    pub image: CriticalImage,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticalIdentity {
    #[serde(rename = "docker-reference")]
    pub docker_reference: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriticalImage {
    #[serde(rename = "docker-manifest-digest")]
    pub docker_manifest_digest: String,
}

/// DSSE envelope structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsseEnvelope {
    /// Payload type (e.g., "application/vnd.in-toto+json").
    #[serde(rename = "payloadType")]
    pub payload_type: String,

    /// Base64-encoded payload.
    pub payload: String,

    /// Signatures.
    #[serde(default)]
    pub signatures: Vec<DsseSignature>,
}

/// DSSE signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DsseSignature {
    #[serde(rename = "keyid", default)]
    pub key_id: String,

    #[serde(rename = "sig")]
    pub signature: String,
}

/// In-toto statement (v0.1 / v1 share the fields used here).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InTotoStatement {
    #[serde(rename = "_type")]
    pub statement_type: String,

    #[serde(rename = "predicateType")]
    pub predicate_type: String,

    #[serde(default)]
    pub subject: Vec<serde_json::Value>,

    #[serde(default)]
    pub predicate: serde_json::Value,
}

/// Sigstore service endpoints used when signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigstoreEndpoints {
    #[serde(default = "default_fulcio_url")]
    pub fulcio_url: String,

    #[serde(default = "default_rekor_url")]
    pub rekor_url: String,

    #[serde(default = "default_oidc_issuer")]
    pub oidc_issuer: String,

    #[serde(default = "default_oidc_client_id")]
    pub oidc_client_id: String,
}

fn default_fulcio_url() -> String {
    DEFAULT_FULCIO_URL.to_string()
}

fn default_rekor_url() -> String {
    DEFAULT_REKOR_URL.to_string()
}

fn default_oidc_issuer() -> String {
    DEFAULT_OIDC_ISSUER.to_string()
}

fn default_oidc_client_id() -> String {
    DEFAULT_OIDC_CLIENT_ID.to_string()
}

impl Default for SigstoreEndpoints {
    fn default() -> Self {
        Self {
            fulcio_url: default_fulcio_url(),
            rekor_url: default_rekor_url(),
            oidc_issuer: default_oidc_issuer(),
            oidc_client_id: default_oidc_client_id(),
        }
    }
}

/// Signer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Sigstore endpoints.
    #[serde(default)]
    pub endpoints: SigstoreEndpoints,

    /// Path (or name on `PATH`) of the cosign executable.
    #[serde(default = "default_cosign_path")]
    pub cosign_path: PathBuf,

    /// Explicit trusted root; public Sigstore root when unset.
    #[serde(default)]
    pub trusted_root: Option<PathBuf>,

    /// Timeout for each signing call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Pre-issued identity token, bypassing the interactive flow.
    #[serde(default, skip_serializing)]
    pub identity_token: Option<String>,
}

fn default_cosign_path() -> PathBuf {
    PathBuf::from("cosign")
}

fn default_timeout() -> u64 {
    300
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            endpoints: SigstoreEndpoints::default(),
            cosign_path: default_cosign_path(),
            trusted_root: None,
            timeout_secs: default_timeout(),
            identity_token: None,
        }
    }
}

impl SignerConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `IMAGE_SIGNER_COSIGN` | cosign executable |
    /// | `IMAGE_SIGNER_FULCIO_URL` | Fulcio URL |
    /// | `IMAGE_SIGNER_REKOR_URL` | Rekor URL |
    /// | `IMAGE_SIGNER_OIDC_ISSUER` | OIDC issuer used to obtain tokens |
    /// | `IMAGE_SIGNER_OIDC_CLIENT_ID` | OIDC client id |
    /// | `IMAGE_SIGNER_TRUSTED_ROOT` | Path to trusted_root.json |
    /// | `IMAGE_SIGNER_TIMEOUT` | Signing timeout in seconds |
    /// | `SIGSTORE_ID_TOKEN` | Pre-issued identity token |
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        Self {
            endpoints: SigstoreEndpoints {
                fulcio_url: var("IMAGE_SIGNER_FULCIO_URL").unwrap_or_else(default_fulcio_url),
                rekor_url: var("IMAGE_SIGNER_REKOR_URL").unwrap_or_else(default_rekor_url),
                oidc_issuer: var("IMAGE_SIGNER_OIDC_ISSUER").unwrap_or_else(default_oidc_issuer),
                oidc_client_id: var("IMAGE_SIGNER_OIDC_CLIENT_ID")
                    .unwrap_or_else(default_oidc_client_id),
            },
            cosign_path: var("IMAGE_SIGNER_COSIGN")
                .map(PathBuf::from)
                .unwrap_or_else(default_cosign_path),
            trusted_root: var("IMAGE_SIGNER_TRUSTED_ROOT").map(PathBuf::from),
            timeout_secs: var("IMAGE_SIGNER_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            identity_token: var("SIGSTORE_ID_TOKEN"),
        }
    }

    /// Signing timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Set the cosign executable.
    pub fn with_cosign_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cosign_path = path.into();
        self
    }

    /// Set the trusted root file.
    pub fn with_trusted_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.trusted_root = Some(path.into());
        self
    }

    /// Set the signing timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs();
        self
    }

    /// Set the OIDC issuer used for token issuance.
    pub fn with_oidc_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.endpoints.oidc_issuer = issuer.into();
        self
    }

    /// Use a pre-issued identity token.
    pub fn with_identity_token(mut self, token: impl Into<String>) -> Self {
        self.identity_token = Some(token.into());
        self
    }

    /// Trusted root selection derived from this config.
    pub fn trusted_root(&self) -> TrustedRoot {
        TrustedRoot::from_option(self.trusted_root.clone())
    }
}
