//! Signature-state reconciliation for container images.
//!
//! An image is fully signed when it carries both a legacy cosign signature and
//! a bundled (DSSE / in-toto) one, so old and new verification clients can
//! trust it. This crate provides:
//!
//! - Inspection of both formats, distinguishing "absent" from "invalid"
//! - Signing of only the missing formats
//! - One identity token per `(provider, device_flow)` for the whole run
//! - Fail-fast batch reconciliation with skip of fully signed images
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use image_signer_core::{Identity, ImageRef, ReconcileOptions, Reconciler, SignerConfig};
//!
//! # async fn example() -> image_signer_core::SignerResult<()> {
//! let config = SignerConfig::from_env();
//! let reconciler = Reconciler::from_config(&config)?;
//!
//! let images = vec![ImageRef::parse("ghcr.io/org/app:v1.0.0")?];
//! let options = ReconcileOptions {
//!     identities: vec![Identity::new("https://accounts.google.com", r"@example\.com$")],
//!     provider: "google".to_string(),
//!     device_flow: true,
//!     timeout: Duration::from_secs(300),
//! };
//!
//! let report = reconciler.run(&images, &options).await?;
//! println!("signed {} image(s)", report.signed());
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! | Environment Variable | Description |
//! |---------------------|-------------|
//! | `IMAGE_SIGNER_COSIGN` | cosign executable (default: `cosign`) |
//! | `IMAGE_SIGNER_FULCIO_URL` | Fulcio URL (default: `https://fulcio.sigstore.dev`) |
//! | `IMAGE_SIGNER_REKOR_URL` | Rekor URL (default: `https://rekor.sigstore.dev`) |
//! | `IMAGE_SIGNER_OIDC_ISSUER` | Token issuer (default: `https://oauth2.sigstore.dev/auth`) |
//! | `IMAGE_SIGNER_OIDC_CLIENT_ID` | OIDC client id (default: `sigstore`) |
//! | `IMAGE_SIGNER_TRUSTED_ROOT` | trusted_root.json (default: public Sigstore root) |
//! | `IMAGE_SIGNER_TIMEOUT` | Signing timeout in seconds (default: 300) |
//! | `SIGSTORE_ID_TOKEN` | Pre-issued identity token |

pub mod auth;
pub mod backend;
pub mod error;
pub mod format;
pub mod oidc;
pub mod reconcile;
pub mod reference;
pub mod sign;
pub mod types;
pub mod verify;

// Re-export main types
pub use auth::{
    Credential, CredentialCache, OidcProvider, StaticTokenIssuer, TokenFlow, TokenIssuer,
    TokenRequest,
};
pub use backend::{
    CosignCli, KeyOptions, SignOptions, SignRequest, SigningBackend, VerificationBackend,
    VerifyOutcome,
};
pub use error::{SignerError, SignerResult};
pub use format::{FormatSigningFlags, SignatureFormat};
pub use oidc::SigstoreOidcIssuer;
pub use reconcile::{BatchReport, ImageOutcome, ReconcileOptions, Reconciler};
pub use reference::ImageRef;
pub use sign::SigningDispatcher;
pub use types::{
    Identity, SignatureStatus, SignerConfig, SigstoreEndpoints, TrustedRoot, VerifyPolicy,
    COSIGN_SIGNATURE_TYPE, COSIGN_SIGN_PREDICATE_TYPE, DEFAULT_FULCIO_URL, DEFAULT_OIDC_CLIENT_ID,
    DEFAULT_OIDC_ISSUER, DEFAULT_REKOR_URL,
};
pub use verify::inspect;
