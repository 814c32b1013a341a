//! Collaborator interfaces: trust verification and signing.
//!
//! The cryptography, registry access and transparency-log protocols live
//! behind these traits. [`cosign::CosignCli`] implements both by driving the
//! `cosign` executable.

pub mod cosign;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::SignerResult;
use crate::format::SignatureFormat;
use crate::reference::ImageRef;
use crate::types::{SigstoreEndpoints, TrustedRoot, VerifyPolicy};

pub use cosign::CosignCli;

/// Outcome of querying one signature format on one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// Signatures of this format exist and passed verification against the
    /// identity policy.
    Verified {
        /// Raw payload of every returned signature.
        payloads: Vec<Vec<u8>>,

        /// Whether bundle-level verification (tlog / timestamp) succeeded.
        bundle_verified: bool,
    },

    /// No signature of this format exists.
    NotFound,

    /// Signatures exist but did not verify.
    Failed { reason: String },
}

/// Trust-verification backend.
#[async_trait]
pub trait VerificationBackend: Send + Sync {
    /// Query `format` signatures on `image`.
    ///
    /// Transport failures (network, registry auth, bad reference) are `Err`;
    /// everything the backend could classify is an `Ok` outcome.
    async fn verify(
        &self,
        image: &ImageRef,
        format: SignatureFormat,
        policy: &VerifyPolicy,
    ) -> SignerResult<VerifyOutcome>;
}

/// Key and identity options for one signing call.
#[derive(Debug, Clone)]
pub struct KeyOptions {
    pub fulcio_url: String,
    pub rekor_url: String,
    pub oidc_issuer: String,
    pub oidc_client_id: String,
    pub identity_token: String,
    pub trusted_root: TrustedRoot,
    pub skip_confirmation: bool,
    pub new_bundle_format: bool,
}

/// Signing options for one signing call.
#[derive(Debug, Clone)]
pub struct SignOptions {
    pub upload: bool,
    pub tlog_upload: bool,
    pub new_bundle_format: bool,
    pub use_signing_config: bool,
    pub timeout: Duration,
}

/// Everything the signing backend needs to produce one signature.
#[derive(Debug, Clone)]
pub struct SignRequest {
    pub format: SignatureFormat,
    pub key: KeyOptions,
    pub options: SignOptions,
}

impl SignRequest {
    /// Build the request for `format`, applying its signing flags.
    pub fn new(
        format: SignatureFormat,
        endpoints: &SigstoreEndpoints,
        identity_token: String,
        trusted_root: TrustedRoot,
        timeout: Duration,
    ) -> Self {
        let flags = format.signing_flags();
        Self {
            format,
            key: KeyOptions {
                fulcio_url: endpoints.fulcio_url.clone(),
                rekor_url: endpoints.rekor_url.clone(),
                oidc_issuer: endpoints.oidc_issuer.clone(),
                oidc_client_id: endpoints.oidc_client_id.clone(),
                identity_token,
                trusted_root,
                skip_confirmation: true,
                new_bundle_format: flags.new_bundle_format,
            },
            options: SignOptions {
                upload: true,
                tlog_upload: true,
                new_bundle_format: flags.new_bundle_format,
                use_signing_config: flags.use_signing_config,
                timeout,
            },
        }
    }

    pub fn trusted_root_path(&self) -> Option<&PathBuf> {
        self.key.trusted_root.path()
    }
}

/// Signing backend: signs and uploads one signature format.
#[async_trait]
pub trait SigningBackend: Send + Sync {
    async fn sign(&self, image: &ImageRef, request: &SignRequest) -> SignerResult<()>;
}
