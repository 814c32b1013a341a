//! Batch reconciliation.
//!
//! Images are processed strictly one at a time, in input order:
//!
//! ```text
//! PENDING -> INSPECTED -> SKIPPED
//!                      -> DISPATCHED -> DONE
//! any state -> FAILED (aborts the batch)
//! ```
//!
//! The first failure stops the run; nothing after it is touched and no
//! errors are aggregated.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::auth::{CredentialCache, OidcProvider, StaticTokenIssuer, TokenIssuer};
use crate::backend::{CosignCli, SigningBackend, VerificationBackend};
use crate::error::{SignerError, SignerResult};
use crate::format::SignatureFormat;
use crate::oidc::SigstoreOidcIssuer;
use crate::reference::ImageRef;
use crate::sign::SigningDispatcher;
use crate::types::{Identity, SignerConfig, TrustedRoot, VerifyPolicy};
use crate::verify::inspect;

/// Per-run options shared by every image in the batch.
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Accepted signer identities.
    pub identities: Vec<Identity>,

    /// OIDC provider name ("" for the issuer's selection page).
    pub provider: String,

    /// Use the device flow instead of the interactive flow.
    pub device_flow: bool,

    /// Timeout for each signing call.
    pub timeout: Duration,
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOutcome {
    /// Both formats were already present.
    Skipped,

    /// The listed formats were signed.
    Signed(Vec<SignatureFormat>),
}

/// Result of a successful run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub images: Vec<(ImageRef, ImageOutcome)>,
}

impl BatchReport {
    pub fn skipped(&self) -> usize {
        self.images
            .iter()
            .filter(|(_, o)| *o == ImageOutcome::Skipped)
            .count()
    }

    pub fn signed(&self) -> usize {
        self.images.len() - self.skipped()
    }
}

/// Reconciles a batch of images to the fully-signed state.
pub struct Reconciler {
    verifier: Arc<dyn VerificationBackend>,
    dispatcher: SigningDispatcher,
    credentials: Arc<CredentialCache>,
    trusted_root: TrustedRoot,
}

impl Reconciler {
    pub fn new(
        verifier: Arc<dyn VerificationBackend>,
        signer: Arc<dyn SigningBackend>,
        issuer: Arc<dyn TokenIssuer>,
        config: &SignerConfig,
    ) -> Self {
        let credentials = Arc::new(CredentialCache::new(issuer, &config.endpoints));
        let trusted_root = config.trusted_root();
        let dispatcher = SigningDispatcher::new(
            signer,
            credentials.clone(),
            config.endpoints.clone(),
            trusted_root.clone(),
        );

        Self {
            verifier,
            dispatcher,
            credentials,
            trusted_root,
        }
    }

    /// Build a reconciler backed by the cosign CLI and the Sigstore issuer
    /// (or the pre-issued token, when configured).
    pub fn from_config(config: &SignerConfig) -> SignerResult<Self> {
        let cosign = Arc::new(CosignCli::new(config.cosign_path.clone()));
        let issuer: Arc<dyn TokenIssuer> = match &config.identity_token {
            Some(token) => Arc::new(StaticTokenIssuer::new(token.clone())),
            None => Arc::new(SigstoreOidcIssuer::new()?),
        };

        Ok(Self::new(cosign.clone(), cosign, issuer, config))
    }

    /// The credential cache shared by every image in the run.
    pub fn credentials(&self) -> &CredentialCache {
        &self.credentials
    }

    /// Reconcile `images`, stopping at the first failure.
    pub async fn run(
        &self,
        images: &[ImageRef],
        options: &ReconcileOptions,
    ) -> SignerResult<BatchReport> {
        // Reject a bad provider before any network traffic.
        OidcProvider::parse(&options.provider)?;

        let policy = VerifyPolicy::new(options.identities.clone(), self.trusted_root.clone());
        let mut report = BatchReport::default();

        for image in images {
            let outcome = self.reconcile_one(image, &policy, options).await?;
            report.images.push((image.clone(), outcome));
        }

        info!(
            total = report.images.len(),
            skipped = report.skipped(),
            signed = report.signed(),
            "batch reconciled"
        );
        Ok(report)
    }

    /// Like [`Reconciler::run`], but abandons the batch when `shutdown`
    /// resolves. In-flight collaborator calls are dropped (child processes
    /// are killed) and no further images are started.
    pub async fn run_until<F>(
        &self,
        images: &[ImageRef],
        options: &ReconcileOptions,
        shutdown: F,
    ) -> SignerResult<BatchReport>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = shutdown => {
                warn!("interrupted, abandoning remaining images");
                Err(SignerError::Cancelled)
            }
            result = self.run(images, options) => result,
        }
    }

    #[instrument(skip(self, image, policy, options), fields(image = %image))]
    async fn reconcile_one(
        &self,
        image: &ImageRef,
        policy: &VerifyPolicy,
        options: &ReconcileOptions,
    ) -> SignerResult<ImageOutcome> {
        println!("Processing image: {image}");

        let status = inspect(self.verifier.as_ref(), image, policy).await?;

        if status.is_fully_signed() {
            println!(
                "Image is already signed with both legacy and bundled signatures, skipping signing."
            );
            return Ok(ImageOutcome::Skipped);
        }

        let signed = self
            .dispatcher
            .sign(
                image,
                status,
                &options.provider,
                options.device_flow,
                options.timeout,
            )
            .await?;

        println!("Successfully signed image: {image}");
        Ok(ImageOutcome::Signed(signed))
    }
}
