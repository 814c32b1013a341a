//! Signing dispatch: sign only the formats an image is missing.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument};

use crate::auth::CredentialCache;
use crate::backend::{SignRequest, SigningBackend};
use crate::error::{SignerError, SignerResult};
use crate::format::SignatureFormat;
use crate::reference::ImageRef;
use crate::types::{SignatureStatus, SigstoreEndpoints, TrustedRoot};

/// Drives the signing backend for the formats missing from a [`SignatureStatus`].
pub struct SigningDispatcher {
    backend: Arc<dyn SigningBackend>,
    credentials: Arc<CredentialCache>,
    endpoints: SigstoreEndpoints,
    trusted_root: TrustedRoot,
}

impl SigningDispatcher {
    pub fn new(
        backend: Arc<dyn SigningBackend>,
        credentials: Arc<CredentialCache>,
        endpoints: SigstoreEndpoints,
        trusted_root: TrustedRoot,
    ) -> Self {
        Self {
            backend,
            credentials,
            endpoints,
            trusted_root,
        }
    }

    /// Sign every format missing from `status`, legacy first.
    ///
    /// The credential is obtained once, before the first signing call, and
    /// shared by both formats. The first failure aborts the remaining formats.
    /// Returns the formats that were signed.
    #[instrument(skip(self, image, status), fields(image = %image))]
    pub async fn sign(
        &self,
        image: &ImageRef,
        status: SignatureStatus,
        provider: &str,
        device_flow: bool,
        timeout: Duration,
    ) -> SignerResult<Vec<SignatureFormat>> {
        let missing = SignatureFormat::missing(&status);
        if missing.is_empty() {
            return Err(SignerError::NothingToSign {
                image: image.to_string(),
            });
        }

        let credential = self
            .credentials
            .get_token(provider, device_flow)
            .await
            .map_err(|e| e.while_signing(image.as_str()))?;

        for &format in &missing {
            println!("Signing {format} signature for image: {image}");

            let request = SignRequest::new(
                format,
                &self.endpoints,
                credential.token().to_string(),
                self.trusted_root.clone(),
                timeout,
            );

            match tokio::time::timeout(timeout, self.backend.sign(image, &request)).await {
                Err(_) => {
                    return Err(SignerError::SigningTimeout {
                        image: image.to_string(),
                        format,
                        timeout,
                    })
                }
                Ok(Err(SignerError::Backend { message })) => {
                    return Err(SignerError::Signing {
                        image: image.to_string(),
                        format,
                        message,
                    })
                }
                Ok(Err(e)) => return Err(e),
                Ok(Ok(())) => info!(format = %format, "signature uploaded"),
            }
        }

        Ok(missing)
    }
}
