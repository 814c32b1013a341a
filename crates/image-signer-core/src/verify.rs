//! Signature state inspection.
//!
//! For each format independently:
//! 1. ask the verification backend, scoped to the batch identity policy
//! 2. `NotFound` → format absent (not an error)
//! 3. found but verification or bundle verification failed → `VerificationFailed`
//! 4. verified, but any payload off-schema → `MalformedSignature`
//! 5. transport errors propagate, tagged with the image and format

use tracing::{debug, instrument};

use crate::backend::{VerificationBackend, VerifyOutcome};
use crate::error::{SignerError, SignerResult};
use crate::format::SignatureFormat;
use crate::reference::ImageRef;
use crate::types::{SignatureStatus, VerifyPolicy};

/// Determine which signature formats `image` carries.
#[instrument(skip(backend, image, policy), fields(image = %image))]
pub async fn inspect(
    backend: &dyn VerificationBackend,
    image: &ImageRef,
    policy: &VerifyPolicy,
) -> SignerResult<SignatureStatus> {
    let mut status = SignatureStatus::default();

    for format in SignatureFormat::ALL {
        let present = inspect_format(backend, image, format, policy).await?;
        format.set_present(&mut status, present);
    }

    debug!(
        has_legacy = status.has_legacy,
        has_bundle = status.has_bundle,
        "inspected signatures"
    );
    Ok(status)
}

async fn inspect_format(
    backend: &dyn VerificationBackend,
    image: &ImageRef,
    format: SignatureFormat,
    policy: &VerifyPolicy,
) -> SignerResult<bool> {
    let outcome = backend
        .verify(image, format, policy)
        .await
        .map_err(|e| e.while_verifying(image.as_str(), format))?;

    match outcome {
        VerifyOutcome::NotFound => Ok(false),
        VerifyOutcome::Failed { reason } => Err(SignerError::VerificationFailed {
            image: image.to_string(),
            format,
            reason,
        }),
        VerifyOutcome::Verified {
            bundle_verified: false,
            ..
        } => Err(SignerError::VerificationFailed {
            image: image.to_string(),
            format,
            reason: "bundle verification failed".to_string(),
        }),
        VerifyOutcome::Verified {
            payloads,
            bundle_verified: true,
        } => {
            for payload in &payloads {
                format
                    .check_payload(payload)
                    .map_err(|reason| SignerError::MalformedSignature {
                        image: image.to_string(),
                        format,
                        reason,
                    })?;
            }
            Ok(true)
        }
    }
}
