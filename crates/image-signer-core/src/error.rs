//! Error types for signature reconciliation.

use std::time::Duration;

use crate::format::SignatureFormat;

/// Signer errors.
///
/// Every variant is terminal for the batch; the only condition that is not an
/// error at all is "no signature of this format", which the verification
/// backend reports as [`crate::backend::VerifyOutcome::NotFound`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    /// Malformed image reference.
    #[error("invalid image reference: {reference} - {reason}")]
    InvalidReference { reference: String, reason: String },

    /// OIDC provider outside the supported set.
    #[error("unsupported provider: {provider}")]
    UnsupportedProvider { provider: String },

    /// Signatures exist but failed cryptographic or bundle verification.
    #[error("{format} signatures found for {image} but verification failed: {reason}")]
    VerificationFailed {
        image: String,
        format: SignatureFormat,
        reason: String,
    },

    /// A verified signature whose payload does not match the expected schema.
    #[error("{format} signature for {image} is malformed: {reason}")]
    MalformedSignature {
        image: String,
        format: SignatureFormat,
        reason: String,
    },

    /// Identity token issuance failed or was cancelled.
    #[error("error getting OIDC token: {message}")]
    Authentication { message: String },

    /// The signing backend failed.
    #[error("error signing {format} signature for image {image}: {message}")]
    Signing {
        image: String,
        format: SignatureFormat,
        message: String,
    },

    /// A signing call exceeded its timeout.
    #[error("signing {format} signature for image {image} timed out after {timeout:?}")]
    SigningTimeout {
        image: String,
        format: SignatureFormat,
        timeout: Duration,
    },

    /// Any other collaborator failure (network, registry auth, process spawn).
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Dispatch was requested for an image that already has both signatures.
    #[error("nothing to sign for {image}: both signatures are present")]
    NothingToSign { image: String },

    /// The run was interrupted.
    #[error("operation cancelled")]
    Cancelled,
}

impl SignerError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Input / config issues
            Self::InvalidReference { .. } => 1,
            Self::UnsupportedProvider { .. } => 1,
            Self::Config { .. } => 1,
            Self::NothingToSign { .. } => 1,

            // Auth issues
            Self::Authentication { .. } => 2,

            // Integrity issues
            Self::VerificationFailed { .. } => 4,
            Self::MalformedSignature { .. } => 4,

            // Signing / transport
            Self::Signing { .. } => 5,
            Self::SigningTimeout { .. } => 5,
            Self::Backend { .. } => 5,

            Self::Cancelled => 130,
        }
    }

    /// Whether the error stems from bad user input rather than a remote failure.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidReference { .. } | Self::UnsupportedProvider { .. }
        )
    }

    /// Attach the image and format of a verification query to collaborator
    /// errors, which carry neither.
    pub(crate) fn while_verifying(self, image: &str, format: SignatureFormat) -> Self {
        match self {
            Self::Backend { message } => Self::Backend {
                message: format!(
                    "error verifying {format} signature for image {image}: {message}"
                ),
            },
            other => other,
        }
    }

    /// Attach the image being signed to a token failure.
    pub(crate) fn while_signing(self, image: &str) -> Self {
        match self {
            Self::Authentication { message } => Self::Authentication {
                message: format!("failed to sign image {image}: {message}"),
            },
            other => other,
        }
    }
}

impl From<reqwest::Error> for SignerError {
    fn from(err: reqwest::Error) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

/// Result type for signer operations.
pub type SignerResult<T> = Result<T, SignerError>;
