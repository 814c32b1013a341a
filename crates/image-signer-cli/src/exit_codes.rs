//! Process exit codes for `image-signer`.
//! These codes are part of the public contract; scripts branch on them.

use image_signer_core::SignerError;

pub const SUCCESS: i32 = 0;
pub const INPUT_ERROR: i32 = 1; // Bad reference, unsupported provider, bad config
pub const AUTH_ERROR: i32 = 2; // Identity token could not be obtained
pub const INTEGRITY_ERROR: i32 = 4; // Existing signature failed verification or is malformed
pub const SIGNING_ERROR: i32 = 5; // Signing backend, registry or transport failure
pub const INTERRUPTED: i32 = 130; // SIGINT

/// Exit code for a top-level error.
///
/// Errors that are not a [`SignerError`] (setup, I/O on our side) count as
/// input errors.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SignerError>())
        .map_or(INPUT_ERROR, SignerError::exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_codes_follow_signer_error() {
        let err = anyhow::Error::new(SignerError::Cancelled);
        assert_eq!(for_error(&err), INTERRUPTED);

        let err = anyhow::Error::new(SignerError::Authentication {
            message: "access_denied".into(),
        });
        assert_eq!(for_error(&err), AUTH_ERROR);
    }

    #[test]
    fn test_context_wrapped_error_keeps_code() {
        let err: anyhow::Result<()> = Err(SignerError::Backend {
            message: "dial tcp".into(),
        })
        .context("reconciling batch");
        assert_eq!(for_error(&err.unwrap_err()), SIGNING_ERROR);
    }

    #[test]
    fn test_foreign_error_is_input_error() {
        assert_eq!(for_error(&anyhow::anyhow!("boom")), INPUT_ERROR);
        assert_eq!(INTEGRITY_ERROR, 4);
    }
}
