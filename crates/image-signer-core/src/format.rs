//! Signature formats.
//!
//! An image counts as fully signed only when it carries both formats:
//! - legacy: simple-signing payload, `critical.type` = [`COSIGN_SIGNATURE_TYPE`]
//! - bundled: DSSE envelope around an in-toto statement with predicate type
//!   [`COSIGN_SIGN_PREDICATE_TYPE`]
//!
//! Everything that differs between the two lives here as data, so the
//! inspector and dispatcher share one control flow.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::types::{
    DsseEnvelope, InTotoStatement, SignatureStatus, SimpleContainerImage,
    COSIGN_SIGNATURE_TYPE, COSIGN_SIGN_PREDICATE_TYPE,
};

/// One of the two parallel signature formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureFormat {
    Legacy,
    Bundled,
}

/// Format-specific switches passed to the signing backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatSigningFlags {
    /// Emit a Sigstore bundle instead of the legacy signature layout.
    pub new_bundle_format: bool,

    /// Take service URLs from the Sigstore signing config.
    pub use_signing_config: bool,
}

impl SignatureFormat {
    /// Both formats, in signing order.
    pub const ALL: [SignatureFormat; 2] = [SignatureFormat::Legacy, SignatureFormat::Bundled];

    /// Short human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Bundled => "bundled",
        }
    }

    /// Type tag every verified payload of this format must carry.
    pub fn expected_type(self) -> &'static str {
        match self {
            Self::Legacy => COSIGN_SIGNATURE_TYPE,
            Self::Bundled => COSIGN_SIGN_PREDICATE_TYPE,
        }
    }

    pub fn signing_flags(self) -> FormatSigningFlags {
        match self {
            Self::Legacy => FormatSigningFlags::default(),
            Self::Bundled => FormatSigningFlags {
                new_bundle_format: true,
                use_signing_config: true,
            },
        }
    }

    /// Whether `status` records this format as present.
    pub fn is_present(self, status: &SignatureStatus) -> bool {
        match self {
            Self::Legacy => status.has_legacy,
            Self::Bundled => status.has_bundle,
        }
    }

    pub(crate) fn set_present(self, status: &mut SignatureStatus, present: bool) {
        match self {
            Self::Legacy => status.has_legacy = present,
            Self::Bundled => status.has_bundle = present,
        }
    }

    /// Formats missing from `status`, in signing order.
    pub fn missing(status: &SignatureStatus) -> Vec<SignatureFormat> {
        Self::ALL
            .into_iter()
            .filter(|format| !format.is_present(status))
            .collect()
    }

    /// Check that one verified payload matches this format's schema.
    ///
    /// Returns the reason on mismatch or decode failure.
    pub fn check_payload(self, payload: &[u8]) -> Result<(), String> {
        let found = match self {
            Self::Legacy => {
                let info: SimpleContainerImage = serde_json::from_slice(payload)
                    .map_err(|e| format!("error unmarshaling signature payload: {e}"))?;
                info.critical.kind
            }
            Self::Bundled => {
                let envelope: DsseEnvelope = serde_json::from_slice(payload)
                    .map_err(|e| format!("error unmarshaling signature payload: {e}"))?;
                let decoded = BASE64
                    .decode(envelope.payload.as_bytes())
                    .map_err(|e| format!("error decoding signature payload: {e}"))?;
                let statement: InTotoStatement = serde_json::from_slice(&decoded)
                    .map_err(|e| format!("error unmarshaling signature statement: {e}"))?;
                statement.predicate_type
            }
        };

        if found != self.expected_type() {
            return Err(format!(
                "{} signature found but with unexpected type: {found}",
                self.label()
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for SignatureFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
