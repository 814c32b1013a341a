//! Verification and signing through the `cosign` CLI.

use std::path::PathBuf;
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{SignRequest, SigningBackend, VerificationBackend, VerifyOutcome};
use crate::error::{SignerError, SignerResult};
use crate::format::SignatureFormat;
use crate::reference::ImageRef;
use crate::types::{Identity, VerifyPolicy};

/// stderr fragments meaning "no signature of this format".
const NOT_FOUND_MARKERS: &[&str] = &[
    "no signatures found",
    "no matching attestations",
    "no attestations found",
];

/// stderr fragments meaning "signatures exist but did not verify".
const VERIFY_FAILURE_MARKERS: &[&str] = &[
    "none of the expected identities matched",
    "no matching signatures",
    "invalid signature",
    "verification failed",
    "failed to verify",
];

/// Environment variable cosign reads the identity token from.
const IDENTITY_TOKEN_ENV: &str = "SIGSTORE_ID_TOKEN";

/// Backend that shells out to cosign.
#[derive(Debug, Clone)]
pub struct CosignCli {
    program: PathBuf,
}

impl CosignCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    async fn run(&self, args: &[String], envs: &[(&str, &str)]) -> SignerResult<Output> {
        debug!(program = %self.program.display(), subcommand = %args[0], "running cosign");

        Command::new(&self.program)
            .args(args)
            .envs(envs.iter().copied())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future (cancellation, timeout) must not leave cosign running.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SignerError::Backend {
                message: format!("failed to run {}: {}", self.program.display(), e),
            })
    }

    async fn verify_identity(
        &self,
        image: &ImageRef,
        format: SignatureFormat,
        identity: &Identity,
        policy: &VerifyPolicy,
    ) -> SignerResult<VerifyOutcome> {
        let args = verify_args(image, format, identity, policy);
        let output = self.run(&args, &[]).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return classify_failure(&stderr).ok_or_else(|| SignerError::Backend {
                message: format!(
                    "cosign {} failed for {}: {}",
                    args[0],
                    image,
                    last_line(&stderr)
                ),
            });
        }

        let payloads = parse_payloads(format, &output.stdout)?;
        if payloads.is_empty() {
            return Ok(VerifyOutcome::NotFound);
        }

        Ok(VerifyOutcome::Verified {
            payloads,
            // cosign exits non-zero when bundle verification fails.
            bundle_verified: true,
        })
    }
}

#[async_trait]
impl VerificationBackend for CosignCli {
    async fn verify(
        &self,
        image: &ImageRef,
        format: SignatureFormat,
        policy: &VerifyPolicy,
    ) -> SignerResult<VerifyOutcome> {
        if policy.identities.is_empty() {
            return Err(SignerError::Config {
                message: "at least one trusted identity is required".to_string(),
            });
        }

        // cosign accepts a single identity per invocation: any accepted
        // identity verifying is enough, otherwise a failure outranks absence.
        let mut failure = None;
        for identity in &policy.identities {
            match self.verify_identity(image, format, identity, policy).await? {
                verified @ VerifyOutcome::Verified { .. } => return Ok(verified),
                failed @ VerifyOutcome::Failed { .. } => failure = Some(failed),
                VerifyOutcome::NotFound => {}
            }
        }

        Ok(failure.unwrap_or(VerifyOutcome::NotFound))
    }
}

#[async_trait]
impl SigningBackend for CosignCli {
    async fn sign(&self, image: &ImageRef, request: &SignRequest) -> SignerResult<()> {
        let args = sign_args(image, request);
        // Passed through the environment so the token never shows up in argv.
        let envs = [(IDENTITY_TOKEN_ENV, request.key.identity_token.as_str())];
        let output = self.run(&args, &envs).await?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            return Err(SignerError::Signing {
                image: image.to_string(),
                format: request.format,
                message: format!("cosign exited with {}: {}", output.status, last_line(&stderr)),
            });
        }

        debug!(image = %image, format = %request.format, "cosign sign finished");
        Ok(())
    }
}

pub(crate) fn verify_args(
    image: &ImageRef,
    format: SignatureFormat,
    identity: &Identity,
    policy: &VerifyPolicy,
) -> Vec<String> {
    // cosign v3 defaults to the bundle format, so both formats say it explicitly.
    let mut args = match format {
        SignatureFormat::Legacy => vec![
            "verify".to_string(),
            "--output=json".to_string(),
            "--new-bundle-format=false".to_string(),
        ],
        SignatureFormat::Bundled => vec![
            "verify-attestation".to_string(),
            "--new-bundle-format=true".to_string(),
            format!("--type={}", format.expected_type()),
        ],
    };

    args.push(format!(
        "--certificate-identity-regexp={}",
        identity.subject_regexp
    ));
    args.push(format!("--certificate-oidc-issuer={}", identity.issuer));
    if let Some(path) = policy.trusted_root.path() {
        args.push(format!("--trusted-root={}", path.display()));
    }
    args.push(image.as_str().to_string());
    args
}

pub(crate) fn sign_args(image: &ImageRef, request: &SignRequest) -> Vec<String> {
    let key = &request.key;
    let options = &request.options;

    let mut args = vec!["sign".to_string()];
    if key.skip_confirmation {
        args.push("--yes".to_string());
    }
    args.push(format!("--upload={}", options.upload));
    args.push(format!("--tlog-upload={}", options.tlog_upload));
    args.push(format!("--oidc-issuer={}", key.oidc_issuer));
    args.push(format!("--oidc-client-id={}", key.oidc_client_id));
    args.push(format!("--timeout={}s", options.timeout.as_secs().max(1)));

    // Both switches default to true in cosign v3; legacy needs them off.
    args.push(format!("--new-bundle-format={}", options.new_bundle_format));
    args.push(format!("--use-signing-config={}", options.use_signing_config));
    if !options.use_signing_config {
        // Service URLs come from the signing config otherwise; cosign rejects both.
        args.push(format!("--fulcio-url={}", key.fulcio_url));
        args.push(format!("--rekor-url={}", key.rekor_url));
    }
    if let Some(path) = request.trusted_root_path() {
        args.push(format!("--trusted-root={}", path.display()));
    }

    args.push(image.as_str().to_string());
    args
}

/// Classify a non-zero cosign exit. `None` means a transport-level failure.
pub(crate) fn classify_failure(stderr: &str) -> Option<VerifyOutcome> {
    let lower = stderr.to_ascii_lowercase();

    if NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(VerifyOutcome::NotFound);
    }
    if VERIFY_FAILURE_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(VerifyOutcome::Failed {
            reason: last_line(stderr).to_string(),
        });
    }
    None
}

/// Split cosign stdout into one payload per signature.
///
/// `verify` prints a JSON array of simple-signing payloads; `verify-attestation`
/// prints one DSSE envelope per line.
pub(crate) fn parse_payloads(format: SignatureFormat, stdout: &[u8]) -> SignerResult<Vec<Vec<u8>>> {
    let text = String::from_utf8_lossy(stdout);
    let bad_output = |e: serde_json::Error| SignerError::Backend {
        message: format!("unparseable cosign output: {e}"),
    };

    match format {
        SignatureFormat::Legacy => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(Vec::new());
            }
            let values: Vec<serde_json::Value> =
                serde_json::from_str(trimmed).map_err(bad_output)?;
            values
                .iter()
                .map(|v| serde_json::to_vec(v).map_err(bad_output))
                .collect()
        }
        SignatureFormat::Bundled => Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| line.as_bytes().to_vec())
            .collect()),
    }
}

fn last_line(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output")
}
