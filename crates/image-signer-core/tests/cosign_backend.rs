//! CosignCli against a scripted stand-in for the cosign binary.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use image_signer_core::{
    inspect, CosignCli, Identity, ImageRef, SignRequest, SignatureFormat, SignerError,
    SigningBackend, SigstoreEndpoints, TrustedRoot, VerificationBackend, VerifyOutcome,
    VerifyPolicy,
};
use tempfile::TempDir;

const LEGACY_JSON: &str = r#"[{"critical":{"identity":{"docker-reference":"ghcr.io/org/app"},"image":{"docker-manifest-digest":"sha256:abc"},"type":"cosign container image signature"},"optional":null}]"#;

/// `in-toto` statement with the cosign sign predicate, base64 encoded.
fn attestation_line() -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    let statement = r#"{"_type":"https://in-toto.io/Statement/v1","subject":[],"predicateType":"https://sigstore.dev/cosign/sign/v1","predicate":{}}"#;
    format!(
        r#"{{"payloadType":"application/vnd.in-toto+json","payload":"{}","signatures":[{{"keyid":"","sig":"c2ln"}}]}}"#,
        STANDARD.encode(statement)
    )
}

/// Write a fake cosign that logs its argv and answers based on the image name:
/// `signed` images verify, `unsigned` ones have nothing, `tampered` ones fail,
/// `broken` ones fail signing. `sign` also records the token it was handed
/// through the environment.
fn fake_cosign(dir: &Path) -> (PathBuf, PathBuf) {
    let log = dir.join("calls.log");
    let tokens = tokens_log(dir);
    let script = dir.join("cosign");
    let body = format!(
        r#"#!/bin/sh
echo "$@" >> "{log}"
if [ "$1" = sign ]; then echo "$SIGSTORE_ID_TOKEN" >> "{tokens}"; fi
for last; do :; done
case "$1" in
  verify)
    case "$last" in
      *signed-ok*) echo '{legacy}'; exit 0 ;;
      *tampered*) echo 'Error: none of the expected identities matched what was in the certificate' >&2; exit 1 ;;
      *registry-down*) echo 'Error: GET https://ghcr.io/v2/: dial tcp: connection refused' >&2; exit 1 ;;
      *) echo 'Error: no signatures found' >&2; exit 1 ;;
    esac ;;
  verify-attestation)
    case "$last" in
      *signed-ok*) echo '{attestation}'; exit 0 ;;
      *) echo 'Error: no matching attestations' >&2; exit 1 ;;
    esac ;;
  sign)
    case "$last" in
      *broken*) echo 'Error: signing: fulcio returned 503' >&2; exit 1 ;;
      *) exit 0 ;;
    esac ;;
esac
exit 2
"#,
        log = log.display(),
        tokens = tokens.display(),
        legacy = LEGACY_JSON,
        attestation = attestation_line(),
    );
    fs::write(&script, body).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    (script, log)
}

fn tokens_log(dir: &Path) -> PathBuf {
    dir.join("tokens.log")
}

fn policy() -> VerifyPolicy {
    VerifyPolicy::new(
        vec![Identity::new("https://accounts.google.com", r"@example\.com$")],
        TrustedRoot::Public,
    )
}

fn calls(log: &Path) -> Vec<String> {
    fs::read_to_string(log)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_verify_signed_image_returns_payloads() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/signed-ok:v1").unwrap();

    let outcome = cosign
        .verify(&image, SignatureFormat::Legacy, &policy())
        .await
        .unwrap();

    match outcome {
        VerifyOutcome::Verified { payloads, .. } => assert_eq!(payloads.len(), 1),
        other => panic!("expected verified, got {other:?}"),
    }
    let calls = calls(&log);
    assert!(calls[0].starts_with("verify --output=json --new-bundle-format=false"));
    assert!(calls[0].contains(r"--certificate-identity-regexp=@example\.com$"));
    assert!(calls[0].contains("--certificate-oidc-issuer=https://accounts.google.com"));
}

#[tokio::test]
async fn test_inspect_through_cosign_reports_both_formats() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);

    let signed = ImageRef::parse("ghcr.io/org/signed-ok:v1").unwrap();
    let status = inspect(&cosign, &signed, &policy()).await.unwrap();
    assert!(status.has_legacy && status.has_bundle);

    let unsigned = ImageRef::parse("ghcr.io/org/unsigned:v1").unwrap();
    let status = inspect(&cosign, &unsigned, &policy()).await.unwrap();
    assert!(!status.has_legacy && !status.has_bundle);
}

#[tokio::test]
async fn test_identity_mismatch_is_verification_failure() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/tampered:v1").unwrap();

    let err = inspect(&cosign, &image, &policy()).await.unwrap_err();
    assert!(matches!(
        err,
        SignerError::VerificationFailed {
            format: SignatureFormat::Legacy,
            ..
        }
    ));
}

#[tokio::test]
async fn test_transport_failure_is_backend_error() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/registry-down:v1").unwrap();

    let err = inspect(&cosign, &image, &policy()).await.unwrap_err();
    assert!(matches!(err, SignerError::Backend { .. }));
    assert!(err.to_string().contains("connection refused"));
}

#[tokio::test]
async fn test_sign_bundled_passes_bundle_flags() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/unsigned:v1").unwrap();

    let request = SignRequest::new(
        SignatureFormat::Bundled,
        &SigstoreEndpoints::default(),
        "eyJ.token".to_string(),
        TrustedRoot::Public,
        Duration::from_secs(300),
    );
    cosign.sign(&image, &request).await.unwrap();

    let calls = calls(&log);
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert!(call.starts_with("sign --yes"));
    assert!(call.contains("--new-bundle-format=true"));
    assert!(call.contains("--use-signing-config=true"));
    assert!(call.contains("--timeout=300s"));
    assert!(!call.contains("--fulcio-url"));
    assert!(call.ends_with("ghcr.io/org/unsigned:v1"));

    // The token reaches cosign through its environment, never its argv.
    assert!(!call.contains("eyJ.token"));
    let tokens = fs::read_to_string(tokens_log(dir.path())).unwrap();
    assert_eq!(tokens.trim(), "eyJ.token");
}

#[tokio::test]
async fn test_sign_legacy_uses_explicit_service_urls() {
    let dir = TempDir::new().unwrap();
    let (script, log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/unsigned:v1").unwrap();

    let request = SignRequest::new(
        SignatureFormat::Legacy,
        &SigstoreEndpoints::default(),
        "eyJ.token".to_string(),
        TrustedRoot::Public,
        Duration::from_secs(60),
    );
    cosign.sign(&image, &request).await.unwrap();

    let call = &calls(&log)[0];
    assert!(call.contains("--fulcio-url=https://fulcio.sigstore.dev"));
    assert!(call.contains("--rekor-url=https://rekor.sigstore.dev"));
    assert!(call.contains("--new-bundle-format=false"));
    assert!(call.contains("--use-signing-config=false"));
    assert!(!call.contains("eyJ.token"));
}

#[tokio::test]
async fn test_sign_failure_carries_cosign_stderr() {
    let dir = TempDir::new().unwrap();
    let (script, _log) = fake_cosign(dir.path());
    let cosign = CosignCli::new(script);
    let image = ImageRef::parse("ghcr.io/org/broken:v1").unwrap();

    let request = SignRequest::new(
        SignatureFormat::Legacy,
        &SigstoreEndpoints::default(),
        "eyJ.token".to_string(),
        TrustedRoot::Public,
        Duration::from_secs(60),
    );
    let err = cosign.sign(&image, &request).await.unwrap_err();

    match err {
        SignerError::Signing { message, .. } => assert!(message.contains("fulcio returned 503")),
        other => panic!("expected signing error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_binary_is_backend_error() {
    let cosign = CosignCli::new("/nonexistent/cosign");
    let image = ImageRef::parse("ghcr.io/org/app:v1").unwrap();

    let err = cosign
        .verify(&image, SignatureFormat::Legacy, &policy())
        .await
        .unwrap_err();
    assert!(matches!(err, SignerError::Backend { .. }));
}
