//! In-memory collaborators for reconciliation tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use image_signer_core::{
    Identity, ImageRef, ReconcileOptions, Reconciler, SignRequest, SignatureFormat, SignerConfig,
    SignerError, SignerResult, SigningBackend, TokenIssuer, TokenRequest, VerificationBackend,
    VerifyOutcome, VerifyPolicy, COSIGN_SIGNATURE_TYPE, COSIGN_SIGN_PREDICATE_TYPE,
};

pub fn legacy_payload(kind: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "critical": {
            "identity": {"docker-reference": "ghcr.io/org/app"},
            "image": {"docker-manifest-digest": "sha256:abc"},
            "type": kind
        },
        "optional": {}
    }))
    .unwrap()
}

pub fn bundled_payload(predicate_type: &str) -> Vec<u8> {
    let statement = serde_json::json!({
        "_type": "https://in-toto.io/Statement/v1",
        "subject": [],
        "predicateType": predicate_type,
        "predicate": {}
    });
    serde_json::to_vec(&serde_json::json!({
        "payloadType": "application/vnd.in-toto+json",
        "payload": BASE64.encode(serde_json::to_vec(&statement).unwrap()),
        "signatures": [{"keyid": "", "sig": "c2ln"}]
    }))
    .unwrap()
}

pub fn verified(format: SignatureFormat) -> VerifyOutcome {
    let payload = match format {
        SignatureFormat::Legacy => legacy_payload(COSIGN_SIGNATURE_TYPE),
        SignatureFormat::Bundled => bundled_payload(COSIGN_SIGN_PREDICATE_TYPE),
    };
    VerifyOutcome::Verified {
        payloads: vec![payload],
        bundle_verified: true,
    }
}

/// Fake registry: scripted verification outcomes plus a signing log.
#[derive(Default)]
pub struct FakeRegistry {
    outcomes: Mutex<HashMap<(String, SignatureFormat), SignerResult<VerifyOutcome>>>,
    failing_signs: Mutex<HashSet<String>>,
    pub verify_calls: Mutex<Vec<(String, SignatureFormat)>>,
    pub sign_calls: Mutex<Vec<(String, SignatureFormat)>>,
    pub verify_delay: Mutex<Option<Duration>>,
}

impl FakeRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, image: &str, format: SignatureFormat, outcome: SignerResult<VerifyOutcome>) {
        self.outcomes
            .lock()
            .unwrap()
            .insert((image.to_string(), format), outcome);
    }

    pub fn fully_signed(&self, image: &str) {
        self.set(image, SignatureFormat::Legacy, Ok(verified(SignatureFormat::Legacy)));
        self.set(image, SignatureFormat::Bundled, Ok(verified(SignatureFormat::Bundled)));
    }

    pub fn fail_signing(&self, image: &str) {
        self.failing_signs.lock().unwrap().insert(image.to_string());
    }

    pub fn sign_calls(&self) -> Vec<(String, SignatureFormat)> {
        self.sign_calls.lock().unwrap().clone()
    }

    pub fn verified_images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for (image, _) in self.verify_calls.lock().unwrap().iter() {
            if !images.contains(image) {
                images.push(image.clone());
            }
        }
        images
    }
}

#[async_trait]
impl VerificationBackend for FakeRegistry {
    async fn verify(
        &self,
        image: &ImageRef,
        format: SignatureFormat,
        _policy: &VerifyPolicy,
    ) -> SignerResult<VerifyOutcome> {
        self.verify_calls
            .lock()
            .unwrap()
            .push((image.to_string(), format));

        let delay = *self.verify_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.outcomes
            .lock()
            .unwrap()
            .get(&(image.to_string(), format))
            .cloned()
            .unwrap_or(Ok(VerifyOutcome::NotFound))
    }
}

#[async_trait]
impl SigningBackend for FakeRegistry {
    async fn sign(&self, image: &ImageRef, request: &SignRequest) -> SignerResult<()> {
        self.sign_calls
            .lock()
            .unwrap()
            .push((image.to_string(), request.format));

        if self.failing_signs.lock().unwrap().contains(image.as_str()) {
            return Err(SignerError::Signing {
                image: image.to_string(),
                format: request.format,
                message: "rekor: 500 Internal Server Error".to_string(),
            });
        }
        Ok(())
    }
}

/// Token issuer counting how many flows ran.
#[derive(Default)]
pub struct CountingIssuer {
    pub calls: AtomicUsize,
}

impl CountingIssuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenIssuer for CountingIssuer {
    async fn issue(&self, _request: &TokenRequest) -> SignerResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok("eyJ.fake.jwt".to_string())
    }
}

pub fn reconciler(registry: &Arc<FakeRegistry>, issuer: &Arc<CountingIssuer>) -> Reconciler {
    Reconciler::new(
        registry.clone(),
        registry.clone(),
        issuer.clone(),
        &SignerConfig::default(),
    )
}

pub fn options(provider: &str) -> ReconcileOptions {
    ReconcileOptions {
        identities: vec![Identity::new(
            "https://accounts.google.com",
            r"@example\.com$",
        )],
        provider: provider.to_string(),
        device_flow: false,
        timeout: Duration::from_secs(5),
    }
}

pub fn refs(images: &[&str]) -> Vec<ImageRef> {
    images.iter().map(|i| ImageRef::parse(i).unwrap()).collect()
}
