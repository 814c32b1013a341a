//! Container image reference parsing.
//!
//! Supports the usual reference forms:
//! - `alpine` → `index.docker.io/library/alpine:latest`
//! - `ghcr.io/siderolabs/talos:v1.9.0` → explicit registry and tag
//! - `localhost:5000/app@sha256:abc...` → registry with port, pinned digest
//! - `ghcr.io/org/app:v1@sha256:abc...` → tag and digest together

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{SignerError, SignerResult};

/// Registry used when the reference does not name one.
pub const DEFAULT_REGISTRY: &str = "index.docker.io";

/// Tag used when the reference has neither tag nor digest.
pub const DEFAULT_TAG: &str = "latest";

const MAX_NAME_LENGTH: usize = 255;

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component regex")
    })
}

fn registry_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::[0-9]+)?$")
            .expect("registry regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[A-Za-z0-9=_-]+$").expect("digest regex")
    })
}

/// A parsed, validated image reference.
///
/// Immutable once parsed. `Display` renders the reference as it was given,
/// [`ImageRef::canonical`] renders the fully qualified form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    original: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference string.
    ///
    /// # Examples
    ///
    /// ```
    /// use image_signer_core::ImageRef;
    ///
    /// let short = ImageRef::parse("alpine").unwrap();
    /// assert_eq!(short.canonical(), "index.docker.io/library/alpine:latest");
    ///
    /// let pinned = ImageRef::parse("ghcr.io/org/app@sha256:0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef").unwrap();
    /// assert!(pinned.digest().is_some());
    ///
    /// assert!(ImageRef::parse("ghcr.io/Org/App:v1").is_err());
    /// ```
    pub fn parse(reference: &str) -> SignerResult<Self> {
        let reference = reference.trim();
        let invalid = |reason: &str| SignerError::InvalidReference {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        // Split off the digest first; tags may not contain '@'.
        let (name_and_tag, digest) = match reference.split_once('@') {
            Some((rest, digest)) => {
                validate_digest(digest).map_err(|reason| invalid(&reason))?;
                (rest, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // A ':' after the last '/' introduces the tag; before it, it's a port.
        let last_slash = name_and_tag.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match name_and_tag[last_slash..].rfind(':') {
            Some(idx) => {
                let split = last_slash + idx;
                let tag = &name_and_tag[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(invalid(&format!("invalid tag '{tag}'")));
                }
                (&name_and_tag[..split], Some(tag.to_string()))
            }
            None => (name_and_tag, None),
        };

        if name.is_empty() {
            return Err(invalid("missing repository"));
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(invalid("repository name too long"));
        }

        let (registry, path) = match name.split_once('/') {
            Some((first, rest)) if looks_like_registry(first) => {
                if !registry_re().is_match(first) {
                    return Err(invalid(&format!("invalid registry '{first}'")));
                }
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
        };

        for component in path.split('/') {
            if component.is_empty() {
                return Err(invalid("empty path component"));
            }
            if !component_re().is_match(component) {
                return Err(invalid(&format!(
                    "invalid path component '{component}' (must be lowercase alphanumeric with separators)"
                )));
            }
        }

        let repository = if registry == DEFAULT_REGISTRY && !path.contains('/') {
            format!("library/{path}")
        } else {
            path
        };

        Ok(Self {
            original: reference.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry host (with port, if any).
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Explicit tag, or `latest` when neither tag nor digest was given.
    pub fn tag(&self) -> Option<&str> {
        match (&self.tag, &self.digest) {
            (Some(tag), _) => Some(tag),
            (None, None) => Some(DEFAULT_TAG),
            (None, Some(_)) => None,
        }
    }

    /// Pinned digest (algo:hex), if any.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// The reference exactly as supplied (trimmed).
    pub fn as_str(&self) -> &str {
        &self.original
    }

    /// Fully qualified form: `registry/repository[:tag][@digest]`.
    pub fn canonical(&self) -> String {
        let mut out = format!("{}/{}", self.registry, self.repository);
        if let Some(tag) = self.tag() {
            out.push(':');
            out.push_str(tag);
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

fn looks_like_registry(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn validate_digest(digest: &str) -> Result<(), String> {
    if !digest_re().is_match(digest) {
        return Err(format!("invalid digest '{digest}'"));
    }
    if let Some(hex) = digest.strip_prefix("sha256:") {
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            return Err("sha256 digest must be 64 lowercase hex characters".to_string());
        }
    }
    Ok(())
}

impl FromStr for ImageRef {
    type Err = SignerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.original)
    }
}
