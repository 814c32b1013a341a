//! `image-signer sign` - Bring every image to the fully signed state.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use image_signer_core::{Identity, ImageRef, ReconcileOptions, Reconciler, SignerConfig, SignerResult};

use super::super::args::SignArgs;
use crate::exit_codes;

pub async fn run(args: SignArgs) -> Result<i32> {
    // Every reference is checked before the first registry or issuer call.
    let images = parse_images(&args.images)?;

    let config = config_from_args(&args);
    debug!(
        cosign = %config.cosign_path.display(),
        trusted_root = ?config.trusted_root,
        static_token = config.identity_token.is_some(),
        "signer configured"
    );

    let reconciler = Reconciler::from_config(&config).context("failed to set up signer")?;
    let options = ReconcileOptions {
        identities: vec![Identity::new(
            args.certificate_oidc_issuer.clone(),
            args.certificate_identity_regexp.clone(),
        )],
        provider: args.oidc_provider.clone(),
        device_flow: args.device_flow,
        timeout: config.timeout(),
    };

    let report = reconciler
        .run_until(&images, &options, interrupted())
        .await?;

    println!(
        "Done: {} signed, {} already signed.",
        report.signed(),
        report.skipped()
    );
    Ok(exit_codes::SUCCESS)
}

fn parse_images(raw: &[String]) -> SignerResult<Vec<ImageRef>> {
    raw.iter().map(|image| ImageRef::parse(image)).collect()
}

fn config_from_args(args: &SignArgs) -> SignerConfig {
    let mut config = SignerConfig::from_env().with_timeout(Duration::from(args.timeout));
    if let Some(cosign) = &args.cosign {
        config = config.with_cosign_path(cosign);
    }
    if let Some(root) = &args.trusted_root {
        config = config.with_trusted_root(root);
    }
    config
}

/// Resolves on the first SIGINT. If the handler cannot be installed the run
/// is simply not interruptible.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}
