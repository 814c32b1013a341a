use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "image-signer",
    version,
    about = "Ensure container images carry both legacy and bundled cosign signatures"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sign images that are missing a legacy or bundled signature
    Sign(SignArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SignArgs {
    /// Image references, processed in order; the first failure stops the run
    #[arg(required = true, num_args = 1.., value_name = "IMAGE")]
    pub images: Vec<String>,

    /// Use the device flow to obtain the identity token
    #[arg(long, short = 'd')]
    pub device_flow: bool,

    /// Accepted signer identity (regular expression on the certificate subject)
    #[arg(long, short = 'i', default_value = r"@siderolabs\.com$")]
    pub certificate_identity_regexp: String,

    /// Accepted certificate OIDC issuer
    #[arg(long, short = 'o', default_value = "https://accounts.google.com")]
    pub certificate_oidc_issuer: String,

    /// OIDC provider for the interactive flow ("", google, github, microsoft)
    #[arg(long, short = 'p', default_value = "google")]
    pub oidc_provider: String,

    /// Timeout for each signing operation (e.g. 5m, 90s)
    #[arg(long, short = 't', default_value = "5m")]
    pub timeout: humantime::Duration,

    /// trusted_root.json to verify against instead of the public Sigstore root
    #[arg(long, env = "IMAGE_SIGNER_TRUSTED_ROOT")]
    pub trusted_root: Option<PathBuf>,

    /// cosign executable
    #[arg(long, env = "IMAGE_SIGNER_COSIGN")]
    pub cosign: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("image-signer").chain(args.iter().copied()))
    }

    fn sign_args(cli: Cli) -> SignArgs {
        match cli.cmd {
            Command::Sign(args) => args,
        }
    }

    #[test]
    fn test_defaults() {
        let args = sign_args(parse(&["sign", "ghcr.io/org/app:v1"]).unwrap());
        assert_eq!(args.images, vec!["ghcr.io/org/app:v1"]);
        assert!(!args.device_flow);
        assert_eq!(args.certificate_identity_regexp, r"@siderolabs\.com$");
        assert_eq!(args.certificate_oidc_issuer, "https://accounts.google.com");
        assert_eq!(args.oidc_provider, "google");
        assert_eq!(Duration::from(args.timeout), Duration::from_secs(300));
    }

    #[test]
    fn test_short_flags() {
        let args = sign_args(
            parse(&[
                "sign", "-d", "-i", "^ci@", "-o", "https://token.actions.githubusercontent.com",
                "-p", "github", "-t", "90s", "a:1", "b:2",
            ])
            .unwrap(),
        );
        assert!(args.device_flow);
        assert_eq!(args.certificate_identity_regexp, "^ci@");
        assert_eq!(args.oidc_provider, "github");
        assert_eq!(Duration::from(args.timeout), Duration::from_secs(90));
        assert_eq!(args.images, vec!["a:1", "b:2"]);
    }

    #[test]
    fn test_empty_provider_allowed() {
        let args = sign_args(parse(&["sign", "-p", "", "a:1"]).unwrap());
        assert_eq!(args.oidc_provider, "");
    }

    #[test]
    fn test_images_required() {
        let err = parse(&["sign"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_bad_timeout_rejected() {
        assert!(parse(&["sign", "-t", "soon", "a:1"]).is_err());
    }
}
