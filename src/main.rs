//! pkiaas command line.
//!
//! Loads settings, connects to the Conjur secret store, bootstraps the PKI
//! configuration and runs one maintenance command.
//!
//! ```bash
//! pkiaas -v
//! pkiaas --config pkiaas.toml bootstrap
//! pkiaas --debug crl --out ca.crl
//! pkiaas expired
//! pkiaas revoke 4f1c0e... keyCompromise
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use pkiaas::authority::{AuthorityConfig, CertificateAuthority};
use pkiaas::config::Settings;
use pkiaas::revocation::ReasonCode;
use pkiaas::storage::StorageBackend;
use pkiaas::storage::conjur::{ConjurBackend, RestClient};
use pkiaas::version;
use time::OffsetDateTime;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pkiaas")]
#[command(about = "PKI as a Service on top of a Conjur secret store")]
#[command(disable_version_flag = true)]
struct Args {
    /// Display current version.
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Enable debug log level.
    #[arg(long)]
    debug: bool,

    /// Settings file (TOML).
    #[arg(long, env = "PKIAAS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Establish trust with the secret store and create the PKI configuration.
    Bootstrap,
    /// Sign a fresh CRL of every revoked certificate.
    Crl {
        /// Also write the DER encoded CRL to this file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// List the serial numbers of expired certificates.
    Expired,
    /// Revoke a certificate.
    Revoke {
        serial: String,
        /// RFC 5280 reason, by name or code.
        #[arg(default_value = "unspecified")]
        reason: ReasonCode,
    },
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.version {
        println!("pkiaas v{}", version::full_version_name());
        return Ok(());
    }

    init_tracing(args.debug);

    let settings = Settings::load(args.config.as_deref()).context("loading settings")?;
    let client = RestClient::new(settings.conjur).context("initializing PKI backend")?;
    let backend = Arc::new(ConjurBackend::new(client, settings.pki.branch.clone()));
    backend
        .bootstrap()
        .context("initializing PKI configuration")?;

    let authority = CertificateAuthority::new(backend, AuthorityConfig::from(settings.pki));
    let now = OffsetDateTime::now_utc();

    match args.command.unwrap_or(Command::Bootstrap) {
        Command::Bootstrap => info!(version = %version::full_version_name(), "PKI configuration ready"),
        Command::Crl { out } => {
            let der = authority.generate_crl(now).context("generating CRL")?;
            if let Some(path) = out {
                std::fs::write(&path, &der)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
        }
        Command::Expired => {
            for serial in authority
                .expired_certificates(now)
                .context("listing expired certificates")?
            {
                println!("{serial}");
            }
        }
        Command::Revoke { serial, reason } => {
            authority
                .revoke(&serial, reason)
                .with_context(|| format!("revoking {serial}"))?;
        }
    }
    Ok(())
}
