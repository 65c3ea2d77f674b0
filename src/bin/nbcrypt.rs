//! nbcrypt CLI - toggle a `.nb` record between plaintext and ciphertext
//!
//! The record's key is fetched from Azure Key Vault (or read from stdin with
//! `--key-stdin`), then the file is encrypted if `data` is populated and
//! decrypted otherwise.

use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use nbcrypt::azure::{
    AzureCliCredential, AzureKeyVaultResolver, DEFAULT_VAULT_URL_TEMPLATE, KeyVaultClient,
    KeyVaultConfig, StaticTokenCredential, TokenCredential,
};
use nbcrypt::error::{ErrorCategory, ErrorKind, NbcryptError, Result};
use nbcrypt::file_ops::{self, TransitionOptions};
use nbcrypt::key_source::{KeyEncoding, KeyResolver, ReaderKeyResolver};
use nbcrypt::transition::DecryptPolicy;

#[derive(Parser)]
#[command(name = "nbcrypt")]
#[command(version)]
#[command(
    about = "Encrypt or decrypt a .nb record in place using a key from Azure Key Vault.",
    long_about = None
)]
struct Cli {
    /// Path to the .nb record to transition
    #[arg(value_name = "FILE", default_value = "test.json.nb")]
    path: PathBuf,

    /// Read key material from stdin instead of from Key Vault
    #[arg(long)]
    key_stdin: bool,

    /// How the secret value maps to key bytes (base64 or raw)
    #[arg(long, env = "NBCRYPT_KEY_ENCODING", default_value = "base64")]
    key_encoding: KeyEncoding,

    /// Bearer token for Key Vault; the Azure CLI login is used when unset
    #[arg(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Vault base URL; {vault} is replaced by the record's key_vault_name
    #[arg(long, env = "NBCRYPT_VAULT_URL_TEMPLATE", default_value = DEFAULT_VAULT_URL_TEMPLATE)]
    vault_url_template: String,

    /// Timeout for the Key Vault request, in seconds
    #[arg(long, env = "NBCRYPT_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Keep encrypted_data after decrypting instead of clearing it
    #[arg(long)]
    keep_ciphertext: bool,

    /// Print the transitioned record to stdout instead of rewriting the file
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e.chain_message());
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut resolver = build_resolver(cli)?;
    let options = TransitionOptions {
        policy: if cli.keep_ciphertext {
            DecryptPolicy::RetainCiphertext
        } else {
            DecryptPolicy::ClearCiphertext
        },
        dry_run: cli.dry_run,
    };

    let outcome = file_ops::transition_file(&cli.path, &mut *resolver, &options)?;

    if !outcome.written {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(&outcome.encoded)
            .and_then(|()| stdout.flush())
            .map_err(|e| {
                NbcryptError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to write record to stdout",
                    e,
                )
            })?;
    }

    Ok(())
}

fn build_resolver(cli: &Cli) -> Result<Box<dyn KeyResolver>> {
    if cli.key_stdin {
        return Ok(Box::new(ReaderKeyResolver::new(
            Box::new(io::stdin()),
            cli.key_encoding,
        )));
    }

    let credential: Box<dyn TokenCredential> = match &cli.access_token {
        Some(token) => Box::new(StaticTokenCredential::new(token.clone())),
        None => Box::new(AzureCliCredential::new()),
    };
    let config = KeyVaultConfig {
        vault_url_template: cli.vault_url_template.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
        ..KeyVaultConfig::default()
    };
    let client = KeyVaultClient::new(credential, config)?;

    Ok(Box::new(AzureKeyVaultResolver::new(client, cli.key_encoding)))
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(io::stderr))
            .init();
    }
}
