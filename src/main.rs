use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use otp_vault::chain::ethereum::EthereumPointerStore;
use otp_vault::config::{self, VaultConfig};
use otp_vault::error::{Result, VaultError};
use otp_vault::migration::{parse_otpauth_uri, MIGRATION_SCHEME};
use otp_vault::signer::LocalSigner;
use otp_vault::storage::ipfs::IpfsStore;
use otp_vault::totp::{self, Algorithm};
use otp_vault::vault::{NewEntry, SyncOutcome, Vault, VaultOptions};

const PRIVATE_KEY_VAR: &str = "OTP_VAULT_PRIVATE_KEY";

#[derive(Parser)]
#[command(name = "otp-vault")]
#[command(about = "Wallet-keyed TOTP vault stored on IPFS behind an on-chain pointer")]
#[command(version)]
struct Cli {
    /// TOML configuration file. `OTP_VAULT_*` variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current code for a secret without touching the vault
    Code {
        secret: String,
        #[arg(long, default_value = "SHA1")]
        algorithm: String,
        #[arg(long, default_value_t = totp::DEFAULT_DIGITS)]
        digits: u32,
        #[arg(long, default_value_t = totp::DEFAULT_PERIOD)]
        period: u64,
    },
    /// Unlock and print every entry with its current code
    List,
    /// Add an entry
    Add {
        #[arg(long, default_value = "")]
        label: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        issuer: Option<String>,
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value = "SHA1")]
        algorithm: String,
        #[arg(long, default_value_t = totp::DEFAULT_DIGITS)]
        digits: u32,
        #[arg(long, default_value_t = totp::DEFAULT_PERIOD)]
        period: u64,
    },
    /// Remove an entry by id
    Remove { id: String },
    /// Change an entry's label
    Rename { id: String, label: String },
    /// Import an otpauth:// or otpauth-migration:// URI
    Import { uri: String },
    /// Clear the pointer and unpin the current bundle
    Delete,
}

fn build_vault(config: &VaultConfig) -> Result<Vault> {
    let key = std::env::var(PRIVATE_KEY_VAR)
        .map_err(|_| VaultError::Config(format!("{PRIVATE_KEY_VAR} is not set")))?;
    let signer = LocalSigner::from_private_key(&key)?;

    let store = IpfsStore::new(config.store.clone())?;
    let pointers = EthereumPointerStore::new(
        config.chain.clone(),
        config.network.chain_id(),
        signer.key().clone(),
    )?;

    Ok(Vault::new(
        Arc::new(store),
        Arc::new(pointers),
        Arc::new(signer),
        VaultOptions::from_config(config),
    ))
}

fn report(outcome: &SyncOutcome) {
    println!("published {} (tx {})", outcome.address, outcome.tx.hash);
    for id in &outcome.affected {
        println!("  {id}");
    }
}

async fn run(cli: Cli) -> Result<()> {
    if let Commands::Code {
        secret,
        algorithm,
        digits,
        period,
    } = &cli.command
    {
        if !totp::is_valid_secret(secret) {
            return Err(VaultError::InvalidSecretFormat);
        }
        let now = totp::now_unix();
        let code = totp::generate(
            &totp::normalize_secret(secret),
            &Algorithm::from(algorithm.as_str()),
            *digits,
            *period,
            now,
        );
        println!("{code} ({}s)", totp::time_remaining(*period, now));
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    info!(network = ?config.network, "Loaded configuration");

    let vault = build_vault(&config)?;
    vault.unlock().await?;

    match cli.command {
        Commands::Code { .. } => {}
        Commands::List => {
            let now = totp::now_unix();
            let entries = vault.entries().await?;
            let codes = vault.codes(now).await?;
            for (entry, code) in entries.iter().zip(codes) {
                println!(
                    "{}  {}  {:>2}s  {}",
                    code.code, entry.id, code.remaining, entry.label
                );
            }
        }
        Commands::Add {
            label,
            secret,
            issuer,
            account,
            algorithm,
            digits,
            period,
        } => {
            let entry = NewEntry {
                issuer,
                account_name: account,
                algorithm: Algorithm::from(algorithm),
                digits,
                period,
                ..NewEntry::new(label, secret)
            };
            report(&vault.add_entry(entry).await?);
        }
        Commands::Remove { id } => report(&vault.remove_entry(&id).await?),
        Commands::Rename { id, label } => report(&vault.rename_entry(&id, &label).await?),
        Commands::Import { uri } => {
            let outcome = if uri.trim_start().starts_with(MIGRATION_SCHEME) {
                vault.import_migration_uri(&uri).await?
            } else {
                vault.add_entry(parse_otpauth_uri(&uri)?.into()).await?
            };
            report(&outcome);
        }
        Commands::Delete => match vault.delete_vault().await? {
            Some(tx) => println!("pointer cleared (tx {})", tx.hash),
            None => println!("nothing published"),
        },
    }

    vault.lock().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_cancellation() => {
            info!("Cancelled");
            ExitCode::from(130)
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
