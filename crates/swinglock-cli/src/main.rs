//! Operator CLI over the SwingLock kernel, for development and recovery.
//! Sessions are in-memory only, so `auth` validates its own session before
//! the process exits; durable state (PIN, counters, flags) lives in the OS
//! keyring and persists across runs.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::Arc;
use swinglock_core::audit::TracingAuditSink;
use swinglock_core::authority::{AuthOutcome, SessionAuthority};
use swinglock_core::biometric::UnsupportedBiometric;
use swinglock_core::clock::SystemClock;
use swinglock_core::config::{load_config, SecurityConfig};
use swinglock_core::hygiene::SecretHygiene;
use swinglock_core::keystore::KeyringKeystore;
use swinglock_core::session::Permission;
use swinglock_core::store::CredentialStore;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "swinglock-cli")]
#[command(about = "Local auth kernel control for SwingCoach", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure the device PIN
    SetupPin,

    /// Authenticate with the PIN and show the resulting session
    Auth,

    /// Show auth state (PIN configured, biometric flag, counters)
    Status,

    /// Check whether a session id is still valid
    Validate {
        /// Session id printed by `auth`
        session_id: u64,
    },

    /// Invalidate every active session
    LogoutAll,

    /// Factory-reset all authentication state
    Reset,

    /// Round-trip a probe pair through the credential store
    StoreCheck,

    /// Write an encrypted backup image of the credential store
    Backup {
        /// Output file
        path: PathBuf,
    },

    /// Restore the credential store from a backup image
    Restore {
        /// Input file
        path: PathBuf,
    },
}

fn config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", "swingcoach", "swinglock")
        .ok_or_else(|| anyhow!("cannot determine config directory"))?;
    Ok(dirs.config_dir().join("security.json"))
}

fn build_authority(config: &SecurityConfig) -> Result<(SessionAuthority, Arc<CredentialStore>)> {
    let keystore = KeyringKeystore::open().context("platform keystore unavailable")?;
    let store = Arc::new(CredentialStore::new(
        Box::new(keystore),
        config.encryption_enabled,
    ));
    let hygiene = Arc::new(SecretHygiene::new(config.memory_protection_enabled));
    let authority = SessionAuthority::new(
        store.clone(),
        hygiene,
        Arc::new(UnsupportedBiometric),
        Arc::new(TracingAuditSink::new(config.audit_enabled)),
        Arc::new(SystemClock),
        config,
    );
    Ok((authority, store))
}

fn read_pin(prompt: &str) -> Result<String> {
    let pin = rpassword::prompt_password(prompt)?;
    Ok(pin.trim().to_string())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&config_path()?)?;
    let (authority, store) = build_authority(&config)?;

    let outcome = run(&cli.command, &authority, &store, &config);
    authority.shutdown();
    outcome
}

fn run(
    command: &Commands,
    authority: &SessionAuthority,
    store: &CredentialStore,
    config: &SecurityConfig,
) -> Result<()> {
    match command {
        Commands::SetupPin => {
            let pin = read_pin(&format!("New {}-digit PIN: ", config.policy.pin_length))?;
            let confirm = read_pin("Confirm PIN: ")?;
            if pin != confirm {
                return Err(anyhow!("PINs do not match"));
            }
            if authority.setup_pin(&pin) {
                println!("PIN configured");
                Ok(())
            } else {
                Err(anyhow!(
                    "PIN rejected: must be exactly {} digits",
                    config.policy.pin_length
                ))
            }
        }
        Commands::Auth => {
            let pin = read_pin("PIN: ")?;
            let result = authority.authenticate_with_pin(&pin);
            match result.outcome {
                AuthOutcome::Success => {
                    let session_id = result.session_id.expect("success carries a session id");
                    println!("authenticated, session {session_id}");
                    println!(
                        "  validate_session: {}",
                        authority.validate_session(session_id)
                    );
                    println!(
                        "  camera permission: {}",
                        authority.has_permission(session_id, Permission::Camera)
                    );
                    Ok(())
                }
                _ => Err(anyhow!(
                    "{:?}: {}",
                    result.outcome,
                    result.message.unwrap_or_default()
                )),
            }
        }
        Commands::Status => {
            println!("pin configured:     {}", authority.is_pin_setup());
            println!("biometric enabled:  {}", authority.is_biometric_enabled());
            println!("active sessions:    {}", authority.active_session_count());
            println!(
                "failed attempts:    {}",
                store.get_i64("failed_attempts").unwrap_or(0)
            );
            println!(
                "lockout timestamp:  {}",
                store.get_i64("lockout_time").unwrap_or(0)
            );
            Ok(())
        }
        Commands::Validate { session_id } => {
            if authority.validate_session(*session_id) {
                println!("session {session_id} is valid");
                Ok(())
            } else {
                Err(anyhow!("session {session_id} is expired or unknown"))
            }
        }
        Commands::LogoutAll => {
            authority.invalidate_all_sessions();
            println!("all sessions invalidated");
            Ok(())
        }
        Commands::Reset => {
            authority.reset_authentication();
            println!("authentication state reset");
            Ok(())
        }
        Commands::StoreCheck => {
            if store.validate_integrity() {
                println!("credential store healthy");
                Ok(())
            } else {
                Err(anyhow!("credential store failed the integrity probe"))
            }
        }
        Commands::Backup { path } => {
            let image = store
                .backup()
                .ok_or_else(|| anyhow!("backup image could not be produced"))?;
            std::fs::write(path, image)?;
            println!("backup written to {}", path.display());
            Ok(())
        }
        Commands::Restore { path } => {
            let image = std::fs::read(path)?;
            if store.restore(&image) {
                println!("credential store restored");
                Ok(())
            } else {
                Err(anyhow!("backup image rejected (tampered or malformed)"))
            }
        }
    }
}
