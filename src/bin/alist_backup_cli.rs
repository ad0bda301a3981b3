//! alist-backup CLI: snapshot and restore AList admin data
//!
//! Usage:
//!   alist-backup login -u <user>                 Log in and store the session token
//!   alist-backup backup [--output <path>]        Export a snapshot
//!   alist-backup restore <file> [--override]     Import a snapshot
//!   alist-backup sessions list|evict [--all]     Manage login sessions
//!   alist-backup config show|set                 Inspect or change saved settings

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use alist_backup_lib::config::{self, BackupConfig};
use alist_backup_lib::snapshot::{read_snapshot, resolve_output_path, write_snapshot};
use alist_backup_lib::api::{SessionInfo, SessionScope};
use alist_backup_lib::{
    logging, AListClient, BackupRestoreCoordinator, ConsoleLog, RestoreMode,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use secrecy::{ExposeSecret, SecretString};

#[derive(Parser)]
#[command(
    name = "alist-backup",
    about = "Backup and restore AList settings, users, storages and more",
    version
)]
struct Cli {
    /// Server URL (overrides the saved configuration)
    #[arg(long, global = true, env = "ALIST_SERVER")]
    server: Option<String>,

    /// Session token (overrides the saved configuration)
    #[arg(long, global = true, env = "ALIST_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Increase diagnostic output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session token
    Login {
        #[arg(short, long)]
        username: String,
        /// Account password
        #[arg(short, long, env = "ALIST_PASSWORD", hide_env_values = true)]
        password: String,
        /// Two-factor code, if enabled for the account
        #[arg(long, default_value = "")]
        otp: String,
    },
    /// Export every admin resource to a snapshot file
    Backup {
        /// Output file or directory (default: timestamped file in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Encryption passphrase; leave unset for a clear-text snapshot
        #[arg(long, env = "ALIST_BACKUP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Import a snapshot file into the server
    Restore {
        /// Snapshot file to import
        file: PathBuf,
        /// Update existing records by natural key instead of adding new ones
        #[arg(long = "override")]
        override_existing: bool,
        /// Where to write the automatic backup taken before an override restore
        #[arg(long)]
        pre_backup_dir: Option<PathBuf>,
        /// Passphrase the snapshot was encrypted with
        #[arg(long, env = "ALIST_BACKUP_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// List or sign out login sessions
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },
    /// Inspect or change the saved configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List sessions; `*` marks this device
    List {
        /// Every user's sessions (admin only)
        #[arg(long)]
        all: bool,
        /// Print full session ids instead of masked ones
        #[arg(long)]
        full: bool,
    },
    /// Sign out one session
    Evict {
        /// Full session id as shown by `sessions list --full`
        session_id: String,
        /// Evict from the admin list instead of your own sessions
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the saved configuration (token redacted)
    Show,
    /// Update saved values
    Set {
        #[arg(long = "server-url")]
        server_url: Option<String>,
        /// Request timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Retries for list requests
        #[arg(long)]
        max_retries: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let mut stored = config::load_config();
    if stored.ensure_client_id() {
        config::save_config(&stored).context("Failed to persist client id")?;
    }

    let mut effective = stored.clone();
    if let Some(server) = &cli.server {
        effective.server_url = server.clone();
    }
    if let Some(token) = &cli.token {
        effective.token = Some(token.clone());
    }

    match cli.command {
        Commands::Login {
            username,
            password,
            otp,
        } => {
            config::validate_config(&effective)?;
            effective.clear_session();
            let client = AListClient::from_config(&effective)?;
            let login = client
                .login(&username, &password, &otp)
                .await
                .context("Login failed")?;

            stored.server_url = effective.server_url.clone();
            stored.token = Some(login.token);
            if login.device_key.is_some() {
                stored.device_key = login.device_key;
            }
            config::save_config(&stored)?;
            println!("Logged in to {} as {}", stored.server_url, username);
        }
        Commands::Backup { output, password } => {
            let client = connect(&effective)?;
            let coordinator = BackupRestoreCoordinator::new(client.clone(), Arc::new(ConsoleLog));
            let passphrase = SecretString::from(password.unwrap_or_default());

            let snapshot = coordinator.export(passphrase.expose_secret()).await;
            end_session_if_lost(&client, &mut stored)?;
            let snapshot = snapshot?;

            let path = resolve_output_path(output.as_deref());
            write_snapshot(&snapshot, &path)
                .with_context(|| format!("Failed to write snapshot to {}", path.display()))?;
            println!("Backup saved to {}", path.display());
        }
        Commands::Restore {
            file,
            override_existing,
            pre_backup_dir,
            password,
        } => {
            let snapshot = read_snapshot(&file)
                .with_context(|| format!("Failed to read snapshot {}", file.display()))?;
            let client = connect(&effective)?;
            let pre_path = resolve_output_path(pre_backup_dir.as_deref());
            let coordinator = BackupRestoreCoordinator::new(client.clone(), Arc::new(ConsoleLog))
                .with_pre_restore_writer(move |pre| write_snapshot(pre, &pre_path));
            let passphrase = SecretString::from(password.unwrap_or_default());
            let mode = if override_existing {
                RestoreMode::Override
            } else {
                RestoreMode::Additive
            };

            let report = coordinator
                .import(snapshot, passphrase.expose_secret(), mode)
                .await;
            end_session_if_lost(&client, &mut stored)?;
            let report = report?;

            if report.pre_restore_backup.is_some() {
                println!("Pre-restore backup saved");
            }
            println!(
                "Restore complete: {} restored, {} failed, {} skipped",
                report.restored, report.failed, report.skipped
            );
            return Ok(ExitCode::from(report.exit_status()));
        }
        Commands::Sessions { action } => {
            let client = connect(&effective)?;
            let device_key = stored.device_key.clone();
            match action {
                SessionAction::List { all, full } => {
                    let sessions = client.list_sessions(scope(all)).await;
                    end_session_if_lost(&client, &mut stored)?;
                    for session in sessions? {
                        println!("{}", session_line(&session, device_key.as_deref(), full));
                    }
                }
                SessionAction::Evict { session_id, all } => {
                    let evicted = client
                        .evict_session(scope(all), &session_id, device_key.as_deref())
                        .await;
                    end_session_if_lost(&client, &mut stored)?;
                    evicted.with_context(|| format!("Failed to evict session {session_id}"))?;
                    println!("Session evicted");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let mut shown = stored.clone();
                if shown.has_session() {
                    shown.token = Some("********".to_string());
                }
                println!("{}", serde_json::to_string_pretty(&shown)?);
                println!("# {}", config::get_config_path().display());
            }
            ConfigAction::Set {
                server_url,
                timeout,
                max_retries,
            } => {
                if let Some(url) = server_url {
                    stored.server_url = url.trim_end_matches('/').to_string();
                }
                if let Some(secs) = timeout {
                    stored.timeout_secs = secs;
                }
                if let Some(retries) = max_retries {
                    stored.max_retries = retries;
                }
                config::validate_config(&stored)?;
                config::save_config(&stored)?;
                println!("Configuration saved");
            }
        },
    }

    Ok(ExitCode::SUCCESS)
}

/// Build an authenticated client from the effective configuration
fn connect(config: &BackupConfig) -> Result<Arc<AListClient>> {
    config::validate_config(config)?;
    if !config.has_session() {
        bail!("Not logged in: run `alist-backup login` or set ALIST_TOKEN");
    }
    Ok(Arc::new(AListClient::from_config(config)?))
}

fn scope(all: bool) -> SessionScope {
    if all {
        SessionScope::All
    } else {
        SessionScope::Mine
    }
}

fn session_line(session: &SessionInfo, device_key: Option<&str>, full: bool) -> String {
    let current = device_key == Some(session.session_id.as_str());
    let id = if full {
        session.session_id.clone()
    } else {
        session.masked_id()
    };
    let user = session
        .user_id
        .map(|uid| format!(" user={uid}"))
        .unwrap_or_default();
    let last_active = session
        .last_active_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    format!(
        "{} {id}{user} {} {} {last_active} {}",
        if current { '*' } else { ' ' },
        if session.is_active() { "active" } else { "inactive" },
        session.ip,
        session.ua,
    )
}

/// Drop the stored token after the server rejected it, like a web logout
fn end_session_if_lost(client: &AListClient, stored: &mut BackupConfig) -> Result<()> {
    if !client.session_lost() {
        return Ok(());
    }
    stored.clear_session();
    config::save_config(stored)?;
    eprintln!(
        "Session is no longer valid; stored token cleared. Log in again with `alist-backup login`."
    );
    Ok(())
}
