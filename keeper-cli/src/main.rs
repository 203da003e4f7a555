use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use keeper_cli::{AuthClient, ClientConfig, LocalVault, Session, SyncClient, SyncEvent, SyncHandle};
use keeper_core::models::now;
use keeper_core::{Binary, Card, Credentials, SecretItem, Snapshot, Text};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Secret keeper - local-first secrets synced across your devices
#[derive(Parser)]
#[command(name = "keeper")]
#[command(about = "Local-first secret keeper with multi-device sync", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "keeper.toml", global = true)]
    config: PathBuf,

    /// Local vault path override
    #[arg(long, global = true)]
    storage: Option<PathBuf>,

    /// Server URL override
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account on the server
    Register {
        #[arg(long)]
        login: String,

        /// Password (will prompt if not provided)
        #[arg(long)]
        password: Option<String>,
    },

    /// Log in and cache the session token
    Login {
        #[arg(long)]
        login: String,

        /// Password (will prompt if not provided)
        #[arg(long)]
        password: Option<String>,
    },

    /// Forget the cached session
    Logout,

    /// List everything in the local vault
    List {
        /// Show passwords, card numbers and text values in plain text
        #[arg(long)]
        show_secrets: bool,
    },

    /// Add a secret, locally first, then to your other devices
    Add {
        #[command(subcommand)]
        kind: AddKind,
    },

    /// Stay connected and apply changes from other devices until ctrl-c
    Sync,
}

#[derive(Subcommand)]
enum AddKind {
    /// Login and password pair
    Credentials {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        login: String,
        /// Password (will prompt if not provided)
        #[arg(long)]
        password: Option<String>,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Free-form text note
    Text {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        key: String,
        #[arg(long)]
        value: String,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// File contents, keyed by file name
    Binary {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Payment card
    Card {
        #[arg(long)]
        tag: String,
        #[arg(long)]
        number: String,
        /// Expiry as MM/YY
        #[arg(long)]
        exp: String,
        #[arg(long)]
        cvv: u16,
        #[arg(long, default_value = "")]
        comment: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let cli = Cli::parse();

    let mut cfg = if cli.config.exists() {
        ClientConfig::load(&cli.config)?
    } else {
        ClientConfig::default()
    };
    if let Some(storage) = cli.storage {
        cfg.storage_path = storage;
    }
    if let Some(server) = cli.server {
        cfg.server_url = server;
    }

    match cli.command {
        Commands::Register { login, password } => {
            let password = password_or_prompt(password)?;
            let auth = AuthClient::new(&cfg.server_url, cfg.request_timeout())?;
            let user_id = auth.register(&login, &password).await?;
            println!("Registered {} (user {})", login, user_id);
        }
        Commands::Login { login, password } => {
            let password = password_or_prompt(password)?;
            let auth = AuthClient::new(&cfg.server_url, cfg.request_timeout())?;
            let token = auth.login(&login, &password, cfg.app_id).await?;
            Session {
                login: login.clone(),
                server_url: cfg.server_url.clone(),
                token,
            }
            .save(&cfg.session_path())?;
            println!("Logged in as {}", login);
        }
        Commands::Logout => {
            Session::clear(&cfg.session_path())?;
            println!("Session cleared");
        }
        Commands::List { show_secrets } => {
            let vault = LocalVault::open(&cfg.storage_path)?;
            print_snapshot(&vault.all()?, show_secrets);
        }
        Commands::Add { kind } => {
            let item = build_item(kind)?;
            add(&cfg, item).await?;
        }
        Commands::Sync => sync(&cfg).await?,
    }

    Ok(())
}

fn password_or_prompt(password: Option<String>) -> Result<String> {
    match password {
        Some(p) => Ok(p),
        None => rpassword::prompt_password("Password: ").context("Failed to read password"),
    }
}

fn build_item(kind: AddKind) -> Result<SecretItem> {
    let item = match kind {
        AddKind::Credentials {
            tag,
            login,
            password,
            comment,
        } => Credentials {
            tag,
            login,
            password: password_or_prompt(password)?,
            comment,
            created: now(),
        }
        .into(),
        AddKind::Text {
            tag,
            key,
            value,
            comment,
        } => Text {
            tag,
            key,
            value,
            comment,
            created: now(),
        }
        .into(),
        AddKind::Binary { tag, file, comment } => Binary::from_file(&file, &tag, &comment)
            .with_context(|| format!("Failed to read {}", file.display()))?
            .into(),
        AddKind::Card {
            tag,
            number,
            exp,
            cvv,
            comment,
        } => Card {
            tag,
            number,
            exp,
            cvv,
            comment,
            created: now(),
        }
        .into(),
    };
    Ok(item)
}

async fn connect(cfg: &ClientConfig, vault: &LocalVault) -> Result<Option<SyncHandle>> {
    let Some(session) = Session::load(&cfg.session_path())? else {
        return Ok(None);
    };
    match SyncClient::connect(&cfg.ws_url(), &session.token, vault.clone()).await {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            tracing::warn!("Working offline: {}", e);
            Ok(None)
        }
    }
}

/// Wait for the server's snapshot so the vault is current before writing.
async fn await_snapshot(handle: &mut SyncHandle, cfg: &ClientConfig) -> Result<()> {
    let wait = async {
        while let Some(event) = handle.next_event().await {
            match event {
                SyncEvent::Snapshot(_) => return Ok(()),
                SyncEvent::Rejected(reason) => {
                    bail!("Server rejected the session ({}), run `keeper login`", reason)
                }
                SyncEvent::Disconnected => bail!("Disconnected before the snapshot arrived"),
                SyncEvent::Applied { .. } => {}
            }
        }
        bail!("Sync loop stopped")
    };
    tokio::time::timeout(cfg.request_timeout(), wait)
        .await
        .context("Timed out waiting for the snapshot")?
}

async fn add(cfg: &ClientConfig, item: SecretItem) -> Result<()> {
    let vault = LocalVault::open(&cfg.storage_path)?;

    let stored = match connect(cfg, &vault).await? {
        Some(mut handle) => {
            if let Err(e) = await_snapshot(&mut handle, cfg).await {
                tracing::warn!("{}", e);
            }
            let stored = handle.submit(&item)?;
            handle.shutdown().await?;
            stored
        }
        None => {
            let (stored, _) = vault.save_local(&item)?;
            println!("Not connected, saved locally only");
            stored
        }
    };

    println!("Saved {} '{}'", stored.kind(), stored.natural_key());
    Ok(())
}

async fn sync(cfg: &ClientConfig) -> Result<()> {
    let vault = LocalVault::open(&cfg.storage_path)?;
    let Some(mut handle) = connect(cfg, &vault).await? else {
        bail!("No session or server unreachable, run `keeper login` first");
    };
    println!("Syncing, press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                handle.shutdown().await?;
                break;
            }
            event = handle.next_event() => match event {
                Some(SyncEvent::Snapshot(n)) => println!("Snapshot merged: {} records", n),
                Some(SyncEvent::Applied { msg_type, item }) => {
                    println!("{}: {} '{}'", msg_type, item.kind(), item.natural_key());
                }
                Some(SyncEvent::Rejected(reason)) => println!("Server error: {}", reason),
                Some(SyncEvent::Disconnected) | None => {
                    println!("Disconnected");
                    break;
                }
            }
        }
    }
    Ok(())
}

fn mask(secret: &str, show: bool) -> String {
    if show {
        secret.to_string()
    } else {
        "********".to_string()
    }
}

fn print_snapshot(snapshot: &Snapshot, show: bool) {
    if snapshot.is_empty() {
        println!("Vault is empty");
        return;
    }
    for c in &snapshot.credentials {
        println!(
            "[cred] {:<16} {} / {} {}",
            c.tag,
            c.login,
            mask(&c.password, show),
            c.comment
        );
    }
    for t in &snapshot.texts {
        println!("[text] {:<16} {} = {} {}", t.tag, t.key, mask(&t.value, show), t.comment);
    }
    for b in &snapshot.binaries {
        println!("[bin]  {:<16} {} ({} bytes) {}", b.tag, b.key, b.value.len(), b.comment);
    }
    for c in &snapshot.cards {
        let number = if show {
            c.number.clone()
        } else {
            let skip = c.number.chars().count().saturating_sub(4);
            format!("**** {}", c.number.chars().skip(skip).collect::<String>())
        };
        println!("[card] {:<16} {} exp {} {}", c.tag, number, c.exp, c.comment);
    }
}
