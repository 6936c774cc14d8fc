use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use propdesk_api::auth::hash_password;
use propdesk_api::{backup_and_prune, AppState, Server};
use propdesk_core::validation::{validate_email, validate_password, validate_text};
use propdesk_core::{ConfigManager, NewAuditLog, NewUser, Settings};
use propdesk_store::{create_database, SqliteStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "propdesk")]
#[command(about = "Propdesk property-management back-office", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration environment (development, test, production, ...)
    #[arg(long, global = true, env = "APP_ENV")]
    env: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP API (default)
    Serve {
        /// Override server.host
        #[arg(long)]
        host: Option<String>,
        /// Override server.port
        #[arg(long)]
        port: Option<u16>,
    },

    /// Create the database if needed and apply pending migrations
    Migrate,

    /// Take a database backup and prune old ones
    Backup,

    /// Create a platform admin, or promote an existing account
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        /// Required when the account does not exist yet
        #[arg(long, env = "PROPDESK_ADMIN_PASSWORD")]
        password: Option<String>,
    },

    /// Print the JSON schema of the settings
    PrintConfig {
        /// Print the loaded settings instead, secrets omitted
        #[arg(long)]
        effective: bool,
    },
}

fn init_tracing(settings: &Settings) {
    let default_filter = format!(
        "{},propdesk_api=info,propdesk_store=info,tower_http=info",
        settings.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = ConfigManager::load(cli.env.clone()).context("loading configuration")?;
    init_tracing(&config.settings());
    info!(env = %config.env(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Serve {
        host: None,
        port: None,
    }) {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Migrate => migrate(&config.settings()).await,
        Commands::Backup => backup(config).await,
        Commands::CreateAdmin {
            email,
            name,
            password,
        } => create_admin(config, &email, &name, password.as_deref()).await,
        Commands::PrintConfig { effective } => {
            let value = if effective {
                serde_json::to_value(config.settings().as_ref())?
            } else {
                ConfigManager::json_schema()
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
    }
}

async fn serve(config: ConfigManager, host: Option<String>, port: Option<u16>) -> Result<()> {
    let config = if host.is_some() || port.is_some() {
        let mut settings = config.settings().as_ref().clone();
        if let Some(host) = host {
            settings.server.host = host;
        }
        if let Some(port) = port {
            settings.server.port = port;
        }
        settings.validate()?;
        ConfigManager::from_settings(settings)
    } else {
        config
    };

    create_database(&config.settings().database.url).await?;
    let server = Server::new(Arc::new(config)).await?;
    server.run().await?;
    Ok(())
}

async fn migrate(settings: &Settings) -> Result<()> {
    create_database(&settings.database.url).await?;
    let store = SqliteStore::connect(&settings.database.url, 1).await?;
    store.run_migrations().await?;
    store.close().await;
    info!("migrations applied");
    Ok(())
}

async fn backup(config: ConfigManager) -> Result<()> {
    let state = AppState::new(Arc::new(config)).await?;
    let backup = backup_and_prune(&state).await?;
    state
        .store
        .record_audit(
            NewAuditLog::new("backup.create", "backup")
                .subject(backup.id)
                .metadata(serde_json::json!({ "file_name": backup.file_name, "source": "cli" })),
        )
        .await?;
    println!("{} ({} bytes)", backup.file_name, backup.size_bytes);
    Ok(())
}

async fn create_admin(
    config: ConfigManager,
    email: &str,
    name: &str,
    password: Option<&str>,
) -> Result<()> {
    validate_email(email)?;
    let state = AppState::new(Arc::new(config)).await?;

    let user = match state.store.get_user_by_email(email).await? {
        Some(existing) => {
            info!(user_id = %existing.id, "promoting existing account");
            state.store.set_admin(existing.id, true).await?
        }
        None => {
            let password = password.context("--password is required for a new account")?;
            validate_text("name", name, 1, 120)?;
            validate_password(password)?;
            state
                .store
                .create_user(&NewUser {
                    email: email.to_string(),
                    full_name: name.trim().to_string(),
                    password_hash: hash_password(password)?,
                    is_admin: true,
                })
                .await?
        }
    };

    state
        .store
        .record_audit(
            NewAuditLog::new("user.make_admin", "user")
                .subject(user.id)
                .metadata(serde_json::json!({ "email": user.email, "source": "cli" })),
        )
        .await?;
    println!("{} is a platform admin", user.email);
    Ok(())
}
