use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use propdesk_core::{Backup, ConfigManager, PropdeskError, Result};
use tokio::signal;
use tracing::{error, info, warn};

use crate::metrics::BACKUPS_TOTAL;
use crate::{create_router, AppState};

pub struct Server {
    state: AppState,
    addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Arc<ConfigManager>) -> Result<Self> {
        crate::metrics::register_metrics();
        lazy_static::initialize(&crate::handlers::health::START_TIME);

        let settings = config.settings();
        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .map_err(|e| {
                PropdeskError::Validation(format!(
                    "invalid listen address {}:{}: {}",
                    settings.server.host, settings.server.port, e
                ))
            })?;

        let state = AppState::new(config).await?;
        Ok(Self { state, addr })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub async fn run(self) -> Result<()> {
        let schedule = self.state.settings.backups.interval_hours;
        if schedule > 0 {
            tokio::spawn(backup_loop(self.state.clone(), schedule));
            info!(interval_hours = schedule, "scheduled backups enabled");
        }

        let router = create_router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        info!("Propdesk API listening on http://{}", self.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("server stopped");
        Ok(())
    }
}

/// Takes a backup then prunes to the configured retention, forever.
async fn backup_loop(state: AppState, interval_hours: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_hours * 3600));
    // The first tick fires immediately; skip it so startup does not snapshot.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match backup_and_prune(&state).await {
            Ok(backup) => info!(file = %backup.file_name, "scheduled backup completed"),
            Err(e) => error!(error = %e, "scheduled backup failed"),
        }
    }
}

/// Takes a backup and prunes old ones down to `backups.retention`. A
/// pruning failure is logged and does not fail the backup.
pub async fn backup_and_prune(state: &AppState) -> Result<Backup> {
    let dir = state.backup_dir();
    let backup = match state.store.create_backup(&dir, None).await {
        Ok(backup) => {
            BACKUPS_TOTAL.with_label_values(&["completed"]).inc();
            backup
        }
        Err(e) => {
            BACKUPS_TOTAL.with_label_values(&["failed"]).inc();
            return Err(e);
        }
    };

    if let Err(e) = state
        .store
        .prune_backups(&dir, state.settings.backups.retention)
        .await
    {
        warn!(error = %e, "backup pruning failed");
    }
    Ok(backup)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
        },
    }
}
