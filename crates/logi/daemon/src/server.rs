//! Server setup and lifecycle management

use crate::audit_sink::{CompositeSink, FileAuditSink};
use crate::config::LogiConfig;
use crate::error::{DaemonError, DaemonResult};
use crate::scheduler::Scheduler;
use crate::surface::FileSurface;
use chrono::Utc;
use logi_ledger::{
    ArchiveReceipt, AuditLog, AuditSink, DirectoryArchive, JsonFileStore, Ledger, Reconciler,
    TracingAuditSink,
};
use logi_types::Caller;
use std::sync::Arc;

/// Logi daemon server
pub struct Server {
    config: LogiConfig,
    ledger: Arc<Ledger>,
    reconciler: Arc<Reconciler>,
    archive: Arc<DirectoryArchive>,
    scheduler: Arc<Scheduler>,
}

impl Server {
    /// Open the ledger and wire up the runtime components.
    ///
    /// Decay accumulated while the daemon was down is settled here, before
    /// any tick runs.
    pub async fn new(config: LogiConfig) -> DaemonResult<Self> {
        let store = Arc::new(JsonFileStore::open(&config.storage.data_dir).await?);

        let sink: Arc<dyn AuditSink> = match &config.audit.log_file {
            Some(path) => {
                let sinks: Vec<Arc<dyn AuditSink>> = vec![
                    Arc::new(TracingAuditSink),
                    Arc::new(FileAuditSink::new(path.clone()).await?),
                ];
                Arc::new(CompositeSink::new(sinks))
            }
            None => Arc::new(TracingAuditSink),
        };
        let audit = Arc::new(AuditLog::new(sink));

        let ledger = Arc::new(Ledger::open(store, audit).await?);
        let settled = ledger.apply_decay(Utc::now()).await?;
        tracing::info!(
            data_dir = %config.storage.data_dir.display(),
            decayed = settled,
            "Ledger opened"
        );

        let surface = Arc::new(FileSurface::new(&config.display.surface_dir));
        let reconciler = Arc::new(
            Reconciler::new(surface)
                .with_page_size(config.display.page_size)
                .with_io_timeout(config.display.io_timeout()),
        );

        let scheduler = Scheduler::new(config.scheduler.clone(), ledger.clone(), reconciler.clone())?;
        let archive = Arc::new(DirectoryArchive::new(&config.archive.dir));

        Ok(Self {
            config,
            ledger,
            reconciler,
            archive,
            scheduler,
        })
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn archive(&self) -> &Arc<DirectoryArchive> {
        &self.archive
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Archive the current war into the configured bundle directory and
    /// start a fresh one
    pub async fn end_war(&self, caller: &Caller) -> DaemonResult<ArchiveReceipt> {
        let receipt = self.ledger.end_war(caller, self.archive.as_ref()).await?;
        self.reconciler.sync_all(&self.ledger).await;
        Ok(receipt)
    }

    /// Run until a shutdown signal arrives
    pub async fn run(self) -> DaemonResult<()> {
        tracing::info!(
            surface_dir = %self.config.display.surface_dir.display(),
            archive_dir = %self.config.archive.dir.display(),
            "Logi daemon running"
        );

        let scheduler = tokio::spawn(self.scheduler.clone().start());

        shutdown_signal().await;
        tracing::info!("Logi daemon shutting down");

        self.scheduler.stop();
        scheduler
            .await
            .map_err(|e| DaemonError::Scheduler(e.to_string()))?;

        self.shutdown().await
    }

    /// Settle decay and flush buffered audit lines one last time
    pub async fn shutdown(&self) -> DaemonResult<()> {
        self.ledger.apply_decay(Utc::now()).await?;
        let flushed = self.ledger.audit().flush().await;
        tracing::info!(flushed, "Audit buffer flushed");
        Ok(())
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
