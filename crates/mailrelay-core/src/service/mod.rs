//! Service wiring: store, router, recorder, workers and the SMTP listener.

use mailrelay_smtp::server::{ServerConfig, serve};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::dispatch::Deliver;
use crate::queue::{DispatchQueue, WorkerPool, spawn_workers};
use crate::recorder::Recorder;
use crate::router::Router;
use crate::session::RelayBackend;
use crate::store::Database;

/// A running relay: dispatch workers plus the backend handed to the
/// SMTP listener.
pub struct RelayService {
    backend: Arc<RelayBackend>,
    router: Arc<Router>,
    queue: DispatchQueue,
    workers: WorkerPool,
    server: Arc<ServerConfig>,
}

impl RelayService {
    /// Starts the dispatch workers. Must be called inside a tokio runtime.
    #[must_use]
    pub fn start(db: &Database, deliverer: Arc<dyn Deliver>, config: &Config) -> Self {
        let recorder = Recorder::new(Arc::new(db.logs()), Arc::new(db.rules()));
        let router = Arc::new(Router::new(Arc::new(db.rules())));
        let (queue, workers) = spawn_workers(
            config.dispatch_workers,
            config.dispatch_queue,
            deliverer,
            recorder.clone(),
        );

        let backend = Arc::new(RelayBackend::new(
            Arc::clone(&router),
            recorder,
            queue.clone(),
        ));

        Self {
            backend,
            router,
            queue,
            workers,
            server: Arc::new(ServerConfig::new(config.smtp_domain.clone())),
        }
    }

    /// Listener settings.
    #[must_use]
    pub fn server_config(&self) -> &ServerConfig {
        &self.server
    }

    /// The session backend, for driving connections directly.
    #[must_use]
    pub fn backend(&self) -> Arc<RelayBackend> {
        Arc::clone(&self.backend)
    }

    /// The router, for pattern diagnostics.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Accepts SMTP connections on `listener` until the future is dropped.
    pub async fn serve(&self, listener: TcpListener) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, domain = %self.server.domain, "SMTP listener ready");
        }
        serve(listener, self.backend(), Arc::clone(&self.server)).await;
    }

    /// Stops taking jobs and waits for queued deliveries to finish.
    pub async fn shutdown(self) {
        info!(pending = self.queue.len(), "Draining dispatch queue");
        self.queue.close();
        self.workers.join().await;
    }
}
