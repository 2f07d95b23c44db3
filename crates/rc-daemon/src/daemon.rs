use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use rc_agents::pipeline::InvestigationPipeline;
use rc_agents::runner::InvestigationRunner;
use rc_agents::wiring::pipeline_from_config;
use rc_bridge::http_api::{api_router, ApiState};
use rc_core::config::Config;
use rc_core::investigation::InvestigationTracker;

// ---------------------------------------------------------------------------
// ShutdownSignal
// ---------------------------------------------------------------------------

/// Cooperative shutdown flag shared between the signal handler and the
/// server loop. Clones observe the same signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    shutting_down: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Trigger shutdown. Repeated calls are ignored.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
        {
            info!("shutdown signal triggered");
            self.tx.send_replace(true);
        } else {
            warn!("shutdown already triggered");
        }
    }

    /// Resolves once [`trigger`](Self::trigger) has been called, including
    /// when it was called before this future was created.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` only fails after drop.
        let _ = rx.wait_for(|triggered| *triggered).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load config from an explicit path, or from `$ROOTCAUSE_CONFIG` /
/// `~/.rootcause/config.toml` when none is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Config::load().context("failed to load config"),
    }
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

/// Serves the investigation API until the [`ShutdownSignal`] fires.
///
/// A running investigation is not awaited on shutdown; its task is dropped
/// with the runtime.
pub struct Daemon {
    config: Config,
    api_state: Arc<ApiState>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    /// Wire the AWS backend and the configured LLM provider from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let pipeline =
            pipeline_from_config(&config).context("failed to build investigation pipeline")?;
        Ok(Self::with_pipeline(config, pipeline))
    }

    pub fn with_pipeline(config: Config, pipeline: InvestigationPipeline) -> Self {
        let runner = InvestigationRunner::new(Arc::new(pipeline), InvestigationTracker::new());
        let api_state = Arc::new(ApiState::new(runner, config.inventory.resources.clone()));
        Self {
            config,
            api_state,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Returns a handle that can be used to trigger shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    pub fn api_state(&self) -> &Arc<ApiState> {
        &self.api_state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bind `daemon.host:daemon.port` and serve until shutdown.
    pub async fn run(&self) -> Result<()> {
        let bind_addr = self.config.daemon.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("failed to bind {bind_addr}"))?;
        self.run_with_listener(listener).await
    }

    /// Serve on a pre-bound listener (e.g. `127.0.0.1:0` in tests).
    pub async fn run_with_listener(&self, listener: tokio::net::TcpListener) -> Result<()> {
        let router = api_router(self.api_state.clone(), &self.config.daemon);
        let bind_addr = listener.local_addr()?;
        info!(
            %bind_addr,
            allowed_origins = ?self.config.daemon.allowed_origins,
            resources = self.api_state.inventory.len(),
            "API server listening"
        );

        let shutdown = self.shutdown.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await
            .context("API server error")?;

        info!("daemon stopped");
        Ok(())
    }
}
