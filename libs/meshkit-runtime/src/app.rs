//! Application shell: start a set of servers, wait for shutdown, stop them.
//!
//! Servers start in insertion order and stop in reverse. If one fails to
//! start, the ones already running are stopped before the error is returned.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::shutdown;

/// A server the [`App`] can drive.
#[async_trait]
pub trait ManagedServer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> String;

    /// Start serving. Must be idempotent.
    ///
    /// # Errors
    /// Returns an error when the server cannot start serving.
    async fn start(&self) -> anyhow::Result<()>;

    /// Stop serving and release the listener. Must be idempotent.
    ///
    /// # Errors
    /// Returns an error when shutdown failed in a way worth reporting.
    async fn stop(&self) -> anyhow::Result<()>;
}

/// How [`App::run`] decides when to stop.
pub enum ShutdownOptions {
    /// Listen for OS signals (Ctrl+C / SIGTERM / SIGQUIT).
    Signals,
    /// An external `CancellationToken` controls the lifecycle.
    Token(CancellationToken),
    /// An arbitrary future; when it completes, shutdown starts.
    Future(Pin<Box<dyn Future<Output = ()> + Send>>),
}

/// Ordered collection of servers sharing one process lifetime.
#[derive(Default)]
pub struct App {
    servers: Vec<Arc<dyn ManagedServer>>,
}

impl App {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_server(mut self, server: Arc<dyn ManagedServer>) -> Self {
        self.servers.push(server);
        self
    }

    /// Start every server, wait for shutdown, stop every server.
    ///
    /// # Errors
    /// Returns the first start failure (after stopping the servers started
    /// before it) or a stop failure.
    pub async fn run(&self, shutdown: ShutdownOptions) -> anyhow::Result<()> {
        self.start_all().await?;

        match shutdown {
            ShutdownOptions::Signals => {
                if let Err(e) = shutdown::wait_for_shutdown().await {
                    tracing::warn!(
                        error = %e,
                        "shutdown: primary waiter failed; falling back to ctrl_c()"
                    );
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
            ShutdownOptions::Token(token) => {
                token.cancelled().await;
                tracing::info!("shutdown: external token cancelled");
            }
            ShutdownOptions::Future(waiter) => {
                waiter.await;
                tracing::info!("shutdown: external future completed");
            }
        }

        self.stop_all(self.servers.len()).await
    }

    async fn start_all(&self) -> anyhow::Result<()> {
        for (idx, server) in self.servers.iter().enumerate() {
            let name = server.name();
            tracing::info!(server = %name, "starting");
            if let Err(e) = server.start().await {
                tracing::error!(server = %name, error = %e, "start failed, rolling back");
                if let Err(stop_err) = self.stop_all(idx).await {
                    tracing::warn!(error = %stop_err, "rollback stop failed");
                }
                return Err(e).with_context(|| format!("failed to start server '{name}'"));
            }
        }
        Ok(())
    }

    /// Stop the first `count` servers in reverse order, stopping all even if
    /// some fail.
    async fn stop_all(&self, count: usize) -> anyhow::Result<()> {
        let mut first_err = None;
        for server in self.servers.iter().take(count).rev() {
            let name = server.name();
            tracing::info!(server = %name, "stopping");
            if let Err(e) = server.stop().await {
                tracing::error!(server = %name, error = %e, "stop failed");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        fail_start: bool,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ManagedServer for Recorder {
        fn name(&self) -> String {
            self.name.to_owned()
        }

        async fn start(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("start {}", self.name));
            if self.fail_start {
                anyhow::bail!("bind refused");
            }
            Ok(())
        }

        async fn stop(&self) -> anyhow::Result<()> {
            self.log.lock().push(format!("stop {}", self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, fail_start: bool, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn ManagedServer> {
        Arc::new(Recorder {
            name,
            fail_start,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn stops_in_reverse_order_after_token() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = App::new()
            .with_server(recorder("rpc", false, &log))
            .with_server(recorder("http", false, &log));

        let token = CancellationToken::new();
        token.cancel();
        app.run(ShutdownOptions::Token(token)).await.unwrap();

        assert_eq!(
            *log.lock(),
            vec!["start rpc", "start http", "stop http", "stop rpc"]
        );
    }

    #[tokio::test]
    async fn failed_start_rolls_back_started_servers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = App::new()
            .with_server(recorder("rpc", false, &log))
            .with_server(recorder("http", true, &log))
            .with_server(recorder("admin", false, &log));

        let err = app
            .run(ShutdownOptions::Future(Box::pin(std::future::pending())))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("http"));
        assert_eq!(*log.lock(), vec!["start rpc", "start http", "stop rpc"]);
    }

    #[tokio::test]
    async fn future_completion_triggers_shutdown() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let app = App::new().with_server(recorder("rpc", false, &log));
        app.run(ShutdownOptions::Future(Box::pin(async {})))
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["start rpc", "stop rpc"]);
    }
}
