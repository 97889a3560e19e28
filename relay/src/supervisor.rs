use anyhow::{anyhow, Context, Result};
use tokio::task::JoinSet;
use tracing::info;

/// Supervised group of relay tasks.
///
/// Members that finish cleanly are logged and the wait continues; the first
/// member to fail (or panic) resolves the wait with that error and every
/// remaining member is aborted before `wait` returns. The pipeline loops do
/// not poll a cancellation signal, so the abort is the shutdown: in-flight
/// items are dropped and their claims expire on their own.
pub struct TaskGroup {
    set: JoinSet<(String, Result<()>)>,
}

impl TaskGroup {
    pub fn new() -> Self {
        Self {
            set: JoinSet::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, fut: F)
    where
        F: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        self.set.spawn(async move { (name, fut.await) });
    }

    pub async fn wait(mut self) -> Result<()> {
        let result = loop {
            match self.set.join_next().await {
                None => break Ok(()),
                Some(Ok((name, Ok(())))) => {
                    info!(task = %name, "task finished");
                    continue;
                }
                Some(Ok((name, Err(e)))) => {
                    break Err(e).with_context(|| format!("task {name} ended"));
                }
                Some(Err(join_err)) => break Err(anyhow!("task panicked: {join_err}")),
            }
        };
        self.set.shutdown().await;
        result
    }
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve on SIGINT or SIGTERM, reporting the interruption as the group's
/// terminal error so the process exits non-zero.
pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;

    info!("received shutdown signal");
    Err(anyhow!("interrupted by signal"))
}
