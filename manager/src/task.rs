//! Safe runner for fire-and-forget work.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::warn;

/// Spawn `fut` detached, logging any error it returns.
///
/// Promotion writes, write-behind fan-out, and early refreshes all go
/// through here so that a failing background task can never take the
/// process down or silently disappear.
pub(crate) fn spawn_logged<F, E>(label: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            warn!(task = label, error = %e, "background task failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn error_is_swallowed() {
        let handle = spawn_logged("test", async { Err::<(), _>("boom") });
        // The task completes despite the error; nothing propagates.
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn success_completes() {
        let handle = spawn_logged("test", async { Ok::<_, String>(()) });
        handle.await.unwrap();
    }
}
