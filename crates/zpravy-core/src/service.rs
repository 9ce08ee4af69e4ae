use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Owner-side handle of a background loop started with [`ServiceHandle::spawn`].
///
/// The loop receives a `watch::Receiver<bool>` that flips to `true` when
/// [`stop`](ServiceHandle::stop) is called. Dropping the handle without
/// calling `stop` also signals shutdown (the sender is dropped) but does not
/// wait for the loop to exit.
pub struct ServiceHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServiceHandle {
    pub fn spawn<F, Fut>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run(shutdown_rx));
        info!(service = name, "service started");
        Self {
            name,
            shutdown_tx,
            task,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal shutdown and wait for the loop to return.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            warn!(service = self.name, "service task ended abnormally: {e}");
        }
        info!(service = self.name, "service stopped");
    }
}

/// Resolve once `shutdown` reads `true` or its sender is gone.
pub async fn shutdown_signalled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn stop_waits_for_loop_exit() {
        let exited = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&exited);
        let handle = ServiceHandle::spawn("test", move |mut shutdown| async move {
            shutdown_signalled(&mut shutdown).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(!handle.is_finished());
        handle.stop().await;
        assert!(exited.load(Ordering::SeqCst));
    }
}
