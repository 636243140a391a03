use std::future::Future;
use std::time::Duration;
use tokio::{sync::watch, time::sleep};

/// Sending half of a stop signal shared by a group of tasks.
#[derive(Debug)]
pub struct Trigger {
    tx: watch::Sender<bool>,
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    /// Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half. A dropped [`Trigger`] counts as stopped.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    /// Sleeps for `duration`, returning `false` if stopped first.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => false,
            _ = sleep(duration) => true,
        }
    }

    /// Drives `fut` to completion unless stop arrives first.
    pub async fn run<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        tokio::select! {
            _ = self.wait() => None,
            out = fut => Some(out),
        }
    }
}
