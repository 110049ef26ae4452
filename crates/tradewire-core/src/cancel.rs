use std::sync::Arc;

use tokio::sync::watch;

/// Owner side of a cancellation signal. Cloning shares the same signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

/// Observer side handed to a request; fires at most once.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once the handle cancels. Never resolves if every handle is dropped first.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
