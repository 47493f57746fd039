//! Cooperative cancellation of trade flows.
//!
//! A flow checks its [`Cancellation`] between steps only. A step already
//! in flight (a timed network call, a ledger submission) runs to
//! completion first.

use tokio::sync::watch;

/// Receiving end of a cancel signal. Cheap to clone; one per flow.
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

/// Sending end. Cancels every flow holding a connected [`Cancellation`].
#[derive(Debug)]
pub struct Canceller(watch::Sender<bool>);

impl Cancellation {
    pub fn new() -> (Canceller, Cancellation) {
        let (tx, rx) = watch::channel(false);
        (Canceller(tx), Cancellation(rx))
    }

    /// A signal that never fires.
    pub fn never() -> Cancellation {
        let (_tx, rx) = watch::channel(false);
        Cancellation(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once the signal fires. Never resolves if the sender is
    /// gone without having cancelled.
    pub async fn cancelled(&mut self) {
        if self.0.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Canceller {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}
