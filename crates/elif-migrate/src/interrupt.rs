//! Stop signals for running migration operations

use tokio::sync::mpsc;
use tracing::{info, warn};

/// Sends stop signals to a [`Migrator`](crate::Migrator)
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    sender: mpsc::UnboundedSender<()>,
}

impl InterruptHandle {
    /// Request a stop. Returns `false` once the receiving side is gone.
    pub fn interrupt(&self) -> bool {
        self.sender.send(()).is_ok()
    }
}

/// Receiving side of the stop signals, attached with
/// [`Migrator::with_interrupts`](crate::Migrator::with_interrupts).
///
/// Signals are not tied to an operation: one left unconsumed when an
/// operation ends carries over and halts the next one at its first boundary.
#[derive(Debug)]
pub struct Interrupts {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl Interrupts {
    /// A handle/receiver pair for programmatic interrupts
    pub fn channel() -> (InterruptHandle, Interrupts) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (InterruptHandle { sender }, Interrupts { receiver })
    }

    /// Forward the process' Ctrl-C signals. Must be called inside a tokio runtime.
    pub fn ctrl_c() -> Interrupts {
        let (handle, interrupts) = Self::channel();
        tokio::spawn(async move {
            loop {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    break;
                }
                info!("Received Ctrl-C");
                if !handle.interrupt() {
                    break;
                }
            }
        });
        interrupts
    }

    /// Wait for the next signal; `false` when no more can arrive
    pub async fn recv(&mut self) -> bool {
        self.receiver.recv().await.is_some()
    }

    /// Consume a signal that already arrived, without waiting
    pub fn take_pending(&mut self) -> bool {
        self.receiver.try_recv().is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_signals() {
        let (handle, mut interrupts) = Interrupts::channel();
        assert!(!interrupts.take_pending());

        assert!(handle.interrupt());
        assert!(handle.clone().interrupt());
        assert!(interrupts.take_pending());
        assert!(interrupts.recv().await);
        assert!(!interrupts.take_pending());
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (handle, mut interrupts) = Interrupts::channel();
        drop(handle);
        assert!(!interrupts.recv().await);

        let (handle, interrupts) = Interrupts::channel();
        drop(interrupts);
        assert!(!handle.interrupt());
    }
}
