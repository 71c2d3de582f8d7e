//! Cooperative cancellation for in-flight generation calls

use std::sync::Arc;

use tokio::sync::watch;

/// Trigger side. Cloning shares the same underlying flag.
#[derive(Debug, Clone)]
pub struct CancellationHandle
{   tx: Arc<watch::Sender<bool>>
}

/// Observer side handed to `generate()`.
#[derive(Debug, Clone)]
pub struct CancellationSignal
{   rx: watch::Receiver<bool>
}

impl CancellationHandle
{   /// Create a handle and its first signal
    pub fn new() -> (Self, CancellationSignal)
    {   let (tx, rx) = watch::channel(false);
        (
          CancellationHandle { tx: Arc::new(tx) }
        , CancellationSignal { rx }
        )
    }

    /// Request cancellation; every signal observes it
    pub fn cancel(&self)
    {   self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool
    {   *self.tx.borrow()
    }

    /// Another signal bound to this handle
    pub fn signal(&self) -> CancellationSignal
    {   CancellationSignal { rx: self.tx.subscribe() }
    }
}

impl CancellationSignal
{   /// A signal that never fires
    pub fn never() -> Self
    {   let (_tx, rx) = watch::channel(false);
        CancellationSignal { rx }
    }

    pub fn is_cancelled(&self) -> bool
    {   *self.rx.borrow()
    }

    /// Resolves once cancellation is requested; pends forever if the
    /// handle is dropped without cancelling
    pub async fn cancelled(&self)
    {   let mut rx = self.rx.clone();
        loop
        {   if *rx.borrow_and_update()
            {   return;
            }
            if rx.changed().await.is_err()
            {   std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancellationSignal
{   fn default() -> Self
    {   Self::never()
    }
}
