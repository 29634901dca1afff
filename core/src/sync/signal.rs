use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch::{
    Receiver as WatchReceiver, Sender as WatchSender, channel as watch_channel,
};
use tracing::trace;

#[derive(Debug, Error)]
#[error("Signal sender dropped")]
pub struct RecvError;

/// Creates a last-value-wins signal seeded with `value`.
pub fn channel<T>(value: T) -> (Sender<T>, Receiver<T>)
where
    T: PartialEq,
{
    let (tx, rx) = watch_channel(Arc::new(value));
    (Sender { tx }, Receiver { rx })
}

#[derive(Clone, Debug)]
pub struct Sender<T>
where
    T: PartialEq,
{
    tx: WatchSender<Arc<T>>,
}

impl<T> Sender<T>
where
    T: PartialEq,
{
    pub fn current(&self) -> Arc<T> {
        self.tx.borrow().clone()
    }

    /// Publishes `value` unless it equals the current one. Returns whether it changed.
    pub fn replace(&self, value: T) -> bool {
        if *self.tx.borrow().as_ref() == value {
            trace!("No change in value, not updating signal");
            false
        } else {
            trace!("Replacing value in signal");
            self.tx.send_replace(Arc::new(value));
            true
        }
    }

    pub fn subscribe(&self) -> Receiver<T> {
        Receiver {
            rx: self.tx.subscribe(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Receiver<T>
where
    T: PartialEq,
{
    rx: WatchReceiver<Arc<T>>,
}

impl<T> Receiver<T>
where
    T: PartialEq,
{
    pub fn current(&self) -> Arc<T> {
        self.rx.borrow().clone()
    }

    pub async fn changed(&mut self) -> Result<(), RecvError> {
        self.rx.changed().await.map_err(|_| {
            trace!("Sender dropped");
            RecvError
        })
    }
}
