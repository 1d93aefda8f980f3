use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

/// Push-style fan-out of anomalies to monitoring consumers.
///
/// Channels are unbounded so publishing never waits on a slow consumer.
/// Subscribers that dropped their receiver are pruned on the next publish.
#[derive(Debug)]
pub struct AnomalyFeed<T> {
    subscribers: Mutex<Vec<Sender<T>>>,
}

impl<T: Clone> AnomalyFeed<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> Receiver<T> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, item: &T) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(item.clone()).is_ok());
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<T: Clone> Default for AnomalyFeed<T> {
    fn default() -> Self {
        Self::new()
    }
}
