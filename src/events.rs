use std::sync::mpsc::{self, Receiver, Sender};

/// Fan-out of engine events to any number of subscribers.
///
/// Each subscriber owns a channel receiver; dropped receivers are pruned on
/// the next emit.
#[derive(Debug)]
pub struct EventHub<E> {
    subscribers: Vec<Sender<E>>,
}

impl<E> Default for EventHub<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventHub<E> {
    pub fn subscribe(&mut self) -> Receiver<E> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn emit(&mut self, event: E) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
