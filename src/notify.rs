use crossbeam::channel::{unbounded, Receiver, Sender};
use log::debug;
use std::sync::Mutex;

/// Observer registry delivering events over channels.
///
/// Each subscriber receives its own copy of every event emitted after it subscribed.
/// Subscribers that dropped their receiver are forgotten on the next emit.
///
#[derive(Debug)]
pub struct EventBus<E> {
    subscribers: Mutex<Vec<Sender<E>>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::default()),
        }
    }
}

impl<E: Clone + Send> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|s| s.send(event.clone()).is_ok());
        if subscribers.len() != before {
            debug!(
                "Dropped {} disconnected subscriber(s)",
                before - subscribers.len()
            );
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use crate::notify::EventBus;

    #[test]
    fn every_subscriber_gets_a_copy() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        bus.emit(1);
        bus.emit(2);
        assert_eq!(a.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(b.try_iter().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let bus = EventBus::new();
        bus.emit("early");
        let rx = bus.subscribe();
        bus.emit("late");
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec!["late"]);
    }

    #[test]
    fn dropped_subscribers_are_forgotten() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        {
            let _b = bus.subscribe();
        }
        assert_eq!(bus.subscriber_count(), 2);
        bus.emit(());
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(a.len(), 1);
    }
}
