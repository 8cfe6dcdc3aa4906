use std::collections::BTreeMap;

/// Timers owned by the recording engine. Declaration order breaks deadline ties.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Flush,
    Watchdog,
    CircuitBreaker,
    RestartSettle,
    Background,
    Tick,
}

/// One-shot deadlines keyed by timer kind; periodic timers are re-armed by their handler
///
#[derive(Debug, Default, Clone)]
pub struct Timers {
    deadlines: BTreeMap<TimerKind, u64>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the timer, replacing a pending deadline of the same kind
    ///
    pub fn schedule(&mut self, kind: TimerKind, at_ms: u64) {
        self.deadlines.insert(kind, at_ms);
    }

    /// Re-arms a periodic timer one interval after its previous deadline.
    ///
    /// Missed periods are not replayed: when the next deadline is already in the past
    /// the timer is armed one interval after `now_ms`.
    ///
    pub fn reschedule(&mut self, kind: TimerKind, previous_ms: u64, interval_ms: u64, now_ms: u64) {
        let next = previous_ms.saturating_add(interval_ms);
        let next = if next <= now_ms {
            now_ms.saturating_add(interval_ms)
        } else {
            next
        };
        self.schedule(kind, next);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<u64> {
        self.deadlines.get(&kind).copied()
    }

    /// Removes and returns the earliest timer due at `now_ms`
    ///
    pub fn pop_due(&mut self, now_ms: u64) -> Option<(TimerKind, u64)> {
        let (kind, at) = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now_ms)
            .min_by_key(|(kind, at)| (**at, **kind))
            .map(|(kind, at)| (*kind, *at))?;
        self.deadlines.remove(&kind);
        Some((kind, at))
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::recording::timers::{TimerKind, Timers};

    #[test]
    fn earliest_deadline_first() {
        let mut t = Timers::new();
        t.schedule(TimerKind::Tick, 1_000);
        t.schedule(TimerKind::Flush, 1_000);
        t.schedule(TimerKind::Watchdog, 500);
        t.schedule(TimerKind::CircuitBreaker, 5_000);

        assert_eq!(t.pop_due(1_000), Some((TimerKind::Watchdog, 500)));
        assert_eq!(t.pop_due(1_000), Some((TimerKind::Flush, 1_000)));
        assert_eq!(t.pop_due(1_000), Some((TimerKind::Tick, 1_000)));
        assert_eq!(t.pop_due(1_000), None);
        assert_eq!(t.deadline(TimerKind::CircuitBreaker), Some(5_000));

        t.cancel_all();
        assert!(t.is_empty());
    }

    #[test]
    fn periodic_rescheduling_skips_missed_periods() {
        let mut t = Timers::new();
        t.reschedule(TimerKind::Tick, 1_000, 1_000, 1_500);
        assert_eq!(t.deadline(TimerKind::Tick), Some(2_000));
        t.reschedule(TimerKind::Tick, 2_000, 1_000, 9_300);
        assert_eq!(t.deadline(TimerKind::Tick), Some(10_300));
    }
}
