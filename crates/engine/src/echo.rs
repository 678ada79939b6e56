use std::collections::HashMap;
use std::time::Duration;

use stickies_core::EntityId;
use tokio::time::Instant;

/// An incoming event discarded because it reports this session's own write.
/// Not an error; surfaced so callers can observe suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleEventDrop {
    pub id: EntityId,
    pub since_local_write: Duration,
}

/// Per-entity ledger of the last local write time.
#[derive(Debug)]
pub struct EchoGuard {
    window: Duration,
    ledger: HashMap<EntityId, Instant>,
}

impl EchoGuard {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ledger: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn record_local_write(&mut self, id: EntityId) {
        self.record_local_write_at(id, Instant::now());
    }

    pub fn record_local_write_at(&mut self, id: EntityId, at: Instant) {
        self.ledger.insert(id, at);
    }

    /// Some if a local write to `id` was recorded less than one window before
    /// `arrived_at`.
    pub fn check(&self, id: EntityId, arrived_at: Instant) -> Option<StaleEventDrop> {
        let written = *self.ledger.get(&id)?;
        let elapsed = arrived_at.checked_duration_since(written)?;
        (elapsed < self.window).then_some(StaleEventDrop {
            id,
            since_local_write: elapsed,
        })
    }

    pub fn should_suppress(&self, id: EntityId, arrived_at: Instant) -> bool {
        self.check(id, arrived_at).is_some()
    }

    /// Forget stamps that can no longer suppress anything.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.ledger
            .retain(|_, written| now.saturating_duration_since(*written) < window);
    }

    pub fn len(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn suppresses_inside_window_only() {
        let mut guard = EchoGuard::new(Duration::from_secs(3));
        let id = EntityId::new();
        guard.record_local_write(id);

        tokio::time::advance(Duration::from_millis(2900)).await;
        let drop = guard.check(id, Instant::now()).unwrap();
        assert_eq!(drop.since_local_write, Duration::from_millis(2900));

        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(!guard.should_suppress(id, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn other_entities_pass() {
        let mut guard = EchoGuard::new(Duration::from_secs(3));
        guard.record_local_write(EntityId::new());
        assert!(!guard.should_suppress(EntityId::new(), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn arrival_before_write_is_not_an_echo() {
        let mut guard = EchoGuard::new(Duration::from_secs(3));
        let id = EntityId::new();
        let arrived = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        guard.record_local_write(id);
        assert!(!guard.should_suppress(id, arrived));
    }

    #[tokio::test(start_paused = true)]
    async fn later_write_restarts_window() {
        let mut guard = EchoGuard::new(Duration::from_secs(3));
        let id = EntityId::new();
        guard.record_local_write(id);
        tokio::time::advance(Duration::from_secs(2)).await;
        guard.record_local_write(id);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(guard.should_suppress(id, Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn prune_drops_expired_stamps() {
        let mut guard = EchoGuard::new(Duration::from_secs(3));
        guard.record_local_write(EntityId::new());
        tokio::time::advance(Duration::from_secs(1)).await;
        guard.record_local_write(EntityId::new());
        tokio::time::advance(Duration::from_millis(2500)).await;
        guard.prune(Instant::now());
        assert_eq!(guard.len(), 1);
    }
}
