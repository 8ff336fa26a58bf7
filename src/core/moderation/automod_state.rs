// Per-(guild, user) auto-moderation state.
//
// Holds the warning counter and the message-rate sliding window for each
// user. Every entry sits behind its own async mutex: one evaluation holds the
// lock for the whole check-and-act sequence, so two rapid messages from the
// same user can't both read the same counter and both decide to escalate.
// Different users never contend.
//
// Entries are created on first reference and evicted by `prune_idle` once
// they go quiet, so memory stays bounded over long uptimes.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hard cap on remembered timestamps per user.
pub const WINDOW_CAPACITY: usize = 100;

/// Mutable state for one user in one guild.
#[derive(Debug)]
pub struct UserModState {
    warnings: u32,
    window: VecDeque<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

impl UserModState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            warnings: 0,
            window: VecDeque::new(),
            last_seen: now,
        }
    }

    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// Add one warning. Returns `Some(count)` while below `threshold`; once the
    /// threshold is reached the counter resets and `None` signals escalation.
    pub fn add_warning(&mut self, threshold: u32) -> Option<u32> {
        self.warnings += 1;
        if self.warnings >= threshold {
            self.warnings = 0;
            None
        } else {
            Some(self.warnings)
        }
    }

    pub fn clear_warnings(&mut self) {
        self.warnings = 0;
    }

    /// Record a message at `now` and drop entries older than `window`.
    /// Returns how many messages the window holds afterwards.
    pub fn record_message(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        self.window.push_back(now);
        if self.window.len() > WINDOW_CAPACITY {
            self.window.pop_front();
        }

        let cutoff = now - window;
        while let Some(&oldest) = self.window.front() {
            if oldest < cutoff {
                self.window.pop_front();
            } else {
                break;
            }
        }

        self.window.len()
    }

    /// Consume the current burst if the window holds `threshold` or more
    /// messages. Clearing here keeps one burst from firing twice.
    pub fn take_burst(&mut self, threshold: u32) -> bool {
        if self.window.len() >= threshold as usize {
            self.window.clear();
            true
        } else {
            false
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_seen {
            self.last_seen = now;
        }
    }
}

/// Eviction policy for idle entries.
#[derive(Debug, Clone, Copy)]
pub struct StateLimits {
    /// Entries untouched for this long are dropped
    pub idle_ttl: Duration,
    /// Above this many entries the least recently seen are dropped
    pub max_entries: usize,
}

impl Default for StateLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::hours(1),
            max_entries: 50_000,
        }
    }
}

/// Engine-owned store of every user's state, keyed by (guild_id, user_id).
pub struct UserStateStore {
    entries: DashMap<(u64, u64), Arc<Mutex<UserModState>>>,
    limits: StateLimits,
}

impl UserStateStore {
    pub fn new(limits: StateLimits) -> Self {
        Self {
            entries: DashMap::new(),
            limits,
        }
    }

    /// Lock one user's state, creating it on first reference.
    pub async fn lock(
        &self,
        guild_id: u64,
        user_id: u64,
        now: DateTime<Utc>,
    ) -> OwnedMutexGuard<UserModState> {
        // Clone the Arc out before awaiting so no map shard stays locked.
        let slot = self
            .entries
            .entry((guild_id, user_id))
            .or_insert_with(|| Arc::new(Mutex::new(UserModState::new(now))))
            .clone();

        let mut guard = slot.lock_owned().await;
        guard.touch(now);
        guard
    }

    pub async fn warnings(&self, guild_id: u64, user_id: u64) -> u32 {
        let slot = self.entries.get(&(guild_id, user_id)).map(|s| Arc::clone(&s));
        match slot {
            Some(slot) => slot.lock().await.warnings(),
            None => 0,
        }
    }

    pub async fn clear_warnings(&self, guild_id: u64, user_id: u64) {
        let slot = self.entries.get(&(guild_id, user_id)).map(|s| Arc::clone(&s));
        if let Some(slot) = slot {
            slot.lock().await.clear_warnings();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop idle entries, then the least recently seen ones if still over
    /// capacity. Entries currently locked by an evaluation are kept.
    /// Returns how many entries were removed.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let cutoff = now - self.limits.idle_ttl;

        // A strong count above one means an evaluation is about to lock it.
        self.entries.retain(|_, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            match slot.try_lock() {
                Ok(state) => state.last_seen >= cutoff,
                Err(_) => true,
            }
        });

        if self.entries.len() > self.limits.max_entries {
            let mut idle: Vec<((u64, u64), DateTime<Utc>)> = self
                .entries
                .iter()
                .filter(|entry| Arc::strong_count(entry.value()) == 1)
                .filter_map(|entry| {
                    entry
                        .value()
                        .try_lock()
                        .ok()
                        .map(|state| (*entry.key(), state.last_seen))
                })
                .collect();
            idle.sort_by_key(|(_, seen)| *seen);

            let excess = self.entries.len() - self.limits.max_entries;
            for (key, _) in idle.into_iter().take(excess) {
                self.entries.remove(&key);
            }
        }

        before.saturating_sub(self.entries.len())
    }
}

impl Default for UserStateStore {
    fn default() -> Self {
        Self::new(StateLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_counter_resets_at_threshold() {
        let mut state = UserModState::new(Utc::now());

        assert_eq!(state.add_warning(3), Some(1));
        assert_eq!(state.add_warning(3), Some(2));
        assert_eq!(state.add_warning(3), None);
        assert_eq!(state.warnings(), 0);
        assert_eq!(state.add_warning(3), Some(1));
    }

    #[test]
    fn test_threshold_of_one_escalates_immediately() {
        let mut state = UserModState::new(Utc::now());
        assert_eq!(state.add_warning(1), None);
        assert_eq!(state.warnings(), 0);
    }

    #[test]
    fn test_window_triggers_inside_time_threshold() {
        let start = Utc::now();
        let mut state = UserModState::new(start);
        let window = Duration::seconds(5);

        for i in 0..4 {
            state.record_message(start + Duration::seconds(i), window);
            assert!(!state.take_burst(5));
        }
        assert_eq!(state.record_message(start + Duration::seconds(4), window), 5);
        assert!(state.take_burst(5));
        // Cleared on trigger
        assert_eq!(state.window_len(), 0);
    }

    #[test]
    fn test_recording_alone_keeps_the_burst() {
        let start = Utc::now();
        let mut state = UserModState::new(start);
        let window = Duration::seconds(5);

        for i in 0..7 {
            state.record_message(start + Duration::milliseconds(i * 400), window);
        }
        assert_eq!(state.window_len(), 7);
        assert!(state.take_burst(5));
        assert!(!state.take_burst(5));
    }

    #[test]
    fn test_window_spread_out_does_not_trigger() {
        let start = Utc::now();
        let mut state = UserModState::new(start);
        let window = Duration::seconds(5);

        // 5 messages over 10 seconds
        for i in 0..5 {
            let at = start + Duration::milliseconds(i * 2500);
            state.record_message(at, window);
            assert!(!state.take_burst(5));
        }
        // Only the entries inside the last 5 seconds survive
        assert_eq!(state.window_len(), 3);
    }

    #[test]
    fn test_window_capacity_is_bounded() {
        let start = Utc::now();
        let mut state = UserModState::new(start);
        for _ in 0..(WINDOW_CAPACITY * 2) {
            state.record_message(start, Duration::seconds(60));
        }
        assert_eq!(state.window_len(), WINDOW_CAPACITY);
        assert!(state.take_burst(WINDOW_CAPACITY as u32));
    }

    #[tokio::test]
    async fn test_store_tracks_users_separately() {
        let store = UserStateStore::default();
        let now = Utc::now();

        store.lock(1, 100, now).await.add_warning(5);
        store.lock(1, 100, now).await.add_warning(5);
        store.lock(1, 200, now).await.add_warning(5);
        store.lock(2, 100, now).await.add_warning(5);

        assert_eq!(store.warnings(1, 100).await, 2);
        assert_eq!(store.warnings(1, 200).await, 1);
        assert_eq!(store.warnings(2, 100).await, 1);
        assert_eq!(store.warnings(3, 100).await, 0);

        store.clear_warnings(1, 100).await;
        assert_eq!(store.warnings(1, 100).await, 0);
    }

    #[tokio::test]
    async fn test_prune_idle_entries() {
        let store = UserStateStore::new(StateLimits {
            idle_ttl: Duration::minutes(10),
            max_entries: 100,
        });
        let now = Utc::now();

        drop(store.lock(1, 1, now - Duration::minutes(30)).await);
        drop(store.lock(1, 2, now).await);

        assert_eq!(store.prune_idle(now), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.warnings(1, 1).await, 0);
    }

    #[tokio::test]
    async fn test_prune_over_capacity_drops_oldest() {
        let store = UserStateStore::new(StateLimits {
            idle_ttl: Duration::hours(1),
            max_entries: 2,
        });
        let now = Utc::now();

        for (user, age) in [(1u64, 3i64), (2, 2), (3, 1)] {
            let mut guard = store.lock(1, user, now - Duration::minutes(age)).await;
            guard.add_warning(10);
        }

        assert_eq!(store.prune_idle(now), 1);
        assert_eq!(store.warnings(1, 1).await, 0);
        assert_eq!(store.warnings(1, 3).await, 1);
    }

    #[tokio::test]
    async fn test_locked_entries_survive_pruning() {
        let store = UserStateStore::new(StateLimits {
            idle_ttl: Duration::seconds(1),
            max_entries: 100,
        });
        let now = Utc::now();

        let _held = store.lock(1, 1, now - Duration::hours(1)).await;
        assert_eq!(store.prune_idle(now), 0);
    }
}
