use std::time::{Duration, Instant};

use devshadow_domain::{ReachabilityState, SubscriptionState};

/// The exponential backoff counter of §4.4: `w ← max(1, min(cap, 2·w))` on a
/// plain failure, `w ← 0` (and the next wait is the server-given delay) on
/// a failure that carries a server delay, `w ← 0` on success or a
/// connectivity-triggered kick.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    w: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(cap: Duration) -> Self {
        Self { w: Duration::ZERO, cap }
    }

    /// Records a failure and returns the wait before the next attempt.
    pub fn on_failure(&mut self, server_delay: Option<Duration>) -> Duration {
        match server_delay {
            Some(delay) => {
                self.w = Duration::ZERO;
                delay
            }
            None => {
                let doubled = self.w.saturating_mul(2);
                let candidate = doubled.max(Duration::from_secs(1));
                self.w = candidate.min(self.cap);
                self.w
            }
        }
    }

    pub fn reset(&mut self) {
        self.w = Duration::ZERO;
    }

    pub fn current(&self) -> Duration {
        self.w
    }
}

/// Side effects the device must perform in response to a subscription
/// transition. Kept as a flat list so the caller (holding `state_lock`)
/// can apply them without the engine itself touching timers or the
/// transport (§5: no lock held across a callback).
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ArmUnreachableTimer(Duration),
    RequestSession,
    StartConnectivityMonitor,
    StopConnectivityMonitor,
    ScheduleRetry(Duration),
    FireStateChanged(ReachabilityState),
    FireDeviceCachePrimed,
    FireDeviceBecameActive,
    ScheduleTimeSync(Duration),
}

/// C4: the subscription lifecycle state machine (§4.4).
pub struct SubscriptionEngine {
    state: SubscriptionState,
    reachability: ReachabilityState,
    backoff: Backoff,
    last_failure_at: Option<Instant>,
    cache_primed_fired: bool,
    unreachable_timeout: Duration,
    time_sync_initial_delay: Duration,
}

impl SubscriptionEngine {
    pub fn new(backoff_cap: Duration, unreachable_timeout: Duration, time_sync_initial_delay: Duration) -> Self {
        Self {
            state: SubscriptionState::Unsubscribed,
            reachability: ReachabilityState::Unknown,
            backoff: Backoff::new(backoff_cap),
            last_failure_at: None,
            cache_primed_fired: false,
            unreachable_timeout,
            time_sync_initial_delay,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn reachability(&self) -> ReachabilityState {
        self.reachability
    }

    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    pub fn backoff_wait(&self) -> Duration {
        self.backoff.current()
    }

    fn set_reachability(&mut self, next: ReachabilityState, effects: &mut Vec<Effect>) {
        if self.reachability != next {
            self.reachability = next;
            effects.push(Effect::FireStateChanged(next));
        }
    }

    /// `Unsubscribed -> Subscribing`, triggered by `setDelegate`.
    pub fn on_set_delegate(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state != SubscriptionState::Unsubscribed {
            return effects;
        }
        self.state = SubscriptionState::Subscribing;
        effects.push(Effect::ArmUnreachableTimer(self.unreachable_timeout));
        effects.push(Effect::RequestSession);
        effects
    }

    /// Priming reports completed and the subscription is established.
    /// `is_primed` is C1's cache-primed predicate evaluated after the
    /// priming batch.
    pub fn on_established(&mut self, is_primed: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.state = SubscriptionState::InitialEstablished;
        self.backoff.reset();
        self.last_failure_at = None;
        self.set_reachability(ReachabilityState::Reachable, &mut effects);
        effects.push(Effect::StopConnectivityMonitor);
        if is_primed {
            self.fire_cache_primed(&mut effects);
        }
        effects.push(Effect::ScheduleTimeSync(self.time_sync_initial_delay));
        effects
    }

    fn fire_cache_primed(&mut self, effects: &mut Vec<Effect>) {
        if !self.cache_primed_fired {
            self.cache_primed_fired = true;
            effects.push(Effect::FireDeviceCachePrimed);
        }
    }

    /// Explicit persisted-data injection or delegate installation with a
    /// pre-loaded cache can also satisfy the one-shot `deviceCachePrimed`
    /// (§4.4).
    pub fn note_cache_primed_if(&mut self, is_primed: bool) -> Vec<Effect> {
        let mut effects = Vec::new();
        if is_primed {
            self.fire_cache_primed(&mut effects);
        }
        effects
    }

    /// A session/establish attempt failed while `Subscribing`.
    pub fn on_establish_failure(&mut self, server_delay: Option<Duration>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.last_failure_at = Some(Instant::now());
        self.set_reachability(ReachabilityState::Unreachable, &mut effects);
        effects.push(Effect::StartConnectivityMonitor);
        let wait = self.backoff.on_failure(server_delay);
        effects.push(Effect::ScheduleRetry(wait));
        effects
    }

    /// The established subscription was detected as dropped. Recovery is
    /// left to the underlying protocol's own auto-resubscribe behavior
    /// once `InitialEstablished` (§4.4 "States"); this only updates the
    /// publicly visible reachability and starts connectivity monitoring —
    /// it must not touch backoff or schedule a core-driven resubscribe.
    pub fn on_resubscription_needed(&mut self, _server_delay: Option<Duration>) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.last_failure_at = Some(Instant::now());
        self.set_reachability(ReachabilityState::Unknown, &mut effects);
        effects.push(Effect::StartConnectivityMonitor);
        effects
    }

    /// An unsolicited publisher message arrived outside a subscription
    /// report — the node is demonstrably alive.
    pub fn on_unsolicited_message(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.set_reachability(ReachabilityState::Reachable, &mut effects);
        effects.push(Effect::FireDeviceBecameActive);
        effects
    }

    /// The connectivity monitor reported a possible routability change.
    /// Only meaningful while not already `Reachable` (§4.4).
    pub fn on_connectivity_kick(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.reachability == ReachabilityState::Reachable {
            return effects;
        }
        self.backoff.reset();
        effects.push(Effect::ScheduleRetry(Duration::ZERO));
        effects
    }

    /// `invalidate`: stop everything, but do not force a state change if
    /// a read client is still live (the caller handles that separately).
    pub fn invalidate(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        effects.push(Effect::StopConnectivityMonitor);
        if self.state == SubscriptionState::Subscribing {
            self.state = SubscriptionState::Unsubscribed;
        }
        effects
    }

    /// Read-through fallback guard (§4.4): a resubscribe attempt is
    /// warranted only once `read_through_guard` has elapsed since the last
    /// failure, and only while not reachable.
    pub fn should_attempt_read_through_resubscribe(&self, guard: Duration, now: Instant) -> bool {
        if self.reachability == ReachabilityState::Reachable {
            return false;
        }
        match self.last_failure_at {
            Some(t) => now.duration_since(t) >= guard,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_saturates_at_cap() {
        let mut backoff = Backoff::new(Duration::from_secs(3600));
        let mut waits = Vec::new();
        for _ in 0..13 {
            waits.push(backoff.on_failure(None).as_secs());
        }
        assert_eq!(
            waits,
            vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024, 2048, 3600]
        );
    }

    #[test]
    fn backoff_resets_to_zero_on_server_delay() {
        let mut backoff = Backoff::new(Duration::from_secs(3600));
        backoff.on_failure(None);
        backoff.on_failure(None);
        backoff.on_failure(Some(Duration::from_secs(5)));
        assert_eq!(backoff.current(), Duration::ZERO);
    }

    #[test]
    fn state_changed_has_no_duplicate_consecutive_states() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        let effects = engine.on_establish_failure(None);
        let fired: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::FireStateChanged(_)))
            .collect();
        assert_eq!(fired.len(), 1);

        // A second consecutive failure stays Unreachable -> no duplicate event.
        let effects = engine.on_establish_failure(None);
        let fired: Vec<_> = effects
            .iter()
            .filter(|e| matches!(e, Effect::FireStateChanged(_)))
            .collect();
        assert!(fired.is_empty());
    }

    #[test]
    fn resubscription_needed_does_not_touch_backoff_or_schedule_a_retry() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        engine.on_established(false);
        assert_eq!(engine.backoff_wait(), Duration::ZERO);

        let effects = engine.on_resubscription_needed(None);
        assert_eq!(engine.reachability(), ReachabilityState::Unknown);
        assert_eq!(engine.backoff_wait(), Duration::ZERO, "recovery is left to the protocol's own auto-resubscribe");
        assert!(!effects.iter().any(|e| matches!(e, Effect::ScheduleRetry(_))));
        assert!(effects.contains(&Effect::StartConnectivityMonitor));
    }

    #[test]
    fn connectivity_kick_resets_backoff_without_advancing_it() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        engine.on_establish_failure(None); // w = 1
        engine.on_establish_failure(None); // w = 2
        assert_eq!(engine.backoff_wait(), Duration::from_secs(2));

        let effects = engine.on_connectivity_kick();
        assert!(effects.contains(&Effect::ScheduleRetry(Duration::ZERO)));
        assert_eq!(engine.backoff_wait(), Duration::ZERO);
    }

    #[test]
    fn connectivity_kick_is_a_no_op_while_reachable() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        engine.on_established(false);
        assert_eq!(engine.reachability(), ReachabilityState::Reachable);
        assert!(engine.on_connectivity_kick().is_empty());
    }

    #[test]
    fn device_cache_primed_fires_exactly_once() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        let effects = engine.on_established(true);
        assert!(effects.contains(&Effect::FireDeviceCachePrimed));

        // A later drop-and-reestablish must not fire it again.
        engine.on_resubscription_needed(None);
        let effects = engine.on_established(true);
        assert!(!effects.contains(&Effect::FireDeviceCachePrimed));
    }

    #[test]
    fn read_through_guard_requires_elapsed_window_and_non_reachable() {
        let mut engine = SubscriptionEngine::new(
            Duration::from_secs(3600),
            Duration::from_secs(10),
            Duration::from_secs(120),
        );
        engine.on_set_delegate();
        engine.on_establish_failure(None);
        assert!(!engine.should_attempt_read_through_resubscribe(Duration::from_secs(600), Instant::now()));
        let later = Instant::now() + Duration::from_secs(601);
        assert!(engine.should_attempt_read_through_resubscribe(Duration::from_secs(600), later));
    }
}
