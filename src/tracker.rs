//! Presence tracking.
//!
//! `PresenceTracker` converts the raw set of codes decoded from one frame
//! into discrete entry/exit events. A code enters when it is first seen and
//! exits when it has been absent long enough for the configured policy to
//! give up on it. Single-frame decode misses are absorbed by the debounced
//! policy, so a flickering decode does not double-count an item.
//!
//! The tracker is a pure state machine: no I/O, no clock reads. The caller
//! supplies `now`, which must be monotonically non-decreasing within one
//! session.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use crate::Code;

const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Exit decision policy for codes that stop being detected.
///
/// `Debounced` keeps a code active until it has been undetected for longer
/// than `timeout`; this is the default because it tolerates decode flicker.
/// `Strict` exits a code the instant a frame misses it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitPolicy {
    Debounced { timeout: Duration },
    Strict,
}

impl Default for ExitPolicy {
    fn default() -> Self {
        ExitPolicy::Debounced {
            timeout: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerConfig {
    pub policy: ExitPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Entry,
    Exit,
}

/// Derived signal that an item began or stopped being present.
///
/// Produced only by [`PresenceTracker::process_frame`]. For debounced exits
/// the timestamp is the instant the timeout expired, not the frame instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionEvent {
    pub code: Code,
    pub timestamp: Instant,
    pub kind: EventKind,
}

/// Per-code Absent/Present state machine over the whole detected stream.
///
/// The active set maps each present code to its last-seen instant. A code is
/// a member exactly as long as it has not yet triggered an exit under the
/// configured policy.
pub struct PresenceTracker {
    policy: ExitPolicy,
    active: BTreeMap<Code, Instant>,
}

impl PresenceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            policy: config.policy,
            active: BTreeMap::new(),
        }
    }

    /// Fold one frame's detected set into the active set and return the
    /// events it triggered.
    ///
    /// Entries are emitted for codes seen for the first time; a code already
    /// active only has its last-seen instant refreshed. Exits are emitted
    /// for active codes whose absence has outlasted the policy. Both groups
    /// come out sorted by code (entries first), so output is reproducible.
    pub fn process_frame(
        &mut self,
        detected: &BTreeSet<Code>,
        now: Instant,
    ) -> Vec<DetectionEvent> {
        let mut events = Vec::new();

        for code in detected {
            match self.active.get_mut(code) {
                Some(last_seen) => {
                    *last_seen = now;
                }
                None => {
                    self.active.insert(code.clone(), now);
                    events.push(DetectionEvent {
                        code: code.clone(),
                        timestamp: now,
                        kind: EventKind::Entry,
                    });
                }
            }
        }

        let mut expired: Vec<(Code, Instant)> = Vec::new();
        for (code, last_seen) in &self.active {
            if detected.contains(code) {
                continue;
            }
            match self.policy {
                ExitPolicy::Strict => expired.push((code.clone(), now)),
                ExitPolicy::Debounced { timeout } => {
                    if now.duration_since(*last_seen) > timeout {
                        expired.push((code.clone(), *last_seen + timeout));
                    }
                }
            }
        }

        for (code, expired_at) in expired {
            self.active.remove(&code);
            events.push(DetectionEvent {
                code,
                timestamp: expired_at,
                kind: EventKind::Exit,
            });
        }

        events
    }

    /// Forget all active codes without emitting exit events. Used when a
    /// session ends; the next session starts from an empty active set.
    pub fn reset(&mut self) {
        self.active.clear();
    }

    /// Number of codes currently considered present.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(codes: &[&str]) -> BTreeSet<Code> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    fn strict() -> PresenceTracker {
        PresenceTracker::new(TrackerConfig {
            policy: ExitPolicy::Strict,
        })
    }

    fn debounced(ms: u64) -> PresenceTracker {
        PresenceTracker::new(TrackerConfig {
            policy: ExitPolicy::Debounced {
                timeout: Duration::from_millis(ms),
            },
        })
    }

    fn kinds(events: &[DetectionEvent]) -> Vec<(String, EventKind)> {
        events
            .iter()
            .map(|ev| (ev.code.clone(), ev.kind))
            .collect()
    }

    #[test]
    fn strict_policy_matches_reference_sequence() {
        // Frames: {}, {A}, {A}, {A}, {}, {A}, {A,B}, {B}, {}
        let frames: Vec<BTreeSet<Code>> = vec![
            set(&[]),
            set(&["A"]),
            set(&["A"]),
            set(&["A"]),
            set(&[]),
            set(&["A"]),
            set(&["A", "B"]),
            set(&["B"]),
            set(&[]),
        ];

        let mut tracker = strict();
        let base = Instant::now();
        let mut all = Vec::new();
        for (i, frame) in frames.iter().enumerate() {
            let now = base + Duration::from_millis(100 * i as u64);
            for ev in tracker.process_frame(frame, now) {
                all.push((i + 1, ev.code, ev.kind));
            }
        }

        assert_eq!(
            all,
            vec![
                (2, "A".to_string(), EventKind::Entry),
                (5, "A".to_string(), EventKind::Exit),
                (6, "A".to_string(), EventKind::Entry),
                (7, "B".to_string(), EventKind::Entry),
                (8, "A".to_string(), EventKind::Exit),
                (9, "B".to_string(), EventKind::Exit),
            ]
        );

        let entries_a = all
            .iter()
            .filter(|(_, c, k)| c == "A" && *k == EventKind::Entry)
            .count();
        let entries_b = all
            .iter()
            .filter(|(_, c, k)| c == "B" && *k == EventKind::Entry)
            .count();
        assert_eq!(entries_a, 2);
        assert_eq!(entries_b, 1);
    }

    #[test]
    fn debounce_absorbs_single_frame_miss() {
        let mut tracker = debounced(300);
        let base = Instant::now();

        let events = tracker.process_frame(&set(&["A"]), base);
        assert_eq!(kinds(&events), vec![("A".to_string(), EventKind::Entry)]);

        // One missed frame well inside the timeout: no exit.
        let events = tracker.process_frame(&set(&[]), base + Duration::from_millis(100));
        assert!(events.is_empty());

        // Reappearance must not emit a second entry.
        let events = tracker.process_frame(&set(&["A"]), base + Duration::from_millis(200));
        assert!(events.is_empty());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn debounced_exit_fires_at_expiry_instant() {
        let mut tracker = debounced(300);
        let base = Instant::now();

        tracker.process_frame(&set(&["A"]), base);
        tracker.process_frame(&set(&["A"]), base + Duration::from_millis(100));

        // Absent but not yet expired.
        let events = tracker.process_frame(&set(&[]), base + Duration::from_millis(350));
        assert!(events.is_empty());

        // Expired: exit timestamped at last_seen + timeout, not the frame time.
        let events = tracker.process_frame(&set(&[]), base + Duration::from_millis(500));
        assert_eq!(kinds(&events), vec![("A".to_string(), EventKind::Exit)]);
        assert_eq!(events[0].timestamp, base + Duration::from_millis(400));
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn refresh_extends_presence_past_original_timeout() {
        let mut tracker = debounced(200);
        let base = Instant::now();

        tracker.process_frame(&set(&["A"]), base);
        tracker.process_frame(&set(&["A"]), base + Duration::from_millis(150));

        // 250ms after first sight but only 100ms after the refresh.
        let events = tracker.process_frame(&set(&[]), base + Duration::from_millis(250));
        assert!(events.is_empty());
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn no_second_entry_without_intervening_exit() {
        let mut tracker = debounced(100);
        let base = Instant::now();

        let mut entries = 0;
        for i in 0..20u64 {
            // Code present on every frame.
            let events = tracker.process_frame(&set(&["A"]), base + Duration::from_millis(50 * i));
            entries += events
                .iter()
                .filter(|ev| ev.kind == EventKind::Entry)
                .count();
        }
        assert_eq!(entries, 1);
    }

    #[test]
    fn duplicate_detections_collapse_to_one_entry() {
        let mut tracker = strict();
        let detected: BTreeSet<Code> = ["A", "A", "A"].iter().map(|c| c.to_string()).collect();
        assert_eq!(detected.len(), 1);

        let events = tracker.process_frame(&detected, Instant::now());
        assert_eq!(kinds(&events), vec![("A".to_string(), EventKind::Entry)]);
    }

    #[test]
    fn simultaneous_entries_and_exits_are_sorted_by_code() {
        let mut tracker = strict();
        let base = Instant::now();

        let events = tracker.process_frame(&set(&["C", "A", "B"]), base);
        assert_eq!(
            kinds(&events),
            vec![
                ("A".to_string(), EventKind::Entry),
                ("B".to_string(), EventKind::Entry),
                ("C".to_string(), EventKind::Entry),
            ]
        );

        let events = tracker.process_frame(&set(&[]), base + Duration::from_millis(100));
        assert_eq!(
            kinds(&events),
            vec![
                ("A".to_string(), EventKind::Exit),
                ("B".to_string(), EventKind::Exit),
                ("C".to_string(), EventKind::Exit),
            ]
        );
    }

    #[test]
    fn reset_clears_state_without_events() {
        let mut tracker = debounced(100);
        let base = Instant::now();

        tracker.process_frame(&set(&["A", "B"]), base);
        assert_eq!(tracker.active_count(), 2);

        tracker.reset();
        assert_eq!(tracker.active_count(), 0);

        // Long after any timeout: nothing to exit, and a reappearance is a
        // fresh entry.
        let events = tracker.process_frame(&set(&[]), base + Duration::from_secs(10));
        assert!(events.is_empty());
        let events = tracker.process_frame(&set(&["A"]), base + Duration::from_secs(11));
        assert_eq!(kinds(&events), vec![("A".to_string(), EventKind::Entry)]);
    }
}
