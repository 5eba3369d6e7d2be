//! Active-Speaker Detection
//!
//! Derives the current speaker from RMS audio-level reports
//! (`sqrt(mean(sample^2))`, linear 0.0-1.0). A participant takes the floor
//! after staying above the silence threshold for a sustained window;
//! hysteresis keeps cross-talk from flickering the floor between
//! participants, and a release window clears it when everyone goes quiet.
//!
//! The estimator is pure bookkeeping: callers feed levels with a monotonic
//! timestamp, and it answers with floor changes. At most one participant
//! holds the floor.

use std::collections::HashMap;
use std::time::Instant;

use glossa_common::ParticipantId;

use crate::config::SpeakerConfig;

#[derive(Debug, Clone, Copy)]
struct Activity {
    level: f32,
    /// Start of the current uninterrupted above-threshold run.
    above_since: Option<Instant>,
    /// Most recent above-threshold report.
    last_above: Option<Instant>,
}

/// Active-speaker estimation state.
#[derive(Debug)]
pub struct SpeakerEstimator {
    config: SpeakerConfig,
    activity: HashMap<ParticipantId, Activity>,
    current: Option<ParticipantId>,
}

impl SpeakerEstimator {
    /// Create an estimator with the given tuning.
    #[must_use]
    pub fn new(config: SpeakerConfig) -> Self {
        Self {
            config,
            activity: HashMap::new(),
            current: None,
        }
    }

    /// The participant currently holding the floor.
    #[must_use]
    pub const fn current(&self) -> Option<ParticipantId> {
        self.current
    }

    /// Record a level report. Returns the new floor when it changed.
    pub fn observe(
        &mut self,
        participant: ParticipantId,
        level: f32,
        now: Instant,
    ) -> Option<Option<ParticipantId>> {
        let entry = self.activity.entry(participant).or_insert(Activity {
            level: 0.0,
            above_since: None,
            last_above: None,
        });

        entry.level = level;
        if level >= self.config.silence_threshold {
            entry.above_since.get_or_insert(now);
            entry.last_above = Some(now);
        } else {
            entry.above_since = None;
        }

        self.reassess(now)
    }

    /// Drop a participant (session removed). Returns the new floor when it
    /// changed.
    pub fn forget(
        &mut self,
        participant: ParticipantId,
        now: Instant,
    ) -> Option<Option<ParticipantId>> {
        self.activity.remove(&participant);
        if self.current == Some(participant) {
            self.current = None;
        }
        self.reassess(now)
    }

    /// Clear all state (teardown).
    pub fn reset(&mut self) {
        self.activity.clear();
        self.current = None;
    }

    /// Has the participant been above the threshold long enough to take the
    /// floor?
    fn is_sustained(&self, activity: &Activity, now: Instant) -> bool {
        activity
            .above_since
            .is_some_and(|since| now.duration_since(since) >= self.config.sustain)
    }

    /// Does the holder still count as speaking recently?
    fn holder_retains(&self, holder: ParticipantId, now: Instant) -> bool {
        self.activity
            .get(&holder)
            .and_then(|a| a.last_above)
            .is_some_and(|last| now.duration_since(last) <= self.config.release)
    }

    fn reassess(&mut self, now: Instant) -> Option<Option<ParticipantId>> {
        let previous = self.current;

        let challenger = self
            .activity
            .iter()
            .filter(|(id, a)| Some(**id) != self.current && self.is_sustained(a, now))
            .max_by(|(_, a), (_, b)| {
                a.level
                    .partial_cmp(&b.level)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, a)| (*id, a.level));

        let next = match self.current {
            Some(holder) if self.holder_retains(holder, now) => {
                let holder_level = self.activity.get(&holder).map_or(0.0, |a| a.level);
                match challenger {
                    // A sustained, clearly louder challenger takes the floor.
                    Some((id, level)) if level > holder_level * self.config.hysteresis => Some(id),
                    _ => Some(holder),
                }
            }
            // Floor released (or never held): loudest sustained voice wins.
            _ => challenger.map(|(id, _)| id),
        };

        if next == previous {
            None
        } else {
            self.current = next;
            Some(next)
        }
    }
}
