//! Miss-streak decision policy.
//!
//! Pure functions over [`MonitorState`]: one tick's match results go in, the
//! next state and the alert decision come out. The monitor loop owns the
//! state; nothing here touches collaborators.

use crate::types::MatchResult;
use serde::{Deserialize, Serialize};

/// Notice shown for a tick that produced no face.
pub const NO_FACE_NOTICE: &str = "No face detected";

/// Counters owned by one monitor session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MonitorState {
    /// Consecutive ticks without a confirmed match.
    pub miss_streak: u32,
    /// Set while the streak is above the threshold and an alert has been raised for it.
    pub alert_fired: bool,
    /// Completed ticks.
    pub ticks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    Sampling,
    Alerted,
}

impl MonitorState {
    pub fn phase(&self) -> MonitorPhase {
        if self.ticks == 0 {
            MonitorPhase::Idle
        } else if self.alert_fired {
            MonitorPhase::Alerted
        } else {
            MonitorPhase::Sampling
        }
    }
}

/// How often the absence alert is raised while the streak stays above the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertMode {
    /// Every tick.
    #[default]
    Level,
    /// Once per breach; re-armed when the streak falls back to the threshold.
    Edge,
}

/// What one tick saw, aggregated over all of its faces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TickOutcome {
    /// At least one face matched the enrolled label.
    Present { label: String },
    /// Faces were seen, none of them the enrolled label.
    Unrecognized,
    /// No face at all (or the tick failed).
    NoFace,
}

impl TickOutcome {
    pub fn is_miss(&self) -> bool {
        !matches!(self, TickOutcome::Present { .. })
    }

    /// Per-tick message for the notifier.
    pub fn notice(&self) -> String {
        match self {
            TickOutcome::Present { label } => label.clone(),
            TickOutcome::Unrecognized => crate::types::MatchLabel::NoMatch.to_string(),
            TickOutcome::NoFace => NO_FACE_NOTICE.to_string(),
        }
    }
}

/// Aggregate one tick's match results against the enrolled label.
pub fn assess<'a, I>(results: I, label: &str) -> TickOutcome
where
    I: IntoIterator<Item = &'a MatchResult>,
{
    let mut seen_any = false;
    for result in results {
        if result.is_match(label) {
            return TickOutcome::Present {
                label: label.to_string(),
            };
        }
        seen_any = true;
    }

    if seen_any {
        TickOutcome::Unrecognized
    } else {
        TickOutcome::NoFace
    }
}

/// Apply one tick's outcome. Returns the next state and whether to raise the
/// absence alert on this tick.
pub fn advance(
    state: MonitorState,
    outcome: &TickOutcome,
    miss_threshold: u32,
    mode: AlertMode,
) -> (MonitorState, bool) {
    let miss_streak = if outcome.is_miss() {
        state.miss_streak.saturating_add(1)
    } else {
        0
    };

    let breached = miss_streak > miss_threshold;
    let alert = match mode {
        AlertMode::Level => breached,
        AlertMode::Edge => breached && !state.alert_fired,
    };

    let next = MonitorState {
        miss_streak,
        alert_fired: breached,
        ticks: state.ticks + 1,
    };
    (next, alert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchLabel;

    fn hit() -> MatchResult {
        MatchResult {
            label: MatchLabel::Identity("Alice".into()),
            distance: 0.3,
        }
    }

    fn miss() -> MatchResult {
        MatchResult {
            label: MatchLabel::NoMatch,
            distance: 0.9,
        }
    }

    /// Feed a sequence of outcomes, returning (streak, alert) per tick.
    fn run(outcomes: &[TickOutcome], threshold: u32, mode: AlertMode) -> Vec<(u32, bool)> {
        let mut state = MonitorState::default();
        outcomes
            .iter()
            .map(|outcome| {
                let (next, alert) = advance(state, outcome, threshold, mode);
                state = next;
                (state.miss_streak, alert)
            })
            .collect()
    }

    fn present() -> TickOutcome {
        TickOutcome::Present {
            label: "Alice".into(),
        }
    }

    #[test]
    fn test_assess_empty_is_no_face() {
        let none: [MatchResult; 0] = [];
        assert_eq!(assess(&none, "Alice"), TickOutcome::NoFace);
    }

    #[test]
    fn test_assess_any_match_wins() {
        assert_eq!(assess(&[miss(), hit(), miss()], "Alice"), present());
    }

    #[test]
    fn test_assess_all_misses_is_unrecognized() {
        assert_eq!(assess(&[miss(), miss()], "Alice"), TickOutcome::Unrecognized);
    }

    #[test]
    fn test_assess_other_label_does_not_count() {
        let other = MatchResult {
            label: MatchLabel::Identity("Bob".into()),
            distance: 0.1,
        };
        assert_eq!(assess(&[other], "Alice"), TickOutcome::Unrecognized);
    }

    #[test]
    fn test_no_face_increments_streak() {
        let state = MonitorState {
            miss_streak: 2,
            alert_fired: false,
            ticks: 2,
        };
        let (next, _) = advance(state, &TickOutcome::NoFace, 10, AlertMode::Level);
        assert_eq!(next.miss_streak, 3);
        assert_eq!(next.ticks, 3);
    }

    #[test]
    fn test_unrecognized_increments_streak() {
        let state = MonitorState {
            miss_streak: 5,
            alert_fired: false,
            ticks: 5,
        };
        let (next, _) = advance(state, &TickOutcome::Unrecognized, 10, AlertMode::Level);
        assert_eq!(next.miss_streak, 6);
    }

    #[test]
    fn test_presence_resets_streak() {
        let state = MonitorState {
            miss_streak: 7,
            alert_fired: false,
            ticks: 7,
        };
        let (next, alert) = advance(state, &present(), 3, AlertMode::Level);
        assert_eq!(next.miss_streak, 0);
        assert!(!next.alert_fired);
        assert!(!alert);
    }

    #[test]
    fn test_five_empty_ticks_alert_from_fourth() {
        let ticks = run(&vec![TickOutcome::NoFace; 5], 3, AlertMode::Level);
        assert_eq!(
            ticks,
            vec![(1, false), (2, false), (3, false), (4, true), (5, true)]
        );
    }

    #[test]
    fn test_streak_at_threshold_does_not_alert() {
        let outcomes = [
            present(),
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            present(),
        ];
        let ticks = run(&outcomes, 3, AlertMode::Level);
        let streaks: Vec<u32> = ticks.iter().map(|(s, _)| *s).collect();
        assert_eq!(streaks, vec![0, 1, 2, 3, 0]);
        assert!(ticks.iter().all(|(_, alert)| !alert));
    }

    #[test]
    fn test_level_alert_stops_after_recovery() {
        let outcomes = [
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            TickOutcome::Unrecognized,
            present(),
            TickOutcome::NoFace,
        ];
        let alerts: Vec<bool> = run(&outcomes, 1, AlertMode::Level)
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        assert_eq!(alerts, vec![false, true, true, false, false]);
    }

    #[test]
    fn test_edge_alert_fires_once_per_breach() {
        let outcomes = [
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            TickOutcome::NoFace,
            present(),
            TickOutcome::NoFace,
            TickOutcome::NoFace,
        ];
        let alerts: Vec<bool> = run(&outcomes, 1, AlertMode::Edge)
            .into_iter()
            .map(|(_, a)| a)
            .collect();
        assert_eq!(alerts, vec![false, true, false, false, false, false, true]);
    }

    #[test]
    fn test_phase_follows_state() {
        let mut state = MonitorState::default();
        assert_eq!(state.phase(), MonitorPhase::Idle);

        (state, _) = advance(state, &TickOutcome::NoFace, 1, AlertMode::Level);
        assert_eq!(state.phase(), MonitorPhase::Sampling);

        (state, _) = advance(state, &TickOutcome::NoFace, 1, AlertMode::Level);
        assert_eq!(state.phase(), MonitorPhase::Alerted);

        (state, _) = advance(state, &present(), 1, AlertMode::Level);
        assert_eq!(state.phase(), MonitorPhase::Sampling);
    }

    #[test]
    fn test_notice_text() {
        assert_eq!(present().notice(), "Alice");
        assert_eq!(TickOutcome::Unrecognized.notice(), "unknown");
        assert_eq!(TickOutcome::NoFace.notice(), NO_FACE_NOTICE);
    }
}
