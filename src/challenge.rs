//! C7: Challenge subsystem.
//!
//! Picks one challenge per authentication attempt and watches a stream of
//! detections for the corresponding landmark motion (spec.md §4.7). Fully
//! specified by the spec; no teacher precedent, since `pam-glance` never
//! implemented challenge-response.

use crate::config::ChallengeConfig;
use crate::frame::Detection;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Challenge {
    Blink,
    Nod,
    TurnLeft,
    TurnRight,
    Smile,
}

impl Challenge {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Blink => "blink",
            Self::Nod => "nod your head",
            Self::TurnLeft => "turn your head left",
            Self::TurnRight => "turn your head right",
            Self::Smile => "smile",
        }
    }

    fn from_config_name(name: &str) -> Option<Self> {
        match name {
            "blink" => Some(Self::Blink),
            "nod" => Some(Self::Nod),
            "turn_left" => Some(Self::TurnLeft),
            "turn_right" => Some(Self::TurnRight),
            "smile" => Some(Self::Smile),
            _ => None,
        }
    }
}

const NOD_THRESHOLD: f32 = 0.3;
const TURN_THRESHOLD: f32 = 0.2;
const TICK_INTERVAL: Duration = Duration::from_millis(100); // ~10 Hz

/// Chooses a challenge by uniform random draw from the configured
/// enabled subset. Returns `None` if no recognized types are configured.
pub fn pick(config: &ChallengeConfig) -> Option<Challenge> {
    let choices: Vec<Challenge> = config
        .types
        .iter()
        .filter_map(|name| Challenge::from_config_name(name))
        .collect();
    choices.choose(&mut rand::thread_rng()).copied()
}

/// Runs the detection loop at ~10Hz for up to `timeout`, calling
/// `next_detection` each tick to obtain the latest `Detection` (or `None`
/// if a frame/detect attempt failed this tick — skipped silently).
/// Returns `true` once the challenge's motion criterion is satisfied.
/// `cancel` being set returns `false` immediately, per spec.md §4.7's
/// cancellation contract.
pub fn run<F>(challenge: Challenge, timeout: Duration, cancel: &AtomicBool, mut next_detection: F) -> bool
where
    F: FnMut() -> Option<Detection>,
{
    if challenge == Challenge::Blink {
        // Always-pass: the default 5-point detector carries no per-eye
        // aperture landmarks to compute EAR from. Not a security claim
        // (spec.md §9).
        return true;
    }
    if challenge == Challenge::Smile {
        // Omitted: no landmark set in this detector supports a smile
        // check either; treat identically to blink's pass-through.
        return true;
    }

    let deadline = Instant::now() + timeout;
    let mut initial_offset: Option<f32> = None;
    let mut max_up = f32::MIN;
    let mut max_down = f32::MAX;

    while Instant::now() < deadline {
        if cancel.load(Ordering::Relaxed) {
            return false;
        }

        if let Some(detection) = next_detection() {
            if let (Some(eye_dist), Some(mid), Some(nose)) = (
                detection.eye_distance(),
                detection.eye_midpoint(),
                detection.nose(),
            ) {
                if eye_dist > 0.0 {
                    match challenge {
                        Challenge::Nod => {
                            let dy = (nose.y - mid.y) / eye_dist;
                            max_up = max_up.max(dy);
                            max_down = max_down.min(dy);
                            if max_up - max_down > NOD_THRESHOLD {
                                return true;
                            }
                        }
                        Challenge::TurnLeft | Challenge::TurnRight => {
                            let dx = (nose.x - mid.x) / eye_dist;
                            let baseline = *initial_offset.get_or_insert(dx);
                            let delta = dx - baseline;
                            let satisfied = match challenge {
                                Challenge::TurnLeft => delta < -TURN_THRESHOLD,
                                Challenge::TurnRight => delta > TURN_THRESHOLD,
                                _ => unreachable!(),
                            };
                            if satisfied {
                                return true;
                            }
                        }
                        _ => {}
                    }
                }
            }
            // Missing landmarks or zero eye-distance: skip this tick.
        }

        std::thread::sleep(TICK_INTERVAL);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Landmark;

    fn detection_with_offset(dx: f32, dy: f32) -> Detection {
        Detection {
            x1: 0.0,
            y1: 0.0,
            x2: 100.0,
            y2: 100.0,
            confidence: 0.9,
            landmarks: vec![
                Landmark { x: 30.0, y: 30.0 },
                Landmark { x: 50.0, y: 30.0 },
                Landmark { x: 40.0 + dx * 20.0, y: 30.0 + dy * 20.0 },
                Landmark { x: 32.0, y: 60.0 },
                Landmark { x: 48.0, y: 60.0 },
            ],
        }
    }

    #[test]
    fn blink_always_passes() {
        let cancel = AtomicBool::new(false);
        assert!(run(Challenge::Blink, Duration::from_millis(1), &cancel, || None));
    }

    #[test]
    fn cancellation_returns_false_immediately() {
        let cancel = AtomicBool::new(true);
        assert!(!run(Challenge::Nod, Duration::from_secs(5), &cancel, || None));
    }

    #[test]
    fn nod_succeeds_on_sufficient_vertical_swing() {
        let cancel = AtomicBool::new(false);
        let mut ticks = vec![detection_with_offset(0.0, 0.25), detection_with_offset(0.0, -0.25)].into_iter();
        let result = run(Challenge::Nod, Duration::from_millis(500), &cancel, || ticks.next());
        assert!(result);
    }

    #[test]
    fn turn_left_fails_when_delta_too_small() {
        let cancel = AtomicBool::new(false);
        let mut ticks = std::iter::repeat_with(|| detection_with_offset(-0.1, 0.0)).take(3);
        let result = run(Challenge::TurnLeft, Duration::from_millis(250), &cancel, || ticks.next());
        assert!(!result);
    }

    #[test]
    fn nod_scenario_matches_spec_s6() {
        // S6: Δy/eye_dist traces +0.2 then -0.2 (swing 0.4 > 0.3) -> passes.
        let cancel = AtomicBool::new(false);
        let mut ticks = vec![detection_with_offset(0.0, 0.2), detection_with_offset(0.0, -0.2)].into_iter();
        assert!(run(Challenge::Nod, Duration::from_millis(500), &cancel, || ticks.next()));

        // Only reaching ±0.1 (swing 0.2) -> fails at timeout.
        let cancel = AtomicBool::new(false);
        let mut ticks = vec![detection_with_offset(0.0, 0.1), detection_with_offset(0.0, -0.1)]
            .into_iter()
            .cycle();
        assert!(!run(Challenge::Nod, Duration::from_millis(250), &cancel, || ticks.next()));
    }

    #[test]
    fn pick_returns_only_configured_types() {
        let config = ChallengeConfig {
            enabled: true,
            types: vec!["nod".to_string()],
            timeout_s: 10.0,
            required_success: 1,
        };
        assert_eq!(pick(&config), Some(Challenge::Nod));
    }
}
