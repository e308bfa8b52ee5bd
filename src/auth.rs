//! C9: Authentication orchestrator.
//!
//! Composes C1–C8 into the two entry points spec.md §4.9 describes:
//! `authenticate()` (identify any enrolled user) and
//! `authenticate_user(name)` (verify a specific one), each with a `_ctx`
//! variant taking an explicit [`crate::cancel::CancelToken`] so a caller
//! can bound or cancel the whole request. Generalizes the teacher's
//! `pam-glance/src/auth.rs::authenticate` thread+mpsc hard-timeout
//! wrapper and its camera-try/frame-retry loop shape onto the spec's
//! five-stage capture→detect→liveness→challenge→identify pipeline.

use crate::camera::CameraSession;
use crate::cancel::CancelToken;
use crate::challenge::{self, Challenge};
use crate::config::Config;
use crate::enhance;
use crate::error::{AuthError, InferenceError};
use crate::frame::{decode, Detection, Image};
use crate::inference::InferenceClient;
use crate::liveness;
use crate::lockout::LockoutTracker;
use crate::store::{user_id, EmbeddingStore};
use log::{info, warn};
use std::time::{Duration, Instant};

const DETECT_RETRY_ATTEMPTS: u32 = 5;
const DETECT_RETRY_SPACING: Duration = Duration::from_millis(50);
/// Overall budget for a request that doesn't supply its own cancellation
/// scope (spec.md §5/§9 give the contract a caller-supplied deadline;
/// this is the default for `authenticate`/`authenticate_user` callers
/// that don't need fine-grained cancellation).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub user: Option<String>,
    pub confidence: f32,
    pub liveness_passed: bool,
    pub challenge_passed: bool,
    pub challenge_description: Option<String>,
    pub error: Option<String>,
    pub processing_time: Duration,
}

impl AuthResult {
    fn failure(error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            user: None,
            confidence: 0.0,
            liveness_passed: false,
            challenge_passed: false,
            challenge_description: None,
            error: Some(error.into()),
            processing_time: started.elapsed(),
        }
    }
}

/// Owns the whole capture→store pipeline for one process. One instance
/// per long-lived authenticator (spec.md §9: "the authenticator is
/// designed as a single-process in-memory service behind a thin API").
pub struct Authenticator {
    camera: CameraSession,
    inference: InferenceClient,
    store: EmbeddingStore,
    lockout: LockoutTracker,
    config: Config,
}

impl Authenticator {
    pub fn new(config: Config) -> Result<Self, AuthError> {
        let camera = CameraSession::new(config.camera.clone())?;
        camera.start()?;

        let inference = InferenceClient::connect(
            &config.inference.address,
            Duration::from_secs_f64(config.inference.timeout_s),
        )?;

        let store = EmbeddingStore::open(&config.storage.database_path)?;
        let lockout = LockoutTracker::new(
            config.lockout.max_attempts,
            Duration::from_secs(config.lockout.lockout_duration_s),
        );

        Ok(Self {
            camera,
            inference,
            store,
            lockout,
            config,
        })
    }

    /// Identify any enrolled user, with no caller-scoped cancellation
    /// budget beyond the default request timeout.
    pub fn authenticate(&self) -> AuthResult {
        let cancel = CancelToken::new(DEFAULT_REQUEST_TIMEOUT);
        self.authenticate_ctx(&cancel)
    }

    /// `authenticate(ctx)` (spec.md §5/§9): identify any enrolled user,
    /// returning promptly if `cancel` is cancelled or its deadline
    /// expires at any suspension point in the pipeline.
    pub fn authenticate_ctx(&self, cancel: &CancelToken) -> AuthResult {
        self.run_pipeline(None, cancel)
    }

    /// Verify a specific claimed user, enforcing per-user lockout first,
    /// with no caller-scoped cancellation budget beyond the default
    /// request timeout.
    pub fn authenticate_user(&self, username: &str) -> AuthResult {
        let cancel = CancelToken::new(DEFAULT_REQUEST_TIMEOUT);
        self.authenticate_user_ctx(username, &cancel)
    }

    /// `authenticate(ctx)` for a specific claimed user (spec.md §5/§9).
    pub fn authenticate_user_ctx(&self, username: &str, cancel: &CancelToken) -> AuthResult {
        let started = Instant::now();
        if let Err(e) = self.lockout.check(username) {
            let result = AuthResult::failure(e.to_string(), started);
            self.record(None, username, &result);
            return result;
        }

        let mut result = self.run_pipeline(Some(username), cancel);
        result.processing_time = started.elapsed();

        if result.success {
            self.lockout.record_success(username);
        } else {
            self.lockout.record_failure(username);
        }
        result
    }

    fn run_pipeline(&self, target_user: Option<&str>, cancel: &CancelToken) -> AuthResult {
        let started = Instant::now();
        let claimed_username = target_user.unwrap_or("");

        if cancel.should_stop() {
            let result = AuthResult::failure(cancellation_error(cancel).to_string(), started);
            self.record(None, claimed_username, &result);
            return result;
        }

        let (image, detection) = match self.capture_and_detect(cancel) {
            Ok(pair) => pair,
            Err(e) => {
                let result = AuthResult::failure(e.to_string(), started);
                self.record(None, claimed_username, &result);
                return result;
            }
        };

        let (liveness_passed, _liveness_confidence) = self.check_liveness(&image, &detection, cancel);
        if self.config.liveness.enabled && !liveness_passed {
            let mut result = AuthResult::failure("liveness check failed", started);
            result.liveness_passed = false;
            self.record(None, claimed_username, &result);
            return result;
        }

        let challenge_outcome = self.run_challenge(cancel);
        if let Some((challenge, passed)) = challenge_outcome {
            if !passed {
                let mut result = AuthResult::failure(
                    format!("challenge failed: {}", challenge.description()),
                    started,
                );
                result.liveness_passed = liveness_passed;
                result.challenge_description = Some(challenge.description().to_string());
                self.record(None, claimed_username, &result);
                return result;
            }
        }

        let embedding = match self.inference.embed(&image, &detection, cancel) {
            Ok(e) => e,
            Err(e) => {
                let mut result = AuthResult::failure(e.to_string(), started);
                result.liveness_passed = liveness_passed;
                self.record(None, claimed_username, &result);
                return result;
            }
        };

        let threshold = self.config.recognition.similarity_threshold;
        let match_result = match target_user {
            Some(username) => self.store.find_best_match_for_user(username, &embedding, threshold),
            None => self.store.find_best_match(&embedding, threshold),
        };

        let mut result = match match_result {
            Ok(m) => match m.user {
                Some(user) => AuthResult {
                    success: true,
                    user: Some(user.username.clone()),
                    confidence: m.score,
                    liveness_passed,
                    challenge_passed: challenge_outcome.is_some(),
                    challenge_description: challenge_outcome.map(|(c, _)| c.description().to_string()),
                    error: None,
                    processing_time: started.elapsed(),
                },
                None => {
                    let mut r = AuthResult::failure("no matching user found", started);
                    r.confidence = m.score;
                    r.liveness_passed = liveness_passed;
                    r.challenge_passed = challenge_outcome.is_some();
                    r
                }
            },
            Err(e) => {
                let mut r = AuthResult::failure(e.to_string(), started);
                r.liveness_passed = liveness_passed;
                r
            }
        };

        let user_id = result.user.as_deref().map(user_id);
        self.record(user_id.as_deref(), result.user.as_deref().unwrap_or(claimed_username), &result);
        result.processing_time = started.elapsed();
        result
    }

    /// Up to 5 attempts, 50ms apart. Accepts only exactly-one detection;
    /// zero or multiple are both retried (spec.md §4.9 step 1).
    fn capture_and_detect(&self, cancel: &CancelToken) -> Result<(Image, Detection), AuthError> {
        for attempt in 1..=DETECT_RETRY_ATTEMPTS {
            if cancel.should_stop() {
                return Err(cancellation_error(cancel));
            }
            let frame = self.camera.get_frame(true)?;
            let image = decode(&frame)?;
            let enhanced = enhance::enhance(&image);

            match self.inference.detect(
                &enhanced,
                self.config.detection.confidence,
                self.config.detection.nms_threshold,
                cancel,
            ) {
                Ok(detections) if detections.len() == 1 => {
                    return Ok((enhanced, detections.into_iter().next().unwrap()));
                }
                Ok(detections) => {
                    warn!(
                        "capture attempt {}/{}: {} face(s) detected, retrying",
                        attempt,
                        DETECT_RETRY_ATTEMPTS,
                        detections.len()
                    );
                }
                Err(e) => {
                    warn!("capture attempt {}/{}: detect failed: {}", attempt, DETECT_RETRY_ATTEMPTS, e);
                }
            }

            if attempt < DETECT_RETRY_ATTEMPTS {
                std::thread::sleep(DETECT_RETRY_SPACING);
            }
        }
        Err(AuthError::NoFace)
    }

    /// Tries C4's RPC liveness first; falls back to C6 on the cropped
    /// region if the peer is unreachable (spec.md §4.9 step 2).
    fn check_liveness(&self, image: &Image, detection: &Detection, cancel: &CancelToken) -> (bool, f32) {
        if !self.config.liveness.enabled {
            return (true, 1.0);
        }

        match self.inference.liveness(image, detection, cancel) {
            Ok(result) => result,
            Err(e) => {
                warn!("RPC liveness unavailable ({}), falling back to C6 heuristic", e);
                let region = image.crop(detection.x1, detection.y1, detection.x2, detection.y2);
                let assessment = liveness::assess(&region, self.config.liveness.depth_threshold * 100_000.0);
                (assessment.is_live, assessment.score)
            }
        }
    }

    /// Drives C7 with a live detection stream: each tick captures a fresh
    /// frame from the camera channel, decodes and enhances it, and
    /// detects against it, so the cross-tick motion criteria in
    /// `challenge::run` (nod swing, turn delta) can actually accumulate
    /// across real head movement (spec.md §4.7/§4.9 step 3).
    fn run_challenge(&self, cancel: &CancelToken) -> Option<(Challenge, bool)> {
        if !self.config.challenge.enabled {
            return None;
        }
        let challenge = challenge::pick(&self.config.challenge)?;
        let configured_timeout = Duration::from_secs_f64(self.config.challenge.timeout_s);
        let timeout = configured_timeout.min(cancel.remaining());

        let passed = challenge::run(challenge, timeout, cancel.flag(), || self.next_challenge_detection(cancel));
        Some((challenge, passed))
    }

    /// One challenge tick: a non-blocking frame grab so a quiet camera
    /// (no frame queued yet) is treated the same as a missed detection —
    /// `challenge::run` already skips ticks where this returns `None`.
    fn next_challenge_detection(&self, cancel: &CancelToken) -> Option<Detection> {
        if cancel.should_stop() {
            return None;
        }
        let frame = self.camera.get_frame(false).ok()?;
        let image = decode(&frame).ok()?;
        let enhanced = enhance::enhance(&image);
        let detections = self
            .inference
            .detect(
                &enhanced,
                self.config.detection.confidence,
                self.config.detection.nms_threshold,
                cancel,
            )
            .ok()?;
        detections.into_iter().next()
    }

    fn record(&self, user_id: Option<&str>, username: &str, result: &AuthResult) {
        if let Err(e) = self.store.record_auth(
            user_id,
            username,
            result.success,
            result.confidence,
            result.liveness_passed,
            result.challenge_passed,
            result.error.as_deref(),
        ) {
            warn!("failed to write audit log entry: {}", e);
        }
    }
}

/// Distinguishes an explicitly cancelled request from one whose overall
/// deadline simply elapsed (spec.md §5).
fn cancellation_error(cancel: &CancelToken) -> AuthError {
    if cancel.was_cancelled_not_expired() {
        AuthError::Inference(InferenceError::Cancelled)
    } else {
        AuthError::Inference(InferenceError::Timeout)
    }
}

impl Drop for Authenticator {
    fn drop(&mut self) {
        let _ = self.camera.stop();
        info!("authenticator shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_result_has_zero_confidence_and_no_user() {
        let started = Instant::now();
        let result = AuthResult::failure("no matching user found", started);
        assert!(!result.success);
        assert!(result.user.is_none());
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error.as_deref(), Some("no matching user found"));
    }

    #[test]
    fn cancellation_error_distinguishes_cancelled_from_expired() {
        let explicit = CancelToken::new(Duration::from_secs(5));
        explicit.cancel();
        assert!(matches!(
            cancellation_error(&explicit),
            AuthError::Inference(InferenceError::Cancelled)
        ));

        let expired = CancelToken::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(matches!(
            cancellation_error(&expired),
            AuthError::Inference(InferenceError::Timeout)
        ));
    }
}
