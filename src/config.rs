//! Typed configuration, loaded from a JSON file.
//!
//! Follows the teacher's `GlanceConfig::load` convention: every field has a
//! `#[serde(default = "...")]` so a partial config file is valid, and a
//! missing file falls back to built-in defaults rather than erroring.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub challenge: ChallengeConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    #[serde(default = "default_inference_address")]
    pub address: String,
    #[serde(default = "default_inference_timeout_s")]
    pub timeout_s: f64,
}

fn default_inference_address() -> String {
    "localhost:50051".to_string()
}
fn default_inference_timeout_s() -> f64 {
    10.0
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            address: default_inference_address(),
            timeout_s: default_inference_timeout_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub ir_device: Option<String>,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
    #[serde(default = "default_true")]
    pub auto_exposure: bool,
}

fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_pixel_format() -> String {
    "MJPEG".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            ir_device: None,
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            pixel_format: default_pixel_format(),
            auto_exposure: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default = "default_max_detections")]
    pub max_detections: u32,
}

fn default_confidence() -> f32 {
    0.5
}
fn default_nms_threshold() -> f32 {
    0.4
}
fn default_max_detections() -> u32 {
    1
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            nms_threshold: default_nms_threshold(),
            max_detections: default_max_detections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_enrollment_samples")]
    pub enrollment_samples: u32,
}

fn default_similarity_threshold() -> f32 {
    0.6
}
fn default_enrollment_samples() -> u32 {
    5
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            enrollment_samples: default_enrollment_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_depth_threshold")]
    pub depth_threshold: f32,
    #[serde(default = "default_liveness_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_true")]
    pub use_ir_analysis: bool,
}

fn default_depth_threshold() -> f32 {
    0.1
}
fn default_liveness_confidence_threshold() -> f32 {
    0.8
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            depth_threshold: default_depth_threshold(),
            confidence_threshold: default_liveness_confidence_threshold(),
            use_ir_analysis: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_challenge_types")]
    pub types: Vec<String>,
    #[serde(default = "default_challenge_timeout_s")]
    pub timeout_s: f64,
    #[serde(default = "default_required_success")]
    pub required_success: u32,
}

fn default_challenge_types() -> Vec<String> {
    vec![
        "blink".to_string(),
        "nod".to_string(),
        "turn_left".to_string(),
        "turn_right".to_string(),
    ]
}
fn default_challenge_timeout_s() -> f64 {
    10.0
}
fn default_required_success() -> u32 {
    1
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            types: default_challenge_types(),
            timeout_s: default_challenge_timeout_s(),
            required_success: default_required_success(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockoutConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_lockout_duration_s")]
    pub lockout_duration_s: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_lockout_duration_s() -> u64 {
    300
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            lockout_duration_s: default_lockout_duration_s(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_max_users")]
    pub max_users: u32,
}

fn default_database_path() -> String {
    "/var/lib/faceauth/faceauth.db".to_string()
}
fn default_max_users() -> u32 {
    100
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            max_users: default_max_users(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            camera: CameraConfig::default(),
            detection: DetectionConfig::default(),
            recognition: RecognitionConfig::default(),
            liveness: LivenessConfig::default(),
            challenge: ChallengeConfig::default(),
            lockout: LockoutConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search order: `$HOME/.config/faceauth/config.json` →
    /// `/etc/faceauth/config.json` → built-in defaults.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/faceauth/config.json");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        let system_config = Path::new("/etc/faceauth/config.json");
        if system_config.exists() {
            return Self::from_file(system_config);
        }

        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detection.confidence) {
            return Err(ConfigError::Invalid(
                "detection.confidence must be in [0,1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.recognition.similarity_threshold) {
            return Err(ConfigError::Invalid(
                "recognition.similarity_threshold must be in [0,1]".to_string(),
            ));
        }
        if self.recognition.enrollment_samples < 1 {
            return Err(ConfigError::Invalid(
                "recognition.enrollment_samples must be >= 1".to_string(),
            ));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(ConfigError::Invalid(
                "camera.width and camera.height must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.inference.timeout_s, 10.0);
        assert_eq!(c.camera.width, 640);
        assert_eq!(c.camera.height, 480);
        assert_eq!(c.camera.fps, 30);
        assert_eq!(c.camera.pixel_format, "MJPEG");
        assert!(c.camera.auto_exposure);
        assert_eq!(c.detection.confidence, 0.5);
        assert_eq!(c.detection.nms_threshold, 0.4);
        assert_eq!(c.detection.max_detections, 1);
        assert_eq!(c.recognition.similarity_threshold, 0.6);
        assert_eq!(c.recognition.enrollment_samples, 5);
        assert!(c.liveness.enabled);
        assert!(!c.challenge.enabled);
        assert_eq!(c.lockout.max_attempts, 3);
        assert_eq!(c.lockout.lockout_duration_s, 300);
        assert_eq!(c.storage.max_users, 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{"camera": {"device": "/dev/video0"}}"#;
        let c: Config = serde_json::from_str(json).unwrap();
        assert_eq!(c.camera.device, "/dev/video0");
        assert_eq!(c.camera.width, 640);
        assert_eq!(c.recognition.similarity_threshold, 0.6);
    }

    #[test]
    fn rejects_invalid_threshold() {
        let mut c = Config::default();
        c.detection.confidence = 1.5;
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_from_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nope.json");
        assert!(Config::from_file(&path).is_err());
    }
}
