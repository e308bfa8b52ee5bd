//! `faceauth-enroll` — CLI wrapper around the enrollment driver (C10).

use anyhow::{Context, Result};
use faceauth::camera::CameraSession;
use faceauth::config::Config;
use faceauth::enroll::EnrollmentDriver;
use faceauth::inference::InferenceClient;
use faceauth::store::EmbeddingStore;
use std::env;
use std::time::Duration;

fn main() -> Result<()> {
    faceauth::init_logging("faceauth-enroll");

    let username = env::args()
        .nth(1)
        .context("usage: faceauth-enroll <username>")?;

    let config = Config::load().context("failed to load configuration")?;

    let camera = CameraSession::new(config.camera.clone()).context("failed to open camera")?;
    camera.start().context("failed to start camera session")?;

    let inference = InferenceClient::connect(
        &config.inference.address,
        Duration::from_secs_f64(config.inference.timeout_s),
    )
    .context("failed to reach vision service")?;

    let store = EmbeddingStore::open(&config.storage.database_path).context("failed to open embedding store")?;

    let driver = EnrollmentDriver::new(&camera, &inference, &store, &config);
    driver.enroll(&username).context("enrollment failed")?;

    camera.stop().ok();
    println!("enrolled '{}' with {} sample(s)", username, config.recognition.enrollment_samples);
    Ok(())
}
