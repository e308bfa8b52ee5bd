//! `faceauth-diag` — diagnostic CLI: config load, camera open/negotiate,
//! vision-service health probe, and a store summary. Not part of the
//! authentication contract; for operators debugging a broken install.

use faceauth::camera::CameraSession;
use faceauth::config::Config;
use faceauth::inference::InferenceClient;
use faceauth::store::EmbeddingStore;
use std::time::Duration;

fn main() {
    faceauth::init_logging("faceauth-diag");

    println!("== faceauth diagnostics ==");

    let config = match Config::load() {
        Ok(c) => {
            println!("[ok] config loaded");
            c
        }
        Err(e) => {
            println!("[fail] config: {}", e);
            return;
        }
    };

    match CameraSession::new(config.camera.clone()) {
        Ok(camera) => {
            println!("[ok] camera device opens: {}", config.camera.device);
            match camera.start() {
                Ok(()) => {
                    println!(
                        "[ok] camera session started, negotiated {}x{}",
                        camera.width(),
                        camera.height()
                    );
                    match camera.get_frame(true) {
                        Ok(frame) => println!("[ok] captured frame (seq {})", frame.sequence),
                        Err(e) => println!("[fail] capture: {}", e),
                    }
                    let _ = camera.stop();
                }
                Err(e) => println!("[fail] camera start: {}", e),
            }
        }
        Err(e) => println!("[fail] camera open: {}", e),
    }

    match InferenceClient::connect(&config.inference.address, Duration::from_secs_f64(config.inference.timeout_s)) {
        Ok(_) => println!("[ok] vision service reachable at {}", config.inference.address),
        Err(e) => println!("[fail] vision service: {}", e),
    }

    match EmbeddingStore::open(&config.storage.database_path) {
        Ok(store) => match store.list_users() {
            Ok(users) => println!("[ok] store opens, {} enrolled user(s)", users.len()),
            Err(e) => println!("[fail] store list: {}", e),
        },
        Err(e) => println!("[fail] store open: {}", e),
    }
}
