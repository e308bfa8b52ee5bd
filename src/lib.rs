//! Face-authentication engine: capture, liveness, challenge-response and
//! identity matching for Linux.
//!
//! The PAM entry-point shared library and the shell script that edits
//! `/etc/pam.d/*` are external integrators that consume [`contract`]'s
//! `AuthContractResult`; they are out of scope here (this crate is a
//! library plus two diagnostic binaries, not a `cdylib`).

pub mod auth;
pub mod camera;
pub mod cancel;
pub mod challenge;
pub mod config;
pub mod contract;
pub mod enhance;
pub mod enroll;
pub mod error;
pub mod frame;
pub mod inference;
pub mod ir_emitter;
pub mod liveness;
pub mod lockout;
pub mod store;

pub use auth::{AuthResult, Authenticator};
pub use cancel::CancelToken;
pub use config::Config;
pub use contract::AuthContractResult;
pub use error::AuthError;

/// Initializes logging to syslog's `LOG_AUTH` facility, following the
/// teacher's `pam-glance` convention — an authenticator is typically
/// invoked from a PAM stack with no attached terminal, so stderr logging
/// alone would be lost.
pub fn init_logging(process_name: &str) {
    use log::LevelFilter;
    use syslog::{BasicLogger, Facility, Formatter3164};

    let formatter = Formatter3164 {
        facility: Facility::LOG_AUTH,
        hostname: None,
        process: process_name.to_string(),
        pid: std::process::id(),
    };

    if let Ok(logger) = syslog::unix(formatter) {
        let _ = log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|()| log::set_max_level(LevelFilter::Info));
    } else {
        let _ = env_logger::try_init();
    }
}
