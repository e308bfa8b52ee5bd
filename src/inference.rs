//! C4: Inference client.
//!
//! A request/response client to an external vision service (detection,
//! embedding, liveness). Wire format is length-prefixed `bincode`, the
//! one concrete framing precedent in the reference pack:
//! `examples/other_examples/*-adam-mcguinness-sup-linux__src-bin-embedding_service.rs.rs`
//! reads a 4-byte little-endian length prefix then an exact-sized
//! `bincode`-encoded payload over a `UnixStream`; this client does the
//! same over `TcpStream` per spec.md §6's `host:port` addressing.

use crate::cancel::CancelToken;
use crate::error::InferenceError;
use crate::frame::{Detection, Embedding, Image};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::Duration;

const MAX_MESSAGE_BYTES: u32 = 16 * 1024 * 1024;
const JPEG_QUALITY: u8 = 90;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Serialize, Deserialize)]
enum Request {
    Health,
    Detect {
        jpeg: Vec<u8>,
        confidence: f32,
        nms_threshold: f32,
    },
    Embed {
        jpeg: Vec<u8>,
        detection: Detection,
    },
    Liveness {
        jpeg: Vec<u8>,
        detection: Detection,
    },
}

#[derive(Debug, Serialize, Deserialize)]
enum Response {
    Health,
    Detect { detections: Vec<Detection> },
    Embed { embedding: Embedding },
    Liveness { is_live: bool, confidence: f32 },
    Error(String),
}

/// Client for the out-of-process vision service. One TCP connection per
/// call, since the peer address rarely changes and per-call framing keeps
/// failure handling simple; connection lifetime spanning the
/// orchestrator's lifetime (spec.md §4.4) is achieved by this client
/// itself living as long as the orchestrator, not by a pinned socket.
pub struct InferenceClient {
    address: String,
    deadline: Duration,
    // Serializes health-probe-then-call sequencing; calls themselves open
    // their own sockets, so this only protects `address`/`deadline` reads
    // from concurrent reconfiguration, which never happens today but
    // keeps the type `Sync` without `unsafe`.
    _guard: Mutex<()>,
}

impl InferenceClient {
    /// Connects once to verify the peer is reachable (spec.md §4.4's
    /// health probe at construction time), then returns a client that
    /// opens a fresh connection per call.
    pub fn connect(address: &str, timeout: Duration) -> Result<Self, InferenceError> {
        let client = Self {
            address: address.to_string(),
            deadline: timeout,
            _guard: Mutex::new(()),
        };
        // The health probe at construction time has no caller-scoped
        // request to inherit a cancellation budget from; it gets its own
        // token bounded by the configured per-call deadline.
        let cancel = CancelToken::new(timeout);
        client.health(&cancel)?;
        Ok(client)
    }

    pub fn health(&self, cancel: &CancelToken) -> Result<(), InferenceError> {
        match self.call(&Request::Health, cancel)? {
            Response::Health => Ok(()),
            other => Err(InferenceError::Protocol(format!("unexpected health reply: {:?}", other))),
        }
    }

    pub fn detect(
        &self,
        image: &Image,
        confidence: f32,
        nms: f32,
        cancel: &CancelToken,
    ) -> Result<Vec<Detection>, InferenceError> {
        let jpeg = encode_jpeg(image)?;
        match self.call(
            &Request::Detect {
                jpeg,
                confidence,
                nms_threshold: nms,
            },
            cancel,
        )? {
            Response::Detect { detections } => Ok(detections),
            Response::Error(msg) => Err(InferenceError::Protocol(msg)),
            other => Err(InferenceError::Protocol(format!("unexpected detect reply: {:?}", other))),
        }
    }

    pub fn embed(&self, image: &Image, detection: &Detection, cancel: &CancelToken) -> Result<Embedding, InferenceError> {
        let jpeg = encode_jpeg(image)?;
        match self.call(
            &Request::Embed {
                jpeg,
                detection: detection.clone(),
            },
            cancel,
        )? {
            Response::Embed { embedding } => Ok(embedding),
            Response::Error(msg) => Err(InferenceError::Protocol(msg)),
            other => Err(InferenceError::Protocol(format!("unexpected embed reply: {:?}", other))),
        }
    }

    pub fn liveness(
        &self,
        image: &Image,
        detection: &Detection,
        cancel: &CancelToken,
    ) -> Result<(bool, f32), InferenceError> {
        let jpeg = encode_jpeg(image)?;
        match self.call(
            &Request::Liveness {
                jpeg,
                detection: detection.clone(),
            },
            cancel,
        )? {
            Response::Liveness { is_live, confidence } => Ok((is_live, confidence)),
            Response::Error(msg) => Err(InferenceError::Protocol(msg)),
            other => Err(InferenceError::Protocol(format!("unexpected liveness reply: {:?}", other))),
        }
    }

    /// Runs the blocking round-trip on a worker thread and polls for it
    /// here, so a cancelled or expired token can return promptly instead
    /// of waiting out the full socket timeout (spec.md §5). Mirrors the
    /// poll-then-detach shape `camera.rs::stop()` uses to bound its own
    /// producer-thread join.
    fn call(&self, request: &Request, cancel: &CancelToken) -> Result<Response, InferenceError> {
        let effective_deadline = self.deadline.min(cancel.remaining());
        if effective_deadline.is_zero() {
            return Err(cancellation_error(cancel));
        }

        let payload = bincode::serialize(request)
            .map_err(|e| InferenceError::Protocol(format!("failed to encode request: {}", e)))?;
        let address = self.address.clone();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = run_round_trip(&address, effective_deadline, &payload);
            let _ = tx.send(result);
        });

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(result) => return result,
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if cancel.should_stop() {
                        return Err(cancellation_error(cancel));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(InferenceError::Unavailable("inference worker thread exited".to_string()));
                }
            }
        }
    }
}

/// Distinguishes peer/explicit cancellation from a plain timeout
/// (spec.md §5: "the client must surface peer cancellation as a
/// `Cancelled` error, not `Timeout`").
fn cancellation_error(cancel: &CancelToken) -> InferenceError {
    if cancel.was_cancelled_not_expired() {
        InferenceError::Cancelled
    } else {
        InferenceError::Timeout
    }
}

/// The actual blocking wire round-trip, run on a worker thread so the
/// caller can poll the cancel token independently of socket timeouts.
fn run_round_trip(address: &str, deadline: Duration, payload: &[u8]) -> Result<Response, InferenceError> {
    let mut stream = TcpStream::connect(address).map_err(|e| InferenceError::Unavailable(e.to_string()))?;
    stream
        .set_read_timeout(Some(deadline))
        .map_err(|e| InferenceError::Unavailable(e.to_string()))?;
    stream
        .set_write_timeout(Some(deadline))
        .map_err(|e| InferenceError::Unavailable(e.to_string()))?;

    let len = (payload.len() as u32).to_le_bytes();
    write_all(&mut stream, &len)?;
    write_all(&mut stream, payload)?;
    stream.flush().map_err(timeout_or_unavailable)?;

    let mut len_buf = [0u8; 4];
    read_exact(&mut stream, &mut len_buf)?;
    let response_len = u32::from_le_bytes(len_buf);
    if response_len > MAX_MESSAGE_BYTES {
        return Err(InferenceError::Protocol(format!(
            "response too large: {} bytes",
            response_len
        )));
    }

    let mut buf = vec![0u8; response_len as usize];
    read_exact(&mut stream, &mut buf)?;

    bincode::deserialize(&buf).map_err(|e| InferenceError::Protocol(format!("malformed response: {}", e)))
}

fn write_all(stream: &mut TcpStream, buf: &[u8]) -> Result<(), InferenceError> {
    stream.write_all(buf).map_err(timeout_or_unavailable)
}

fn read_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<(), InferenceError> {
    stream.read_exact(buf).map_err(timeout_or_unavailable)
}

fn timeout_or_unavailable(e: std::io::Error) -> InferenceError {
    if matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    ) {
        InferenceError::Timeout
    } else {
        InferenceError::Unavailable(e.to_string())
    }
}

fn encode_jpeg(image: &Image) -> Result<Vec<u8>, InferenceError> {
    image
        .encode_jpeg(JPEG_QUALITY)
        .map_err(|e| InferenceError::Protocol(format!("failed to encode jpeg: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::net::TcpListener;
    use std::thread;

    fn echo_health_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut len_buf = [0u8; 4];
                if stream.read_exact(&mut len_buf).is_err() {
                    return;
                }
                let len = u32::from_le_bytes(len_buf) as usize;
                let mut buf = vec![0u8; len];
                let _ = stream.read_exact(&mut buf);

                let response = bincode::serialize(&Response::Health).unwrap();
                let rlen = (response.len() as u32).to_le_bytes();
                let _ = stream.write_all(&rlen);
                let _ = stream.write_all(&response);
            }
        });
        addr
    }

    #[test]
    fn health_probe_succeeds_against_echo_server() {
        let addr = echo_health_server();
        let client = InferenceClient::connect(&addr, Duration::from_secs(2)).unwrap();
        let cancel = CancelToken::new(Duration::from_secs(2));
        assert!(client.health(&cancel).is_ok());
    }

    #[test]
    fn connect_to_unreachable_address_is_unavailable() {
        let err = InferenceClient::connect("127.0.0.1:1", Duration::from_millis(200));
        assert!(matches!(err, Err(InferenceError::Unavailable(_))));
    }

    #[test]
    fn already_cancelled_token_surfaces_cancelled_not_timeout() {
        let addr = echo_health_server();
        let client = InferenceClient::connect(&addr, Duration::from_secs(2)).unwrap();
        let cancel = CancelToken::new(Duration::from_secs(2));
        cancel.cancel();
        let err = client.health(&cancel).unwrap_err();
        assert!(matches!(err, InferenceError::Cancelled));
    }

    #[test]
    fn expired_deadline_surfaces_timeout_not_cancelled() {
        // No server listening on this port; the call blocks in connect()
        // until the deadline, which has already elapsed.
        let client = InferenceClient {
            address: "127.0.0.1:1".to_string(),
            deadline: Duration::from_secs(5),
            _guard: Mutex::new(()),
        };
        let cancel = CancelToken::new(Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        let err = client.health(&cancel).unwrap_err();
        assert!(matches!(err, InferenceError::Timeout));
    }
}
