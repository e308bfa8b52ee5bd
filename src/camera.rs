//! C2: Camera session.
//!
//! Owns the V4L2 device handle across a `start`/`stop` lifecycle and pumps
//! decoded-ready `Frame`s into a bounded, drop-oldest channel. Grounded on
//! the v4l device-open/format-negotiation/mmap-stream pattern in
//! `examples/other_examples/*-adam-mcguinness-sup-linux__src-camera-v4l2.rs.rs`,
//! restructured around the teacher's two-phase cancel/drain/stop shutdown
//! discipline from `pam-glance/src/auth.rs::authenticate`'s thread+mpsc
//! hard-timeout wrapper.

use crate::config::CameraConfig;
use crate::error::CameraError;
use crate::frame::{Frame, PixelFormat};
use crate::ir_emitter::IrEmitter;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

const CHANNEL_CAPACITY: usize = 4;
const GET_FRAME_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// A size-4 ring with latest-wins semantics: when full, the oldest entry
/// is dropped to make room for the newest (spec.md §4.2/§9).
struct FrameChannel {
    queue: Mutex<VecDeque<Frame>>,
    cond: Condvar,
}

impl FrameChannel {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(CHANNEL_CAPACITY)),
            cond: Condvar::new(),
        }
    }

    fn push(&self, frame: Frame) {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= CHANNEL_CAPACITY {
            q.pop_front();
        }
        q.push_back(frame);
        self.cond.notify_all();
    }

    fn recv_timeout(&self, timeout: Duration) -> Option<Frame> {
        let q = self.queue.lock().unwrap();
        if let Ok((mut q, result)) = self.cond.wait_timeout_while(q, timeout, |q| q.is_empty()) {
            if result.timed_out() {
                None
            } else {
                q.pop_front()
            }
        } else {
            None
        }
    }

    fn try_recv(&self) -> Option<Frame> {
        self.queue.lock().unwrap().pop_front()
    }

    fn clear(&self) -> usize {
        let mut q = self.queue.lock().unwrap();
        let n = q.len();
        q.clear();
        n
    }
}

/// Owns the device across `start`/`stop`. A fresh `v4l::Device` is opened
/// per `start()` and moved into the capture producer thread; `new()` only
/// validates that the configured device opens at all.
pub struct CameraSession {
    config: CameraConfig,
    width: AtomicU32,
    height: AtomicU32,
    channel: Arc<FrameChannel>,
    cancel: Arc<AtomicBool>,
    producer: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl CameraSession {
    /// Opens the device once to confirm it exists and is usable, then
    /// closes it immediately. `start()` reopens it for the real session.
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        let _probe = open_device(&config)?;
        Ok(Self {
            width: AtomicU32::new(config.width),
            height: AtomicU32::new(config.height),
            config,
            channel: Arc::new(FrameChannel::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            producer: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// No-op: this session negotiates format lazily, inside `start`.
    pub fn initialize(&self) -> Result<(), CameraError> {
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.width.load(Ordering::SeqCst)
    }

    pub fn height(&self) -> u32 {
        self.height.load(Ordering::SeqCst)
    }

    /// Opens the device, negotiates format, overwrites the session's
    /// stored dimensions with whatever the driver actually reports, fires
    /// the IR trigger (best effort), then spawns the single capture
    /// producer thread.
    pub fn start(&self) -> Result<(), CameraError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CameraError::AlreadyRunning);
        }
        self.cancel.store(false, Ordering::SeqCst);

        let mut device = open_device(&self.config)?;
        let format = negotiate_format(&mut device, &self.config)?;
        self.width.store(format.width, Ordering::SeqCst);
        self.height.store(format.height, Ordering::SeqCst);

        self.trigger_ir();

        let channel = Arc::clone(&self.channel);
        let cancel = Arc::clone(&self.cancel);
        let width = format.width;
        let height = format.height;
        let pixel_format = format.pixel_format;

        info!(
            "camera session started: {}x{} {:?}",
            width, height, pixel_format
        );

        let handle = std::thread::spawn(move || {
            run_producer(device, width, height, pixel_format, channel, cancel);
        });

        *self.producer.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Blocks for a frame (up to 5s) when `wait` is true; otherwise polls
    /// once and fails immediately if none is queued.
    pub fn get_frame(&self, wait: bool) -> Result<Frame, CameraError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(CameraError::NotRunning);
        }
        let frame = if wait {
            self.channel.recv_timeout(GET_FRAME_TIMEOUT)
        } else {
            self.channel.try_recv()
        };
        frame.ok_or(CameraError::NoFrame(if wait {
            GET_FRAME_TIMEOUT
        } else {
            Duration::ZERO
        }))
    }

    /// Best-effort illuminator trigger. Failure is a warning, never a
    /// hard error (spec.md §9: "a session on a non-IR camera must
    /// authenticate successfully in good lighting").
    pub fn trigger_ir(&self) {
        let Some(device) = self.config.ir_device.as_deref() else {
            return;
        };
        let mut emitter = IrEmitter::new(device);
        if let Err(e) = emitter.enable() {
            warn!("IR emitter trigger failed (non-fatal): {}", e);
        }
    }

    /// Two-phase shutdown: cancel, drain the queue, wait up to 500ms for
    /// the producer to exit, then reset state. Idempotent under
    /// concurrent calls — only the thread that flips `running` true→false
    /// performs the drain; a racing second call returns immediately.
    pub fn stop(&self) -> Result<(), CameraError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.store(true, Ordering::SeqCst);

        let handle = self.producer.lock().unwrap().take();
        if let Some(handle) = handle {
            let deadline = Instant::now() + STOP_DRAIN_TIMEOUT;
            while !handle.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if handle.is_finished() {
                if let Err(panic) = handle.join() {
                    warn!("camera producer thread panicked: {:?}", panic);
                }
            } else {
                warn!("camera producer did not exit within {:?}; detaching", STOP_DRAIN_TIMEOUT);
            }
        }

        let dropped = self.channel.clear();
        debug!("camera session stopped, dropped {} queued frame(s)", dropped);
        Ok(())
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

struct NegotiatedFormat {
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
}

fn open_device(config: &CameraConfig) -> Result<Device, CameraError> {
    Device::with_path(&config.device).map_err(|e| CameraError::DeviceOpen {
        device: config.device.clone(),
        source: e,
    })
}

fn negotiate_format(device: &mut Device, config: &CameraConfig) -> Result<NegotiatedFormat, CameraError> {
    let mut fmt = device
        .format()
        .map_err(|e| CameraError::DeviceIo(e.to_string()))?;

    fmt.width = config.width;
    fmt.height = config.height;
    if let Some(tag) = PixelFormat::from_fourcc(&config.pixel_format) {
        fmt.fourcc = FourCC::new(&fourcc_bytes(tag.as_fourcc()));
    }

    if let Err(e) = device.set_format(&fmt) {
        warn!("could not set exact format {}x{}: {}; using device defaults", fmt.width, fmt.height, e);
    }

    let final_fmt = device
        .format()
        .map_err(|e| CameraError::DeviceIo(e.to_string()))?;

    // An unrecognized FourCC isn't a camera failure — it's carried through
    // as `PixelFormat::Other` and fails at decode time instead (spec.md
    // §4.1 wants the decoder, not the negotiator, to reject it).
    let tag = final_fmt.fourcc.str().unwrap_or("");
    let pixel_format = PixelFormat::from_fourcc_lenient(tag);

    Ok(NegotiatedFormat {
        width: final_fmt.width,
        height: final_fmt.height,
        pixel_format,
    })
}

fn fourcc_bytes(tag: &str) -> [u8; 4] {
    let bytes = tag.as_bytes();
    let mut out = [b' '; 4];
    for i in 0..4.min(bytes.len()) {
        out[i] = bytes[i];
    }
    out
}

fn run_producer(
    mut device: Device,
    width: u32,
    height: u32,
    pixel_format: PixelFormat,
    channel: Arc<FrameChannel>,
    cancel: Arc<AtomicBool>,
) {
    let mut stream = match Stream::with_buffers(&mut device, Type::VideoCapture, CHANNEL_CAPACITY as u32) {
        Ok(s) => s,
        Err(e) => {
            warn!("camera producer failed to create capture stream: {}", e);
            return;
        }
    };

    let mut sequence: u64 = 0;
    while !cancel.load(Ordering::Relaxed) {
        match stream.next() {
            Ok((buf, _meta)) => {
                sequence += 1;
                channel.push(Frame {
                    data: buf.to_vec(),
                    width,
                    height,
                    format: pixel_format.clone(),
                    timestamp: SystemTime::now(),
                    sequence,
                });
            }
            Err(e) => {
                warn!("camera producer read error, exiting: {}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(seq: u64) -> Frame {
        Frame {
            data: vec![0u8; 4],
            width: 2,
            height: 2,
            format: PixelFormat::Grey,
            timestamp: SystemTime::now(),
            sequence: seq,
        }
    }

    #[test]
    fn channel_drops_oldest_when_full() {
        let channel = FrameChannel::new();
        for seq in 0..6 {
            channel.push(make_frame(seq));
        }
        let received = channel.try_recv().unwrap();
        assert_eq!(received.sequence, 2);

        let mut last_seen = received.sequence;
        while let Some(frame) = channel.try_recv() {
            last_seen = frame.sequence;
        }
        assert_eq!(last_seen, 5);
    }

    #[test]
    fn channel_clear_reports_count() {
        let channel = FrameChannel::new();
        channel.push(make_frame(0));
        channel.push(make_frame(1));
        assert_eq!(channel.clear(), 2);
        assert!(channel.try_recv().is_none());
    }

    #[test]
    fn fourcc_bytes_pads_short_tags() {
        assert_eq!(fourcc_bytes("GREY"), *b"GREY");
        assert_eq!(fourcc_bytes("Y16"), [b'Y', b'1', b'6', b' ']);
    }
}
