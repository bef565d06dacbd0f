//! Scripted stand-ins for the device and the model, shared by unit tests.
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma, RgbImage};

use crate::automation::audit::AuditLog;
use crate::automation::session::{Session, TimingConfig};
use crate::device::capture::CapturePolicy;
use crate::device::transport::{DeviceKey, DeviceTransport};
use crate::errors::{TapClawError, TapClawResult};
use crate::executor::budget::ActionBudget;
use crate::perception::traits::DetectionBackend;
use crate::perception::types::{Frame, RawDetections};

/// One scripted answer to `capture_screen`.
#[derive(Debug, Clone)]
pub enum Screen {
    Png(Vec<u8>),
    Fail(String),
    Unavailable,
}

/// Pops scripted answers front to back; the last one repeats forever.
fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut q = queue.lock().unwrap();
    if q.len() > 1 {
        q.pop_front()
    } else {
        q.front().cloned()
    }
}

#[derive(Default)]
pub struct FakeTransport {
    screens: Mutex<VecDeque<Screen>>,
    taps: Mutex<Vec<(i32, i32)>>,
    keys: Mutex<Vec<DeviceKey>>,
    captures: AtomicU32,
    fail_taps: AtomicBool,
}

impl FakeTransport {
    pub fn new(screens: Vec<Screen>) -> Self {
        Self {
            screens: Mutex::new(screens.into()),
            ..Default::default()
        }
    }

    /// A device that always shows the same image.
    pub fn showing(image: &DynamicImage) -> Self {
        Self::new(vec![Screen::Png(png(image))])
    }

    pub fn fail_taps(&self, fail: bool) {
        self.fail_taps.store(fail, Ordering::SeqCst);
    }

    pub fn capture_count(&self) -> u32 {
        self.captures.load(Ordering::SeqCst)
    }

    pub fn taps(&self) -> Vec<(i32, i32)> {
        self.taps.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<DeviceKey> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeviceTransport for FakeTransport {
    async fn capture_screen(&self) -> TapClawResult<Vec<u8>> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        match next_scripted(&self.screens) {
            Some(Screen::Png(bytes)) => Ok(bytes),
            Some(Screen::Fail(msg)) => Err(TapClawError::Transport(msg)),
            Some(Screen::Unavailable) => Err(TapClawError::DeviceUnavailable("no devices".into())),
            None => Err(TapClawError::Transport("nothing scripted".into())),
        }
    }

    async fn tap(&self, x: i32, y: i32) -> TapClawResult<()> {
        if self.fail_taps.load(Ordering::SeqCst) {
            return Err(TapClawError::Transport("input tap failed".into()));
        }
        self.taps.lock().unwrap().push((x, y));
        Ok(())
    }

    async fn press_key(&self, key: DeviceKey) -> TapClawResult<()> {
        self.keys.lock().unwrap().push(key);
        Ok(())
    }
}

/// Backend returning scripted results; the last one repeats.
pub struct StaticBackend {
    responses: Mutex<VecDeque<Result<RawDetections, String>>>,
    calls: AtomicU32,
}

impl StaticBackend {
    pub fn sequence(responses: Vec<Result<RawDetections, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(raw: RawDetections) -> Self {
        Self::sequence(vec![Ok(raw)])
    }

    pub fn failing(msg: &str) -> Self {
        Self::sequence(vec![Err(msg.to_string())])
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DetectionBackend for StaticBackend {
    fn name(&self) -> &str {
        "static"
    }

    fn infer(&self, _image: &DynamicImage) -> TapClawResult<RawDetections> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match next_scripted(&self.responses) {
            Some(Ok(raw)) => Ok(raw),
            Some(Err(msg)) => Err(TapClawError::Detection(msg)),
            None => Ok(RawDetections::Objects(Vec::new())),
        }
    }
}

// ── Images ──────────────────────────────────────────────────────────────────

pub fn png(image: &DynamicImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    buf.into_inner()
}

pub fn solid(width: u32, height: u32, level: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([level])))
}

pub fn solid_frame(width: u32, height: u32, level: u8) -> Frame {
    Frame::new(solid(width, height, level))
}

/// Diagonal stripes; different `phase` values are poorly correlated.
pub fn stripes(width: u32, height: u32, phase: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = if ((x + y + phase) / 16) % 2 == 0 { 30 } else { 220 };
        image::Rgb([v, v, v])
    }))
}

/// A "home screen": smooth gradient, unrelated to [`stripes`].
pub fn home_screen(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        let v = ((x * 255 / width.max(1) + y * 64 / height.max(1)) % 256) as u8;
        image::Rgb([v, v / 2, 255 - v])
    }))
}

/// Session over `transport` with default timing and an in-memory audit log.
pub fn session_with(transport: Arc<FakeTransport>, limit: u32) -> Session {
    Session::new(
        transport,
        ActionBudget::new(limit),
        AuditLog::in_memory(),
        TimingConfig::default(),
        CapturePolicy::default(),
    )
}
