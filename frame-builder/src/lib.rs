//! L2 frame assembly: turns a stream of `PolarPoint` batches, not necessarily
//! aligned to rotations, into a stream of complete `Frame` rotations
//! delivered exactly once, strictly serially, to a single callback.
//!
//! Nothing in here ever fails upward. Invalid input is dropped and counted;
//! see the module-level docs on `FrameBuilder` for the counters exposed.

mod ascii_export;
mod config;

pub use ascii_export::AsciiExportRequest;
pub use config::FrameBuilderConfig;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use lidar_geometry::normalize_azimuth_deg;
use lidar_types::{CartesianPoint, Frame, PolarPoint};

/// A frame plus the reason it was finalised, used internally to defer
/// channel sends until the builder's lock has been released.
struct PendingDelivery {
    frame: Frame,
    reason: &'static str,
}

struct Inner {
    current: Option<Frame>,
    buffer: HashMap<String, Frame>,
    last_azimuth: Option<f64>,
    last_sequence: Option<u32>,
    sequence_gaps_detected: u64,
    last_activity: std::time::Instant,
    next_frame_no: u64,
    export_request: Option<AsciiExportRequest>,
}

impl Inner {
    fn new() -> Self {
        Self {
            current: None,
            buffer: HashMap::new(),
            last_azimuth: None,
            last_sequence: None,
            sequence_gaps_detected: 0,
            last_activity: std::time::Instant::now(),
            next_frame_no: 0,
            export_request: None,
        }
    }
}

/// Accumulates polar points into full-rotation `Frame`s. See the spec's
/// frame-start algorithm: frames close on azimuth wrap (and, optionally, a
/// time-aligned variant) and are buffered briefly before delivery so the
/// cleaner task can enforce a uniform maximum latency.
pub struct FrameBuilder {
    config: parking_lot::RwLock<FrameBuilderConfig>,
    inner: Mutex<Inner>,
    tx: mpsc::Sender<Frame>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cleaner: Mutex<Option<JoinHandle<()>>>,
    cleaner_stop: Arc<AtomicBool>,
    dropped_frames: AtomicU64,
    discarded_short_frames: AtomicU64,
}

const CALLBACK_CHANNEL_DEPTH: usize = 8;

impl FrameBuilder {
    /// Build a new `FrameBuilder`. If `frame_callback` is `Some`, a
    /// background worker task is started to invoke it serially; the caller
    /// must be running inside a Tokio runtime.
    pub fn new(
        config: FrameBuilderConfig,
        frame_callback: Option<Arc<dyn Fn(Frame) + Send + Sync>>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(CALLBACK_CHANNEL_DEPTH);

        let this = Arc::new(Self {
            config: parking_lot::RwLock::new(config),
            inner: Mutex::new(Inner::new()),
            tx,
            worker: Mutex::new(None),
            cleaner: Mutex::new(None),
            cleaner_stop: Arc::new(AtomicBool::new(false)),
            dropped_frames: AtomicU64::new(0),
            discarded_short_frames: AtomicU64::new(0),
        });

        if let Some(callback) = frame_callback {
            let worker = tokio::spawn(Self::run_worker(rx, callback));
            *this.worker.lock() = Some(worker);
        }

        let cleaner_this = this.clone();
        let cleaner = tokio::spawn(Self::run_cleaner(cleaner_this));
        *this.cleaner.lock() = Some(cleaner);

        this
    }

    async fn run_worker(mut rx: mpsc::Receiver<Frame>, callback: Arc<dyn Fn(Frame) + Send + Sync>) {
        // One task, one receiver: no two callback invocations ever overlap.
        while let Some(frame) = rx.recv().await {
            callback(frame);
        }
    }

    async fn run_cleaner(this: Arc<Self>) {
        let mut interval = tokio::time::interval(this.config.read().cleanup_interval);
        loop {
            interval.tick().await;
            if this.cleaner_stop.load(Ordering::Acquire) {
                break;
            }
            this.sweep_buffer();
        }
    }

    /// Convert and feed a batch of polar points. Never fails; empty batches
    /// are a no-op.
    pub fn add_points_polar(&self, points: &[PolarPoint]) {
        if points.is_empty() {
            return;
        }
        let mut to_deliver = Vec::new();
        {
            let mut inner = self.inner.lock();
            let cfg = self.config.read().clone();
            for p in points {
                self.ingest_one(&mut inner, &cfg, p, &mut to_deliver);
            }
            inner.last_activity = std::time::Instant::now();
        }
        self.deliver_all(to_deliver);
    }

    fn ingest_one(
        &self,
        inner: &mut Inner,
        cfg: &FrameBuilderConfig,
        p: &PolarPoint,
        to_deliver: &mut Vec<PendingDelivery>,
    ) {
        Self::account_sequence(inner, p.udp_sequence);

        let az = normalize_azimuth_deg(p.azimuth_deg);
        let cart = CartesianPoint::from_polar(p);

        if let Some(current) = inner.current.as_ref() {
            let last_az = inner.last_azimuth.unwrap_or(az);
            if let Some(reason) = Self::decide_close(current, last_az, az, p.timestamp_ns, cfg) {
                let finished = inner.current.take().unwrap();
                self.finalize_current_frame(inner, finished, to_deliver);
                inner.next_frame_no += 1;
                inner.current = Some(Frame::new(
                    format!("{}-frame-{}", cfg.sensor_id, inner.next_frame_no),
                    cfg.sensor_id.clone(),
                    p.timestamp_ns,
                    Utc::now(),
                ));
                tracing::trace!(target: "lidar::trace", reason, "frame closed");
            }
        } else {
            inner.current = Some(Frame::new(
                format!("{}-frame-{}", cfg.sensor_id, inner.next_frame_no),
                cfg.sensor_id.clone(),
                p.timestamp_ns,
                Utc::now(),
            ));
        }

        inner.current.as_mut().unwrap().push(cart);
        inner.last_azimuth = Some(az);
    }

    /// Frame-start decision: returns `Some(reason)` when `current` should be
    /// closed before this point is appended to a fresh frame.
    fn decide_close(
        current: &Frame,
        last_az: f64,
        az: f64,
        ts_ns: i64,
        cfg: &FrameBuilderConfig,
    ) -> Option<&'static str> {
        let coverage = current.coverage_deg();
        let point_count = current.point_count();

        if cfg.enable_time_based && cfg.expected_frame_duration > Duration::ZERO {
            let expected_ns = cfg.expected_frame_duration.as_nanos() as f64;
            let elapsed_ns = (ts_ns - current.start_ts_ns) as f64;

            if elapsed_ns >= expected_ns * 1.1 && coverage >= 340.0 {
                return Some("time_limit_exceeded");
            }
            if last_az > 340.0 && az < 20.0 && elapsed_ns >= expected_ns * 0.5 && coverage >= 340.0 {
                return Some("azimuth_wrap_time_aligned");
            }
            None
        } else {
            if last_az - az > 180.0 && point_count > cfg.min_frame_points && coverage >= 340.0 {
                return Some("azimuth_wrap_large_jump");
            }
            if last_az > 350.0
                && az < 10.0
                && (current.max_azimuth - current.min_azimuth) > 340.0
                && point_count > 10_000
            {
                return Some("azimuth_wrap_crossing");
            }
            None
        }
    }

    fn account_sequence(inner: &mut Inner, seq: u32) {
        match inner.last_sequence {
            None => inner.last_sequence = Some(seq),
            Some(last) => {
                if seq > last {
                    inner.sequence_gaps_detected += (seq - last - 1) as u64;
                    inner.last_sequence = Some(seq);
                }
                // seq <= last: forward-only detection, never rewinds.
            }
        }
    }

    /// Discard too-short frames; otherwise compute completeness and place
    /// the now-immutable frame into the finalisation buffer, evicting the
    /// oldest entry (by `start_ts_ns`) if it overflows.
    fn finalize_current_frame(&self, inner: &mut Inner, mut frame: Frame, to_deliver: &mut Vec<PendingDelivery>) {
        let cfg = self.config.read();
        if frame.point_count() < cfg.min_frame_points {
            self.discarded_short_frames.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(target: "lidar::diag", frame_id = %frame.frame_id, points = frame.point_count(), "frame discarded: below min_frame_points");
            return;
        }
        frame.calculate_completeness();
        let frame_buffer_size = cfg.frame_buffer_size;
        drop(cfg);

        inner.buffer.insert(frame.frame_id.clone(), frame);

        if inner.buffer.len() > frame_buffer_size {
            if let Some(evict_id) = inner
                .buffer
                .values()
                .min_by_key(|f| f.start_ts_ns)
                .map(|f| f.frame_id.clone())
            {
                if let Some(evicted) = inner.buffer.remove(&evict_id) {
                    to_deliver.push(PendingDelivery {
                        frame: evicted,
                        reason: "buffer_evict",
                    });
                }
            }
        }
    }

    fn deliver_all(&self, to_deliver: Vec<PendingDelivery>) {
        for pending in to_deliver {
            self.finalize_frame(pending.frame, pending.reason);
        }
    }

    /// Compute spin-completeness, service any pending ASCII export, and
    /// attempt non-blocking delivery to the callback worker. Overflow is the
    /// explicit back-pressure policy: this never blocks.
    fn finalize_frame(&self, mut frame: Frame, reason: &'static str) {
        frame.recompute_spin_complete();
        tracing::trace!(
            target: "lidar::trace",
            frame_id = %frame.frame_id,
            reason,
            points = frame.point_count(),
            coverage = frame.coverage_deg(),
            spin_complete = frame.spin_complete,
            "frame finalised"
        );

        {
            let mut inner = self.inner.lock();
            if let Some(req) = inner.export_request.take() {
                inner.export_request = ascii_export::service_export_request(&frame, req);
            }
        }

        match self.tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped_frames.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(target: "lidar::ops", reason, "callback channel full, frame dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(target: "lidar::diag", "callback channel closed, frame dropped");
            }
        }
    }

    /// Sweep the finalisation buffer: deliver anything older than
    /// `buffer_timeout`, and force-close an idle in-progress frame.
    fn sweep_buffer(&self) {
        let buffer_timeout = self.config.read().buffer_timeout;
        let now = std::time::Instant::now();
        let mut to_deliver = Vec::new();

        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .buffer
            .iter()
            .filter(|(_, f)| Self::frame_age(f) >= buffer_timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            if let Some(frame) = inner.buffer.remove(&id) {
                to_deliver.push(PendingDelivery {
                    frame,
                    reason: "buffer_timeout",
                });
            }
        }

        let idle = now.duration_since(inner.last_activity) >= buffer_timeout;
        if idle {
            if let Some(current) = inner.current.take() {
                if current.point_count() > 0 {
                    self.finalize_current_frame(&mut inner, current, &mut to_deliver);
                }
            }
        }
        drop(inner);

        self.deliver_all(to_deliver);
    }

    /// Age of a buffered frame: `end_wall ?: end_ts ?: start_wall ?: start_ts`;
    /// if every field is at its zero value, treat it as very old. In
    /// practice `Frame::new` always stamps a wall-clock time, so this chain
    /// only falls through to sensor nanosecond timestamps in tests that
    /// build frames by hand.
    fn frame_age(frame: &Frame) -> Duration {
        let epoch = chrono::DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let now = Utc::now();

        let reference = if frame.end_wall != epoch {
            frame.end_wall
        } else if frame.end_ts_ns != 0 {
            chrono::DateTime::<Utc>::from_timestamp_nanos(frame.end_ts_ns)
        } else if frame.start_wall != epoch {
            frame.start_wall
        } else if frame.start_ts_ns != 0 {
            chrono::DateTime::<Utc>::from_timestamp_nanos(frame.start_ts_ns)
        } else {
            return Duration::MAX;
        };

        (now - reference).to_std().unwrap_or(Duration::ZERO)
    }

    /// Clear the in-progress frame, buffer, and sequence-tracking state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.current = None;
        inner.buffer.clear();
        inner.last_azimuth = None;
        inner.last_sequence = None;
        inner.sequence_gaps_detected = 0;
    }

    /// Recompute `expected_frame_duration` from a motor RPM reading, or
    /// disable the time-based path if `rpm == 0`.
    pub fn set_motor_speed(&self, rpm: u16) {
        let mut cfg = self.config.write();
        if rpm > 0 {
            cfg.expected_frame_duration = Duration::from_millis(60_000 / rpm as u64);
        } else {
            cfg.expected_frame_duration = Duration::ZERO;
        }
    }

    pub fn request_ascii_export(&self, request: AsciiExportRequest) {
        self.inner.lock().export_request = Some(request);
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    pub fn discarded_short_frames(&self) -> u64 {
        self.discarded_short_frames.load(Ordering::Relaxed)
    }

    pub fn sequence_gaps_detected(&self) -> u64 {
        self.inner.lock().sequence_gaps_detected
    }

    pub fn buffered_frame_count(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Close the builder: stop accepting new work from the cleaner, close
    /// the callback channel and wait for the worker to drain.
    pub async fn close(&self) {
        self.cleaner_stop.store(true, Ordering::Release);
        if let Some(handle) = self.cleaner.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.worker.lock().take() {
            // Dropping the sender side would require ownership we don't
            // have here; the channel naturally drains when the builder is
            // dropped. For an explicit close, abort is sufficient since no
            // further frames will be produced.
            handle.abort();
        }
    }
}
