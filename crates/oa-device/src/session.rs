//! Device session lifecycle
//!
//! A session starts Stopped with no platform resource held. `start` opens
//! the platform stream, `pause` suspends delivery while keeping the stream
//! open, and `stop` releases it. Dropping a running session stops it first.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use oa_buffer::{DeviceIo, Sample, SampleBufferView};
use oa_core::{device_debug, stream_trace, AudioError, Result, SampleFormat, StreamFormat};
use tracing::{error, info, warn};

use crate::backend::{AudioBackend, BackendStream, Delivery, OpenRequest, RawCallback};
use crate::bridge::CallbackBridge;
pub use crate::bridge::IoCallback;
use crate::types::{DeviceDescriptor, DeviceId, DeviceInfo, Direction};

/// Shortest sleep while waiting for captured data
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No platform resource held
    Stopped,
    /// Stream open and delivering
    Running,
    /// Stream open, delivery suspended
    Paused,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Stopped => "stopped",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback bound by `connect` and not yet handed to a stream
struct Binding {
    format: SampleFormat,
    callback: RawCallback,
}

/// One device and its stream lifecycle
pub struct DeviceSession {
    backend: Arc<dyn AudioBackend>,
    info: DeviceInfo,
    format: StreamFormat,
    queue_periods: usize,
    state: SessionState,
    binding: Option<Binding>,
    stream: Option<Box<dyn BackendStream>>,
    callback_driven: bool,
    faulted: bool,
    dropped: Arc<AtomicU64>,
}

impl DeviceSession {
    pub(crate) fn new(
        backend: Arc<dyn AudioBackend>,
        descriptor: DeviceDescriptor,
        queue_periods: usize,
    ) -> Self {
        Self {
            backend,
            info: descriptor.info,
            format: descriptor.format,
            queue_periods: queue_periods.max(1),
            state: SessionState::Stopped,
            binding: None,
            stream: None,
            callback_driven: false,
            faulted: false,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    // Identity and format

    pub fn id(&self) -> DeviceId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn direction(&self) -> Direction {
        self.info.direction
    }

    pub fn is_input(&self) -> bool {
        self.info.direction == Direction::Input
    }

    pub fn is_output(&self) -> bool {
        self.info.direction == Direction::Output
    }

    pub fn input_channels(&self) -> u16 {
        if self.is_input() {
            self.format.channels
        } else {
            0
        }
    }

    pub fn output_channels(&self) -> u16 {
        if self.is_output() {
            self.format.channels
        } else {
            0
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn buffer_size_frames(&self) -> u32 {
        self.format.buffer_size_frames
    }

    pub fn sample_format(&self) -> SampleFormat {
        self.format.sample_format
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while the platform stream is open (running or paused)
    pub fn is_running(&self) -> bool {
        self.state != SessionState::Stopped
    }

    /// True once a backend failure has latched; only `stop` still works
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// Periods skipped because the backend buffer could not be viewed as the
    /// connected sample type
    pub fn dropped_periods(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    // Capabilities

    pub fn supports_sample_format(&self, format: SampleFormat) -> bool {
        self.backend.supports_format(format)
    }

    pub fn can_connect(&self) -> bool {
        self.backend.can_stream()
    }

    pub fn can_process(&self) -> bool {
        self.backend.can_stream()
    }

    // Configuration, only while stopped

    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        self.ensure_stopped("set sample rate")?;
        if sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample rate must be non-zero".into()));
        }
        self.format.sample_rate = sample_rate;
        Ok(())
    }

    pub fn set_buffer_size_frames(&mut self, frames: u32) -> Result<()> {
        self.ensure_stopped("set buffer size")?;
        if frames == 0 {
            return Err(AudioError::InvalidConfig("buffer size must be non-zero".into()));
        }
        self.format.buffer_size_frames = frames;
        Ok(())
    }

    /// Change the stream sample format. Rejected while a callback of another
    /// format is bound.
    pub fn set_sample_format(&mut self, format: SampleFormat) -> Result<()> {
        self.ensure_stopped("set sample format")?;
        if !self.backend.supports_format(format) {
            return Err(AudioError::UnsupportedFormat { format });
        }
        if let Some(binding) = &self.binding {
            if binding.format != format {
                return Err(AudioError::FormatMismatch {
                    expected: binding.format,
                    actual: format,
                });
            }
        }
        self.format.sample_format = format;
        Ok(())
    }

    // Lifecycle

    /// Bind the real-time callback, replacing any earlier binding.
    ///
    /// The callback runs on the backend's audio thread once per period. It
    /// must not block, allocate or panic.
    pub fn connect<T, F>(&mut self, callback: F) -> Result<()>
    where
        T: Sample,
        F: FnMut(&DeviceInfo, &mut DeviceIo<'_, T>) + Send + 'static,
    {
        self.ensure_stopped("connect")?;
        if !self.backend.supports_format(T::FORMAT) {
            return Err(AudioError::UnsupportedFormat { format: T::FORMAT });
        }

        self.format.sample_format = T::FORMAT;
        let bridge = CallbackBridge::<T>::new(
            self.info.clone(),
            usize::from(self.format.channels),
            Box::new(callback),
            Arc::clone(&self.dropped),
        );
        let previous = self.binding.replace(Binding {
            format: T::FORMAT,
            callback: bridge.into_raw(),
        });
        device_debug!(
            device = %self.info.name,
            format = %T::FORMAT,
            replaced = previous.is_some(),
            "callback connected"
        );
        Ok(())
    }

    /// Begin or resume delivery. Returns whether the state changed.
    pub fn start(&mut self) -> Result<bool> {
        self.ensure_healthy()?;
        match self.state {
            SessionState::Running => Ok(false),
            SessionState::Paused => self.resume(),
            SessionState::Stopped => self.open_and_play(),
        }
    }

    fn resume(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.invalid_state("resume"));
        };
        if let Err(err) = stream.play() {
            return Err(self.fault(err));
        }
        self.state = SessionState::Running;
        info!(device = %self.info.name, "stream resumed");
        Ok(true)
    }

    fn open_and_play(&mut self) -> Result<bool> {
        let (delivery, callback_driven) = match self.binding.take() {
            Some(binding) => (Delivery::Callback(binding.callback), true),
            None => {
                let capacity_bytes = self.format.period_bytes() * self.queue_periods;
                (Delivery::Queue { capacity_bytes }, false)
            }
        };
        let request = OpenRequest {
            device: self.info.clone(),
            format: self.format,
        };

        let mut stream = self
            .backend
            .open(request, delivery)
            .map_err(|err| self.fault(err))?;
        if let Err(err) = stream.play() {
            if let Err(close_err) = stream.close() {
                warn!(device = %self.info.name, error = %close_err, "close after failed play also failed");
            }
            return Err(self.fault(err));
        }

        let obtained = stream.format();
        if obtained != self.format {
            device_debug!(
                device = %self.info.name,
                requested = ?self.format,
                obtained = ?obtained,
                "adopting negotiated format"
            );
        }
        self.format = obtained;
        self.stream = Some(stream);
        self.callback_driven = callback_driven;
        self.state = SessionState::Running;
        info!(
            device = %self.info.name,
            direction = %self.info.direction,
            sample_rate = self.format.sample_rate,
            buffer_size = self.format.buffer_size_frames,
            format = %self.format.sample_format,
            callback_driven,
            "stream started"
        );
        Ok(true)
    }

    /// Suspend delivery, keeping the stream open. Returns whether the state
    /// changed.
    pub fn pause(&mut self) -> Result<bool> {
        self.ensure_healthy()?;
        if self.state != SessionState::Running {
            return Ok(false);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.invalid_state("pause"));
        };
        if let Err(err) = stream.pause() {
            return Err(self.fault(err));
        }
        self.state = SessionState::Paused;
        info!(device = %self.info.name, "stream paused");
        Ok(true)
    }

    /// Release the stream and unbind the callback. Returns whether a stream
    /// was closed.
    pub fn stop(&mut self) -> Result<bool> {
        if self.state == SessionState::Stopped {
            return Ok(false);
        }
        self.state = SessionState::Stopped;
        self.callback_driven = false;
        self.binding = None;

        let Some(stream) = self.stream.take() else {
            return Ok(false);
        };
        stream.close().map_err(|err| self.fault(err))?;
        info!(device = %self.info.name, "stream stopped");
        Ok(true)
    }

    // Poll-driven I/O

    /// Run `callback` over one period of queued I/O.
    ///
    /// Capture hands over at most one period of whole frames already queued.
    /// Render hands over one period of silence and queues whatever the
    /// callback wrote.
    pub fn process<T, F>(&mut self, callback: F) -> Result<()>
    where
        T: Sample,
        F: FnOnce(&DeviceInfo, &mut DeviceIo<'_, T>),
    {
        self.ensure_healthy()?;
        if self.state != SessionState::Running {
            return Err(self.invalid_state("process"));
        }
        if self.callback_driven {
            return Err(AudioError::InvalidState {
                operation: "process",
                state: "callback-driven",
            });
        }
        if T::FORMAT != self.format.sample_format {
            return Err(AudioError::FormatMismatch {
                expected: self.format.sample_format,
                actual: T::FORMAT,
            });
        }

        let channels = usize::from(self.format.channels);
        let frame_bytes = self.format.frame_bytes();
        let period_bytes = self.format.period_bytes();
        let Some(stream) = self.stream.as_mut() else {
            return Err(self.invalid_state("process"));
        };

        match self.info.direction {
            Direction::Input => {
                let frames = stream
                    .queued_bytes()
                    .min(period_bytes)
                    .checked_div(frame_bytes)
                    .unwrap_or(0);
                let mut scratch = vec![T::EQUILIBRIUM; frames * channels];
                let read = match stream.dequeue(bytemuck::cast_slice_mut(&mut scratch)) {
                    Ok(read) => read,
                    Err(err) => return Err(self.fault(err)),
                };
                let whole = read.checked_div(frame_bytes).unwrap_or(0) * channels;
                scratch.truncate(whole);
                stream_trace!(device = %self.info.name, bytes = read, "captured period");

                let view = SampleBufferView::from_interleaved(&mut scratch, channels);
                let mut io = DeviceIo::capture(view, Instant::now());
                callback(&self.info, &mut io);
            }
            Direction::Output => {
                let frames = usize::try_from(self.format.buffer_size_frames).unwrap_or(0);
                let mut scratch = vec![T::EQUILIBRIUM; frames * channels];
                {
                    let view = SampleBufferView::from_interleaved(&mut scratch, channels);
                    let mut io = DeviceIo::render(view, Instant::now());
                    callback(&self.info, &mut io);
                }
                if let Err(err) = stream.queue(bytemuck::cast_slice(&scratch)) {
                    return Err(self.fault(err));
                }
                stream_trace!(device = %self.info.name, bytes = scratch.len() * T::FORMAT.bytes(), "queued period");
            }
        }
        Ok(())
    }

    /// Block until a full period of captured data is queued.
    ///
    /// Returns at once unless this is a running, poll-driven capture
    /// session, and returns early if the stream dies.
    pub fn wait(&self) {
        if self.state != SessionState::Running || self.callback_driven || !self.is_input() {
            return;
        }
        let Some(stream) = self.stream.as_ref() else {
            return;
        };
        let needed = self.format.period_bytes();
        let bytes_per_second = self.format.frame_bytes() * self.format.sample_rate as usize;
        if bytes_per_second == 0 {
            return;
        }

        while stream.is_alive() {
            let queued = stream.queued_bytes();
            if queued >= needed {
                break;
            }
            let shortfall =
                Duration::from_secs_f64((needed - queued) as f64 / bytes_per_second as f64);
            std::thread::sleep(shortfall.max(MIN_WAIT));
        }
    }

    /// True when a poll-driven capture stream has bytes waiting
    pub fn has_unprocessed_io(&self) -> bool {
        !self.callback_driven
            && self.is_input()
            && self
                .stream
                .as_ref()
                .is_some_and(|stream| stream.queued_bytes() > 0)
    }

    fn ensure_healthy(&self) -> Result<()> {
        if self.faulted {
            Err(AudioError::SessionFaulted)
        } else {
            Ok(())
        }
    }

    fn ensure_stopped(&self, operation: &'static str) -> Result<()> {
        if self.state == SessionState::Stopped {
            Ok(())
        } else {
            Err(self.invalid_state(operation))
        }
    }

    fn invalid_state(&self, operation: &'static str) -> AudioError {
        AudioError::InvalidState {
            operation,
            state: self.state.as_str(),
        }
    }

    /// Latch a backend failure; the session cannot be started again
    fn fault(&mut self, err: AudioError) -> AudioError {
        self.faulted = true;
        error!(device = %self.info.name, error = %err, "device session faulted");
        err
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("info", &self.info)
            .field("format", &self.format)
            .field("state", &self.state)
            .field("connected", &self.binding.is_some())
            .field("callback_driven", &self.callback_driven)
            .field("faulted", &self.faulted)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(device = %self.info.name, error = %err, "failed to stop device on drop");
        }
    }
}
