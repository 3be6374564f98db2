//! In-memory backend for tests and headless runs
//!
//! Devices are added and removed by hand, which emits hot-plug events
//! synchronously on the calling thread. Callback streams are driven one
//! period at a time with [`MockBackend::render_period`] and
//! [`MockBackend::capture_period`]; queue streams are fed and drained with
//! [`MockBackend::push_capture`] and [`MockBackend::take_rendered`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use oa_core::{AudioError, Result, SampleFormat, StreamFormat};
use parking_lot::{Mutex, RwLock};

use super::{AudioBackend, BackendStream, Delivery, EventSink, OpenRequest, RawCallback};
use crate::bridge::AlignedBytes;
use crate::types::{
    DeviceDescriptor, DeviceEvent, DeviceEventKind, DeviceId, DeviceInfo, Direction,
};

/// Backend operation that can be made to fail once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Initialize,
    Open,
    Play,
    Pause,
    Close,
    Queue,
    Dequeue,
}

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    next_id: u32,
    default_input: Option<String>,
    default_output: Option<String>,
    failures: Vec<MockOp>,
    streams: Vec<Arc<StreamShared>>,
}

impl MockState {
    fn take_failure(&mut self, op: MockOp) -> bool {
        match self.failures.iter().position(|&f| f == op) {
            Some(index) => {
                self.failures.remove(index);
                true
            }
            None => false,
        }
    }

    fn live_stream(&self, name: &str, direction: Direction) -> Option<Arc<StreamShared>> {
        self.streams
            .iter()
            .find(|s| {
                !s.closed.load(Ordering::Acquire)
                    && s.device.direction == direction
                    && s.device.name == name
            })
            .cloned()
    }
}

struct StreamShared {
    device: DeviceInfo,
    format: StreamFormat,
    /// Held across each delivery so close waits for in-flight periods
    callback: Mutex<Option<RawCallback>>,
    queue: Mutex<VecDeque<u8>>,
    capacity: usize,
    playing: AtomicBool,
    alive: AtomicBool,
    closed: AtomicBool,
}

impl StreamShared {
    fn release(&self) {
        self.playing.store(false, Ordering::Release);
        self.closed.store(true, Ordering::Release);
        self.callback.lock().take();
    }
}

/// Scriptable in-memory backend
#[derive(Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    sinks: RwLock<Vec<EventSink>>,
    init_calls: AtomicUsize,
    terminate_calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MockBackend::add_device`]
    pub fn with_device(self, direction: Direction, name: &str, format: StreamFormat) -> Self {
        self.add_device(direction, name, format);
        self
    }

    /// Plug in a device and notify event sinks
    pub fn add_device(&self, direction: Direction, name: &str, format: StreamFormat) -> DeviceId {
        let id = {
            let mut state = self.state.lock();
            let id = DeviceId(state.next_id);
            state.next_id += 1;
            state.devices.push(DeviceDescriptor {
                info: DeviceInfo {
                    id,
                    name: name.to_string(),
                    direction,
                },
                format,
            });
            id
        };
        self.emit(DeviceEventKind::Added, direction, name);
        id
    }

    /// Unplug a device, kill its streams and notify event sinks
    pub fn remove_device(&self, direction: Direction, name: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let before = state.devices.len();
            state
                .devices
                .retain(|d| !(d.info.direction == direction && d.info.name == name));
            for stream in &state.streams {
                if stream.device.direction == direction && stream.device.name == name {
                    stream.alive.store(false, Ordering::Release);
                }
            }
            state.devices.len() != before
        };
        if removed {
            self.emit(DeviceEventKind::Removed, direction, name);
        }
        removed
    }

    /// Name the platform default for a direction
    pub fn set_default_device(&self, direction: Direction, name: Option<&str>) {
        let mut state = self.state.lock();
        let slot = match direction {
            Direction::Input => &mut state.default_input,
            Direction::Output => &mut state.default_output,
        };
        *slot = name.map(str::to_string);
    }

    /// Make the next call of `op` fail
    pub fn fail_next(&self, op: MockOp) {
        self.state.lock().failures.push(op);
    }

    /// Drive one output period through a playing callback stream and return
    /// the rendered bytes
    pub fn render_period(&self, name: &str) -> Option<Vec<u8>> {
        let stream = self.state.lock().live_stream(name, Direction::Output)?;
        if !stream.playing.load(Ordering::Acquire) {
            return None;
        }
        let mut period = AlignedBytes::with_len(stream.format.period_bytes());
        let mut callback = stream.callback.lock();
        let callback = callback.as_mut()?;
        callback(period.as_mut_bytes());
        Some(period.as_bytes().to_vec())
    }

    /// Deliver one captured period to a playing callback stream
    pub fn capture_period(&self, name: &str, data: &[u8]) -> bool {
        let Some(stream) = self.state.lock().live_stream(name, Direction::Input) else {
            return false;
        };
        if !stream.playing.load(Ordering::Acquire) {
            return false;
        }
        let mut period = AlignedBytes::with_len(data.len());
        period.as_mut_bytes().copy_from_slice(data);
        let mut callback = stream.callback.lock();
        match callback.as_mut() {
            Some(callback) => {
                callback(period.as_mut_bytes());
                true
            }
            None => false,
        }
    }

    /// Append captured bytes to an input queue stream, returning how many fit
    pub fn push_capture(&self, name: &str, data: &[u8]) -> usize {
        let Some(stream) = self.state.lock().live_stream(name, Direction::Input) else {
            return 0;
        };
        let mut queue = stream.queue.lock();
        let accepted = data.len().min(stream.capacity.saturating_sub(queue.len()));
        queue.extend(&data[..accepted]);
        accepted
    }

    /// Drain everything queued on an output queue stream
    pub fn take_rendered(&self, name: &str) -> Vec<u8> {
        match self.state.lock().live_stream(name, Direction::Output) {
            Some(stream) => stream.queue.lock().drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Whether an open stream on the device is playing
    pub fn is_playing(&self, direction: Direction, name: &str) -> bool {
        self.state
            .lock()
            .live_stream(name, direction)
            .is_some_and(|s| s.playing.load(Ordering::Acquire))
    }

    /// Streams opened and not yet closed
    pub fn open_streams(&self) -> usize {
        self.state
            .lock()
            .streams
            .iter()
            .filter(|s| !s.closed.load(Ordering::Acquire))
            .count()
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    fn emit(&self, kind: DeviceEventKind, direction: Direction, name: &str) {
        let event = DeviceEvent {
            kind,
            direction,
            name: name.to_string(),
        };
        for sink in self.sinks.read().iter() {
            sink(&event);
        }
    }

    fn fail(&self, op: MockOp, operation: &'static str, device: &str) -> Result<()> {
        if self.state.lock().take_failure(op) {
            return Err(AudioError::backend(operation, device, "injected failure"));
        }
        Ok(())
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn initialize(&self) -> Result<()> {
        self.fail(MockOp::Initialize, "initialize", "mock")?;
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn devices(&self, direction: Direction) -> Result<Vec<DeviceDescriptor>> {
        Ok(self
            .state
            .lock()
            .devices
            .iter()
            .filter(|d| d.info.direction == direction)
            .cloned()
            .collect())
    }

    fn default_device(&self, direction: Direction) -> Result<Option<DeviceDescriptor>> {
        let state = self.state.lock();
        let name = match direction {
            Direction::Input => state.default_input.as_deref(),
            Direction::Output => state.default_output.as_deref(),
        };
        Ok(name.and_then(|name| {
            state
                .devices
                .iter()
                .find(|d| d.info.direction == direction && d.info.name == name)
                .map(|d| {
                    let mut detached = d.clone();
                    detached.info.id = DeviceId::DEFAULT;
                    detached
                })
        }))
    }

    fn supports_format(&self, format: SampleFormat) -> bool {
        format.is_native()
    }

    fn open(&self, request: OpenRequest, delivery: Delivery) -> Result<Box<dyn BackendStream>> {
        let mut state = self.state.lock();
        let name = request.device.name.as_str();
        if state.take_failure(MockOp::Open) {
            return Err(AudioError::backend("open", name, "injected failure"));
        }
        let present = state
            .devices
            .iter()
            .any(|d| d.info.direction == request.device.direction && d.info.name == name);
        if !present {
            return Err(AudioError::DeviceNotFound(name.to_string()));
        }

        let (callback, capacity) = match delivery {
            Delivery::Callback(callback) => (Some(callback), 0),
            Delivery::Queue { capacity_bytes } => (None, capacity_bytes),
        };
        let shared = Arc::new(StreamShared {
            device: request.device,
            format: request.format,
            callback: Mutex::new(callback),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            playing: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        });
        state.streams.push(Arc::clone(&shared));
        Ok(Box::new(MockStream {
            shared,
            state: Arc::clone(&self.state),
        }))
    }

    fn add_event_sink(&self, sink: EventSink) {
        self.sinks.write().push(sink);
    }
}

struct MockStream {
    shared: Arc<StreamShared>,
    state: Arc<Mutex<MockState>>,
}

impl MockStream {
    fn check(&self, op: MockOp, operation: &'static str) -> Result<()> {
        if self.state.lock().take_failure(op) {
            return Err(AudioError::backend(
                operation,
                self.shared.device.name.as_str(),
                "injected failure",
            ));
        }
        Ok(())
    }
}

impl BackendStream for MockStream {
    fn format(&self) -> StreamFormat {
        self.shared.format
    }

    fn play(&mut self) -> Result<()> {
        self.check(MockOp::Play, "play")?;
        self.shared.playing.store(true, Ordering::Release);
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.check(MockOp::Pause, "pause")?;
        self.shared.playing.store(false, Ordering::Release);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        // Released on drop even when the close itself reports failure
        self.check(MockOp::Close, "close")
    }

    fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::Acquire) && !self.shared.closed.load(Ordering::Acquire)
    }

    fn queued_bytes(&self) -> usize {
        self.shared.queue.lock().len()
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<()> {
        self.check(MockOp::Queue, "queue audio for")?;
        let mut queue = self.shared.queue.lock();
        if queue.len() + bytes.len() > self.shared.capacity {
            return Err(AudioError::backend(
                "queue audio for",
                self.shared.device.name.as_str(),
                format!(
                    "output queue full ({} of {} bytes used)",
                    queue.len(),
                    self.shared.capacity
                ),
            ));
        }
        queue.extend(bytes);
        Ok(())
    }

    fn dequeue(&mut self, out: &mut [u8]) -> Result<usize> {
        self.check(MockOp::Dequeue, "dequeue audio from")?;
        let mut queue = self.shared.queue.lock();
        let count = out.len().min(queue.len());
        for (dst, src) in out.iter_mut().zip(queue.drain(..count)) {
            *dst = src;
        }
        Ok(count)
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.shared.release();
        self.state
            .lock()
            .streams
            .retain(|s| !Arc::ptr_eq(s, &self.shared));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_request(name: &str) -> OpenRequest {
        OpenRequest {
            device: DeviceInfo {
                id: DeviceId(0),
                name: name.to_string(),
                direction: Direction::Output,
            },
            format: StreamFormat {
                buffer_size_frames: 4,
                ..StreamFormat::default()
            },
        }
    }

    #[test]
    fn test_default_device_is_detached() {
        let backend = MockBackend::new()
            .with_device(Direction::Output, "speakers", StreamFormat::default())
            .with_device(Direction::Output, "hdmi", StreamFormat::default());
        backend.set_default_device(Direction::Output, Some("hdmi"));

        let default = backend.default_device(Direction::Output).unwrap().unwrap();
        assert_eq!(default.info.name, "hdmi");
        assert!(default.info.id.is_default());
        assert!(backend.default_device(Direction::Input).unwrap().is_none());
    }

    #[test]
    fn test_render_requires_playing() {
        let backend =
            MockBackend::new().with_device(Direction::Output, "speakers", StreamFormat::default());
        let callback: RawCallback = Box::new(|bytes: &mut [u8]| bytes.fill(1));
        let mut stream = backend
            .open(output_request("speakers"), Delivery::Callback(callback))
            .unwrap();

        assert!(backend.render_period("speakers").is_none());
        stream.play().unwrap();
        let period = backend.render_period("speakers").unwrap();
        assert_eq!(period.len(), 4 * 2 * 4);
        assert!(period.iter().all(|&b| b == 1));

        stream.close().unwrap();
        assert_eq!(backend.open_streams(), 0);
        assert!(backend.render_period("speakers").is_none());
    }

    #[test]
    fn test_queue_capacity_enforced() {
        let backend =
            MockBackend::new().with_device(Direction::Output, "speakers", StreamFormat::default());
        let mut stream = backend
            .open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 })
            .unwrap();

        stream.queue(&[1; 6]).unwrap();
        assert!(stream.queue(&[2; 6]).is_err());
        assert_eq!(stream.queued_bytes(), 6);
        assert_eq!(backend.take_rendered("speakers"), vec![1; 6]);
    }

    #[test]
    fn test_injected_failure_fires_once() {
        let backend =
            MockBackend::new().with_device(Direction::Output, "speakers", StreamFormat::default());
        backend.fail_next(MockOp::Open);
        let first = backend.open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 });
        assert!(matches!(first, Err(AudioError::Backend { operation: "open", .. })));
        assert!(backend
            .open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 })
            .is_ok());
    }

    #[test]
    fn test_closed_streams_are_forgotten() {
        let backend =
            MockBackend::new().with_device(Direction::Output, "speakers", StreamFormat::default());
        for _ in 0..16 {
            let stream = backend
                .open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 })
                .unwrap();
            stream.close().unwrap();
        }
        let kept = backend
            .open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 })
            .unwrap();
        drop(backend.open(output_request("speakers"), Delivery::Queue { capacity_bytes: 8 }));

        assert_eq!(backend.state.lock().streams.len(), 1);
        assert_eq!(backend.open_streams(), 1);
        assert!(kept.is_alive());
    }

    #[test]
    fn test_remove_device_kills_streams() {
        let backend =
            MockBackend::new().with_device(Direction::Output, "usb", StreamFormat::default());
        let stream = backend
            .open(output_request("usb"), Delivery::Queue { capacity_bytes: 8 })
            .unwrap();
        assert!(stream.is_alive());
        assert!(backend.remove_device(Direction::Output, "usb"));
        assert!(!stream.is_alive());
        assert!(!backend.remove_device(Direction::Output, "usb"));
    }
}
