//! cpal audio backend
//!
//! cpal streams are not `Send`, so each open stream lives on its own owner
//! thread and the session talks to it through a command channel. Poll-driven
//! streams exchange bytes with the audio thread through a lock-free ring
//! buffer. cpal has no device-change notifications; a watcher thread
//! re-enumerates devices on an interval and reports the differences.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::{self, Receiver, Sender};
use oa_core::{hotplug_debug, stream_trace, AudioConfig, AudioError, Result, SampleFormat, StreamFormat};
use parking_lot::{Mutex, RwLock};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{error, info, warn};

use super::{AudioBackend, BackendStream, Delivery, EventSink, OpenRequest, RawCallback};
use crate::bridge::AlignedBytes;
use crate::types::{DeviceDescriptor, DeviceEvent, DeviceEventKind, DeviceId, DeviceInfo, Direction};

/// Period size used when the device does not report a preference
const DEFAULT_PERIOD_FRAMES: u32 = 512;

/// Backend over the platform's default cpal host
pub struct CpalBackend {
    poll_interval: Duration,
    sinks: Arc<RwLock<Vec<EventSink>>>,
    watcher: Mutex<Option<Watcher>>,
}

struct Watcher {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl CpalBackend {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.hotplug_poll_interval_ms.max(1)),
            sinks: Arc::new(RwLock::new(Vec::new())),
            watcher: Mutex::new(None),
        }
    }

    fn start_watcher(&self) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }
        let stop = Arc::new(AtomicBool::new(false));
        let sinks = Arc::clone(&self.sinks);
        let interval = self.poll_interval;
        let flag = Arc::clone(&stop);
        match thread::Builder::new()
            .name("oa-hotplug".to_string())
            .spawn(move || watch_devices(&sinks, interval, &flag))
        {
            Ok(thread) => *watcher = Some(Watcher { stop, thread }),
            Err(err) => error!(error = %err, "failed to start device watcher"),
        }
    }
}

pub(crate) fn to_cpal_format(format: SampleFormat) -> Option<cpal::SampleFormat> {
    Some(match format {
        SampleFormat::I8 => cpal::SampleFormat::I8,
        SampleFormat::I16 => cpal::SampleFormat::I16,
        SampleFormat::I32 => cpal::SampleFormat::I32,
        SampleFormat::I64 => cpal::SampleFormat::I64,
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::U16 => cpal::SampleFormat::U16,
        SampleFormat::U32 => cpal::SampleFormat::U32,
        SampleFormat::U64 => cpal::SampleFormat::U64,
        SampleFormat::F32 => cpal::SampleFormat::F32,
        SampleFormat::F64 => cpal::SampleFormat::F64,
        _ => return None,
    })
}

pub(crate) fn from_cpal_format(format: cpal::SampleFormat) -> Option<SampleFormat> {
    Some(match format {
        cpal::SampleFormat::I8 => SampleFormat::I8,
        cpal::SampleFormat::I16 => SampleFormat::I16,
        cpal::SampleFormat::I32 => SampleFormat::I32,
        cpal::SampleFormat::I64 => SampleFormat::I64,
        cpal::SampleFormat::U8 => SampleFormat::U8,
        cpal::SampleFormat::U16 => SampleFormat::U16,
        cpal::SampleFormat::U32 => SampleFormat::U32,
        cpal::SampleFormat::U64 => SampleFormat::U64,
        cpal::SampleFormat::F32 => SampleFormat::F32,
        cpal::SampleFormat::F64 => SampleFormat::F64,
        _ => return None,
    })
}

fn host_devices(host: &cpal::Host, direction: Direction) -> Result<Vec<cpal::Device>> {
    let devices: std::result::Result<Vec<cpal::Device>, cpal::DevicesError> = match direction {
        Direction::Input => host.input_devices().map(|d| d.collect()),
        Direction::Output => host.output_devices().map(|d| d.collect()),
    };
    devices.map_err(|err| AudioError::backend("enumerate", direction.as_str(), err))
}

fn describe(device: &cpal::Device, id: DeviceId, direction: Direction) -> Option<DeviceDescriptor> {
    let name = device.name().ok()?;
    let config = match direction {
        Direction::Input => device.default_input_config(),
        Direction::Output => device.default_output_config(),
    }
    .ok()?;
    let sample_format = from_cpal_format(config.sample_format())?;
    let buffer_size_frames = match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => DEFAULT_PERIOD_FRAMES.max(*min).min(*max),
        cpal::SupportedBufferSize::Unknown => DEFAULT_PERIOD_FRAMES,
    };
    Some(DeviceDescriptor {
        info: DeviceInfo {
            id,
            name,
            direction,
        },
        format: StreamFormat {
            sample_rate: config.sample_rate().0,
            buffer_size_frames,
            channels: config.channels(),
            sample_format,
        },
    })
}

fn find_device(host: &cpal::Host, direction: Direction, name: &str) -> Result<cpal::Device> {
    host_devices(host, direction)?
        .into_iter()
        .find(|device| device.name().is_ok_and(|n| n == name))
        .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &'static str {
        "cpal"
    }

    fn initialize(&self) -> Result<()> {
        let host = cpal::default_host();
        info!(host = ?host.id(), "cpal host selected");
        Ok(())
    }

    fn terminate(&self) {
        if let Some(watcher) = self.watcher.lock().take() {
            watcher.stop.store(true, Ordering::Release);
            watcher.thread.thread().unpark();
            if watcher.thread.join().is_err() {
                warn!("device watcher panicked");
            }
        }
    }

    fn devices(&self, direction: Direction) -> Result<Vec<DeviceDescriptor>> {
        let host = cpal::default_host();
        Ok(host_devices(&host, direction)?
            .iter()
            .zip(0u32..)
            .filter_map(|(device, index)| describe(device, DeviceId(index), direction))
            .collect())
    }

    fn default_device(&self, direction: Direction) -> Result<Option<DeviceDescriptor>> {
        let host = cpal::default_host();
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        };
        Ok(device.and_then(|device| describe(&device, DeviceId::DEFAULT, direction)))
    }

    fn supports_format(&self, format: SampleFormat) -> bool {
        to_cpal_format(format).is_some()
    }

    fn open(&self, request: OpenRequest, delivery: Delivery) -> Result<Box<dyn BackendStream>> {
        let device_name = request.device.name.clone();
        let direction = request.device.direction;
        let (stream_io, queue) = match delivery {
            Delivery::Callback(callback) => (StreamIo::Callback(callback), QueueEnd::None),
            Delivery::Queue { capacity_bytes } => {
                let (producer, consumer) = HeapRb::<u8>::new(capacity_bytes.max(1)).split();
                match direction {
                    Direction::Input => (StreamIo::Capture(producer), QueueEnd::Capture(consumer)),
                    Direction::Output => (StreamIo::Render(consumer), QueueEnd::Render(producer)),
                }
            }
        };

        let alive = Arc::new(AtomicBool::new(true));
        let (command_tx, command_rx) = channel::bounded::<(Control, Sender<Result<()>>)>(1);
        let (ready_tx, ready_rx) = channel::bounded::<Result<StreamFormat>>(1);
        let stream_alive = Arc::clone(&alive);
        let owner = thread::Builder::new()
            .name(format!("oa-stream-{device_name}"))
            .spawn(move || run_stream_owner(request, stream_io, stream_alive, command_rx, ready_tx))
            .map_err(|err| AudioError::backend("open", device_name.as_str(), err))?;

        let format = match ready_rx.recv() {
            Ok(Ok(format)) => format,
            Ok(Err(err)) => {
                let _ = owner.join();
                return Err(err);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(AudioError::backend("open", device_name, "stream thread exited"));
            }
        };

        stream_trace!(device = %device_name, "stream opened");
        Ok(Box::new(CpalStream {
            device: device_name,
            format,
            commands: command_tx,
            owner: Some(owner),
            alive,
            queue,
        }))
    }

    fn add_event_sink(&self, sink: EventSink) {
        self.sinks.write().push(sink);
        self.start_watcher();
    }
}

/// Audio-thread side of a stream
enum StreamIo {
    Callback(RawCallback),
    Capture(HeapProd<u8>),
    Render(HeapCons<u8>),
}

/// Caller side of a poll-driven stream
enum QueueEnd {
    None,
    Capture(HeapCons<u8>),
    Render(HeapProd<u8>),
}

#[derive(Debug, Clone, Copy)]
enum Control {
    Play,
    Pause,
    Close,
}

fn run_stream_owner(
    request: OpenRequest,
    io: StreamIo,
    alive: Arc<AtomicBool>,
    commands: Receiver<(Control, Sender<Result<()>>)>,
    ready: Sender<Result<StreamFormat>>,
) {
    let name = request.device.name.clone();
    let stream = match build_stream(&request, io, alive) {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(request.format)).is_err() {
        return;
    }

    for (control, reply) in commands.iter() {
        let outcome = match control {
            Control::Play => stream
                .play()
                .map_err(|err| AudioError::backend("play", name.as_str(), err)),
            Control::Pause => stream
                .pause()
                .map_err(|err| AudioError::backend("pause", name.as_str(), err)),
            Control::Close => {
                drop(stream);
                let _ = reply.send(Ok(()));
                stream_trace!(device = %name, "stream closed");
                return;
            }
        };
        let _ = reply.send(outcome);
    }
}

/// Copy captured bytes through `scratch` one period at a time.
///
/// `scratch` must already hold `period_bytes`; shrinking it never
/// reallocates, so the audio thread stays allocation-free.
fn deliver_captured(
    bytes: &[u8],
    scratch: &mut AlignedBytes,
    period_bytes: usize,
    callback: &mut RawCallback,
) {
    for chunk in bytes.chunks(period_bytes) {
        scratch.set_len(chunk.len());
        scratch.as_mut_bytes().copy_from_slice(chunk);
        callback(scratch.as_mut_bytes());
    }
}

fn build_stream(request: &OpenRequest, io: StreamIo, alive: Arc<AtomicBool>) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let name = request.device.name.as_str();
    let device = find_device(&host, request.device.direction, name)?;
    let format = request.format;
    let sample_format = to_cpal_format(format.sample_format).ok_or(AudioError::UnsupportedFormat {
        format: format.sample_format,
    })?;
    let config = cpal::StreamConfig {
        channels: format.channels,
        sample_rate: cpal::SampleRate(format.sample_rate),
        buffer_size: cpal::BufferSize::Fixed(format.buffer_size_frames),
    };

    let error_name = name.to_string();
    let on_error = move |err: cpal::StreamError| {
        error!(device = %error_name, error = %err, "stream error");
        alive.store(false, Ordering::Release);
    };

    let built = match (request.device.direction, io) {
        (Direction::Output, StreamIo::Callback(mut callback)) => device.build_output_stream_raw(
            &config,
            sample_format,
            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| callback(data.bytes_mut()),
            on_error,
            None,
        ),
        (Direction::Input, StreamIo::Callback(mut callback)) => {
            // cpal hands input as a shared slice; the callback needs a
            // mutable, sample-aligned period
            let period_bytes = format.period_bytes().max(format.frame_bytes()).max(1);
            let mut scratch = AlignedBytes::with_len(period_bytes);
            device.build_input_stream_raw(
                &config,
                sample_format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    deliver_captured(data.bytes(), &mut scratch, period_bytes, &mut callback);
                },
                on_error,
                None,
            )
        }
        (Direction::Output, StreamIo::Render(mut consumer)) => {
            let silence = format.sample_format.silence_bytes();
            device.build_output_stream_raw(
                &config,
                sample_format,
                move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                    let bytes = data.bytes_mut();
                    let filled = consumer.pop_slice(bytes);
                    fill_silence(bytes, filled, &silence);
                },
                on_error,
                None,
            )
        }
        (Direction::Input, StreamIo::Capture(mut producer)) => device.build_input_stream_raw(
            &config,
            sample_format,
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                // Overflow drops the newest bytes
                let _ = producer.push_slice(data.bytes());
            },
            on_error,
            None,
        ),
        (direction, _) => {
            return Err(AudioError::backend(
                "open",
                name,
                format!("queue end does not match {direction} device"),
            ))
        }
    };
    built.map_err(|err| AudioError::backend("open", name, err))
}

/// Fill `bytes[from..]` with the silence pattern, aligned to sample
/// boundaries of the whole buffer
fn fill_silence(bytes: &mut [u8], from: usize, silence: &[u8]) {
    if silence.is_empty() {
        return;
    }
    for (offset, byte) in bytes.iter_mut().enumerate().skip(from) {
        *byte = silence[offset % silence.len()];
    }
}

/// Send handle to a stream living on its owner thread
struct CpalStream {
    device: String,
    format: StreamFormat,
    commands: Sender<(Control, Sender<Result<()>>)>,
    owner: Option<JoinHandle<()>>,
    alive: Arc<AtomicBool>,
    queue: QueueEnd,
}

impl CpalStream {
    fn request(&self, control: Control, operation: &'static str) -> Result<()> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.commands
            .send((control, reply_tx))
            .map_err(|_| AudioError::backend(operation, self.device.as_str(), "stream thread exited"))?;
        reply_rx
            .recv()
            .map_err(|_| AudioError::backend(operation, self.device.as_str(), "stream thread exited"))?
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(owner) = self.owner.take() else {
            return Ok(());
        };
        let outcome = self.request(Control::Close, "close");
        if owner.join().is_err() {
            return Err(AudioError::backend("close", self.device.as_str(), "stream thread panicked"));
        }
        outcome
    }
}

impl BackendStream for CpalStream {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn play(&mut self) -> Result<()> {
        self.request(Control::Play, "play")
    }

    fn pause(&mut self) -> Result<()> {
        self.request(Control::Pause, "pause")
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.shutdown()
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn queued_bytes(&self) -> usize {
        match &self.queue {
            QueueEnd::None => 0,
            QueueEnd::Capture(consumer) => consumer.occupied_len(),
            QueueEnd::Render(producer) => producer.occupied_len(),
        }
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<()> {
        let QueueEnd::Render(producer) = &mut self.queue else {
            return Err(AudioError::InvalidState {
                operation: "queue audio",
                state: "not rendering from a queue",
            });
        };
        let accepted = producer.push_slice(bytes);
        if accepted < bytes.len() {
            return Err(AudioError::backend(
                "queue audio for",
                self.device.as_str(),
                format!("output queue full, {accepted} of {} bytes accepted", bytes.len()),
            ));
        }
        Ok(())
    }

    fn dequeue(&mut self, out: &mut [u8]) -> Result<usize> {
        match &mut self.queue {
            QueueEnd::Capture(consumer) => Ok(consumer.pop_slice(out)),
            _ => Err(AudioError::InvalidState {
                operation: "dequeue audio",
                state: "not capturing into a queue",
            }),
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(device = %self.device, error = %err, "stream shutdown on drop failed");
        }
    }
}

fn device_names(host: &cpal::Host, direction: Direction) -> Vec<String> {
    match host_devices(host, direction) {
        Ok(devices) => devices.iter().filter_map(|d| d.name().ok()).collect(),
        Err(err) => {
            warn!(direction = %direction, error = %err, "device watcher enumeration failed");
            Vec::new()
        }
    }
}

/// Events turning `previous` into `current`: removals first, then additions
pub(crate) fn diff_device_lists(
    previous: &[String],
    current: &[String],
    direction: Direction,
) -> Vec<DeviceEvent> {
    let removed = previous
        .iter()
        .filter(|name| !current.contains(name))
        .map(|name| (DeviceEventKind::Removed, name));
    let added = current
        .iter()
        .filter(|name| !previous.contains(name))
        .map(|name| (DeviceEventKind::Added, name));
    removed
        .chain(added)
        .map(|(kind, name)| DeviceEvent {
            kind,
            direction,
            name: name.clone(),
        })
        .collect()
}

fn watch_devices(sinks: &RwLock<Vec<EventSink>>, interval: Duration, stop: &AtomicBool) {
    let host = cpal::default_host();
    let mut known = [
        device_names(&host, Direction::Input),
        device_names(&host, Direction::Output),
    ];
    hotplug_debug!(interval_ms = interval.as_millis() as u64, "device watcher started");

    loop {
        thread::park_timeout(interval);
        if stop.load(Ordering::Acquire) {
            break;
        }
        for (slot, direction) in [Direction::Input, Direction::Output].into_iter().enumerate() {
            let current = device_names(&host, direction);
            for event in diff_device_lists(&known[slot], &current, direction) {
                hotplug_debug!(kind = ?event.kind, direction = %direction, device = %event.name, "device change detected");
                for sink in sinks.read().iter() {
                    sink(&event);
                }
            }
            known[slot] = current;
        }
    }
    hotplug_debug!("device watcher stopped");
}
