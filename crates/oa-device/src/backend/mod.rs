//! Audio backends

use std::sync::Arc;

use oa_core::{AudioConfig, Result, SampleFormat, StreamFormat};

use crate::types::{DeviceDescriptor, DeviceEvent, DeviceInfo, Direction};

#[cfg(feature = "cpal")]
pub mod cpal_backend;
pub mod mock;
pub mod null;

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalBackend;
pub use mock::{MockBackend, MockOp};
pub use null::NullBackend;

/// Period callback over raw interleaved bytes, run on the backend's
/// real-time thread
pub type RawCallback = Box<dyn FnMut(&mut [u8]) + Send>;

/// Receiver of hot-plug events, run on the backend's event thread
pub type EventSink = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// How period data moves between the backend and the caller
pub enum Delivery {
    /// The backend calls back once per period
    Callback(RawCallback),
    /// The backend fills or drains a byte queue of the given capacity
    Queue { capacity_bytes: usize },
}

/// Parameters for opening a stream
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub device: DeviceInfo,
    pub format: StreamFormat,
}

/// Platform audio interface shared by all sessions
pub trait AudioBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Bring up the platform audio subsystem
    fn initialize(&self) -> Result<()>;

    /// Release the platform audio subsystem
    fn terminate(&self);

    /// Devices for one direction in platform order
    fn devices(&self, direction: Direction) -> Result<Vec<DeviceDescriptor>>;

    /// Current platform default device, if any
    fn default_device(&self, direction: Direction) -> Result<Option<DeviceDescriptor>>;

    /// Whether streams can carry samples of this format
    fn supports_format(&self, format: SampleFormat) -> bool;

    /// Whether the backend can open streams at all
    fn can_stream(&self) -> bool {
        true
    }

    /// Open a paused stream. The returned stream reports the obtained format,
    /// which may differ from the requested one.
    fn open(&self, request: OpenRequest, delivery: Delivery) -> Result<Box<dyn BackendStream>>;

    /// Subscribe to device add and remove events
    fn add_event_sink(&self, sink: EventSink);
}

/// An open platform stream
pub trait BackendStream: Send {
    /// Format actually obtained from the platform
    fn format(&self) -> StreamFormat;

    fn play(&mut self) -> Result<()>;

    fn pause(&mut self) -> Result<()>;

    /// Stop the stream and wait until no callback is in flight
    fn close(self: Box<Self>) -> Result<()>;

    /// False once the platform reported the stream dead
    fn is_alive(&self) -> bool;

    /// Bytes waiting in the delivery queue
    fn queued_bytes(&self) -> usize;

    /// Append rendered bytes to an output queue
    fn queue(&mut self, bytes: &[u8]) -> Result<()>;

    /// Drain captured bytes from an input queue, returning the count read
    fn dequeue(&mut self, out: &mut [u8]) -> Result<usize>;
}

/// Backend compiled in by default: cpal when enabled, otherwise the null
/// backend
pub fn default_backend(config: &AudioConfig) -> Arc<dyn AudioBackend> {
    #[cfg(feature = "cpal")]
    {
        Arc::new(CpalBackend::new(config))
    }
    #[cfg(not(feature = "cpal"))]
    {
        let _ = config;
        Arc::new(NullBackend::new())
    }
}
