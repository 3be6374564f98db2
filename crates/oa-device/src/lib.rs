//! Audio device I/O for oxide-audio
//!
//! A [`DeviceRegistry`] enumerates devices and hands out [`DeviceSession`]s.
//! A session binds one real-time callback, then moves through the
//! stopped/running/paused lifecycle while the [`bridge`] turns each period of
//! raw backend bytes into a typed [`DeviceIo`] frame.

pub mod backend;
pub mod bridge;
pub mod notifier;
pub mod registry;
pub mod session;
pub mod subsystem;
pub mod types;

pub use backend::{AudioBackend, BackendStream, MockBackend, NullBackend};
#[cfg(feature = "cpal")]
pub use backend::CpalBackend;
pub use notifier::{DeviceListEvent, HotplugNotifier};
pub use registry::DeviceRegistry;
pub use session::{DeviceSession, IoCallback, SessionState};
pub use subsystem::Subsystem;
pub use types::{DeviceDescriptor, DeviceEvent, DeviceEventKind, DeviceId, DeviceInfo, Direction};

pub use oa_buffer::{BufferLayout, DeviceIo, Sample, SampleBufferView};
pub use oa_core::{AudioError, ErrorKind, Result, SampleEncoding, SampleFormat, StreamFormat};
