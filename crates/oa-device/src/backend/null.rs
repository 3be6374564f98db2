//! Null audio backend

use oa_core::{AudioError, Result, SampleFormat};

use super::{AudioBackend, BackendStream, Delivery, EventSink, OpenRequest};
use crate::types::{DeviceDescriptor, Direction};

/// Backend for builds without platform audio. Enumeration is empty and every
/// stream request fails.
#[derive(Debug, Default)]
pub struct NullBackend;

impl NullBackend {
    pub fn new() -> Self {
        Self
    }
}

impl AudioBackend for NullBackend {
    fn name(&self) -> &'static str {
        "null"
    }

    fn initialize(&self) -> Result<()> {
        Ok(())
    }

    fn terminate(&self) {}

    fn devices(&self, _direction: Direction) -> Result<Vec<DeviceDescriptor>> {
        Ok(Vec::new())
    }

    fn default_device(&self, _direction: Direction) -> Result<Option<DeviceDescriptor>> {
        Ok(None)
    }

    fn supports_format(&self, _format: SampleFormat) -> bool {
        false
    }

    fn can_stream(&self) -> bool {
        false
    }

    fn open(&self, request: OpenRequest, _delivery: Delivery) -> Result<Box<dyn BackendStream>> {
        Err(AudioError::Unavailable(format!(
            "no audio backend compiled in to open '{}'",
            request.device.name
        )))
    }

    fn add_event_sink(&self, _sink: EventSink) {}
}
