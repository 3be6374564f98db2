//! Device enumeration and hot-plug subscription

use std::sync::Arc;

use oa_core::{AudioConfig, AudioError, Result};
use tracing::debug;

use crate::backend::AudioBackend;
use crate::notifier::DeviceListEvent;
use crate::session::DeviceSession;
use crate::subsystem::Subsystem;
use crate::types::{DeviceDescriptor, Direction};

/// Entry point for finding devices.
///
/// Registries over the same [`Subsystem`] share its single initialization
/// and its notification slots.
#[derive(Clone)]
pub struct DeviceRegistry {
    subsystem: Arc<Subsystem>,
    config: AudioConfig,
}

impl DeviceRegistry {
    /// Registry over the process-wide subsystem with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(AudioConfig::default())
    }

    /// Registry over the process-wide subsystem
    pub fn with_config(config: AudioConfig) -> Result<Self> {
        let subsystem = Subsystem::global(&config);
        Self::with_subsystem_and_config(subsystem, config)
    }

    /// Registry over an explicit subsystem, such as one wrapping a mock
    pub fn with_subsystem(subsystem: Arc<Subsystem>) -> Result<Self> {
        Self::with_subsystem_and_config(subsystem, AudioConfig::default())
    }

    pub fn with_subsystem_and_config(subsystem: Arc<Subsystem>, config: AudioConfig) -> Result<Self> {
        subsystem.ensure_initialized()?;
        Ok(Self { subsystem, config })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend().name()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn subsystem(&self) -> &Arc<Subsystem> {
        &self.subsystem
    }

    /// Capture devices in backend order
    pub fn input_devices(&self) -> Result<Vec<DeviceSession>> {
        self.devices(Direction::Input)
    }

    /// Playback devices in backend order
    pub fn output_devices(&self) -> Result<Vec<DeviceSession>> {
        self.devices(Direction::Output)
    }

    pub fn devices(&self, direction: Direction) -> Result<Vec<DeviceSession>> {
        let descriptors = self.backend().devices(direction)?;
        debug!(direction = %direction, count = descriptors.len(), "enumerated devices");
        Ok(descriptors
            .into_iter()
            .map(|descriptor| self.session(descriptor))
            .collect())
    }

    /// Current default capture device as a detached session
    pub fn default_input_device(&self) -> Result<Option<DeviceSession>> {
        self.default_device(Direction::Input)
    }

    /// Current default playback device as a detached session
    pub fn default_output_device(&self) -> Result<Option<DeviceSession>> {
        self.default_device(Direction::Output)
    }

    pub fn default_device(&self, direction: Direction) -> Result<Option<DeviceSession>> {
        Ok(self
            .backend()
            .default_device(direction)?
            .map(|descriptor| self.session(descriptor)))
    }

    /// First device with an exact name match
    pub fn find_device(&self, direction: Direction, name: &str) -> Result<DeviceSession> {
        self.backend()
            .devices(direction)?
            .into_iter()
            .find(|descriptor| descriptor.info.name == name)
            .map(|descriptor| self.session(descriptor))
            .ok_or_else(|| AudioError::DeviceNotFound(name.to_string()))
    }

    /// Subscribe to a device-list change, replacing the previous subscriber
    /// for the same event. The callback runs on the backend's event thread
    /// and must not register callbacks itself.
    pub fn set_device_list_callback<F>(&self, event: DeviceListEvent, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subsystem.install_event_sink();
        self.subsystem.notifier().set(event, callback);
    }

    /// Drop the subscriber for an event, returning true if one was present
    pub fn clear_device_list_callback(&self, event: DeviceListEvent) -> bool {
        self.subsystem.notifier().clear(event)
    }

    fn backend(&self) -> &Arc<dyn AudioBackend> {
        self.subsystem.backend()
    }

    /// New session with the configured rate and period size applied
    fn session(&self, mut descriptor: DeviceDescriptor) -> DeviceSession {
        if let Some(rate) = self.config.sample_rate {
            descriptor.format.sample_rate = rate;
        }
        if let Some(frames) = self.config.buffer_size_frames {
            descriptor.format.buffer_size_frames = frames;
        }
        DeviceSession::new(
            Arc::clone(self.backend()),
            descriptor,
            self.config.queue_periods,
        )
    }
}
