//! Device-list change notification
//!
//! Three process-wide slots, one per [`DeviceListEvent`], each holding at
//! most one subscriber. Registering replaces whatever the slot held. Raw
//! backend add/remove events are filtered here: the list callback fires on
//! every change, while a default-changed callback fires only when the device
//! that changed is, after re-resolution, the platform default for its
//! direction.

use parking_lot::RwLock;

use oa_core::hotplug_debug;

use crate::types::{DeviceEvent, Direction};

/// Kinds of device-list change a caller can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceListEvent {
    /// A device was added or removed
    DeviceListChanged,
    /// The default capture device changed
    DefaultInputDeviceChanged,
    /// The default playback device changed
    DefaultOutputDeviceChanged,
}

/// Subscriber for a [`DeviceListEvent`]
pub type DeviceListCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slots {
    device_list: Option<DeviceListCallback>,
    default_input: Option<DeviceListCallback>,
    default_output: Option<DeviceListCallback>,
}

impl Slots {
    fn slot_mut(&mut self, event: DeviceListEvent) -> &mut Option<DeviceListCallback> {
        match event {
            DeviceListEvent::DeviceListChanged => &mut self.device_list,
            DeviceListEvent::DefaultInputDeviceChanged => &mut self.default_input,
            DeviceListEvent::DefaultOutputDeviceChanged => &mut self.default_output,
        }
    }

    fn default_slot(&self, direction: Direction) -> Option<&DeviceListCallback> {
        match direction {
            Direction::Input => self.default_input.as_ref(),
            Direction::Output => self.default_output.as_ref(),
        }
    }
}

/// Holder of the three notification slots
#[derive(Default)]
pub struct HotplugNotifier {
    slots: RwLock<Slots>,
}

impl HotplugNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the subscriber for `event`, returning true if it replaced one
    pub fn set<F>(&self, event: DeviceListEvent, callback: F) -> bool
    where
        F: Fn() + Send + Sync + 'static,
    {
        let replaced = self
            .slots
            .write()
            .slot_mut(event)
            .replace(Box::new(callback))
            .is_some();
        hotplug_debug!(?event, replaced, "device list callback registered");
        replaced
    }

    /// Remove the subscriber for `event`, returning true if one was present
    pub fn clear(&self, event: DeviceListEvent) -> bool {
        self.slots.write().slot_mut(event).take().is_some()
    }

    pub fn is_subscribed(&self, event: DeviceListEvent) -> bool {
        let slots = self.slots.read();
        match event {
            DeviceListEvent::DeviceListChanged => slots.device_list.is_some(),
            DeviceListEvent::DefaultInputDeviceChanged => slots.default_input.is_some(),
            DeviceListEvent::DefaultOutputDeviceChanged => slots.default_output.is_some(),
        }
    }

    /// Route one backend event to the matching subscribers and return how
    /// many fired.
    ///
    /// `resolve_default` looks up the current default device name for a
    /// direction. It is only consulted when a default-changed subscriber
    /// exists for the event's direction.
    pub fn dispatch<R>(&self, event: &DeviceEvent, resolve_default: R) -> usize
    where
        R: Fn(Direction) -> Option<String>,
    {
        let slots = self.slots.read();
        let mut fired = 0;

        if let Some(callback) = &slots.device_list {
            callback();
            fired += 1;
        }

        if let Some(callback) = slots.default_slot(event.direction) {
            if resolve_default(event.direction).as_deref() == Some(event.name.as_str()) {
                callback();
                fired += 1;
            }
        }

        hotplug_debug!(
            kind = ?event.kind,
            direction = %event.direction,
            device = %event.name,
            fired,
            "device event dispatched"
        );
        fired
    }
}
