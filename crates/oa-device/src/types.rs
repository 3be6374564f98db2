//! Device identity and event types

use std::fmt;

use oa_core::StreamFormat;

/// Stream direction of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Capture
    Input,
    /// Playback
    Output,
}

impl Direction {
    pub fn is_input(self) -> bool {
        self == Direction::Input
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "input",
            Direction::Output => "output",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-assigned device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Identifier of a resolved default device, which is detached from any
    /// enumerated list
    pub const DEFAULT: DeviceId = DeviceId(u32::MAX);

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }
}

/// Identity of a device, passed to every I/O callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub direction: Direction,
}

/// A device as reported by a backend, with its preferred format
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDescriptor {
    pub info: DeviceInfo,
    pub format: StreamFormat,
}

/// What happened to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEventKind {
    Added,
    Removed,
}

/// Raw hot-plug notification from a backend event pump
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub kind: DeviceEventKind,
    pub direction: Direction,
    /// Name of the device that changed
    pub name: String,
}
