//! Per-period device I/O frame

use std::time::Instant;

use crate::view::SampleBufferView;

/// Buffers and timestamps handed to an I/O callback for one period.
///
/// Only the slots matching the device direction are populated. The frame
/// borrows backend memory and is dropped when the callback returns.
#[derive(Debug)]
pub struct DeviceIo<'a, T> {
    pub input_buffer: Option<SampleBufferView<'a, T>>,
    /// When the input period was captured
    pub input_time: Option<Instant>,
    pub output_buffer: Option<SampleBufferView<'a, T>>,
    /// When the output period was requested
    pub output_time: Option<Instant>,
}

impl<'a, T> DeviceIo<'a, T> {
    /// Frame carrying captured samples
    pub fn capture(buffer: SampleBufferView<'a, T>, time: Instant) -> Self {
        Self {
            input_buffer: Some(buffer),
            input_time: Some(time),
            output_buffer: None,
            output_time: None,
        }
    }

    /// Frame carrying samples to be rendered
    pub fn render(buffer: SampleBufferView<'a, T>, time: Instant) -> Self {
        Self {
            input_buffer: None,
            input_time: None,
            output_buffer: Some(buffer),
            output_time: Some(time),
        }
    }

    /// Frames in whichever buffer is populated
    pub fn size_frames(&self) -> usize {
        self.input_buffer
            .as_ref()
            .or(self.output_buffer.as_ref())
            .map_or(0, SampleBufferView::size_frames)
    }
}
