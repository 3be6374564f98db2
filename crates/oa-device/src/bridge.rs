//! Adapts raw backend periods to typed I/O callbacks
//!
//! The backend hands over untyped interleaved bytes. The bridge reinterprets
//! them in place as samples of the connected type, wraps them in a
//! [`SampleBufferView`], and invokes the user callback with a [`DeviceIo`]
//! populated for the device direction. Nothing here allocates or logs, so it
//! is safe on the real-time thread.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use oa_buffer::{DeviceIo, Sample, SampleBufferView};

use crate::backend::RawCallback;
use crate::types::{DeviceInfo, Direction};

/// User I/O callback for samples of type `T`
pub type IoCallback<T> = Box<dyn FnMut(&DeviceInfo, &mut DeviceIo<'_, T>) + Send>;

/// Whole frames in a byte buffer. Trailing partial frames are ignored.
pub fn frame_count(byte_len: usize, channels: usize, sample_size: usize) -> usize {
    byte_len
        .checked_div(channels.saturating_mul(sample_size))
        .unwrap_or(0)
}

/// Typed callback bound to one device
pub struct CallbackBridge<T: Sample> {
    device: DeviceInfo,
    channels: usize,
    callback: IoCallback<T>,
    dropped: Arc<AtomicU64>,
}

impl<T: Sample> CallbackBridge<T> {
    pub fn new(
        device: DeviceInfo,
        channels: usize,
        callback: IoCallback<T>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            device,
            channels,
            callback,
            dropped,
        }
    }

    /// Run the callback over one period, returning the frames delivered.
    ///
    /// Output periods are reset to silence first so a callback that writes
    /// nothing renders nothing. A buffer not aligned for `T` is counted as
    /// dropped and left untouched.
    pub fn deliver(&mut self, bytes: &mut [u8]) -> usize {
        let sample_size = std::mem::size_of::<T>();
        let frames = frame_count(bytes.len(), self.channels, sample_size);
        let used = frames * self.channels * sample_size;

        let samples: &mut [T] = match bytemuck::try_cast_slice_mut(&mut bytes[..used]) {
            Ok(samples) => samples,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let now = Instant::now();
        let mut io = match self.device.direction {
            Direction::Input => {
                DeviceIo::capture(SampleBufferView::from_interleaved(samples, self.channels), now)
            }
            Direction::Output => {
                samples.fill(T::EQUILIBRIUM);
                DeviceIo::render(SampleBufferView::from_interleaved(samples, self.channels), now)
            }
        };
        (self.callback)(&self.device, &mut io);
        frames
    }

    /// Erase the sample type for handing to a backend
    pub fn into_raw(mut self) -> RawCallback {
        Box::new(move |bytes: &mut [u8]| {
            self.deliver(bytes);
        })
    }
}

/// Byte buffer aligned for any native sample type
#[derive(Debug, Clone, Default)]
pub struct AlignedBytes {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBytes {
    pub fn with_len(len: usize) -> Self {
        let mut bytes = Self::default();
        bytes.set_len(len);
        bytes
    }

    /// Resize, zeroing any newly exposed bytes
    pub fn set_len(&mut self, len: usize) {
        let words = len.div_ceil(std::mem::size_of::<u64>());
        if words > self.words.len() {
            self.words.resize(words, 0);
        }
        if len > self.len {
            let old = self.len;
            self.len = len;
            self.as_mut_bytes()[old..].fill(0);
        } else {
            self.len = len;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice::<u64, u8>(&self.words)[..self.len]
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut::<u64, u8>(&mut self.words)[..self.len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;
    use parking_lot::Mutex;

    fn device(direction: Direction) -> DeviceInfo {
        DeviceInfo {
            id: DeviceId(3),
            name: "test device".to_string(),
            direction,
        }
    }

    #[test]
    fn test_frame_count_floors_partial_frames() {
        assert_eq!(frame_count(10, 2, 2), 2);
        assert_eq!(frame_count(16, 2, 4), 2);
        assert_eq!(frame_count(3, 1, 4), 0);
        assert_eq!(frame_count(64, 0, 4), 0);
    }

    #[test]
    fn test_output_period_prefilled_with_silence() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: IoCallback<u8> = Box::new(move |_: &DeviceInfo, io: &mut DeviceIo<'_, u8>| {
            let out = io.output_buffer.as_ref().unwrap();
            sink.lock().extend_from_slice(out.as_slice().unwrap());
        });
        let mut bridge = CallbackBridge::new(
            device(Direction::Output),
            2,
            callback,
            Arc::new(AtomicU64::new(0)),
        );

        let mut bytes = vec![0xFFu8; 6];
        assert_eq!(bridge.deliver(&mut bytes), 3);
        assert_eq!(*seen.lock(), vec![128u8; 6]);
    }

    #[test]
    fn test_output_writes_reach_backend_bytes() {
        let callback: IoCallback<f32> = Box::new(|info: &DeviceInfo, io: &mut DeviceIo<'_, f32>| {
            assert_eq!(info.name, "test device");
            assert!(io.input_buffer.is_none());
            assert!(io.output_time.is_some());
            io.output_buffer.as_mut().unwrap().fill(0.5);
        });
        let mut bridge = CallbackBridge::new(
            device(Direction::Output),
            2,
            callback,
            Arc::new(AtomicU64::new(0)),
        );

        // 4 frames of stereo f32 plus 3 trailing bytes
        let mut buffer = AlignedBytes::with_len(35);
        assert_eq!(bridge.deliver(buffer.as_mut_bytes()), 4);

        let bytes = buffer.as_bytes();
        let samples: &[f32] = bytemuck::cast_slice(&bytes[..32]);
        assert!(samples.iter().all(|&s| s == 0.5));
        assert_eq!(&bytes[32..], &[0, 0, 0]);
    }

    #[test]
    fn test_input_populates_capture_slot() {
        let frames = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&frames);
        let callback: IoCallback<i16> = Box::new(move |_: &DeviceInfo, io: &mut DeviceIo<'_, i16>| {
            assert!(io.output_buffer.is_none());
            assert!(io.input_time.is_some());
            let input = io.input_buffer.as_ref().unwrap();
            *sink.lock() = Some((input.size_frames(), input[(1, 0)]));
        });
        let mut bridge = CallbackBridge::new(
            device(Direction::Input),
            2,
            callback,
            Arc::new(AtomicU64::new(0)),
        );

        let mut buffer = AlignedBytes::with_len(8);
        buffer
            .as_mut_bytes()
            .copy_from_slice(bytemuck::cast_slice(&[1i16, -7, 2, 9]));
        bridge.deliver(buffer.as_mut_bytes());
        assert_eq!(*frames.lock(), Some((2, -7)));
    }

    #[test]
    fn test_misaligned_period_is_dropped() {
        let called = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&called);
        let callback: IoCallback<f32> = Box::new(move |_: &DeviceInfo, _: &mut DeviceIo<'_, f32>| {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let dropped = Arc::new(AtomicU64::new(0));
        let mut bridge =
            CallbackBridge::new(device(Direction::Output), 1, callback, Arc::clone(&dropped));

        let mut buffer = AlignedBytes::with_len(17);
        assert_eq!(bridge.deliver(&mut buffer.as_mut_bytes()[1..]), 0);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_raw_callback_delivers() {
        let callback: IoCallback<i32> = Box::new(|_: &DeviceInfo, io: &mut DeviceIo<'_, i32>| {
            io.output_buffer.as_mut().unwrap().fill(42);
        });
        let bridge = CallbackBridge::new(
            device(Direction::Output),
            1,
            callback,
            Arc::new(AtomicU64::new(0)),
        );
        let mut raw = bridge.into_raw();

        let mut buffer = AlignedBytes::with_len(8);
        raw(buffer.as_mut_bytes());
        let samples: &[i32] = bytemuck::cast_slice(buffer.as_bytes());
        assert_eq!(samples, &[42, 42]);
    }

    #[test]
    fn test_aligned_bytes_resize_zeroes() {
        let mut bytes = AlignedBytes::with_len(4);
        bytes.as_mut_bytes().fill(9);
        bytes.set_len(2);
        bytes.set_len(6);
        assert_eq!(bytes.as_bytes(), &[9, 9, 0, 0, 0, 0]);
        assert_eq!(bytes.as_bytes().as_ptr() as usize % 8, 0);
    }
}
