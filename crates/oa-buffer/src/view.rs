//! Zero-copy multichannel sample view
//!
//! A [`SampleBufferView`] borrows sample memory laid out in one of three ways
//! and resolves a logical `(channel, frame)` index to exactly one sample:
//!
//! - [`BufferLayout::InterleavedContiguous`]: `L0 R0 L1 R1 ...`
//! - [`BufferLayout::DeinterleavedContiguous`]: `L0 L1 ... R0 R1 ...`
//! - [`BufferLayout::PointerPerChannel`]: one separate slice per channel
//!
//! The two contiguous layouts share a strided representation, so access is a
//! two-way match and a multiply-add. Views never allocate and never outlive the
//! memory they borrow.

use std::ops::{Index, IndexMut};

use thiserror::Error;

/// Physical memory layout behind a view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferLayout {
    /// One block, samples of a frame adjacent
    InterleavedContiguous,
    /// One block, samples of a channel adjacent
    DeinterleavedContiguous,
    /// Independent slice per channel
    PointerPerChannel,
}

/// View construction errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("buffer holds {actual} samples but {frames} frames x {channels} channels need {required}")]
    TooShort {
        frames: usize,
        channels: usize,
        required: usize,
        actual: usize,
    },

    #[error("channel {channel} holds {actual} samples but {required} frames are needed")]
    ChannelTooShort {
        channel: usize,
        required: usize,
        actual: usize,
    },

    #[error("{frames} frames x {channels} channels overflows usize")]
    Overflow { frames: usize, channels: usize },
}

#[derive(Debug)]
enum Storage<'a, T> {
    /// Contiguous block addressed as `channel * channel_stride + frame * frame_stride`
    Strided {
        data: &'a mut [T],
        channel_stride: usize,
        frame_stride: usize,
    },
    /// Ordered per-channel spans
    Channels(&'a mut [&'a mut [T]]),
}

/// Non-owning `(channel, frame)` accessor over borrowed sample memory
#[derive(Debug)]
pub struct SampleBufferView<'a, T> {
    layout: BufferLayout,
    frames: usize,
    channels: usize,
    storage: Storage<'a, T>,
}

impl<'a, T> SampleBufferView<'a, T> {
    /// View `frames * channels` interleaved samples at the front of `data`.
    pub fn interleaved(
        data: &'a mut [T],
        frames: usize,
        channels: usize,
    ) -> Result<Self, BufferError> {
        Self::strided(
            data,
            frames,
            channels,
            BufferLayout::InterleavedContiguous,
            1,
            channels,
        )
    }

    /// View `frames * channels` deinterleaved samples at the front of `data`.
    pub fn deinterleaved(
        data: &'a mut [T],
        frames: usize,
        channels: usize,
    ) -> Result<Self, BufferError> {
        Self::strided(
            data,
            frames,
            channels,
            BufferLayout::DeinterleavedContiguous,
            frames,
            1,
        )
    }

    /// View an interleaved slice whose frame count is implied by its length.
    ///
    /// Trailing samples that do not fill a whole frame are left outside the
    /// view. A zero channel count yields an empty view.
    pub fn from_interleaved(data: &'a mut [T], channels: usize) -> Self {
        let frames = data.len().checked_div(channels).unwrap_or(0);
        let data = &mut data[..frames * channels];
        Self {
            layout: BufferLayout::InterleavedContiguous,
            frames,
            channels,
            storage: Storage::Strided {
                data,
                channel_stride: 1,
                frame_stride: channels,
            },
        }
    }

    /// View one slice per channel; every slice must hold at least `frames`
    /// samples.
    pub fn per_channel(channels: &'a mut [&'a mut [T]], frames: usize) -> Result<Self, BufferError> {
        if let Some((channel, span)) = channels
            .iter()
            .enumerate()
            .find(|(_, span)| span.len() < frames)
        {
            return Err(BufferError::ChannelTooShort {
                channel,
                required: frames,
                actual: span.len(),
            });
        }

        Ok(Self {
            layout: BufferLayout::PointerPerChannel,
            frames,
            channels: channels.len(),
            storage: Storage::Channels(channels),
        })
    }

    fn strided(
        data: &'a mut [T],
        frames: usize,
        channels: usize,
        layout: BufferLayout,
        channel_stride: usize,
        frame_stride: usize,
    ) -> Result<Self, BufferError> {
        let required = frames
            .checked_mul(channels)
            .ok_or(BufferError::Overflow { frames, channels })?;
        if data.len() < required {
            return Err(BufferError::TooShort {
                frames,
                channels,
                required,
                actual: data.len(),
            });
        }

        Ok(Self {
            layout,
            frames,
            channels,
            storage: Storage::Strided {
                data: &mut data[..required],
                channel_stride,
                frame_stride,
            },
        })
    }

    /// Physical layout the view was built over
    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    pub fn size_channels(&self) -> usize {
        self.channels
    }

    pub fn size_frames(&self) -> usize {
        self.frames
    }

    pub fn size_samples(&self) -> usize {
        self.channels * self.frames
    }

    /// Whether all samples live in one block
    pub fn is_contiguous(&self) -> bool {
        matches!(self.storage, Storage::Strided { .. })
    }

    /// Whether consecutive frames of a channel are adjacent (stride 1 on the
    /// frame axis)
    pub fn frames_are_contiguous(&self) -> bool {
        matches!(self.storage, Storage::Strided { frame_stride: 1, .. })
    }

    /// Whether the channels of a frame are adjacent (stride 1 on the channel
    /// axis)
    pub fn channels_are_contiguous(&self) -> bool {
        matches!(self.storage, Storage::Strided { channel_stride: 1, .. })
    }

    /// The flat sample block; `None` for per-channel views
    pub fn as_slice(&self) -> Option<&[T]> {
        match &self.storage {
            Storage::Strided { data, .. } => Some(&**data),
            Storage::Channels(_) => None,
        }
    }

    /// The flat sample block; `None` for per-channel views
    pub fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        match &mut self.storage {
            Storage::Strided { data, .. } => Some(&mut **data),
            Storage::Channels(_) => None,
        }
    }

    #[inline]
    pub fn get(&self, channel: usize, frame: usize) -> Option<&T> {
        if channel >= self.channels || frame >= self.frames {
            return None;
        }
        Some(match &self.storage {
            Storage::Strided {
                data,
                channel_stride,
                frame_stride,
            } => &data[channel * channel_stride + frame * frame_stride],
            Storage::Channels(spans) => &spans[channel][frame],
        })
    }

    #[inline]
    pub fn get_mut(&mut self, channel: usize, frame: usize) -> Option<&mut T> {
        if channel >= self.channels || frame >= self.frames {
            return None;
        }
        Some(match &mut self.storage {
            Storage::Strided {
                data,
                channel_stride,
                frame_stride,
            } => &mut data[channel * *channel_stride + frame * *frame_stride],
            Storage::Channels(spans) => &mut spans[channel][frame],
        })
    }
}

impl<T: Copy> SampleBufferView<'_, T> {
    /// Set every sample in the view
    pub fn fill(&mut self, value: T) {
        let frames = self.frames;
        match &mut self.storage {
            Storage::Strided { data, .. } => data.fill(value),
            Storage::Channels(spans) => {
                for span in spans.iter_mut() {
                    span[..frames].fill(value);
                }
            }
        }
    }
}

#[cold]
#[inline(never)]
fn out_of_range(channel: usize, frame: usize, channels: usize, frames: usize) -> ! {
    panic!(
        "sample (channel {channel}, frame {frame}) out of range for {channels} channels x {frames} frames"
    )
}

impl<T> Index<(usize, usize)> for SampleBufferView<'_, T> {
    type Output = T;

    #[inline]
    fn index(&self, (channel, frame): (usize, usize)) -> &T {
        match self.get(channel, frame) {
            Some(sample) => sample,
            None => out_of_range(channel, frame, self.channels, self.frames),
        }
    }
}

impl<T> IndexMut<(usize, usize)> for SampleBufferView<'_, T> {
    #[inline]
    fn index_mut(&mut self, (channel, frame): (usize, usize)) -> &mut T {
        let (channels, frames) = (self.channels, self.frames);
        match self.get_mut(channel, frame) {
            Some(sample) => sample,
            None => out_of_range(channel, frame, channels, frames),
        }
    }
}
