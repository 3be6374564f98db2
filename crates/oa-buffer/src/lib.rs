//! Sample buffers for oxide-audio
//!
//! [`SampleBufferView`] gives one `(channel, frame)` accessor over the three
//! physical layouts audio APIs hand out, and [`DeviceIo`] packages the views
//! delivered for one hardware period.

pub mod io;
pub mod sample;
pub mod view;

pub use io::DeviceIo;
pub use sample::Sample;
pub use view::{BufferError, BufferLayout, SampleBufferView};
