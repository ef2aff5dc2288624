pub mod buffer;
pub mod format;
pub mod frame;
pub mod grabber;
pub(crate) mod properties;
pub mod video_frame;

pub use buffer::{FrameBufferManager, FrameShape, FrameView};
pub use format::{bytes_per_pixel, map_format, CopyOptions, FramePixelFormat};
pub use frame::{Frame, FrameMetadata};
pub use grabber::FrameGrabber;
pub use video_frame::VideoFrameRef;
