//! 多通道图像栈、分割掩膜、通道标签及其文件格式.

mod channel;
mod mask;
mod matrix;
mod save;
mod stack;
pub mod tiff_io;
mod window;

pub use channel::{align_channels_by_name, ChannelExclude, ChannelLabel, ChannelLabels};
pub use mask::{CompactMask, Mask};
pub use matrix::LabeledMatrix;
pub use save::{mask_to_rgb, ImgWriteVis};
pub use stack::{Reduce, Stack};
pub use window::DisplayWindow;

pub(crate) use mask::resize_nearest;
pub(crate) use matrix::{fmt_value, nan_mean};
pub(crate) use save::{auto_window, object_color, to_gray};
