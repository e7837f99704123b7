//! 🍇欢迎光临🍓
//!
//! 涵盖了本 crate 一系列常用的功能.

pub use crate::{Idx2d, Idx3d};

pub use crate::data::{
    ChannelExclude, ChannelLabel, ChannelLabels, DisplayWindow, ImgWriteVis, LabeledMatrix, Mask,
    Reduce, Stack,
};

pub use crate::error::{ImcError, ImcResult};

pub use crate::consts::mask::{is_background, is_object, BACKGROUND};

pub use crate::dataset::{self, home_imc_dir_with, stack_loader};

pub use crate::project::{
    CellKey, Clusters, MaskKind, Project, ProjectConfig, ProjectInput, Roi, RoiInput, Sample,
    Selection,
};

pub use crate::ops::{AdjacencyOptions, CellTable, ClusterOptions, ComparisonOptions};

pub use crate::segmentation::{
    segment_roi, segment_stack, CommandModel, Compartment, ModelKind, SegmentOptions,
    SegmentationModel,
};
