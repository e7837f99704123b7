//! 细胞分割模型的输入输出适配.
//!
//! 模型本身 (StarDist, DeepCell) 在外部运行; 这里负责挑选通道并均衡直方图,
//! 把输入缩放到模型要求的尺寸, 再把预测结果还原到图像栈的分辨率并保存掩膜.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use log::{info, warn};
use ndarray::{Array3, Axis};

mod model;
mod prepare;

pub use model::{CommandModel, ModelInput, SegmentationModel};
pub use prepare::{equalize_hist, prepare_stack, resize_bilinear};

use crate::consts::DEEPCELL_INPUT_SIDE;
use crate::data::resize_nearest;
use crate::project::{MaskKind, Roi, RoiInput};
use crate::{plot, ChannelExclude, ChannelLabels, ImcError, ImcResult, Mask, Stack};

/// 分割的区域.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Compartment {
    /// 细胞核.
    Nuclear,

    /// 细胞质 (整个细胞).
    Cytoplasm,

    /// 同时分割细胞与细胞核.
    Both,
}

impl Compartment {
    /// 名称.
    pub const fn name(&self) -> &'static str {
        match self {
            Compartment::Nuclear => "nuclear",
            Compartment::Cytoplasm => "cytoplasm",
            Compartment::Both => "both",
        }
    }
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Compartment {
    type Err = ImcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nuclear" => Ok(Compartment::Nuclear),
            "cytoplasm" => Ok(Compartment::Cytoplasm),
            "both" => Ok(Compartment::Both),
            other => Err(ImcError::Unsupported(format!("compartment `{other}`"))),
        }
    }
}

/// 预训练模型的种类.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModelKind {
    /// StarDist, 只能分割细胞核, 在原始分辨率上运行.
    Stardist,

    /// DeepCell Mesmer, 输入固定为 256 × 256.
    Deepcell,
}

impl ModelKind {
    /// 名称.
    pub const fn name(&self) -> &'static str {
        match self {
            ModelKind::Stardist => "stardist",
            ModelKind::Deepcell => "deepcell",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = ImcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stardist" => Ok(ModelKind::Stardist),
            "deepcell" => Ok(ModelKind::Deepcell),
            other => Err(ImcError::Unsupported(format!("model `{other}`"))),
        }
    }
}

/// 分割结果. 掩膜的形状总与图像栈的空间形状一致.
#[derive(Debug, Clone, PartialEq)]
pub struct Segmentation {
    /// 送入模型前的输入, 形状为 (平面, 高, 宽), 原始分辨率.
    pub input: Array3<f32>,

    /// 细胞掩膜.
    pub cell: Option<Mask>,

    /// 细胞核掩膜.
    pub nuclei: Option<Mask>,
}

impl Segmentation {
    /// 所有得到的掩膜.
    pub fn masks(&self) -> impl Iterator<Item = (MaskKind, &Mask)> {
        [(MaskKind::Cell, &self.cell), (MaskKind::Nuclei, &self.nuclei)]
            .into_iter()
            .filter_map(|(k, m)| m.as_ref().map(|m| (k, m)))
    }
}

/// 分割一个图像栈.
///
/// StarDist 只支持 [`Compartment::Nuclear`], 其输入在原分辨率下再做一次直方图均衡.
/// DeepCell 的输入被双线性缩放到
/// 256 × 256, 预测结果再以最近邻缩放回原始尺寸.
pub fn segment_stack<M: SegmentationModel>(
    stack: &Stack,
    labels: &ChannelLabels,
    model: &M,
    kind: ModelKind,
    compartment: Compartment,
    exclude: &ChannelExclude,
) -> ImcResult<Segmentation> {
    if kind == ModelKind::Stardist && compartment != Compartment::Nuclear {
        return Err(ImcError::Unsupported(format!(
            "stardist can only segment the nuclear compartment, not `{compartment}`"
        )));
    }
    let input = prepare_stack(stack, labels, compartment, exclude)?;
    let (h, w) = stack.spatial_shape();

    let planes = match kind {
        ModelKind::Stardist => {
            // 送入 StarDist 前再均衡一次.
            let planes: Vec<_> = input.axis_iter(Axis(0)).map(equalize_hist).collect();
            let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
            ndarray::stack(Axis(0), &views)?
        }
        ModelKind::Deepcell => {
            let side = (DEEPCELL_INPUT_SIDE, DEEPCELL_INPUT_SIDE);
            let resized: Vec<_> = input
                .axis_iter(Axis(0))
                .map(|p| resize_bilinear(p, side))
                .collect();
            let views: Vec<_> = resized.iter().map(|p| p.view()).collect();
            ndarray::stack(Axis(0), &views)?
        }
    };
    let model_input = ModelInput {
        model: kind,
        compartment,
        data: planes.permuted_axes([1, 2, 0]).as_standard_layout().to_owned(),
    };
    let pred = model.predict(&model_input)?;

    let needed = if compartment == Compartment::Both { 2 } else { 1 };
    if pred.dim().2 < needed {
        return Err(ImcError::Model(format!(
            "expected {needed} output plane(s), got {}",
            pred.dim().2
        )));
    }
    let plane = |i: usize| Mask::new(resize_nearest(pred.index_axis(Axis(2), i), (h, w)));
    let (cell, nuclei) = match compartment {
        Compartment::Both => (Some(plane(0)), Some(plane(1))),
        Compartment::Nuclear => (None, Some(plane(0))),
        Compartment::Cytoplasm => (Some(plane(0)), None),
    };
    Ok(Segmentation { input, cell, nuclei })
}

/// [`segment_roi`] 的参数.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOptions {
    /// 是否把掩膜写到 ROI 的输入目录.
    pub save: bool,

    /// 掩膜文件已存在时是否覆盖.
    pub overwrite: bool,

    /// 是否绘制图像与掩膜的对照图.
    pub plot: bool,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            save: true,
            overwrite: false,
            plot: true,
        }
    }
}

/// 绘制分割输入与得到的掩膜.
pub fn plot_segmentation<P: AsRef<Path>>(path: P, seg: &Segmentation) -> ImcResult<()> {
    let names = ["nuclear", "cytoplasm"];
    let images: Vec<(String, _)> = seg
        .input
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, p)| (names.get(i).copied().unwrap_or("input").to_string(), p))
        .collect();
    let masks: Vec<(String, &Mask)> = seg.masks().map(|(k, m)| (k.key().to_string(), m)).collect();
    plot::image_and_masks(path, &images, &masks)
}

/// 分割一个 ROI. 掩膜设置到 ROI 的缓存中, 并按 `opts` 保存和绘图.
///
/// 对照图写在图像栈旁边, 名为 `<roi>_full_segmentation.png`.
pub fn segment_roi<M: SegmentationModel>(
    roi: &mut Roi,
    model: &M,
    kind: ModelKind,
    compartment: Compartment,
    opts: &SegmentOptions,
) -> ImcResult<Segmentation> {
    info!("Segmenting {compartment} compartment of `{}` with {kind}", roi.name());
    let seg = segment_stack(
        roi.stack()?,
        roi.channel_labels()?,
        model,
        kind,
        compartment,
        roi.channel_exclude(),
    )?;

    for (mask_kind, mask) in seg.masks() {
        roi.set_mask(mask_kind, mask)?;
        if !opts.save {
            continue;
        }
        let path = roi.input_path(mask_kind.input());
        if path.exists() && !opts.overwrite {
            warn!("Mask `{}` exists, not overwriting", path.display());
            continue;
        }
        mask.save(&path)?;
    }
    if opts.plot {
        let stack_path = roi.input_path(RoiInput::Stack);
        let path = stack_path.with_file_name(format!("{}_full_segmentation.png", roi.name()));
        plot_segmentation(path, &seg)?;
    }
    Ok(seg)
}
