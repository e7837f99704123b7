//! ilastik 像素分类模型 (`.ilp`) 的检查与转换.
//!
//! `.ilp` 文件是 HDF5 容器. 训练输入列在 `Input Data/infos/lane0000` 等组中,
//! 训练标注以块的形式存放在 `PixelClassification/LabelSets/labels000/block0000` 等
//! 数据集中, 每个块的 `blockSlice` 属性记录它在训练图像中的位置.
//!
//! 本模块的纯计算部分总是可用; 读写 HDF5 的部分需要 `ilastik` feature.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use ndarray::{s, Array, Array2, Array3, ArrayView3, ArrayViewD, Axis, Dimension, Ix2};

use crate::{Idx2d, ImcError, ImcResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "ilastik")] {
        mod model;
        pub use model::{convert_model_data, extract_training_labels, inspect_model, plot_training_data};
    }
}

/// 第 `i` 个训练输入所在的组名, 例如 `lane0000`.
pub fn lane_name(i: usize) -> String {
    format!("lane{i:04}")
}

/// 第 `i` 个训练输入的标注集组名, 例如 `labels000`.
pub fn label_set_name(i: usize) -> String {
    format!("labels{i:03}")
}

/// 标注集中第 `j` 个块的数据集名, 例如 `block0000`.
pub fn block_name(j: usize) -> String {
    format!("block{j:04}")
}

/// 标注块在训练图像中的位置, 由 `blockSlice` 属性 (如 `[0:10,5:20,0:1]`) 解析得到.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSlice {
    ranges: Vec<Range<usize>>,
}

impl BlockSlice {
    /// 各维的范围.
    #[inline]
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// 前两维 (空间维) 的形状.
    pub fn spatial_shape(&self) -> Idx2d {
        (self.ranges[0].len(), self.ranges[1].len())
    }
}

impl FromStr for BlockSlice {
    type Err = ImcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ImcError::Unsupported(format!("block slice `{s}`"));
        let inner = s
            .trim()
            .strip_prefix('[')
            .and_then(|t| t.strip_suffix(']'))
            .ok_or_else(bad)?;
        let ranges = inner
            .split(',')
            .map(|part| {
                let (a, b) = part.split_once(':').ok_or_else(bad)?;
                let a: usize = a.trim().parse().map_err(|_| bad())?;
                let b: usize = b.trim().parse().map_err(|_| bad())?;
                if a > b {
                    return Err(bad());
                }
                Ok(a..b)
            })
            .collect::<ImcResult<Vec<_>>>()?;
        if ranges.len() < 2 {
            return Err(bad());
        }
        Ok(Self { ranges })
    }
}

impl fmt::Display for BlockSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.ranges.iter().map(|r| format!("{}:{}", r.start, r.end)).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// 把标注块拼成形状为 `shape` 的标注图. 未被任何块覆盖的像素为 0 (未标注).
///
/// 每个块去掉长度为 1 的多余维后须为二维, 且与其 `blockSlice` 的空间形状一致.
pub fn assemble_labels(shape: Idx2d, blocks: &[(BlockSlice, ArrayViewD<'_, u8>)]) -> ImcResult<Array2<u8>> {
    let mut out = Array2::zeros(shape);
    for (slice, block) in blocks {
        let (r0, r1) = (&slice.ranges[0], &slice.ranges[1]);
        if r0.end > shape.0 || r1.end > shape.1 {
            return Err(ImcError::Shape(format!(
                "block {slice} outside of a {shape:?} training image"
            )));
        }
        let mut block = block.view();
        while block.ndim() > 2 {
            let Some(ax) = (0..block.ndim()).rev().find(|&i| block.len_of(Axis(i)) == 1) else {
                break;
            };
            block = block.index_axis_move(Axis(ax), 0);
        }
        let block = block
            .into_dimensionality::<Ix2>()
            .map_err(|_| ImcError::Shape(format!("block {slice} is not two-dimensional")))?;
        if block.dim() != slice.spatial_shape() {
            return Err(ImcError::Shape(format!(
                "block of shape {:?} does not match {slice}",
                block.dim()
            )));
        }
        out.slice_mut(s![r0.clone(), r1.clone()]).assign(&block);
    }
    Ok(out)
}

/// 最小-最大归一化到 `[0, 1]`. 非有限值与常数数组映射为 0.
pub fn normalize<D: Dimension>(arr: &Array<f32, D>) -> Array<f32, D> {
    let (lo, hi) = arr
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(hi > lo) {
        return Array::zeros(arr.raw_dim());
    }
    arr.mapv(|v| if v.is_finite() { (v - lo) / (hi - lo) } else { 0.0 })
}

/// 绘制训练图像时如何把多个通道合为一幅.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum ChannelReduction {
    /// 归一化后对通道取平均.
    #[default]
    Mean,

    /// 只取最后一个通道.
    Last,
}

impl ChannelReduction {
    /// 名称.
    pub const fn name(&self) -> &'static str {
        match self {
            ChannelReduction::Mean => "mean",
            ChannelReduction::Last => "last",
        }
    }
}

impl fmt::Display for ChannelReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChannelReduction {
    type Err = ImcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(ChannelReduction::Mean),
            "last" => Ok(ChannelReduction::Last),
            other => Err(ImcError::Unsupported(format!("channel reduction `{other}`"))),
        }
    }
}

/// 由形状为 (高, 宽, 通道) 的训练输入得到一幅用于展示的图像.
pub fn training_image(stacked: ArrayView3<'_, f32>, how: ChannelReduction) -> ImcResult<Array2<f32>> {
    let n = stacked.len_of(Axis(2));
    if n == 0 {
        return Err(ImcError::NoChannels("training input".to_string()));
    }
    Ok(match how {
        ChannelReduction::Mean => normalize(&stacked.to_owned())
            .mean_axis(Axis(2))
            .unwrap_or_else(|| Array2::zeros((stacked.dim().0, stacked.dim().1))),
        ChannelReduction::Last => normalize(&stacked.index_axis(Axis(2), n - 1).to_owned()),
    })
}

/// 保留训练输入的部分通道并归一化. 负数下标从末尾计数, `-1` 为最后一个通道.
pub fn retain_channels(stacked: ArrayView3<'_, f32>, channels: &[isize]) -> ImcResult<Array3<f32>> {
    let n = stacked.len_of(Axis(2)) as isize;
    let idx = channels
        .iter()
        .map(|&c| {
            let i = if c < 0 { n + c } else { c };
            if (0..n).contains(&i) {
                Ok(i as usize)
            } else {
                Err(ImcError::Shape(format!("channel {c} out of range for {n} channels")))
            }
        })
        .collect::<ImcResult<Vec<_>>>()?;
    if idx.is_empty() {
        return Err(ImcError::NoChannels("no channel to retain".to_string()));
    }
    Ok(normalize(&stacked.select(Axis(2), &idx)))
}

/// 模型概况.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    /// 训练输入的文件路径 (或模型内部数据集路径).
    pub training_files: Vec<String>,

    /// 特征名 (矩阵的行).
    pub features: Vec<String>,

    /// 高斯尺度 (矩阵的列).
    pub scales: Vec<f64>,

    /// 特征选择矩阵.
    pub selection: Array2<bool>,

    /// 每个训练输入的标注块数.
    pub label_blocks: Vec<usize>,
}

impl ModelSummary {
    /// 训练输入个数.
    #[inline]
    pub fn n_inputs(&self) -> usize {
        self.training_files.len()
    }

    /// 使用的 (特征, 尺度) 组合数与全部组合数.
    pub fn features_used(&self) -> (usize, usize) {
        (self.selection.iter().filter(|&&b| b).count(), self.selection.len())
    }

    /// 有标注的训练输入个数.
    pub fn n_labeled(&self) -> usize {
        self.label_blocks.iter().filter(|&&n| n > 0).count()
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Model was trained with {} files.", self.n_inputs())?;
        let (used, total) = self.features_used();
        writeln!(f, "{used}/{total} of the possible feature combinations used.")?;
        let width = self.features.iter().map(String::len).max().unwrap_or(0).max(7);
        write!(f, "{:width$}", "Feature")?;
        for s in &self.scales {
            write!(f, " {s:>6.2}")?;
        }
        writeln!(f)?;
        for (name, row) in self.features.iter().zip(self.selection.outer_iter()) {
            write!(f, "{name:width$}")?;
            for &b in row.iter() {
                write!(f, " {:>6}", if b { "x" } else { "." })?;
            }
            writeln!(f)?;
        }
        write!(f, "{}/{} of the input files were labeled.", self.n_labeled(), self.n_inputs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3, ArrayD, IxDyn};

    #[test]
    fn test_names() {
        assert_eq!(lane_name(3), "lane0003");
        assert_eq!(label_set_name(12), "labels012");
        assert_eq!(block_name(0), "block0000");
    }

    #[test]
    fn test_parse_block_slice() {
        let b: BlockSlice = "[0:10,5:20,0:1]".parse().unwrap();
        assert_eq!(b.ranges(), &[0..10, 5..20, 0..1]);
        assert_eq!(b.spatial_shape(), (10, 15));
        assert_eq!(b.to_string(), "[0:10,5:20,0:1]");
        assert!("0:10,5:20".parse::<BlockSlice>().is_err());
        assert!("[0:10]".parse::<BlockSlice>().is_err());
        assert!("[3:1,0:2]".parse::<BlockSlice>().is_err());
    }

    #[test]
    fn test_assemble_labels() {
        let a = ArrayD::from_elem(IxDyn(&[2, 3, 1]), 1u8);
        let b = ArrayD::from_elem(IxDyn(&[1, 2, 1]), 2u8);
        let blocks = vec![
            ("[0:2,0:3,0:1]".parse().unwrap(), a.view()),
            ("[3:4,2:4,0:1]".parse().unwrap(), b.view()),
        ];
        let out = assemble_labels((4, 4), &blocks).unwrap();
        assert_eq!(out, arr2(&[[1, 1, 1, 0], [1, 1, 1, 0], [0, 0, 0, 0], [0, 0, 2, 2]]));

        let outside = vec![("[3:5,0:3,0:1]".parse().unwrap(), a.view())];
        assert!(assemble_labels((4, 4), &outside).is_err());
        let mismatch = vec![("[0:3,0:3,0:1]".parse().unwrap(), a.view())];
        assert!(assemble_labels((4, 4), &mismatch).is_err());
    }

    #[test]
    fn test_normalize() {
        let a = arr2(&[[1.0f32, 3.0], [f32::NAN, 5.0]]);
        assert_eq!(normalize(&a), arr2(&[[0.0, 0.5], [0.0, 1.0]]));
        assert_eq!(normalize(&arr2(&[[2.0f32, 2.0]])), arr2(&[[0.0, 0.0]]));
    }

    #[test]
    fn test_training_image_and_retain() {
        let x = Array3::from_shape_fn((2, 2, 3), |(h, w, c)| (c * 4 + h * 2 + w) as f32);
        let last = training_image(x.view(), ChannelReduction::Last).unwrap();
        assert_eq!(last, arr2(&[[0.0, 1.0 / 3.0], [2.0 / 3.0, 1.0]]));
        let mean = training_image(x.view(), ChannelReduction::Mean).unwrap();
        assert_eq!(mean.dim(), (2, 2));
        assert!(mean[(0, 0)] < mean[(1, 1)]);

        let kept = retain_channels(x.view(), &[-1, 0]).unwrap();
        assert_eq!(kept.dim(), (2, 2, 2));
        assert_eq!(kept[(1, 1, 0)], 1.0);
        assert_eq!(kept[(0, 0, 1)], 0.0);
        assert!(retain_channels(x.view(), &[3]).is_err());
        assert!(retain_channels(x.view(), &[-4]).is_err());
    }

    #[test]
    fn test_summary_display() {
        let s = ModelSummary {
            training_files: vec!["a.h5/stacked_channels".into(), "b.h5/stacked_channels".into()],
            features: vec!["GaussianSmoothing".into(), "LaplacianOfGaussian".into()],
            scales: vec![0.3, 1.0],
            selection: arr2(&[[true, true], [false, true]]),
            label_blocks: vec![3, 0],
        };
        assert_eq!(s.features_used(), (3, 4));
        assert_eq!(s.n_labeled(), 1);
        let text = s.to_string();
        assert!(text.contains("3/4 of the possible"));
        assert!(text.ends_with("1/2 of the input files were labeled."));
    }
}
