#![warn(missing_docs)] // <= 合适时移除它.
// #![warn(clippy::missing_docs_in_private_items)]  // <= too strict.

//! 核心库. 提供成像质谱流式 (Imaging Mass Cytometry, IMC) 项目的结构化信息,
//! 细胞分割模型的输入输出适配, 以及单细胞定量、聚类与组间比较.
//!
//! 该 crate 目前仅提供 `safe` 接口.
//!
//! # 注意
//!
//! 1. 该 crate 按照 IMC 预处理流程的目录约定组织数据
//!   (`processed/<sample>/tiffs/<roi>_full.tiff` 等), 没有对其它布局做直接适配.
//! 2. 分割模型 (StarDist, DeepCell) 本身不在本 crate 内实现,
//!   本 crate 只负责准备模型输入、调用外部模型、以及把预测结果还原到原始分辨率.
//! 3. 调用者违反接口约定 (例如传入形状不一致的数组) 时程序会直接 panic;
//!   数据文件缺失或格式错误则通过 [`ImcError`] 返回.
//!
//! # 开发计划
//!
//! ### 项目/样本/ROI 建模 ✅
//!
//! 从元数据 CSV 出发, 按给定列分组得到样本, 每个样本再按目录约定发现其 ROI.
//!
//! 实现位于 `imc-berry/src/project`.
//!
//! ### 多通道 TIFF 栈与分割掩膜的读写 ✅
//!
//! 实现位于 `imc-berry/src/data`.
//!
//! ### 分割模型适配 ✅
//!
//! 通道挑选、直方图均衡、缩放到模型输入尺寸、还原预测结果.
//!
//! 实现位于 `imc-berry/src/segmentation`.
//!
//! ### 单细胞定量、聚类、邻接与组间比较 ✅
//!
//! 实现位于 `imc-berry/src/ops`.
//!
//! ### 诊断图 ✅
//!
//! 统计图以 SVG 输出, 图像类面板以 PNG 输出.
//!
//! 实现位于 `imc-berry/src/plot`.
//!
//! ### ilastik 模型检查与转换 ✅
//!
//! 需要 `ilastik` feature (依赖系统 HDF5 库).
//!
//! 实现位于 `imc-berry/src/ilastik`.

/// 二维索引 (高, 宽), 同时也可一定程度上用作非负整数向量.
pub type Idx2d = (usize, usize);

/// 三维索引 (通道, 高, 宽).
pub type Idx3d = (usize, usize, usize);

type Area2d = Vec<Idx2d>;

/// 多通道图像栈、掩膜、通道标签等基础数据结构.
mod data;

pub use data::{
    align_channels_by_name, mask_to_rgb, ChannelExclude, ChannelLabel, ChannelLabels,
    CompactMask, DisplayWindow, ImgWriteVis, LabeledMatrix, Mask, Reduce, Stack,
};

pub use data::tiff_io;

pub mod consts;
pub mod dataset;
pub mod error;
pub mod ilastik;
pub mod ops;
pub mod plot;
pub mod prelude;
pub mod project;
pub mod segmentation;

pub use error::{ImcError, ImcResult};
