//! 运行时错误.

use std::path::PathBuf;

/// 读写数据、调用模型或计算时的运行时错误.
#[derive(Debug, thiserror::Error)]
pub enum ImcError {
    /// 底层 I/O 错误.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV 读写错误.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TIFF 编解码错误.
    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// PNG 等栅格图像编码错误.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// `.npy` 写出错误.
    #[error("npy error: {0}")]
    Npy(#[from] ndarray_npy::WriteNpyError),

    /// 绘图后端错误.
    #[error("plotting error: {0}")]
    Plot(String),

    /// 数组形状不符合要求.
    #[error("shape error: {0}")]
    Shape(String),

    /// 表格缺少必需的列.
    #[error("missing column `{0}`")]
    MissingColumn(String),

    /// 表格某列的取值无法解析.
    #[error("invalid value `{value}` in column `{column}`")]
    InvalidValue {
        /// 列名.
        column: String,
        /// 原始取值.
        value: String,
    },

    /// 必需的输入文件不存在.
    #[error("missing file `{}`", .0.display())]
    MissingFile(PathBuf),

    /// 没有任何通道满足选择条件.
    #[error("no channel matches `{0}`")]
    NoChannels(String),

    /// 不支持的参数组合.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// 外部分割模型运行失败.
    #[error("model error: {0}")]
    Model(String),

    /// HDF5 读写错误.
    #[cfg(feature = "ilastik")]
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

impl From<ndarray::ShapeError> for ImcError {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value.to_string())
    }
}

/// 运行时结果.
pub type ImcResult<T> = Result<T, ImcError>;

/// 把 plotters 绘图错误转换为 [`ImcError::Plot`].
pub(crate) fn plot_err<E: std::fmt::Display>(e: E) -> ImcError {
    ImcError::Plot(e.to_string())
}
