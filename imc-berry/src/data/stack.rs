//! 多通道图像栈.

use std::fmt;
use std::ops::{Index, IndexMut};
use std::path::Path;
use std::str::FromStr;

use ndarray::{Array3, ArrayView2, ArrayView3, ArrayViewMut2, Axis};
use ordered_float::OrderedFloat;

use super::tiff_io;
use crate::{Idx2d, Idx3d, ImcError, ImcResult};

/// 把一组像素值约简为一个数的方式.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Reduce {
    /// 平均值.
    #[default]
    Mean,

    /// 中位数.
    Median,

    /// 最大值.
    Max,

    /// 最小值.
    Min,

    /// 总体标准差.
    Std,

    /// 总和.
    Sum,
}

impl Reduce {
    /// 约简方式的名称, 用于输出文件名和图例.
    pub fn name(&self) -> &'static str {
        match self {
            Reduce::Mean => "mean",
            Reduce::Median => "median",
            Reduce::Max => "max",
            Reduce::Min => "min",
            Reduce::Std => "std",
            Reduce::Sum => "sum",
        }
    }

    /// 约简 `values`. 空输入返回 NaN (`Sum` 除外, 返回 0).
    pub fn apply<I: IntoIterator<Item = f32>>(&self, values: I) -> f64 {
        let it = values.into_iter().map(f64::from);
        match self {
            Reduce::Sum => it.sum(),
            Reduce::Mean => {
                let (n, s) = it.fold((0u64, 0.0), |(n, s), v| (n + 1, s + v));
                if n == 0 {
                    f64::NAN
                } else {
                    s / n as f64
                }
            }
            Reduce::Max => it.fold(f64::NAN, f64::max),
            Reduce::Min => it.fold(f64::NAN, f64::min),
            Reduce::Std => {
                let v: Vec<f64> = it.collect();
                if v.is_empty() {
                    return f64::NAN;
                }
                let mean = v.iter().sum::<f64>() / v.len() as f64;
                let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
                var.sqrt()
            }
            Reduce::Median => {
                let mut v: Vec<OrderedFloat<f64>> = it.map(OrderedFloat).collect();
                if v.is_empty() {
                    return f64::NAN;
                }
                v.sort_unstable();
                let mid = v.len() / 2;
                if v.len() % 2 == 0 {
                    (v[mid - 1].0 + v[mid].0) / 2.0
                } else {
                    v[mid].0
                }
            }
        }
    }
}

impl fmt::Display for Reduce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Reduce {
    type Err = ImcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "mean" => Reduce::Mean,
            "median" => Reduce::Median,
            "max" => Reduce::Max,
            "min" => Reduce::Min,
            "std" => Reduce::Std,
            "sum" => Reduce::Sum,
            other => return Err(ImcError::Unsupported(format!("reduce function `{other}`"))),
        })
    }
}

/// 一个 ROI 的多通道图像栈, 按 (通道, 高, 宽) 组织, 像素值以 `f32` 保存.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    data: Array3<f32>,
}

impl Index<Idx3d> for Stack {
    type Output = f32;

    #[inline]
    fn index(&self, index: Idx3d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx3d> for Stack {
    #[inline]
    fn index_mut(&mut self, index: Idx3d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Stack {
    /// 直接由 (通道, 高, 宽) 数组构建.
    #[inline]
    pub fn new(data: Array3<f32>) -> Self {
        Self { data }
    }

    /// 打开多页 TIFF 格式的图像栈, 每页一个通道.
    pub fn open<P: AsRef<Path>>(path: P) -> ImcResult<Self> {
        tiff_io::read_stack(path).map(Self::new)
    }

    /// 以多页 32 位浮点 TIFF 保存到 `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ImcResult<()> {
        tiff_io::write_stack(path, self.data.view())
    }

    /// 数据形状 (通道, 高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx3d {
        self.data.dim()
    }

    /// 单个通道的形状 (高, 宽).
    #[inline]
    pub fn spatial_shape(&self) -> Idx2d {
        let (_, h, w) = self.shape();
        (h, w)
    }

    /// 通道个数.
    #[inline]
    pub fn len_channels(&self) -> usize {
        self.shape().0
    }

    /// 单个通道的像素个数.
    #[inline]
    pub fn area(&self) -> usize {
        let (h, w) = self.spatial_shape();
        h * w
    }

    /// 获取第 `c` 个通道的视图. 越界时 panic.
    #[inline]
    pub fn channel_at(&self, c: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), c)
    }

    /// 获取第 `c` 个通道的可变视图. 越界时 panic.
    #[inline]
    pub fn channel_at_mut(&mut self, c: usize) -> ArrayViewMut2<'_, f32> {
        self.data.index_axis_mut(Axis(0), c)
    }

    /// 按通道顺序迭代所有通道视图.
    #[inline]
    pub fn channel_iter(&self) -> impl ExactSizeIterator<Item = ArrayView2<'_, f32>> {
        self.data.axis_iter(Axis(0))
    }

    /// 保留 `keep` 中为 `true` 的通道, 得到新的图像栈.
    ///
    /// `keep` 长度必须等于通道个数, 否则程序 panic.
    pub fn select(&self, keep: &[bool]) -> Stack {
        assert_eq!(keep.len(), self.len_channels(), "通道选择长度不符");
        let idx: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter_map(|(i, k)| k.then_some(i))
            .collect();
        Stack::new(self.data.select(Axis(0), &idx))
    }

    /// 对每个通道的全部像素进行约简.
    pub fn reduce(&self, how: Reduce) -> Vec<f64> {
        self.channel_iter()
            .map(|ch| how.apply(ch.iter().copied()))
            .collect()
    }

    /// 对第 `c` 个通道中由 `it` 给出的像素进行约简.
    ///
    /// 如果存在越界索引, 则程序 panic.
    pub fn reduce_at<I: IntoIterator<Item = Idx2d>>(&self, c: usize, it: I, how: Reduce) -> f64 {
        let ch = self.channel_at(c);
        how.apply(it.into_iter().map(|pos| ch[pos]))
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn data(&self) -> ArrayView3<'_, f32> {
        self.data.view()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array3<f32> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Stack {
        Stack::new(Array3::from_shape_fn((2, 2, 3), |(c, h, w)| {
            (c * 100 + h * 3 + w) as f32
        }))
    }

    #[test]
    fn test_reduce_functions() {
        let v = [4.0f32, 1.0, 3.0, 2.0];
        assert_eq!(Reduce::Mean.apply(v), 2.5);
        assert_eq!(Reduce::Median.apply(v), 2.5);
        assert_eq!(Reduce::Median.apply([5.0, 1.0, 3.0]), 3.0);
        assert_eq!(Reduce::Max.apply(v), 4.0);
        assert_eq!(Reduce::Min.apply(v), 1.0);
        assert_eq!(Reduce::Sum.apply(v), 10.0);
        assert!((Reduce::Std.apply(v) - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(Reduce::Mean.apply([]).is_nan());
        assert_eq!(Reduce::Sum.apply([]), 0.0);
    }

    #[test]
    fn test_reduce_parse() {
        assert_eq!("median".parse::<Reduce>().unwrap(), Reduce::Median);
        assert!("mode".parse::<Reduce>().is_err());
    }

    #[test]
    fn test_stack_shape_and_select() {
        let s = ramp();
        assert_eq!(s.shape(), (2, 2, 3));
        assert_eq!(s.spatial_shape(), (2, 3));
        assert_eq!(s.area(), 6);
        let second = s.select(&[false, true]);
        assert_eq!(second.len_channels(), 1);
        assert_eq!(second[(0, 1, 2)], 105.0);
    }

    #[test]
    fn test_stack_reduce() {
        let s = ramp();
        assert_eq!(s.reduce(Reduce::Mean), vec![2.5, 102.5]);
        assert_eq!(s.reduce_at(1, [(0, 0), (1, 2)], Reduce::Sum), 205.0);
    }
}
