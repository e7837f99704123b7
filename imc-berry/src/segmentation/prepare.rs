//! 分割模型输入的准备: 通道挑选、直方图均衡与缩放.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use regex::Regex;

use super::Compartment;
use crate::consts::pattern::{NON_CYTOPLASM_CHANNELS, NUCLEAR_CHANNELS};
use crate::consts::HISTOGRAM_BINS;
use crate::{ChannelExclude, ChannelLabels, Idx2d, ImcError, ImcResult, Stack};

/// 直方图均衡, 输出位于 `[0, 1]`.
///
/// 在 `[min, max]` 上做 256 分箱直方图, 以归一化累积分布在各箱中心之间线性插值.
/// 常数图像的取值范围扩展为 `[v - 0.5, v + 0.5]`.
pub fn equalize_hist(img: ArrayView2<'_, f32>) -> Array2<f32> {
    let (lo, hi) = img
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return Array2::zeros(img.dim());
    }
    let (lo, hi) = if lo == hi { (lo - 0.5, hi + 0.5) } else { (lo, hi) };
    let (lo, hi) = (f64::from(lo), f64::from(hi));
    let n = HISTOGRAM_BINS;
    let step = (hi - lo) / n as f64;

    let mut hist = vec![0u64; n];
    for &v in img.iter().filter(|v| v.is_finite()) {
        let b = ((f64::from(v) - lo) / step) as usize;
        hist[b.min(n - 1)] += 1;
    }
    let total: u64 = hist.iter().sum();
    let mut acc = 0;
    let cdf: Vec<f64> = hist
        .iter()
        .map(|&h| {
            acc += h;
            acc as f64 / total as f64
        })
        .collect();

    img.mapv(|v| {
        if !v.is_finite() {
            return 0.0;
        }
        // 箱中心 i 位于 lo + (i + 0.5) * step.
        let x = (f64::from(v) - lo) / step - 0.5;
        if x <= 0.0 {
            return cdf[0] as f32;
        }
        let i = x.floor() as usize;
        if i >= n - 1 {
            return cdf[n - 1] as f32;
        }
        let t = x - i as f64;
        (cdf[i] * (1.0 - t) + cdf[i + 1] * t) as f32
    })
}

/// 双线性缩放到 `(h, w)`.
///
/// 浮点图像在缩放时会被截断到 `[0, 1]`, 因此先按取值范围归一化, 缩放后再还原.
pub fn resize_bilinear(img: ArrayView2<'_, f32>, (h, w): Idx2d) -> Array2<f32> {
    let (ih, iw) = img.dim();
    if (ih, iw) == (h, w) {
        return img.to_owned();
    }
    let (lo, hi) = img
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let scale = if hi > lo { hi - lo } else { 1.0 };
    let lo = if lo.is_finite() { lo } else { 0.0 };

    let raw: Vec<f32> = img.iter().map(|&v| (v - lo) / scale).collect();
    let Some(buf) = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(iw as u32, ih as u32, raw) else {
        return Array2::zeros((h, w));
    };
    let out = imageops::resize(&buf, w as u32, h as u32, FilterType::Triangle);
    Array2::from_shape_vec((h, w), out.into_raw())
        .map(|a| a.mapv(|v| v * scale + lo))
        .unwrap_or_else(|_| Array2::zeros((h, w)))
}

fn pattern(p: &str) -> ImcResult<Regex> {
    Regex::new(p).map_err(|e| ImcError::Unsupported(e.to_string()))
}

/// 均衡后取平均. 没有选中任何通道时返回 [`ImcError::NoChannels`].
fn mean_of_equalized(stack: &Stack, keep: &[bool], what: &str) -> ImcResult<Array2<f32>> {
    let mut acc = Array2::<f32>::zeros(stack.spatial_shape());
    let mut n = 0;
    for (c, _) in keep.iter().enumerate().filter(|&(_, &k)| k) {
        acc += &equalize_hist(stack.channel_at(c));
        n += 1;
    }
    if n == 0 {
        return Err(ImcError::NoChannels(what.to_string()));
    }
    acc /= n as f32;
    Ok(acc)
}

/// 准备分割输入, 结果形状为 (平面, 高, 宽).
///
/// 先删去 `exclude` 排除的通道. 核图像为标签含 `DNA` 的通道均衡后的平均,
/// 细胞质图像为标签不匹配 `DNA|Ki67|SMA` 的通道均衡后的平均;
/// [`Compartment::Both`] 依次给出核与细胞质两个平面.
pub fn prepare_stack(
    stack: &Stack,
    labels: &ChannelLabels,
    compartment: Compartment,
    exclude: &ChannelExclude,
) -> ImcResult<Array3<f32>> {
    if labels.len() != stack.len_channels() {
        return Err(ImcError::Shape(format!(
            "{} channel labels for a stack of {} channels",
            labels.len(),
            stack.len_channels()
        )));
    }
    let keep = exclude.keep(labels);
    let stack = stack.select(&keep);
    let labels = labels.select(&keep);

    let nuclear = || {
        let m = labels.matching(&pattern(NUCLEAR_CHANNELS)?);
        mean_of_equalized(&stack, &m, NUCLEAR_CHANNELS)
    };
    let cytoplasm = || {
        let m: Vec<bool> = labels
            .matching(&pattern(NON_CYTOPLASM_CHANNELS)?)
            .into_iter()
            .map(|x| !x)
            .collect();
        mean_of_equalized(&stack, &m, &format!("not {NON_CYTOPLASM_CHANNELS}"))
    };

    let planes = match compartment {
        Compartment::Nuclear => vec![nuclear()?],
        Compartment::Cytoplasm => vec![cytoplasm()?],
        Compartment::Both => vec![nuclear()?, cytoplasm()?],
    };
    let views: Vec<ArrayView2<'_, f32>> = planes.iter().map(|p| p.view()).collect();
    Ok(ndarray::stack(Axis(0), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    #[test]
    fn test_equalize_uniform_ramp() {
        let img = Array2::from_shape_fn((16, 16), |(h, w)| (h * 16 + w) as f32);
        let eq = equalize_hist(img.view());
        assert!(eq.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert_eq!(eq[(15, 15)], 1.0);
        // 均匀分布下, 均衡结果近似恒等.
        assert!((eq[(8, 0)] - 0.5).abs() < 0.01);
        // 单调.
        assert!(eq.iter().zip(eq.iter().skip(1)).all(|(a, b)| a <= b));
    }

    #[test]
    fn test_equalize_constant() {
        let img = Array2::from_elem((3, 3), 7.0f32);
        let eq = equalize_hist(img.view());
        assert!(eq.iter().all(|&v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resize_bilinear_shape() {
        let img = arr2(&[[0.0f32, 1.0], [2.0, 3.0]]);
        let big = resize_bilinear(img.view(), (5, 7));
        assert_eq!(big.dim(), (5, 7));
        assert!(big.iter().all(|&v| (-1e-4..=3.0001).contains(&v)));
        assert!(big.iter().any(|&v| v > 1.5));
        assert_eq!(resize_bilinear(img.view(), (2, 2)), img);
    }

    fn stack() -> (Stack, ChannelLabels) {
        let data = Array3::from_shape_fn((4, 4, 4), |(c, h, w)| ((c + 1) * (h * 4 + w)) as f32);
        let labels = ChannelLabels::new(["DNA1(Ir191)", "DNA2(Ir193)", "CD45(Sm152)", "Ki67(Er168)"]);
        (Stack::new(data), labels)
    }

    #[test]
    fn test_prepare_both() {
        let (s, l) = stack();
        let p = prepare_stack(&s, &l, Compartment::Both, &ChannelExclude::none()).unwrap();
        assert_eq!(p.dim(), (2, 4, 4));
        // 同一位置上各通道的排名相同, 均衡结果一致.
        let (n, c) = (p.index_axis(Axis(0), 0), p.index_axis(Axis(0), 1));
        assert!(n.iter().zip(c.iter()).all(|(a, b)| (a - b).abs() < 1e-5));
    }

    #[test]
    fn test_prepare_no_channels() {
        let (s, l) = stack();
        let res = prepare_stack(&s, &l, Compartment::Nuclear, &ChannelExclude::from_patterns("DNA"));
        assert!(matches!(res, Err(ImcError::NoChannels(_))));
        let res = prepare_stack(&s, &l, Compartment::Cytoplasm, &ChannelExclude::from_patterns("CD45"));
        assert!(matches!(res, Err(ImcError::NoChannels(_))));
    }
}
