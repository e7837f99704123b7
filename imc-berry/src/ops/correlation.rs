use std::collections::HashMap;

use log::info;
use ndarray::Array2;

use super::{par_map, stats::pearson};
use crate::project::Roi;
use crate::{ChannelExclude, ImcResult, LabeledMatrix};

/// 单个 ROI 内, 通道两两之间的像素级 Pearson 相关系数. 行列均为标记物名称.
pub fn correlate_channels(roi: &Roi) -> ImcResult<LabeledMatrix> {
    let stack = roi.stack()?;
    let names = roi.channel_names()?;
    let c = stack.len_channels();
    let mut values = Array2::from_elem((c, c), f64::NAN);
    for i in 0..c {
        values[(i, i)] = 1.0;
        for j in 0..i {
            let r = pearson(
                stack
                    .channel_at(i)
                    .iter()
                    .zip(stack.channel_at(j).iter())
                    .map(|(&x, &y)| (f64::from(x), f64::from(y))),
            );
            values[(i, j)] = r;
            values[(j, i)] = r;
        }
    }
    Ok(LabeledMatrix::new(names.clone(), names, values))
}

/// 按名称累加 `(行, 列) → 平均值`, 保持名称首次出现顺序.
#[derive(Default)]
struct NameMeans {
    order: Vec<String>,
    index: HashMap<String, usize>,
    sums: HashMap<(usize, usize), (f64, usize)>,
}

impl NameMeans {
    fn idx(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        self.order.push(name.to_string());
        self.index.insert(name.to_string(), self.order.len() - 1);
        self.order.len() - 1
    }

    fn add(&mut self, row: &str, col: &str, v: f64) {
        if v.is_nan() {
            return;
        }
        let key = (self.idx(row), self.idx(col));
        let e = self.sums.entry(key).or_insert((0.0, 0));
        e.0 += v;
        e.1 += 1;
    }

    fn into_matrix(self) -> LabeledMatrix {
        let n = self.order.len();
        let mut values = Array2::from_elem((n, n), f64::NAN);
        for ((i, j), (s, k)) in self.sums {
            values[(i, j)] = s / k as f64;
        }
        LabeledMatrix::new(self.order.clone(), self.order, values)
    }
}

/// 各 ROI 像素级通道相关系数的平均.
///
/// 同一 ROI 中重名的通道先取平均, 再在 ROI 之间按名称取平均; 缺失值置 0.
/// 名称被 `exclude` 匹配的通道删除.
pub fn channel_correlation(rois: &[&Roi], exclude: &ChannelExclude) -> ImcResult<LabeledMatrix> {
    info!("Correlating channels of {} ROI(s)", rois.len());
    let per_roi = par_map(rois, "channel correlation", |roi| correlate_channels(roi))?;

    let mut across = NameMeans::default();
    for m in per_roi {
        let mut within = NameMeans::default();
        for (i, r) in m.rows().iter().enumerate() {
            for (j, c) in m.cols().iter().enumerate() {
                within.add(r, c, m.values()[(i, j)]);
            }
        }
        let within = within.into_matrix();
        for (i, r) in within.rows().iter().enumerate() {
            for (j, c) in within.cols().iter().enumerate() {
                across.add(r, c, within.values()[(i, j)]);
            }
        }
    }

    let res = across.into_matrix().fill_nan(0.0);
    if exclude.is_empty() {
        return Ok(res);
    }
    let keep: Vec<bool> = res.rows().iter().map(|r| !exclude.excludes(r)).collect();
    Ok(res.select_rows(&keep).select_cols(&keep))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelLabels, Stack};
    use ndarray::Array3;

    fn roi(name: &str, labels: &[&str], f: impl Fn(usize, usize, usize) -> f32) -> Roi {
        let mut r = Roi::new(name.into(), "s".into(), "/nowhere", false, None);
        let data = Array3::from_shape_fn((labels.len(), 3, 3), |(c, h, w)| f(c, h, w));
        r.set_stack(Stack::new(data));
        r.set_channel_labels(ChannelLabels::new(labels.iter().copied()));
        r
    }

    #[test]
    fn test_correlate_channels() {
        // 通道 1 与通道 0 成正比, 通道 2 与通道 0 相反.
        let r = roi("s-01", &["A(X1)", "B(X2)", "C(X3)"], |c, h, w| {
            let base = (h * 3 + w) as f32;
            match c {
                0 => base,
                1 => 2.0 * base + 1.0,
                _ => -base,
            }
        });
        let m = correlate_channels(&r).unwrap();
        assert_eq!(m.rows(), &["A".to_string(), "B".to_string(), "C".to_string()]);
        assert!((m.values()[(0, 1)] - 1.0).abs() < 1e-9);
        assert!((m.values()[(2, 0)] + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_channel_correlation_average() {
        let a = roi("s-01", &["A(X1)", "B(X2)"], |c, h, w| {
            let base = (h * 3 + w) as f32;
            if c == 0 { base } else { base * base }
        });
        let b = roi("s-02", &["A(X1)", "Z(X9)", "B(X2)"], |c, h, w| {
            let base = (h * 3 + w) as f32;
            match c {
                0 => base,
                1 => 5.0,
                _ => -base,
            }
        });
        let res = channel_correlation(&[&a, &b], &ChannelExclude::none()).unwrap();
        assert_eq!(res.rows(), &["A".to_string(), "B".to_string(), "Z".to_string()]);
        assert!(!res.has_nan());
        // 常数通道的相关系数缺失, 置 0.
        assert_eq!(res.values()[(0, 2)], 0.0);
        assert_eq!(res.values()[(2, 2)], 1.0);

        let excluded = channel_correlation(&[&a, &b], &ChannelExclude::from_patterns("Z")).unwrap();
        assert_eq!(excluded.dim(), (2, 2));
    }
}
