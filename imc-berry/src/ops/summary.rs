use log::info;

use super::par_map;
use crate::project::Roi;
use crate::{align_channels_by_name, ChannelExclude, ImcResult, LabeledMatrix, Reduce};

/// 通道 × ROI 的整体强度表.
///
/// 每个 ROI 的每个通道以 `reduce` 约简全部像素. 若各 ROI 通道面板不同
/// (外连接后出现缺失), 则按标记物名称对齐. 被 `exclude` 匹配的通道删除,
/// 最后每列除以该列均值.
pub fn channel_summary(
    rois: &[&Roi],
    reduce: Reduce,
    exclude: &ChannelExclude,
) -> ImcResult<LabeledMatrix> {
    info!("Summarizing {} channel intensities of {} ROI(s)", reduce, rois.len());
    let columns = par_map(rois, "channel summary", |roi| {
        let values = roi.stack()?.reduce(reduce);
        let labels = roi.channel_labels()?.labels();
        Ok((roi.name().to_string(), labels.into_iter().zip(values).collect::<Vec<_>>()))
    })?;

    let mut res = LabeledMatrix::from_columns(columns);
    if res.has_nan() {
        res = align_channels_by_name(&res);
    }
    if !exclude.is_empty() {
        let keep: Vec<bool> = res.rows().iter().map(|r| !exclude.excludes(r)).collect();
        res = res.select_rows(&keep);
    }
    Ok(res.normalize_columns_by_mean())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelLabels, Stack};
    use ndarray::Array3;

    fn roi(name: &str, labels: &[&str], means: &[f32]) -> Roi {
        let mut r = Roi::new(name.into(), "s".into(), "/nowhere", false, None);
        let data = Array3::from_shape_fn((means.len(), 2, 2), |(c, _, _)| means[c]);
        r.set_stack(Stack::new(data));
        r.set_channel_labels(ChannelLabels::new(labels.iter().copied()));
        r
    }

    #[test]
    fn test_summary_same_panel() {
        let a = roi("s-01", &["DNA1(Ir191)", "CD3(Er170)", "80ArAr(ArAr80)"], &[2.0, 4.0, 6.0]);
        let b = roi("s-02", &["DNA1(Ir191)", "CD3(Er170)", "80ArAr(ArAr80)"], &[1.0, 1.0, 1.0]);
        let res = channel_summary(&[&a, &b], Reduce::Mean, &ChannelExclude::from_patterns("ArAr"))
            .unwrap();
        assert_eq!(res.rows(), &["DNA1(Ir191)".to_string(), "CD3(Er170)".to_string()]);
        assert_eq!(res.cols(), &["s-01".to_string(), "s-02".to_string()]);
        // 第一列 [2, 4] 除以均值 3.
        assert!((res.values()[(0, 0)] - 2.0 / 3.0).abs() < 1e-9);
        assert!((res.values()[(1, 1)] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_summary_aligns_different_panels() {
        let a = roi("s-01", &["DNA1(Ir191)", "CD3(Er170)"], &[2.0, 4.0]);
        let b = roi("s-02", &["DNA1(Ir191)", "CD3(Er171)"], &[2.0, 2.0]);
        let res = channel_summary(&[&a, &b], Reduce::Max, &ChannelExclude::none()).unwrap();
        assert_eq!(res.rows(), &["DNA1".to_string(), "CD3".to_string()]);
        assert!(!res.has_nan());
    }
}
