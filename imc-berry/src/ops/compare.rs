//! 按样本属性分组, 比较各组之间的通道平均强度与细胞类型丰度.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{info, warn};

use super::channel_summary;
use super::stats::{fdr_bh, mann_whitney_u};
use crate::consts::names::CONTROL_GROUP_MARKER;
use crate::data::{fmt_value, nan_mean};
use crate::project::{Roi, Sample};
use crate::{plot, ChannelExclude, ImcResult, LabeledMatrix, Reduce};

/// 组间比较的参数.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOptions {
    /// 用于分组的样本属性.
    pub attributes: Vec<String>,

    /// 细胞类型全局占比 (百分数) 不超过该值的类型不出现在 "filtered" 图中.
    pub threshold: f64,

    /// 需要排除的通道.
    pub exclude: ChannelExclude,

    /// 输出文件前缀, 例如 `results/project.`.
    pub output_prefix: PathBuf,

    /// 是否绘图.
    pub plot: bool,
}

impl Default for ComparisonOptions {
    fn default() -> Self {
        Self {
            attributes: vec!["name".to_string()],
            threshold: 1.0,
            exclude: ChannelExclude::none(),
            output_prefix: PathBuf::from("comparisons."),
            plot: true,
        }
    }
}

/// 一次两组比较的结果.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GroupTest {
    /// 分组所用的属性.
    pub attribute: String,
    /// 通道名或细胞类型.
    pub feature: String,
    /// 第一组.
    pub group1: String,
    /// 第二组.
    pub group2: String,
    /// 第一组均值.
    pub mean1: f64,
    /// 第二组均值.
    pub mean2: f64,
    /// `log2(mean1 / mean2)`.
    pub log2_fold: f64,
    /// 第一组的 Mann-Whitney U.
    pub stat: f64,
    /// 双侧 p 值.
    pub p_value: f64,
    /// Benjamini-Hochberg 校正后的 p 值.
    pub p_adj: f64,
}

const CSV_HEADER: [&str; 10] = [
    "attribute", "feature", "group1", "group2", "mean1", "mean2", "log2_fold", "stat", "p_value",
    "p_adj",
];

impl GroupTest {
    fn new(attribute: &str, feature: &str, g1: &str, v1: &[f64], g2: &str, v2: &[f64]) -> Self {
        let mean1 = nan_mean(v1.iter().copied());
        let mean2 = nan_mean(v2.iter().copied());
        let (stat, p_value) = mann_whitney_u(v1, v2);
        Self {
            attribute: attribute.to_string(),
            feature: feature.to_string(),
            group1: g1.to_string(),
            group2: g2.to_string(),
            mean1,
            mean2,
            log2_fold: (mean1 / mean2).log2(),
            stat,
            p_value,
            p_adj: f64::NAN,
        }
    }

    fn record(&self) -> Vec<String> {
        vec![
            self.attribute.clone(),
            self.feature.clone(),
            self.group1.clone(),
            self.group2.clone(),
            fmt_value(self.mean1),
            fmt_value(self.mean2),
            fmt_value(self.log2_fold),
            fmt_value(self.stat),
            fmt_value(self.p_value),
            fmt_value(self.p_adj),
        ]
    }
}

/// 以 CSV 写出一组比较结果.
pub fn write_tests<W: io::Write>(tests: &[GroupTest], writer: W) -> ImcResult<()> {
    let mut w = csv::Writer::from_writer(writer);
    w.write_record(CSV_HEADER)?;
    for t in tests {
        w.write_record(t.record())?;
    }
    w.flush()?;
    Ok(())
}

/// 组间比较的全部结果.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComparisonResult {
    /// 通道平均强度的比较.
    pub channel_mean: Vec<GroupTest>,
    /// 细胞类型细胞数的比较.
    pub cell_type_abundance: Vec<GroupTest>,
}

/// 长表: 每个 (特征, ROI) 一个值.
struct Long {
    features: Vec<String>,
    values: BTreeMap<(String, String), f64>,
}

impl Long {
    fn from_matrix(m: &LabeledMatrix) -> Self {
        let mut values = BTreeMap::new();
        for (i, f) in m.rows().iter().enumerate() {
            for (j, r) in m.cols().iter().enumerate() {
                values.insert((f.clone(), r.clone()), m.values()[(i, j)]);
            }
        }
        Self {
            features: m.rows().to_vec(),
            values,
        }
    }

    fn collect(&self, feature: &str, rois: &[&str]) -> Vec<f64> {
        rois.iter()
            .filter_map(|r| self.values.get(&(feature.to_string(), r.to_string())).copied())
            .filter(|v| !v.is_nan())
            .collect()
    }
}

/// 细胞类型丰度. 长表只包含在该 ROI 中出现过的 (类型, ROI).
struct Abundance {
    /// 各 ROI 中每种类型的细胞数.
    counts: Long,
    /// 各 ROI 中每种类型的 ROI 内占比 (百分数).
    percentages: Long,
    /// 每种类型占全部细胞的百分数.
    share: BTreeMap<String, f64>,
}

impl Abundance {
    fn from_rois(rois: &[&Roi]) -> Self {
        let mut counts = BTreeMap::new();
        let mut percentages = BTreeMap::new();
        let mut totals: BTreeMap<String, usize> = BTreeMap::new();
        for roi in rois {
            let Some(c) = roi.clusters() else { continue };
            let n = c.len().max(1) as f64;
            for (t, k) in c.values().counts() {
                let key = (t.clone(), roi.name().to_string());
                counts.insert(key.clone(), k as f64);
                percentages.insert(key, k as f64 / n * 100.0);
                *totals.entry(t.clone()).or_default() += k;
            }
        }
        let all = totals.values().sum::<usize>().max(1) as f64;
        let share = totals.iter().map(|(t, &k)| (t.clone(), k as f64 / all * 100.0)).collect();
        let features: Vec<String> = totals.into_keys().collect();
        Self {
            counts: Long {
                features: features.clone(),
                values: counts,
            },
            percentages: Long {
                features,
                values: percentages,
            },
            share,
        }
    }

    fn types(&self) -> &[String] {
        &self.counts.features
    }

    /// 全局占比严格大于 `threshold` 的类型.
    fn above(&self, threshold: f64) -> Vec<String> {
        self.share
            .iter()
            .filter(|(_, p)| **p > threshold)
            .map(|(t, _)| t.clone())
            .collect()
    }
}

/// 每个样本中各细胞类型的密度 (每单位面积细胞数, ROI 之间平均). 行为细胞类型, 列为样本.
fn cluster_density(samples: &[&Sample]) -> ImcResult<LabeledMatrix> {
    let mut columns = vec![];
    for s in samples {
        let mut per_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for roi in s.rois() {
            let Some(c) = roi.clusters() else { continue };
            let (_, h, w) = roi.shape()?;
            let area = (h * w).max(1) as f64;
            for (t, n) in c.values().counts() {
                per_type.entry(t.clone()).or_default().push(n as f64 / area);
            }
        }
        let col: Vec<(String, f64)> = per_type
            .into_iter()
            .map(|(t, v)| {
                let n = s.rois().iter().filter(|r| r.clusters().is_some()).count().max(1);
                (t, v.iter().sum::<f64>() / n as f64)
            })
            .collect();
        columns.push((s.name().to_string(), col));
    }
    Ok(LabeledMatrix::from_columns(columns).fill_nan(0.0))
}

fn test_attribute(
    attribute: &str,
    long: &Long,
    groups: &[(String, Vec<&str>)],
) -> Vec<GroupTest> {
    let mut out = vec![];
    for feature in &long.features {
        let values: Vec<Vec<f64>> = groups.iter().map(|(_, rois)| long.collect(feature, rois)).collect();
        for (a, b) in (0..groups.len()).tuple_combinations() {
            // 每对组只保留一个方向; 对照组总是放在第二组.
            let (a, b) = if groups[a].0.contains(CONTROL_GROUP_MARKER) { (b, a) } else { (a, b) };
            out.push(GroupTest::new(
                attribute,
                feature,
                &groups[a].0,
                &values[a],
                &groups[b].0,
                &values[b],
            ));
        }
    }
    out
}

/// 按属性 `attr` 的取值把样本的 ROI 分组, 组按取值首次出现的顺序排列.
/// 没有该属性的样本被忽略.
fn groups_of<'a>(samples: &[&'a Sample], attr: &str) -> Vec<(String, Vec<&'a str>)> {
    let mut groups: Vec<(String, Vec<&str>)> = vec![];
    for s in samples {
        let Some(value) = s.attribute(attr) else {
            warn!("Sample `{}` has no attribute `{attr}`", s.name());
            continue;
        };
        let rois = s.rois().iter().map(Roi::name);
        match groups.iter_mut().find(|(g, _)| g == value) {
            Some((_, v)) => v.extend(rois),
            None => groups.push((value.to_string(), rois.collect())),
        }
    }
    groups
}

/// 对所有属性做比较, 最后对整张表做 BH 校正.
fn test_all(attributes: &[String], samples: &[&Sample], long: &Long) -> Vec<GroupTest> {
    let mut tests = vec![];
    for attr in attributes {
        let groups = groups_of(samples, attr);
        if groups.len() < 2 {
            warn!("Attribute `{attr}` has fewer than two groups, nothing to compare");
            continue;
        }
        tests.extend(test_attribute(attr, long, &groups));
    }
    let p: Vec<f64> = tests.iter().map(|t| t.p_value).collect();
    for (t, q) in tests.iter_mut().zip(fdr_bh(&p)) {
        t.p_adj = q;
    }
    tests
}

fn prefixed(prefix: &Path, name: &str) -> PathBuf {
    PathBuf::from(format!("{}{name}", prefix.to_string_lossy()))
}

fn save_tests(tests: &[GroupTest], path: &Path) -> ImcResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_tests(tests, std::fs::File::create(path)?)
}

/// 每个属性一张分组柱状图: 横轴为特征, 每组一根柱子 (组内 ROI 平均).
/// 某 ROI 中没有的特征不参与平均.
fn plot_bars(
    path: &Path,
    title: &str,
    samples: &[&Sample],
    attr: &str,
    long: &Long,
    features: &[String],
) -> ImcResult<()> {
    let series: Vec<(String, Vec<f64>)> = groups_of(samples, attr)
        .into_iter()
        .map(|(g, rois)| {
            let means = features.iter().map(|f| nan_mean(long.collect(f, &rois))).collect();
            (g, means)
        })
        .collect();
    plot::barplot(path, title, features, &series)
}

fn plot_volcanoes(path_of: impl Fn(&str) -> PathBuf, tests: &[GroupTest]) -> ImcResult<()> {
    for (attr, group) in &tests.iter().group_by(|t| t.attribute.clone()) {
        let points: Vec<(String, f64, f64)> = group
            .map(|t| (format!("{} ({} vs {})", t.feature, t.group1, t.group2), t.log2_fold, t.p_value))
            .collect();
        plot::volcano(path_of(&attr), &attr, &points)?;
    }
    Ok(())
}

/// 组间比较.
///
/// 1. 各 ROI 通道平均强度 ([`channel_summary`], 均值约简) 展开为长表;
/// 2. 各 ROI 细胞类型的细胞数 (需要 ROI 已设置聚类标签), 只统计类型出现过的 ROI;
/// 3. 对每个属性、每个特征、每对组做 Mann-Whitney U 检验, 再做 BH 校正.
///
/// 结果写出为 `<prefix>channel_mean.testing_between_attributes.csv` 和
/// `<prefix>cell_type_abundance.testing_between_attributes.csv`;
/// `opts.plot` 为真时同时写出柱状图、火山图与细胞类型密度热图.
pub fn sample_comparisons(samples: &[&Sample], opts: &ComparisonOptions) -> ImcResult<ComparisonResult> {
    let rois: Vec<&Roi> = samples.iter().flat_map(|s| s.rois().iter()).collect();
    info!(
        "Comparing {} sample(s) by attribute(s) {:?}",
        samples.len(),
        opts.attributes
    );
    let prefix = opts.output_prefix.as_path();

    let means = channel_summary(&rois, Reduce::Mean, &opts.exclude)?;
    let means_long = Long::from_matrix(&means);
    let channel_mean = test_all(&opts.attributes, samples, &means_long);
    let significant = channel_mean.iter().filter(|t| t.p_adj < 0.05).count();
    info!("{significant} channel mean comparison(s) with adjusted p < 0.05");
    save_tests(&channel_mean, &prefixed(prefix, "channel_mean.testing_between_attributes.csv"))?;

    let abundance = Abundance::from_rois(&rois);
    let cell_type_abundance = if abundance.types().is_empty() {
        warn!("No cluster assignments found, skipping cell type abundance comparisons");
        vec![]
    } else {
        test_all(&opts.attributes, samples, &abundance.counts)
    };
    save_tests(
        &cell_type_abundance,
        &prefixed(prefix, "cell_type_abundance.testing_between_attributes.csv"),
    )?;

    if opts.plot {
        let channels = means.rows().to_vec();
        let types = abundance.types().to_vec();
        let filtered = abundance.above(opts.threshold);
        for attr in &opts.attributes {
            plot_bars(
                &prefixed(prefix, &format!("channel_mean.by_{attr}.barplot.svg")),
                &format!("channel mean by {attr}"),
                samples,
                attr,
                &means_long,
                &channels,
            )?;
            if !types.is_empty() {
                plot_bars(
                    &prefixed(prefix, &format!("cell_type_abundance.by_{attr}.barplot.svg")),
                    &format!("cell type abundance (%) by {attr}"),
                    samples,
                    attr,
                    &abundance.percentages,
                    &types,
                )?;
                plot_bars(
                    &prefixed(prefix, &format!("cell_type_abundance.by_{attr}.barplot.filtered.svg")),
                    &format!("cell type abundance (%) by {attr}, > {}%", opts.threshold),
                    samples,
                    attr,
                    &abundance.percentages,
                    &filtered,
                )?;
            }
        }
        plot_volcanoes(
            |a| prefixed(prefix, &format!("channel_mean.testing_between_attributes.{a}.volcano.svg")),
            &channel_mean,
        )?;
        plot_volcanoes(
            |a| prefixed(prefix, &format!("cell_type_abundance.testing_between_attributes.{a}.volcano.svg")),
            &cell_type_abundance,
        )?;
        if !types.is_empty() {
            let density = cluster_density(samples)?;
            plot::heatmap(
                prefixed(prefix, "cell_type_abundance.by_area.svg"),
                &density,
                "cells per area unit",
                false,
            )?;
            plot::heatmap(
                prefixed(prefix, "cell_type_abundance.by_area.zscore.svg"),
                &density.clone().zscore_rows(),
                "cells per area unit (z-score)",
                true,
            )?;
        }
    }

    Ok(ComparisonResult {
        channel_mean,
        cell_type_abundance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChannelLabels, Stack};
    use ndarray::Array3;

    fn sample(dir: &Path, name: &str, disease: &str) -> Sample {
        Sample::new(
            name.to_string(),
            dir.join(name),
            true,
            vec![("disease".to_string(), disease.to_string())],
            None,
            None,
        )
        .unwrap()
    }

    fn rois_for(name: &str, level: f32, n: usize) -> Vec<Roi> {
        (0..n)
            .map(|i| {
                let mut r = Roi::new(format!("{name}-{:02}", i + 1), name.to_string(), "/nowhere", true, None);
                let bump = i as f32 * 0.1;
                let data = Array3::from_shape_fn((2, 2, 2), |(c, _, _)| if c == 0 { level + bump } else { 1.0 });
                r.set_stack(Stack::new(data));
                r.set_channel_labels(ChannelLabels::new(["CD3(Er170)", "DNA1(Ir191)"]));
                let clusters = (1..=10u32)
                    .map(|id| (id, if (id as f32) <= level { "T".to_string() } else { "B".to_string() }))
                    .collect();
                r.set_clusters(clusters);
                r
            })
            .collect()
    }

    #[test]
    fn test_group_test_means() {
        let t = GroupTest::new("disease", "CD3", "A", &[1.0, 3.0], "B", &[1.0, 1.0]);
        assert_eq!(t.mean1, 2.0);
        assert_eq!(t.log2_fold, 1.0);
        assert!(t.p_adj.is_nan());
    }

    #[test]
    fn test_healthy_is_second() {
        let mut values = BTreeMap::new();
        for (r, v) in [("a1", 1.0), ("a2", 2.0), ("b1", 5.0), ("b2", 6.0)] {
            values.insert(("CD3".to_string(), r.to_string()), v);
        }
        let long = Long {
            features: vec!["CD3".to_string()],
            values,
        };
        let groups = vec![
            ("Healthy".to_string(), vec!["a1", "a2"]),
            ("COVID".to_string(), vec!["b1", "b2"]),
        ];
        let tests = test_attribute("disease", &long, &groups);
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].group1, "COVID");
        assert_eq!(tests[0].group2, "Healthy");
        assert!(tests[0].log2_fold > 0.0);
    }

    fn roi_with(name: &str, types: &[(&str, u32)]) -> Roi {
        let mut r = Roi::new(name.to_string(), "s".to_string(), "/nowhere", true, None);
        let mut id = 0;
        let mut clusters = BTreeMap::new();
        for &(t, n) in types {
            for _ in 0..n {
                id += 1;
                clusters.insert(id, t.to_string());
            }
        }
        r.set_clusters(clusters);
        r
    }

    #[test]
    fn test_abundance_share_is_global() {
        let r1 = roi_with("r1", &[("A", 100)]);
        let r2 = roi_with("r2", &[("A", 1), ("B", 1)]);
        let ab = Abundance::from_rois(&[&r1, &r2]);
        assert_eq!(ab.types(), &["A".to_string(), "B".to_string()]);
        // B 占全部 102 个细胞的不到 1%, 虽然在 r2 中占 50%.
        assert!((ab.share["B"] - 100.0 / 102.0).abs() < 1e-9);
        assert_eq!(ab.above(1.0), vec!["A".to_string()]);
        // 只统计出现过的 ROI.
        assert_eq!(ab.counts.collect("B", &["r1", "r2"]), vec![1.0]);
        assert_eq!(ab.counts.collect("A", &["r1", "r2"]), vec![100.0, 1.0]);
        assert_eq!(ab.percentages.collect("B", &["r1", "r2"]), vec![50.0]);
    }

    #[test]
    fn test_abundance_threshold_is_strict() {
        let r1 = roi_with("r1", &[("A", 99)]);
        let r2 = roi_with("r2", &[("B", 1)]);
        let ab = Abundance::from_rois(&[&r1, &r2]);
        assert!((ab.share["B"] - 1.0).abs() < 1e-12);
        assert_eq!(ab.above(1.0), vec!["A".to_string()]);
        assert_eq!(ab.above(0.5), vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_sample_comparisons_writes_tables() {
        let dir = tempfile::tempdir().unwrap();
        let mut samples = vec![
            sample(dir.path(), "h1", "Healthy"),
            sample(dir.path(), "c1", "COVID"),
        ];
        for (s, level) in samples.iter_mut().zip([2.0, 8.0]) {
            let rois = rois_for(s.name(), level, 4);
            s.set_rois(rois);
        }
        let refs: Vec<&Sample> = samples.iter().collect();
        let opts = ComparisonOptions {
            attributes: vec!["disease".to_string()],
            output_prefix: dir.path().join("results").join("p."),
            plot: false,
            ..Default::default()
        };
        let res = sample_comparisons(&refs, &opts).unwrap();
        // 两个通道, 一对组.
        assert_eq!(res.channel_mean.len(), 2);
        let cd3 = res.channel_mean.iter().find(|t| t.feature == "CD3(Er170)").unwrap();
        assert_eq!(cd3.group2, "Healthy");
        assert!(cd3.p_value < 0.05);
        // 两个细胞类型, 按细胞数比较: 对照组 T 细胞 2 个, 另一组 8 个.
        assert_eq!(res.cell_type_abundance.len(), 2);
        let t = res.cell_type_abundance.iter().find(|t| t.feature == "T").unwrap();
        assert_eq!((t.mean1, t.mean2), (8.0, 2.0));
        assert_eq!(t.group2, "Healthy");
        assert!(dir
            .path()
            .join("results/p.channel_mean.testing_between_attributes.csv")
            .is_file());
    }
}
