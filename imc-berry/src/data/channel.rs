//! 通道标签.
//!
//! 预处理流程为每个图像栈写出一份两列 CSV (序号, 标签), 标签形如 `CD45(Sm152)`,
//! 括号外为标记物名称, 括号内为金属同位素.

use std::fmt;
use std::io;
use std::path::Path;

use itertools::Itertools;
use regex::Regex;

use super::LabeledMatrix;
use crate::{ImcError, ImcResult};

/// 单个通道的标签.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelLabel {
    label: String,
}

impl ChannelLabel {
    /// 由完整标签构建.
    pub fn parse(label: &str) -> Self {
        Self {
            label: label.trim().to_string(),
        }
    }

    /// 完整标签, 例如 `CD45(Sm152)`.
    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// 标记物名称, 即第一个 `(` 之前的部分. 没有括号时为完整标签.
    pub fn name(&self) -> &str {
        match self.label.find('(') {
            Some(i) => &self.label[..i],
            None => &self.label,
        }
    }

    /// 金属同位素, 即括号内的部分. 没有括号时为空串.
    pub fn metal(&self) -> &str {
        let Some(open) = self.label.find('(') else {
            return "";
        };
        let rest = &self.label[open + 1..];
        match rest.rfind(')') {
            Some(close) => &rest[..close],
            None => rest,
        }
    }
}

impl fmt::Display for ChannelLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// 一个图像栈的全部通道标签, 顺序与图像栈的通道一致.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelLabels(Vec<ChannelLabel>);

impl ChannelLabels {
    /// 由标签字符串构建.
    pub fn new<S: AsRef<str>, I: IntoIterator<Item = S>>(labels: I) -> Self {
        Self(
            labels
                .into_iter()
                .map(|s| ChannelLabel::parse(s.as_ref()))
                .collect(),
        )
    }

    /// 读取两列 (序号, 标签) 的 CSV, 首行为表头.
    pub fn read_csv<P: AsRef<Path>>(path: P) -> ImcResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ImcError::MissingFile(path.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let mut labels = vec![];
        for record in reader.records() {
            let record = record?;
            let label = record
                .get(1)
                .ok_or_else(|| ImcError::MissingColumn("channel".into()))?;
            labels.push(ChannelLabel::parse(label));
        }
        Ok(Self(labels))
    }

    /// 写出与 [`ChannelLabels::read_csv`] 相同格式的 CSV.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> ImcResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(["", "channel"])?;
        for (i, l) in self.0.iter().enumerate() {
            w.write_record([i.to_string().as_str(), l.label()])?;
        }
        w.flush()?;
        Ok(())
    }

    /// 通道个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否没有任何通道?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 迭代所有标签.
    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, ChannelLabel> {
        self.0.iter()
    }

    /// 第 `i` 个通道的标签.
    #[inline]
    pub fn get(&self, i: usize) -> Option<&ChannelLabel> {
        self.0.get(i)
    }

    /// 完整标签列表.
    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(|l| l.label().to_string()).collect()
    }

    /// 标记物名称列表.
    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|l| l.name().to_string()).collect()
    }

    /// 金属同位素列表.
    pub fn metals(&self) -> Vec<String> {
        self.0.iter().map(|l| l.metal().to_string()).collect()
    }

    /// 标签是否匹配 `re`, 与通道一一对应.
    pub fn matching(&self, re: &Regex) -> Vec<bool> {
        self.0.iter().map(|l| re.is_match(l.label())).collect()
    }

    /// 保留 `keep` 为 `true` 的通道. 长度不符时 panic.
    pub fn select(&self, keep: &[bool]) -> Self {
        assert_eq!(keep.len(), self.len());
        Self(
            self.0
                .iter()
                .zip(keep)
                .filter_map(|(l, &k)| k.then(|| l.clone()))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a ChannelLabels {
    type Item = &'a ChannelLabel;
    type IntoIter = std::slice::Iter<'a, ChannelLabel>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// 需要排除的通道. 由若干子串构成, 标签与任一子串完全相同或包含它即被排除.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelExclude {
    patterns: Vec<String>,
}

impl ChannelExclude {
    /// 不排除任何通道.
    pub fn none() -> Self {
        Self::default()
    }

    /// 由逗号分隔的子串列表构建, 忽略空项. 例如 `"80ArAr,<EMPTY>"`.
    pub fn from_patterns(s: &str) -> Self {
        Self::from_list(s.split(','))
    }

    /// 由子串列表构建, 忽略空项.
    pub fn from_list<S: AsRef<str>, I: IntoIterator<Item = S>>(list: I) -> Self {
        Self {
            patterns: list
                .into_iter()
                .map(|s| s.as_ref().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    /// 是否没有给出任何子串?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// 标签 `label` 是否被排除?
    pub fn excludes(&self, label: &str) -> bool {
        self.patterns.iter().any(|p| label.contains(p.as_str()))
    }

    /// 与 `labels` 一一对应的排除掩码, `true` 表示排除.
    pub fn mask(&self, labels: &ChannelLabels) -> Vec<bool> {
        labels.iter().map(|l| self.excludes(l.label())).collect()
    }

    /// 与 `labels` 一一对应的保留掩码, `true` 表示保留.
    pub fn keep(&self, labels: &ChannelLabels) -> Vec<bool> {
        self.mask(labels).into_iter().map(|e| !e).collect()
    }
}

/// 当各 ROI 的通道面板不同时, 按标记物名称 (去掉金属) 对齐行.
///
/// 同名的行合并为一行, 每一列取非 NaN 值的平均 (全为 NaN 时仍为 NaN).
/// 结果的行按名称首次出现的顺序排列.
pub fn align_channels_by_name(m: &LabeledMatrix) -> LabeledMatrix {
    let names: Vec<String> = m
        .rows()
        .iter()
        .map(|r| ChannelLabel::parse(r).name().to_string())
        .collect();
    let groups: Vec<(String, Vec<usize>)> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), i))
        .into_group_map()
        .into_iter()
        .sorted_by_key(|(_, idx)| idx[0])
        .collect();

    let ncols = m.cols().len();
    let mut values = ndarray::Array2::from_elem((groups.len(), ncols), f64::NAN);
    for (r, (_, idx)) in groups.iter().enumerate() {
        for c in 0..ncols {
            let (n, s) = idx
                .iter()
                .map(|&i| m.values()[(i, c)])
                .filter(|v| !v.is_nan())
                .fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
            if n > 0 {
                values[(r, c)] = s / n as f64;
            }
        }
    }
    LabeledMatrix::new(
        groups.into_iter().map(|(n, _)| n).collect(),
        m.cols().to_vec(),
        values,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_label_parts() {
        let l = ChannelLabel::parse("CD45(Sm152)");
        assert_eq!(l.name(), "CD45");
        assert_eq!(l.metal(), "Sm152");
        let bare = ChannelLabel::parse("<EMPTY>");
        assert_eq!(bare.name(), "<EMPTY>");
        assert_eq!(bare.metal(), "");
    }

    #[test]
    fn test_labels_csv_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a-01_full.csv");
        let labels = ChannelLabels::new(["DNA1(Ir191)", "CD3(Er170)", "Ki67(Er168)"]);
        labels
            .write_csv(std::fs::File::create(&path).unwrap())
            .unwrap();
        let back = ChannelLabels::read_csv(&path).unwrap();
        assert_eq!(back, labels);
        assert_eq!(back.names(), vec!["DNA1", "CD3", "Ki67"]);
        assert_eq!(back.metals(), vec!["Ir191", "Er170", "Er168"]);
    }

    #[test]
    fn test_exclude() {
        let labels = ChannelLabels::new(["80ArAr(ArAr80)", "CD3(Er170)", "<EMPTY>(Pb204)"]);
        let exc = ChannelExclude::from_patterns("ArAr,EMPTY,");
        assert_eq!(exc.mask(&labels), vec![true, false, true]);
        assert_eq!(exc.keep(&labels), vec![false, true, false]);
        assert!(ChannelExclude::from_patterns("").is_empty());
    }

    #[test]
    fn test_matching() {
        let labels = ChannelLabels::new(["DNA1(Ir191)", "CD3(Er170)", "SMA(Pr141)"]);
        let re = Regex::new("DNA|Ki67|SMA").unwrap();
        assert_eq!(labels.matching(&re), vec![true, false, true]);
    }

    #[test]
    fn test_align_by_name() {
        let nan = f64::NAN;
        let m = LabeledMatrix::new(
            vec!["CD3(Er170)".into(), "DNA1(Ir191)".into(), "CD3(Er171)".into()],
            vec!["r1".into(), "r2".into()],
            arr2(&[[1.0, nan], [5.0, 6.0], [nan, 3.0]]),
        );
        let a = align_channels_by_name(&m);
        assert_eq!(a.rows(), &["CD3".to_string(), "DNA1".to_string()]);
        assert_eq!(a.values(), &arr2(&[[1.0, 3.0], [5.0, 6.0]]));
        assert!(!a.has_nan());
    }
}
