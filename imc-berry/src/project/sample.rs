//! 样本: 共享若干标识属性的一组 ROI.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::warn;

use super::{Clusters, MetadataTable, Roi, RoiInput};
use crate::consts::names::{ROI_NUMBER_ATTRIBUTE, ROI_STACKS_DIR};
use crate::{dataset, ChannelLabels, ImcResult};

/// 一个样本.
#[derive(Debug)]
pub struct Sample {
    name: String,
    root_dir: PathBuf,
    subfolder: bool,
    attributes: Vec<(String, String)>,
    metadata: Option<MetadataTable>,
    panel_metadata: Option<Arc<MetadataTable>>,
    rois: Vec<Roi>,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Sample {
    /// 构建样本并发现其 ROI.
    ///
    /// `metadata` 为 ROI 级元数据 (每行一个 ROI); 若其中有 `roi_number` 列,
    /// 则按行生成 ROI, 否则扫描目录.
    pub fn new<P: Into<PathBuf>>(
        name: String,
        root_dir: P,
        subfolder: bool,
        attributes: Vec<(String, String)>,
        metadata: Option<MetadataTable>,
        panel_metadata: Option<Arc<MetadataTable>>,
    ) -> ImcResult<Self> {
        let mut sample = Self {
            name,
            root_dir: root_dir.into(),
            subfolder,
            attributes,
            metadata,
            panel_metadata,
            rois: vec![],
        };
        sample.rois = sample.discover_rois()?;
        Ok(sample)
    }

    fn stacks_dir(&self) -> PathBuf {
        if self.subfolder {
            self.root_dir.join(ROI_STACKS_DIR)
        } else {
            self.root_dir.clone()
        }
    }

    fn roi_numbers(&self) -> Option<Vec<u32>> {
        let md = self.metadata.as_ref()?;
        let col = md.column(ROI_NUMBER_ATTRIBUTE).ok()?;
        let numbers = col
            .into_iter()
            .filter_map(|v| {
                let n = parse_roi_number(v);
                if n.is_none() {
                    warn!("Invalid ROI number `{v}` of sample `{}`, skipped", self.name);
                }
                n
            })
            .collect();
        Some(numbers)
    }

    fn discover_rois(&self) -> ImcResult<Vec<Roi>> {
        let mut rois = vec![];
        if let Some(numbers) = self.roi_numbers() {
            for n in numbers {
                let roi = Roi::new(
                    format!("{}-{n:02}", self.name),
                    self.name.clone(),
                    &self.root_dir,
                    self.subfolder,
                    Some(n),
                );
                if roi.input_path(RoiInput::Stack).is_file() {
                    rois.push(roi);
                } else {
                    warn!(
                        "Stack of ROI `{}` not found at `{}`",
                        roi.name(),
                        roi.input_path(RoiInput::Stack).display()
                    );
                }
            }
            return Ok(rois);
        }

        let dir = self.stacks_dir();
        if !dir.is_dir() {
            warn!("Directory of sample `{}` not found: `{}`", self.name, dir.display());
            return Ok(rois);
        }
        let prefix = format!("{}-", self.name);
        let found = dataset::find_stacks(&dir, |roi| {
            roi.starts_with(&prefix) || (!self.subfolder && roi == self.name)
        })?;
        for (roi_name, _) in found {
            let number = roi_name
                .strip_prefix(&prefix)
                .and_then(|n| n.parse::<u32>().ok());
            rois.push(Roi::new(
                roi_name,
                self.name.clone(),
                &self.root_dir,
                self.subfolder,
                number,
            ));
        }
        Ok(rois)
    }

    /// 样本名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 样本根目录.
    #[inline]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// 样本属性, 按元数据列顺序.
    #[inline]
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// 属性 `key` 的值. `name` 总是返回样本名.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        if key == "name" {
            return Some(&self.name);
        }
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// ROI 级元数据.
    #[inline]
    pub fn metadata(&self) -> Option<&MetadataTable> {
        self.metadata.as_ref()
    }

    /// 通道面板元数据.
    pub fn panel_metadata(&self) -> Option<&MetadataTable> {
        self.panel_metadata.as_deref()
    }

    /// 所有 ROI.
    #[inline]
    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    /// 所有 ROI 的可变引用.
    #[inline]
    pub fn rois_mut(&mut self) -> &mut [Roi] {
        &mut self.rois
    }

    /// 替换 ROI 列表, 不检查磁盘.
    pub fn set_rois(&mut self, rois: Vec<Roi>) {
        self.rois = rois;
    }

    /// ROI 个数.
    #[inline]
    pub fn n_rois(&self) -> usize {
        self.rois.len()
    }

    /// 第一个能读取到通道标签的 ROI 的通道标签.
    pub fn channel_labels(&self) -> Option<&ChannelLabels> {
        self.rois.iter().find_map(|r| r.channel_labels().ok())
    }

    /// 把 `clusters` 中属于本样本的部分分发到各 ROI.
    pub fn set_clusters(&mut self, clusters: &Clusters) {
        for roi in self.rois.iter_mut() {
            let mine = clusters.for_roi(&self.name, roi.name());
            roi.set_clusters(mine);
        }
    }
}

/// ROI 编号为非负整数; 也接受 `2.0` 这样取整数值的小数.
fn parse_roi_number(v: &str) -> Option<u32> {
    let v = v.trim();
    v.parse::<u32>().ok().or_else(|| {
        let x = v.parse::<f64>().ok()?;
        (x.fract() == 0.0 && (0.0..=f64::from(u32::MAX)).contains(&x)).then_some(x as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stack;
    use ndarray::Array3;

    fn touch_stack(dir: &Path, roi: &str) {
        std::fs::create_dir_all(dir).unwrap();
        Stack::new(Array3::zeros((1, 2, 2)))
            .save(dir.join(format!("{roi}_full.tiff")))
            .unwrap();
    }

    #[test]
    fn test_discover_by_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s1");
        touch_stack(&root.join("tiffs"), "s1-02");
        touch_stack(&root.join("tiffs"), "s1-01");
        touch_stack(&root.join("tiffs"), "s10-01");
        let s = Sample::new("s1".into(), &root, true, vec![], None, None).unwrap();
        let names: Vec<_> = s.rois().iter().map(Roi::name).collect();
        assert_eq!(names, vec!["s1-01", "s1-02"]);
        assert_eq!(s.rois()[1].roi_number(), Some(2));
    }

    #[test]
    fn test_discover_by_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s1");
        touch_stack(&root.join("tiffs"), "s1-01");
        touch_stack(&root.join("tiffs"), "s1-03");
        let md = MetadataTable::from_reader("sample_name,roi_number\ns1,1\ns1,2\ns1,3\n".as_bytes())
            .unwrap();
        let s = Sample::new("s1".into(), &root, true, vec![], Some(md), None).unwrap();
        let names: Vec<_> = s.rois().iter().map(Roi::name).collect();
        // s1-02 不存在, 被跳过.
        assert_eq!(names, vec!["s1-01", "s1-03"]);
    }

    #[test]
    fn test_invalid_roi_numbers_skipped() {
        assert_eq!(parse_roi_number(" 3 "), Some(3));
        assert_eq!(parse_roi_number("3.0"), Some(3));
        assert_eq!(parse_roi_number("3.5"), None);
        assert_eq!(parse_roi_number("-1"), None);
        assert_eq!(parse_roi_number(""), None);

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s1");
        touch_stack(&root.join("tiffs"), "s1-01");
        touch_stack(&root.join("tiffs"), "s1-03");
        let md = MetadataTable::from_reader("sample_name,roi_number\ns1,1\ns1,x\ns1,3.0\n".as_bytes())
            .unwrap();
        let s = Sample::new("s1".into(), &root, true, vec![], Some(md), None).unwrap();
        let names: Vec<_> = s.rois().iter().map(Roi::name).collect();
        assert_eq!(names, vec!["s1-01", "s1-03"]);
    }

    #[test]
    fn test_attributes_and_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("s1");
        touch_stack(&root.join("tiffs"), "s1-01");
        let mut s = Sample::new(
            "s1".into(),
            &root,
            true,
            vec![("disease".into(), "COVID".into())],
            None,
            None,
        )
        .unwrap();
        assert_eq!(s.attribute("disease"), Some("COVID"));
        assert_eq!(s.attribute("name"), Some("s1"));
        assert_eq!(s.attribute("batch"), None);

        let clusters: Clusters = [
            (super::super::CellKey::new("s1", "s1-01", 3), "a".to_string()),
            (super::super::CellKey::new("s2", "s2-01", 3), "b".to_string()),
        ]
        .into_iter()
        .collect();
        s.set_clusters(&clusters);
        let c = s.rois()[0].clusters().unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[&3], "a");
    }
}
