//! 项目 → 样本 → ROI 的层级数据模型.
//!
//! 项目由一份元数据 CSV (或处理后数据目录的扫描结果) 构建: 元数据按若干列分组,
//! 每组得到一个 [`Sample`], 每个样本再按目录约定找到自己的 [`Roi`].
//! 单细胞定量与聚类结果按需计算, 缓存在内存中, 也可以随时从结果目录重新读取.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};

mod clusters;
mod metadata;
mod roi;
mod sample;

pub use clusters::{CellKey, Clusters};
pub use metadata::{MetadataGroup, MetadataTable};
pub use roi::{MaskKind, Roi, RoiInput};
pub use sample::Sample;

use crate::consts::names::{
    DEFAULT_PROCESSED_DIR_NAME, DEFAULT_PROJECT_NAME, DEFAULT_RESULTS_DIR_NAME,
    DEFAULT_SAMPLE_NAME_ATTRIBUTE, QC_DIR, ROI_NUMBER_ATTRIBUTE, SINGLE_CELL_DIR,
    SUBFOLDERS_PER_SAMPLE,
};
use crate::ops::{self, AdjacencyOptions, CellTable, ClusterOptions, ComparisonOptions, ComparisonResult};
use crate::{
    dataset, plot, ChannelExclude, ChannelLabel, ChannelLabels, ImcError, ImcResult, LabeledMatrix, Reduce,
};

/// 构建项目的配置.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    /// 项目名, 用作结果文件名前缀.
    pub name: String,

    /// 样本元数据 CSV. 缺省时扫描 `processed_dir`.
    pub metadata: Option<PathBuf>,

    /// 通道面板元数据 CSV.
    pub panel_metadata: Option<PathBuf>,

    /// 预处理数据目录.
    pub processed_dir: PathBuf,

    /// 结果目录.
    pub results_dir: PathBuf,

    /// 元数据中样本名所在的列.
    pub sample_name_attribute: String,

    /// 用于把元数据分组为样本的列. 为空时按所有列分组.
    pub sample_grouping_attributes: Vec<String>,

    /// 是否每个样本一个子目录.
    pub subfolder_per_sample: bool,

    /// 是否按开关列过滤元数据.
    pub toggle: bool,

    /// 需要排除的通道.
    pub channel_exclude: ChannelExclude,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROJECT_NAME.to_string(),
            metadata: None,
            panel_metadata: None,
            processed_dir: PathBuf::from(DEFAULT_PROCESSED_DIR_NAME),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR_NAME),
            sample_name_attribute: DEFAULT_SAMPLE_NAME_ATTRIBUTE.to_string(),
            sample_grouping_attributes: vec![DEFAULT_SAMPLE_NAME_ATTRIBUTE.to_string()],
            subfolder_per_sample: SUBFOLDERS_PER_SAMPLE,
            toggle: true,
            channel_exclude: ChannelExclude::none(),
        }
    }
}

/// 选择一部分样本和/或 ROI. `None` 表示全部.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    /// 样本名.
    pub samples: Option<Vec<String>>,

    /// ROI 名.
    pub rois: Option<Vec<String>>,
}

impl Selection {
    /// 全部样本与 ROI.
    pub fn all() -> Self {
        Self::default()
    }

    /// 只选择给定样本.
    pub fn samples<S: Into<String>, I: IntoIterator<Item = S>>(names: I) -> Self {
        Self {
            samples: Some(names.into_iter().map(Into::into).collect()),
            rois: None,
        }
    }

    /// 只选择给定 ROI.
    pub fn rois<S: Into<String>, I: IntoIterator<Item = S>>(names: I) -> Self {
        Self {
            samples: None,
            rois: Some(names.into_iter().map(Into::into).collect()),
        }
    }

    /// 样本是否被选中?
    pub fn has_sample(&self, name: &str) -> bool {
        self.samples.as_ref().map_or(true, |v| v.iter().any(|s| s == name))
    }

    /// ROI 是否被选中?
    pub fn has_roi(&self, roi: &Roi) -> bool {
        self.has_sample(roi.sample_name())
            && self.rois.as_ref().map_or(true, |v| v.iter().any(|r| r == roi.name()))
    }
}

/// 项目层面的结果文件.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProjectInput {
    /// 单细胞聚类标签.
    ClusterAssignments,

    /// 单细胞定量表.
    Quantification,
}

impl ProjectInput {
    /// 文件名中项目名之后的部分.
    pub const fn suffix(&self) -> &'static str {
        match self {
            ProjectInput::ClusterAssignments => ".single_cell.cluster_assignments.csv",
            ProjectInput::Quantification => ".quantification.csv",
        }
    }
}

/// 一个 IMC 项目.
#[derive(Debug)]
pub struct Project {
    config: ProjectConfig,
    metadata: MetadataTable,
    panel_metadata: Option<Arc<MetadataTable>>,
    samples: Vec<Sample>,
    quantification: Option<CellTable>,
    clusters: Option<Clusters>,
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Project '{}' with {} and {} in total.",
            self.config.name,
            plural(self.n_samples(), "sample", "samples"),
            plural(self.n_rois(), "ROI", "ROIs"),
        )
    }
}

/// 扫描处理后数据目录得到样本名, 按名称排序.
///
/// 每个样本一个子目录时样本名为子目录名, 否则每个 `<sample>_full.tiff` 一个样本.
fn detect_samples(processed_dir: &Path, subfolder: bool) -> ImcResult<Vec<String>> {
    if !processed_dir.is_dir() {
        warn!("Processed directory `{}` does not exist", processed_dir.display());
        return Ok(vec![]);
    }
    let mut names: Vec<String> = if subfolder {
        std::fs::read_dir(processed_dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .collect()
    } else {
        dataset::find_stacks(processed_dir, |_| true)?
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    };
    names.sort();
    Ok(names)
}

impl Project {
    /// 由配置构建项目, 并发现所有样本和 ROI.
    pub fn new(config: ProjectConfig) -> ImcResult<Self> {
        let mut metadata = match &config.metadata {
            Some(path) => MetadataTable::from_path(path)?,
            None => {
                let names = detect_samples(&config.processed_dir, config.subfolder_per_sample)?;
                info!("Detected {} sample(s) in `{}`", names.len(), config.processed_dir.display());
                MetadataTable::new(
                    vec![config.sample_name_attribute.clone()],
                    names.into_iter().map(|n| vec![n]).collect(),
                )
            }
        };
        if config.toggle {
            let dropped = metadata.filter_toggle();
            if dropped > 0 {
                info!("Toggle column removed {dropped} metadata row(s)");
            }
        }
        let panel_metadata = match &config.panel_metadata {
            Some(path) => Some(Arc::new(MetadataTable::from_path(path)?)),
            None => None,
        };

        let mut samples = vec![];
        for group in metadata.group_by(&config.sample_grouping_attributes)? {
            let constant = group.constant_columns();
            let name = constant
                .iter()
                .find(|(k, _)| *k == config.sample_name_attribute)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| ImcError::MissingColumn(config.sample_name_attribute.clone()))?;
            let attributes: Vec<(String, String)> = constant
                .into_iter()
                .filter(|(k, _)| *k != config.sample_name_attribute)
                .collect();
            let table = group.to_table();
            let roi_metadata = (group.len() > 1 || table.has_column(ROI_NUMBER_ATTRIBUTE)).then_some(table);
            let root = if config.subfolder_per_sample {
                config.processed_dir.join(&name)
            } else {
                config.processed_dir.clone()
            };
            let mut sample = Sample::new(
                name,
                root,
                config.subfolder_per_sample,
                attributes,
                roi_metadata,
                panel_metadata.clone(),
            )?;
            for roi in sample.rois_mut() {
                roi.set_channel_exclude(config.channel_exclude.clone());
            }
            samples.push(sample);
        }

        let project = Self {
            config,
            metadata,
            panel_metadata,
            samples,
            quantification: None,
            clusters: None,
        };
        if project.n_rois() == 0 {
            warn!(
                "No ROI found in project `{}`. Expected stacks at \
                 `<processed>/<sample>/tiffs/<sample>-<nn>_full.tiff` (one subfolder per sample) \
                 or `<processed>/<sample>-<nn>_full.tiff` (flat layout).",
                project.config.name
            );
        }
        info!("{project}");
        Ok(project)
    }

    /// 项目名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 配置.
    #[inline]
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// 经过开关过滤后的样本元数据.
    #[inline]
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// 通道面板元数据.
    pub fn panel_metadata(&self) -> Option<&MetadataTable> {
        self.panel_metadata.as_deref()
    }

    /// 所有样本.
    #[inline]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// 所有 ROI, 按样本顺序.
    pub fn rois(&self) -> Vec<&Roi> {
        self.samples.iter().flat_map(|s| s.rois().iter()).collect()
    }

    /// 样本数.
    #[inline]
    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// ROI 总数.
    pub fn n_rois(&self) -> usize {
        self.samples.iter().map(Sample::n_rois).sum()
    }

    /// 按名称查找样本.
    pub fn get_sample(&self, name: &str) -> Option<&Sample> {
        self.samples.iter().find(|s| s.name() == name)
    }

    /// 按名称查找 ROI.
    pub fn get_roi(&self, name: &str) -> Option<&Roi> {
        self.samples
            .iter()
            .flat_map(|s| s.rois().iter())
            .find(|r| r.name() == name)
    }

    /// 选中的样本.
    pub fn selected_samples(&self, sel: &Selection) -> Vec<&Sample> {
        self.samples.iter().filter(|s| sel.has_sample(s.name())).collect()
    }

    /// 选中的 ROI.
    pub fn selected_rois(&self, sel: &Selection) -> Vec<&Roi> {
        self.rois().into_iter().filter(|r| sel.has_roi(r)).collect()
    }

    /// 每个样本的通道标签 (第一个能读到标签的 ROI).
    pub fn channel_labels(&self) -> Vec<(&str, Option<&ChannelLabels>)> {
        self.samples.iter().map(|s| (s.name(), s.channel_labels())).collect()
    }

    /// 结果目录.
    #[inline]
    pub fn results_dir(&self) -> &Path {
        &self.config.results_dir
    }

    /// 项目层面结果文件的路径, 位于 `<results>/single_cell/`.
    pub fn input_filename(&self, input: ProjectInput) -> PathBuf {
        self.results_dir()
            .join(SINGLE_CELL_DIR)
            .join(format!("{}{}", self.config.name, input.suffix()))
    }

    fn prefix_in(&self, dir: &str) -> PathBuf {
        self.results_dir().join(dir).join(format!("{}.", self.config.name))
    }

    /// 通道 × ROI 的整体强度表, 见 [`ops::channel_summary`].
    pub fn channel_summary(&self, sel: &Selection, reduce: Reduce) -> ImcResult<LabeledMatrix> {
        ops::channel_summary(&self.selected_rois(sel), reduce, &self.config.channel_exclude)
    }

    /// 通道相关系数, 见 [`ops::channel_correlation`].
    pub fn channel_correlation(&self, sel: &Selection) -> ImcResult<LabeledMatrix> {
        ops::channel_correlation(&self.selected_rois(sel), &self.config.channel_exclude)
    }

    /// 单细胞强度.
    pub fn quantify_cell_intensity(&self, sel: &Selection, reduce: Reduce) -> ImcResult<CellTable> {
        ops::quantify_cell_intensity(&self.selected_rois(sel), reduce)
    }

    /// 单细胞形态学参数.
    pub fn quantify_cell_morphology(&self, sel: &Selection) -> ImcResult<CellTable> {
        ops::quantify_cell_morphology(&self.selected_rois(sel))
    }

    /// 单细胞定量. 结果缓存在项目中; `save` 为真时写出到
    /// [`ProjectInput::Quantification`].
    pub fn quantify_cells(
        &mut self,
        sel: &Selection,
        intensity: bool,
        morphology: bool,
        save: bool,
    ) -> ImcResult<&CellTable> {
        let table = ops::quantify_cells(&self.selected_rois(sel), intensity, morphology)?;
        if save {
            let path = self.input_filename(ProjectInput::Quantification);
            info!("Writing quantification to `{}`", path.display());
            table.save(path)?;
        }
        Ok(&*self.quantification.insert(table))
    }

    /// 单细胞定量表. 不在内存中时从结果目录读取.
    pub fn quantification(&mut self) -> ImcResult<&CellTable> {
        if self.quantification.is_none() {
            let path = self.input_filename(ProjectInput::Quantification);
            info!("Reading quantification from `{}`", path.display());
            self.quantification = Some(CellTable::open(path)?);
        }
        self.quantification
            .as_ref()
            .ok_or_else(|| ImcError::MissingFile(self.input_filename(ProjectInput::Quantification)))
    }

    /// 用于聚类的通道: 面板元数据中 `cell_type` 为 1 的通道, 否则为
    /// 定量表中所有未被排除的强度通道.
    fn cell_type_channels(&self, table: &CellTable) -> Vec<String> {
        let from_panel = self
            .panel_metadata()
            .and_then(|p| panel_cell_type_channels(p, table.features()));
        match from_panel {
            Some(ch) if !ch.is_empty() => ch,
            _ => table
                .features()
                .iter()
                .filter(|f| !ops::MORPHOLOGY_FEATURES.contains(&f.as_str()))
                .filter(|f| !self.config.channel_exclude.excludes(f))
                .cloned()
                .collect(),
        }
    }

    /// 单细胞聚类. 需要单细胞定量表 (内存中或结果目录中, 都没有时先计算强度).
    /// 结果设置到各 ROI; `save` 为真时写出到 [`ProjectInput::ClusterAssignments`].
    pub fn cluster_cells(&mut self, opts: &ClusterOptions, save: bool) -> ImcResult<&Clusters> {
        if self.quantification.is_none() {
            if self.input_filename(ProjectInput::Quantification).is_file() {
                self.quantification()?;
            } else {
                self.quantify_cells(&Selection::all(), true, false, save)?;
            }
        }
        let table = self
            .quantification
            .as_ref()
            .ok_or_else(|| ImcError::MissingFile(self.input_filename(ProjectInput::Quantification)))?;
        let channels = self.cell_type_channels(table);
        let clusters = ops::single_cell_analysis(table, Some(&channels), opts)?;
        self.set_clusters(clusters, save)
    }

    /// 聚类标签. 不在内存中时从结果目录读取并分发到各 ROI.
    pub fn clusters(&mut self) -> ImcResult<&Clusters> {
        if self.clusters.is_none() {
            let path = self.input_filename(ProjectInput::ClusterAssignments);
            info!("Reading cluster assignments from `{}`", path.display());
            let clusters = Clusters::open(path)?;
            return self.set_clusters(clusters, false);
        }
        self.clusters
            .as_ref()
            .ok_or_else(|| ImcError::MissingFile(self.input_filename(ProjectInput::ClusterAssignments)))
    }

    /// 设置聚类标签并分发到各样本的 ROI; `save` 为真时写出.
    pub fn set_clusters(&mut self, clusters: Clusters, save: bool) -> ImcResult<&Clusters> {
        if save {
            let path = self.input_filename(ProjectInput::ClusterAssignments);
            info!("Writing cluster assignments to `{}`", path.display());
            clusters.save(path)?;
        }
        for s in self.samples.iter_mut() {
            s.set_clusters(&clusters);
        }
        Ok(&*self.clusters.insert(clusters))
    }

    /// 重命名聚类标签, 不在 `map` 中的标签保持不变.
    pub fn rename_clusters(&mut self, map: &HashMap<String, String>, save: bool) -> ImcResult<&Clusters> {
        let renamed = self.clusters()?.rename(map);
        self.set_clusters(renamed, save)
    }

    /// 尽量载入聚类标签; 结果目录中没有时只记录警告.
    fn try_load_clusters(&mut self) {
        if self.clusters.is_none() {
            if let Err(e) = self.clusters() {
                warn!("Cluster assignments unavailable: {e}");
            }
        }
    }

    /// 组间比较, 见 [`ops::sample_comparisons`]. 输出前缀缺省时为
    /// `<results>/single_cell/<name>.`.
    pub fn sample_comparisons(&mut self, opts: &ComparisonOptions) -> ImcResult<ComparisonResult> {
        self.try_load_clusters();
        let mut opts = opts.clone();
        if opts.output_prefix == ComparisonOptions::default().output_prefix {
            opts.output_prefix = self.prefix_in(SINGLE_CELL_DIR);
        }
        if opts.exclude.is_empty() {
            opts.exclude = self.config.channel_exclude.clone();
        }
        let samples: Vec<&Sample> = self.samples.iter().collect();
        ops::sample_comparisons(&samples, &opts)
    }

    /// 细胞类型邻接分析, 结果写在 `<results>/single_cell/` 下.
    pub fn measure_adjacency(
        &mut self,
        sel: &Selection,
        opts: &AdjacencyOptions,
    ) -> ImcResult<Vec<(String, LabeledMatrix)>> {
        self.try_load_clusters();
        let prefix = self.prefix_in(SINGLE_CELL_DIR);
        ops::measure_adjacency(&self.selected_rois(sel), &prefix, opts)
    }

    /// 每个选中 ROI 的全部通道面板图, 写出 `<results>/qc/<name>.<roi>.all_channels.png`.
    pub fn plot_channels(&self, sel: &Selection) -> ImcResult<Vec<PathBuf>> {
        let mut out = vec![];
        for roi in self.selected_rois(sel) {
            let path = PathBuf::from(format!(
                "{}{}.all_channels.png",
                self.prefix_in(QC_DIR).display(),
                roi.name()
            ));
            let stack = roi.stack()?;
            let labels = roi.channel_labels()?;
            let keep = roi.channel_exclude().keep(labels);
            plot::channel_panels(&path, &stack.select(&keep), &labels.select(&keep))?;
            out.push(path);
        }
        Ok(out)
    }

    /// 每个选中且有聚类标签的 ROI 的细胞类型图,
    /// 写出 `<results>/single_cell/<name>.<roi>.cell_types.png`.
    pub fn plot_cell_types(&mut self, sel: &Selection) -> ImcResult<Vec<PathBuf>> {
        self.try_load_clusters();
        let labels: Vec<String> = self.clusters.as_ref().map(Clusters::labels).unwrap_or_default();
        let mut out = vec![];
        for roi in self.selected_rois(sel) {
            let Some(clusters) = roi.clusters() else {
                warn!("ROI `{}` has no cluster assignments", roi.name());
                continue;
            };
            let path = PathBuf::from(format!(
                "{}{}.cell_types.png",
                self.prefix_in(SINGLE_CELL_DIR).display(),
                roi.name()
            ));
            plot::cell_type_map(&path, &roi.cell_mask()?, clusters, &labels)?;
            out.push(path);
        }
        Ok(out)
    }

    /// 每个 ROI 的细胞数.
    pub fn cell_counts(&self) -> ImcResult<BTreeMap<String, usize>> {
        self.rois()
            .into_iter()
            .map(|r| Ok((r.name().to_string(), r.cell_mask()?.n_objects())))
            .collect()
    }
}

/// 面板元数据中 `cell_type` 为 1 的通道在定量表中对应的特征.
///
/// 面板第一列为通道 (与列名无关), 其值可以是完整标签 `Name(Metal)` 或仅通道名.
/// 没有 `cell_type` 列时返回 `None`.
fn panel_cell_type_channels(panel: &MetadataTable, features: &[String]) -> Option<Vec<String>> {
    let flags = panel.column("cell_type").ok()?;
    let wanted: Vec<&str> = panel
        .rows()
        .iter()
        .zip(flags)
        .filter(|(_, f)| f.trim().parse::<f64>().map_or(false, |v| v == 1.0))
        .filter_map(|(row, _)| row.first().map(|c| c.trim()))
        .collect();
    let matched: Vec<String> = features
        .iter()
        .filter(|f| {
            let name = ChannelLabel::parse(f).name().trim().to_string();
            wanted.iter().any(|w| *w == f.as_str() || *w == name)
        })
        .cloned()
        .collect();
    if matched.len() < wanted.len() {
        warn!(
            "{} of {} cell type channel(s) in the panel are not quantified",
            wanted.len() - matched.len(),
            wanted.len()
        );
    }
    Some(matched)
}
