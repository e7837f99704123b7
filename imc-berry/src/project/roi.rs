//! 单个 ROI: 一个多通道图像栈及其通道标签、分割掩膜和聚类标签.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use once_cell::sync::OnceCell;

use crate::consts::names::ROI_STACKS_DIR;
use crate::{ChannelExclude, ChannelLabels, CompactMask, Idx3d, ImcError, ImcResult, Mask, Stack};

/// ROI 的输入文件类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RoiInput {
    /// 多通道图像栈, `<roi>_full.tiff`.
    Stack,

    /// 通道标签, `<roi>_full.csv`.
    ChannelLabels,

    /// 细胞掩膜, `<roi>_full_mask.tiff`.
    CellMask,

    /// 细胞核掩膜, `<roi>_full_nucmask.tiff`.
    NucleiMask,

    /// 像素分类概率, `<roi>_Probabilities.tiff`.
    Probabilities,
}

impl RoiInput {
    /// 文件名中 ROI 名之后的部分.
    pub const fn suffix(&self) -> &'static str {
        match self {
            RoiInput::Stack => "_full.tiff",
            RoiInput::ChannelLabels => "_full.csv",
            RoiInput::CellMask => "_full_mask.tiff",
            RoiInput::NucleiMask => "_full_nucmask.tiff",
            RoiInput::Probabilities => "_Probabilities.tiff",
        }
    }
}

/// 掩膜类型.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaskKind {
    /// 细胞.
    Cell,

    /// 细胞核.
    Nuclei,
}

impl MaskKind {
    /// 对应的输入文件.
    pub const fn input(&self) -> RoiInput {
        match self {
            MaskKind::Cell => RoiInput::CellMask,
            MaskKind::Nuclei => RoiInput::NucleiMask,
        }
    }

    /// 分割结果字典中的键.
    pub const fn key(&self) -> &'static str {
        match self {
            MaskKind::Cell => "cell",
            MaskKind::Nuclei => "nuclei",
        }
    }
}

/// 单个 ROI.
///
/// 图像栈、通道标签和掩膜在第一次访问时从磁盘读取并缓存; 掩膜以压缩形式缓存.
#[derive(Debug)]
pub struct Roi {
    name: String,
    sample_name: String,
    root_dir: PathBuf,
    subfolder: bool,
    roi_number: Option<u32>,
    channel_exclude: ChannelExclude,

    stack: OnceCell<Stack>,
    channel_labels: OnceCell<ChannelLabels>,
    cell_mask: OnceCell<CompactMask>,
    nuclei_mask: OnceCell<CompactMask>,
    clusters: Option<BTreeMap<u32, String>>,
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Roi {
    /// 构建. `root_dir` 为样本的根目录, `subfolder` 为真时文件位于 `root_dir/tiffs` 下.
    pub fn new<P: Into<PathBuf>>(
        name: String,
        sample_name: String,
        root_dir: P,
        subfolder: bool,
        roi_number: Option<u32>,
    ) -> Self {
        Self {
            name,
            sample_name,
            root_dir: root_dir.into(),
            subfolder,
            roi_number,
            channel_exclude: ChannelExclude::none(),
            stack: OnceCell::new(),
            channel_labels: OnceCell::new(),
            cell_mask: OnceCell::new(),
            nuclei_mask: OnceCell::new(),
            clusters: None,
        }
    }

    /// 由图像栈文件直接构建, 不依赖项目目录约定. 其它输入文件与图像栈位于同一目录.
    pub fn from_stack_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let name = crate::dataset::roi_name_of(path)?;
        let dir = path.parent()?.to_path_buf();
        Some(Self::new(name.clone(), name, dir, false, None))
    }

    /// ROI 名.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 所属样本名.
    #[inline]
    pub fn sample_name(&self) -> &str {
        &self.sample_name
    }

    /// ROI 编号.
    #[inline]
    pub fn roi_number(&self) -> Option<u32> {
        self.roi_number
    }

    /// 样本根目录.
    #[inline]
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// 存放输入文件的目录.
    pub fn stacks_dir(&self) -> PathBuf {
        if self.subfolder {
            self.root_dir.join(ROI_STACKS_DIR)
        } else {
            self.root_dir.clone()
        }
    }

    /// 输入文件路径.
    pub fn input_path(&self, input: RoiInput) -> PathBuf {
        self.stacks_dir().join(format!("{}{}", self.name, input.suffix()))
    }

    /// 需要排除的通道.
    #[inline]
    pub fn channel_exclude(&self) -> &ChannelExclude {
        &self.channel_exclude
    }

    /// 设置需要排除的通道.
    pub fn set_channel_exclude(&mut self, exclude: ChannelExclude) {
        self.channel_exclude = exclude;
    }

    /// 图像栈. 第一次调用时从磁盘读取.
    pub fn stack(&self) -> ImcResult<&Stack> {
        self.stack.get_or_try_init(|| {
            let path = self.input_path(RoiInput::Stack);
            debug!("Reading stack of `{}` from `{}`", self.name, path.display());
            Stack::open(path)
        })
    }

    /// 直接设置图像栈, 不读取磁盘.
    pub fn set_stack(&mut self, stack: Stack) {
        self.stack = OnceCell::with_value(stack);
    }

    /// 图像栈形状 (通道, 高, 宽).
    pub fn shape(&self) -> ImcResult<Idx3d> {
        self.stack().map(Stack::shape)
    }

    /// 通道标签. 第一次调用时从磁盘读取.
    pub fn channel_labels(&self) -> ImcResult<&ChannelLabels> {
        self.channel_labels
            .get_or_try_init(|| ChannelLabels::read_csv(self.input_path(RoiInput::ChannelLabels)))
    }

    /// 直接设置通道标签, 不读取磁盘.
    pub fn set_channel_labels(&mut self, labels: ChannelLabels) {
        self.channel_labels = OnceCell::with_value(labels);
    }

    /// 标记物名称.
    pub fn channel_names(&self) -> ImcResult<Vec<String>> {
        self.channel_labels().map(ChannelLabels::names)
    }

    /// 金属同位素.
    pub fn channel_metals(&self) -> ImcResult<Vec<String>> {
        self.channel_labels().map(ChannelLabels::metals)
    }

    fn mask_cell(&self, kind: MaskKind) -> &OnceCell<CompactMask> {
        match kind {
            MaskKind::Cell => &self.cell_mask,
            MaskKind::Nuclei => &self.nuclei_mask,
        }
    }

    /// 读取 (或从缓存解压) 掩膜.
    pub fn mask(&self, kind: MaskKind) -> ImcResult<Mask> {
        let compact = self.mask_cell(kind).get_or_try_init(|| {
            let path = self.input_path(kind.input());
            debug!("Reading {} mask of `{}`", kind.key(), self.name);
            let compact = Mask::open(path)?.compress()?;
            debug!("{} mask of `{}` cached in {} bytes", kind.key(), self.name, compact.compressed_len());
            Ok::<_, ImcError>(compact)
        })?;
        compact.decompress()
    }

    /// 细胞掩膜.
    #[inline]
    pub fn cell_mask(&self) -> ImcResult<Mask> {
        self.mask(MaskKind::Cell)
    }

    /// 细胞核掩膜.
    #[inline]
    pub fn nuclei_mask(&self) -> ImcResult<Mask> {
        self.mask(MaskKind::Nuclei)
    }

    /// 设置掩膜缓存. 掩膜形状必须与图像栈一致 (若图像栈已加载), 否则返回错误.
    pub fn set_mask(&mut self, kind: MaskKind, mask: &Mask) -> ImcResult<()> {
        if let Some(stack) = self.stack.get() {
            if stack.spatial_shape() != mask.shape() {
                return Err(ImcError::Shape(format!(
                    "mask {:?} does not match stack {:?} of `{}`",
                    mask.shape(),
                    stack.spatial_shape(),
                    self.name
                )));
            }
        }
        let compact = mask.compress()?;
        match kind {
            MaskKind::Cell => self.cell_mask = OnceCell::with_value(compact),
            MaskKind::Nuclei => self.nuclei_mask = OnceCell::with_value(compact),
        }
        Ok(())
    }

    /// 每单位面积 (像素) 的细胞数.
    pub fn cells_per_area_unit(&self) -> ImcResult<f64> {
        let mask = self.cell_mask()?;
        Ok(mask.n_objects() as f64 / mask.size() as f64)
    }

    /// 对象编号 → 聚类标签.
    #[inline]
    pub fn clusters(&self) -> Option<&BTreeMap<u32, String>> {
        self.clusters.as_ref()
    }

    /// 设置聚类标签.
    pub fn set_clusters(&mut self, clusters: BTreeMap<u32, String>) {
        self.clusters = Some(clusters);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    fn roi_in(dir: &Path) -> Roi {
        Roi::new("s1-01".into(), "s1".into(), dir, true, Some(1))
    }

    #[test]
    fn test_input_paths() {
        let roi = roi_in(Path::new("/data/processed/s1"));
        assert_eq!(
            roi.input_path(RoiInput::Stack),
            PathBuf::from("/data/processed/s1/tiffs/s1-01_full.tiff")
        );
        assert_eq!(
            roi.input_path(RoiInput::NucleiMask),
            PathBuf::from("/data/processed/s1/tiffs/s1-01_full_nucmask.tiff")
        );
        let flat = Roi::new("s1-01".into(), "s1".into(), "/p", false, None);
        assert_eq!(flat.input_path(RoiInput::Probabilities), PathBuf::from("/p/s1-01_Probabilities.tiff"));
    }

    #[test]
    fn test_lazy_loading() {
        let dir = tempfile::tempdir().unwrap();
        let roi = roi_in(dir.path());
        std::fs::create_dir_all(roi.stacks_dir()).unwrap();
        Stack::new(Array3::from_elem((2, 2, 3), 1.0))
            .save(roi.input_path(RoiInput::Stack))
            .unwrap();
        ChannelLabels::new(["DNA1(Ir191)", "CD3(Er170)"])
            .write_csv(std::fs::File::create(roi.input_path(RoiInput::ChannelLabels)).unwrap())
            .unwrap();
        let mask = Mask::new(arr2(&[[0, 1, 1], [2, 0, 0]]));
        mask.save(roi.input_path(RoiInput::CellMask)).unwrap();

        assert_eq!(roi.shape().unwrap(), (2, 2, 3));
        assert_eq!(roi.channel_names().unwrap(), vec!["DNA1", "CD3"]);
        assert_eq!(roi.cell_mask().unwrap(), mask);
        assert!((roi.cells_per_area_unit().unwrap() - 2.0 / 6.0).abs() < 1e-12);
        assert!(matches!(roi.nuclei_mask(), Err(ImcError::MissingFile(_))));
    }

    #[test]
    fn test_set_mask_checks_shape() {
        let mut roi = roi_in(Path::new("/nowhere"));
        roi.set_stack(Stack::new(Array3::zeros((1, 2, 2))));
        let bad = Mask::new(arr2(&[[0, 1, 1]]));
        assert!(roi.set_mask(MaskKind::Cell, &bad).is_err());
        let good = Mask::new(arr2(&[[0, 1], [1, 1]]));
        roi.set_mask(MaskKind::Nuclei, &good).unwrap();
        assert_eq!(roi.nuclei_mask().unwrap(), good);
    }

    #[test]
    fn test_from_stack_path() {
        let roi = Roi::from_stack_path("/x/y/a-03_full.tiff").unwrap();
        assert_eq!(roi.name(), "a-03");
        assert_eq!(roi.input_path(RoiInput::CellMask), PathBuf::from("/x/y/a-03_full_mask.tiff"));
    }
}
