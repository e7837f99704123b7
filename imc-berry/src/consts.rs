//! 通用常量.

/// 项目目录与文件的默认命名.
pub mod names {
    /// 默认项目名.
    pub const DEFAULT_PROJECT_NAME: &str = "project";

    /// 元数据表中, 样本名所在的列.
    pub const DEFAULT_SAMPLE_NAME_ATTRIBUTE: &str = "sample_name";

    /// 元数据表中, 开关列. 值为假的行不参与构建项目.
    pub const DEFAULT_TOGGLE_ATTRIBUTE: &str = "toggle";

    /// 元数据表中, ROI 编号所在的列.
    pub const ROI_NUMBER_ATTRIBUTE: &str = "roi_number";

    /// 预处理数据目录.
    pub const DEFAULT_PROCESSED_DIR_NAME: &str = "processed";

    /// 结果目录.
    pub const DEFAULT_RESULTS_DIR_NAME: &str = "results";

    /// 结果目录下存放单细胞结果的子目录.
    pub const SINGLE_CELL_DIR: &str = "single_cell";

    /// 结果目录下存放质控图的子目录.
    pub const QC_DIR: &str = "qc";

    /// 样本目录下存放 TIFF 栈和掩膜的子目录.
    pub const ROI_STACKS_DIR: &str = "tiffs";

    /// 默认每个样本一个子目录.
    pub const SUBFOLDERS_PER_SAMPLE: bool = true;

    /// 以健康对照命名的组在比较结果中总是放在第二列.
    pub const CONTROL_GROUP_MARKER: &str = "Healthy";
}

/// 掩膜像素值.
pub mod mask {
    /// 掩膜中背景的像素值. 其它值均为细胞 (对象) 编号.
    pub const BACKGROUND: u32 = 0;

    /// 像素是否是背景?
    #[inline]
    pub const fn is_background(p: u32) -> bool {
        p == BACKGROUND
    }

    /// 像素是否属于某个对象?
    #[inline]
    pub const fn is_object(p: u32) -> bool {
        p != BACKGROUND
    }
}

/// 通道名匹配规则.
pub mod pattern {
    /// 核通道: 通道标签包含该子串.
    pub const NUCLEAR_CHANNELS: &str = "DNA";

    /// 细胞质通道: 通道标签 **不** 匹配该正则.
    pub const NON_CYTOPLASM_CHANNELS: &str = "DNA|Ki67|SMA";
}

/// DeepCell 模型要求的固定输入边长.
pub const DEEPCELL_INPUT_SIDE: usize = 256;

/// 直方图均衡的分箱数.
pub const HISTOGRAM_BINS: usize = 256;

/// matplotlib `tab20` 调色板.
pub const TAB20: [(u8, u8, u8); 20] = [
    (31, 119, 180),
    (174, 199, 232),
    (255, 127, 14),
    (255, 187, 120),
    (44, 160, 44),
    (152, 223, 138),
    (214, 39, 40),
    (255, 152, 150),
    (148, 103, 189),
    (197, 176, 213),
    (140, 86, 75),
    (196, 156, 148),
    (227, 119, 194),
    (247, 182, 210),
    (127, 127, 127),
    (199, 199, 199),
    (188, 189, 34),
    (219, 219, 141),
    (23, 190, 207),
    (158, 218, 229),
];

/// matplotlib `tab10` 调色板.
pub const TAB10: [(u8, u8, u8); 10] = [
    (31, 119, 180),
    (255, 127, 14),
    (44, 160, 44),
    (214, 39, 40),
    (148, 103, 189),
    (140, 86, 75),
    (227, 119, 194),
    (127, 127, 127),
    (188, 189, 34),
    (23, 190, 207),
];
