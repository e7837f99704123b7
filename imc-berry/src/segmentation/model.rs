//! 分割模型接口, 以及通过外部进程运行模型的实现.

use std::path::Path;
use std::process::Command;

use log::{debug, info};
use ndarray::{Array3, ArrayView3};

use super::{Compartment, ModelKind};
use crate::{tiff_io, ImcError, ImcResult};

/// 送入模型的输入.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInput {
    /// 模型种类.
    pub model: ModelKind,

    /// 分割的区域.
    pub compartment: Compartment,

    /// 形状为 (高, 宽, 平面), 通道在最后一维.
    pub data: Array3<f32>,
}

impl ModelInput {
    /// 空间尺寸.
    pub fn spatial_shape(&self) -> (usize, usize) {
        let (h, w, _) = self.data.dim();
        (h, w)
    }

    /// 以 (平面, 高, 宽) 视角访问.
    pub fn planes(&self) -> ArrayView3<'_, f32> {
        self.data.view().permuted_axes([2, 0, 1])
    }
}

/// 预训练的分割模型.
///
/// 输出形状为 (高, 宽, K) 的标签图, 0 为背景. 对 [`Compartment::Both`]
/// K 至少为 2 (平面 0 为细胞, 平面 1 为细胞核), 其它情况 K 至少为 1.
pub trait SegmentationModel {
    /// 预测.
    fn predict(&self, input: &ModelInput) -> ImcResult<Array3<u32>>;
}

impl<M: SegmentationModel + ?Sized> SegmentationModel for &M {
    fn predict(&self, input: &ModelInput) -> ImcResult<Array3<u32>> {
        (**self).predict(input)
    }
}

/// 通过外部程序运行模型.
///
/// 输入以多页 32 位浮点 TIFF (每平面一页) 写入临时目录, 程序把标签图写为
/// 多页 TIFF (每个输出平面一页). 参数中的 `{input}`, `{output}`, `{compartment}`,
/// `{model}` 会被替换.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// 由程序和参数构建.
    pub fn new<S: Into<String>>(program: S, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 由以空白分隔的命令行构建, 例如 `"python run_deepcell.py {input} {output}"`.
    pub fn parse(command: &str) -> ImcResult<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ImcError::Model("empty model command".to_string()))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// 程序名.
    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    fn expand(&self, input: &Path, output: &Path, m: &ModelInput) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace("{input}", &input.to_string_lossy())
                    .replace("{output}", &output.to_string_lossy())
                    .replace("{compartment}", m.compartment.name())
                    .replace("{model}", m.model.name())
            })
            .collect()
    }
}

impl SegmentationModel for CommandModel {
    fn predict(&self, input: &ModelInput) -> ImcResult<Array3<u32>> {
        let dir = tempfile::tempdir()?;
        let in_path = dir.path().join("input.tiff");
        let out_path = dir.path().join("output.tiff");
        tiff_io::write_stack(&in_path, input.planes())?;

        let args = self.expand(&in_path, &out_path, input);
        info!("Running model `{}` on a {:?} input", self.program, input.data.dim());
        debug!("Model arguments: {args:?}");
        let output = Command::new(&self.program).args(&args).output()?;
        if !output.status.success() {
            return Err(ImcError::Model(format!(
                "`{}` exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !out_path.is_file() {
            return Err(ImcError::MissingFile(out_path));
        }
        let labels = tiff_io::read_stack(&out_path)?;
        Ok(labels
            .permuted_axes([1, 2, 0])
            .mapv(|v| v.round().max(0.0) as u32))
    }
}
