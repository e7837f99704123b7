//! 读写 `.ilp` (HDF5) 文件.

use std::path::{Path, PathBuf};

use hdf5::types::{FixedAscii, VarLenAscii, VarLenUnicode};
use hdf5::{Dataset, File, Group};
use log::{info, warn};
use ndarray::{Array2, Array3, ArrayD, Axis, Ix3};

use super::{
    assemble_labels, block_name, label_set_name, lane_name, retain_channels, training_image,
    BlockSlice, ChannelReduction, ModelSummary,
};
use crate::{plot, ImcError, ImcResult};

const INFOS: &str = "Input Data/infos";
const LOCAL_DATA: &str = "Input Data/local_data";
const LABEL_SETS: &str = "PixelClassification/LabelSets";
const FEATURES: &str = "FeatureSelections";

/// 外部训练文件中存放输入数据的数据集名.
const STACKED_CHANNELS: &str = "stacked_channels";

fn read_string(ds: &Dataset) -> ImcResult<String> {
    if let Ok(s) = ds.read_scalar::<VarLenUnicode>() {
        return Ok(s.as_str().to_string());
    }
    if let Ok(s) = ds.read_scalar::<VarLenAscii>() {
        return Ok(s.as_str().to_string());
    }
    Ok(ds.read_scalar::<FixedAscii<1024>>()?.as_str().to_string())
}

fn read_strings(ds: &Dataset) -> ImcResult<Vec<String>> {
    if let Ok(v) = ds.read_raw::<VarLenUnicode>() {
        return Ok(v.iter().map(|s| s.as_str().to_string()).collect());
    }
    Ok(ds
        .read_raw::<FixedAscii<256>>()?
        .iter()
        .map(|s| s.as_str().to_string())
        .collect())
}

fn block_slice(ds: &Dataset) -> ImcResult<BlockSlice> {
    let attr = ds.attr("blockSlice")?;
    let s = match attr.read_scalar::<VarLenUnicode>() {
        Ok(s) => s.as_str().to_string(),
        Err(_) => attr.read_scalar::<FixedAscii<256>>()?.as_str().to_string(),
    };
    s.parse()
}

fn training_files(f: &File) -> ImcResult<Vec<String>> {
    let infos = f.group(INFOS)?;
    (0..infos.len() as usize)
        .map(|i| read_string(&infos.dataset(&format!("{}/Raw Data/filePath", lane_name(i)))?))
        .collect()
}

fn label_block_counts(f: &File, n: usize) -> ImcResult<Vec<usize>> {
    let sets = f.group(LABEL_SETS)?;
    (0..n)
        .map(|i| match sets.group(&label_set_name(i)) {
            Ok(g) => Ok(g.len() as usize),
            Err(_) => Ok(0),
        })
        .collect()
}

/// 读取第 `file_path` 个训练输入, 形状为 (高, 宽, 通道).
///
/// 以 `Input Data` 开头的路径指向模型内部的数据集; 否则为模型目录下的外部
/// HDF5 文件, 数据位于其 `stacked_channels` 数据集.
fn training_array(f: &File, model_path: &Path, file_path: &str) -> ImcResult<Array3<f32>> {
    let arr: ArrayD<f32> = if file_path.starts_with("Input Data") {
        f.dataset(file_path)?.read_dyn()?
    } else {
        let rel = file_path.replace(&format!("/{STACKED_CHANNELS}"), "");
        let path = model_path.parent().unwrap_or(Path::new(".")).join(rel);
        if !path.is_file() {
            return Err(ImcError::MissingFile(path));
        }
        File::open(&path)?.dataset(STACKED_CHANNELS)?.read_dyn()?
    };
    let arr = if arr.ndim() == 2 { arr.insert_axis(Axis(2)) } else { arr };
    arr.into_dimensionality::<Ix3>()
        .map_err(|_| ImcError::Shape(format!("training input `{file_path}` is not an image stack")))
}

fn training_labels(f: &File, i: usize, shape: (usize, usize)) -> ImcResult<Array2<u8>> {
    let set = f.group(&format!("{LABEL_SETS}/{}", label_set_name(i)))?;
    let blocks = (0..set.len() as usize)
        .map(|j| {
            let ds = set.dataset(&block_name(j))?;
            Ok((block_slice(&ds)?, ds.read_dyn::<u8>()?))
        })
        .collect::<ImcResult<Vec<_>>>()?;
    let views: Vec<_> = blocks.iter().map(|(s, a)| (s.clone(), a.view())).collect();
    assemble_labels(shape, &views)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}

/// 读取模型概况: 训练输入、特征选择矩阵、各输入的标注块数.
pub fn inspect_model<P: AsRef<Path>>(path: P) -> ImcResult<ModelSummary> {
    let path = path.as_ref();
    info!("Ilastik model `{}`", path.display());
    let f = File::open(path)?;
    let training_files = training_files(&f)?;

    let sel = f.group(FEATURES)?;
    let selection = sel.dataset("SelectionMatrix")?.read_2d::<bool>()?;
    let features = read_strings(&sel.dataset("FeatureIds")?)?;
    let scales = sel.dataset("Scales")?.read_raw::<f64>()?;
    if selection.dim() != (features.len(), scales.len()) {
        return Err(ImcError::Shape(format!(
            "feature matrix {:?} for {} features and {} scales",
            selection.dim(),
            features.len(),
            scales.len()
        )));
    }
    let label_blocks = label_block_counts(&f, training_files.len())?;
    Ok(ModelSummary {
        training_files,
        features,
        scales,
        selection,
        label_blocks,
    })
}

/// 把每个训练输入的标注拼成完整标注图, 以 (输入, 高, 宽) 的 `u8` 数组写为 `.npy`.
///
/// `output` 为空时写到 `<model>.training_labels.npy`. 各输入形状不一致时返回
/// [`ImcError::Shape`].
pub fn extract_training_labels<P: AsRef<Path>>(path: P, output: Option<&Path>) -> ImcResult<PathBuf> {
    let path = path.as_ref();
    let output = output.map_or_else(|| with_suffix(path, ".training_labels.npy"), Path::to_path_buf);
    let f = File::open(path)?;
    let files = training_files(&f)?;

    let mut labels = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        let arr = training_array(&f, path, file)?;
        let (h, w, _) = arr.dim();
        labels.push(training_labels(&f, i, (h, w))?);
    }
    let views: Vec<_> = labels.iter().map(|l| l.view()).collect();
    let stacked = ndarray::stack(Axis(0), &views)?;
    ndarray_npy::write_npy(&output, &stacked)?;
    info!("Training labels of {} inputs written to `{}`", labels.len(), output.display());
    Ok(output)
}

/// 绘制每个训练输入及其标注, 写到 `<model>.labels.<how>.png`.
pub fn plot_training_data<P: AsRef<Path>>(path: P, how: ChannelReduction) -> ImcResult<PathBuf> {
    let path = path.as_ref();
    let f = File::open(path)?;
    let files = training_files(&f)?;

    let mut panels = Vec::with_capacity(files.len());
    for (i, file) in files.iter().enumerate() {
        let arr = training_array(&f, path, file)?;
        let (h, w, _) = arr.dim();
        panels.push((training_image(arr.view(), how)?, training_labels(&f, i, (h, w))?));
    }
    let shape = panels.first().map(|(img, _)| img.dim());
    if panels.iter().any(|(img, _)| Some(img.dim()) != shape) {
        warn!("Training inputs differ in shape, only those matching the first one are plotted");
    }
    let views: Vec<_> = panels
        .iter()
        .filter(|(img, _)| Some(img.dim()) == shape)
        .map(|(img, lab)| (img.view(), lab.view()))
        .collect();
    let output = with_suffix(path, &format!(".labels.{how}.png"));
    plot::label_overlay(&output, &views)?;
    Ok(output)
}

/// 复制模型, 把模型内部的训练数据替换为保留通道并归一化后的数据.
///
/// `output` 为空时写到 `<model>.converted.ilp`. 只处理 `Input Data/local_data`
/// 中的数据, 引用外部文件的输入保持不变. 转换后的模型需在 ilastik 中重新训练.
pub fn convert_model_data<P: AsRef<Path>>(
    path: P,
    output: Option<&Path>,
    channels: &[isize],
) -> ImcResult<PathBuf> {
    let path = path.as_ref();
    let output = output.map_or_else(|| with_suffix(path, ".converted.ilp"), Path::to_path_buf);
    std::fs::copy(path, &output)?;

    let f = File::open_rw(&output)?;
    let local: Group = f.group(LOCAL_DATA)?;
    for name in local.member_names()? {
        let arr: ArrayD<f32> = local.dataset(&name)?.read_dyn()?;
        let before = arr.shape().to_vec();
        let arr = arr
            .into_dimensionality::<Ix3>()
            .map_err(|_| ImcError::Shape(format!("local data `{name}` is not an image stack")))?;
        let kept = retain_channels(arr.view(), channels)?;
        local.unlink(&name)?;
        local.new_dataset_builder().with_data(&kept).create(name.as_str())?;
        info!("Local data `{name}`: {before:?} -> {:?}", kept.dim());
    }
    Ok(output)
}
