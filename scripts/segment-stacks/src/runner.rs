//! 程序运行函数.

use std::path::{Path, PathBuf};

use anyhow::Context;
use imc_berry::dataset::{labels_path_of, roi_name_of};
use imc_berry::project::MaskKind;
use imc_berry::segmentation::{
    plot_segmentation, segment_stack, CommandModel, Compartment, ModelKind, Segmentation,
    SegmentationModel,
};
use imc_berry::{ChannelExclude, ImcResult};
use log::{info, warn};
use utils::loader;

use crate::result::{Outcome, SegmentationReport};
use crate::Args;

/// 一次运行的设置, 由命令行参数解析得到.
pub struct Settings {
    pub kind: ModelKind,
    pub compartment: Compartment,
    pub exclude: ChannelExclude,
    pub mask_suffix: String,
    pub save: bool,
    pub overwrite: bool,
    pub plot: bool,
}

impl Settings {
    fn from_args(args: &Args) -> anyhow::Result<Self> {
        Ok(Self {
            kind: args.model.parse().context("Invalid --model")?,
            compartment: args.compartment.parse().context("Invalid --compartment")?,
            exclude: ChannelExclude::from_patterns(&args.channel_exclude),
            mask_suffix: args.output_mask_suffix.clone(),
            save: !args.no_save,
            overwrite: args.overwrite,
            plot: !args.no_plot,
        })
    }
}

/// 掩膜文件: 把图像栈的 `.tiff` 换为 `_mask<suffix>.tiff` (细胞核为 `_nucmask`).
pub fn mask_path(stack: &Path, kind: MaskKind, suffix: &str) -> PathBuf {
    let add = match kind {
        MaskKind::Nuclei => "nuc",
        MaskKind::Cell => "",
    };
    let stem = stack.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
    stack.with_file_name(format!("{stem}_{add}mask{suffix}.tiff"))
}

/// 对照图: `<roi>_segmentation_<model>_<compartment>.png`.
pub fn figure_path(stack: &Path, kind: ModelKind, compartment: Compartment) -> PathBuf {
    let roi = roi_name_of(stack).unwrap_or_else(|| {
        stack.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default()
    });
    stack.with_file_name(format!("{roi}_segmentation_{kind}_{compartment}.png"))
}

fn write_outputs(stack: &Path, seg: &Segmentation, s: &Settings) -> ImcResult<Vec<PathBuf>> {
    let mut written = vec![];
    if s.save {
        for (kind, mask) in seg.masks() {
            let path = mask_path(stack, kind, &s.mask_suffix);
            if path.exists() && !s.overwrite {
                warn!("Mask `{}` exists, not overwriting", path.display());
                continue;
            }
            mask.save(&path)?;
            written.push(path);
        }
    }
    if s.plot {
        let path = figure_path(stack, s.kind, s.compartment);
        if s.overwrite || !path.exists() {
            plot_segmentation(&path, seg)?;
            written.push(path);
        }
    }
    Ok(written)
}

/// 逐个分割图像栈. 单个图像栈出错时记录并继续.
pub fn segment_all<M: SegmentationModel>(
    tiffs: &[PathBuf],
    model: &M,
    s: &Settings,
) -> SegmentationReport {
    let mut report = SegmentationReport::default();
    let present: Vec<&PathBuf> = tiffs
        .iter()
        .filter(|t| {
            let ok = labels_path_of(t).is_file();
            if !ok {
                warn!("Stack file does not have accompanying channel labels CSV file: `{}`", t.display());
                report.push(t, Outcome::Skipped);
            }
            ok
        })
        .collect();

    for (path, data) in loader::stack_loader(&present) {
        let outcome = data
            .and_then(|d| {
                info!("Started segmentation of `{}` with shape {:?}", d.name, d.stack.shape());
                let seg = segment_stack(&d.stack, &d.labels, model, s.kind, s.compartment, &s.exclude)?;
                let written = write_outputs(&path, &seg, s)?;
                Ok(Outcome::Segmented {
                    cells: seg.cell.as_ref().map(|m| m.n_objects()),
                    nuclei: seg.nuclei.as_ref().map(|m| m.n_objects()),
                    written,
                })
            })
            .unwrap_or_else(|e| {
                warn!("Segmentation of `{}` failed: {e}", path.display());
                Outcome::Failed(e.to_string())
            });
        report.push(&path, outcome);
    }
    report
}

/// 实际运行.
pub fn run(args: &Args) -> anyhow::Result<SegmentationReport> {
    let settings = Settings::from_args(args)?;
    let model = CommandModel::parse(&args.model_command).context("Invalid --model-command")?;
    info!("Starting analysis of {} TIFF files", args.tiffs.len());
    let report = segment_all(&args.tiffs, &model, &settings);
    info!("Finished with all files!");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imc_berry::segmentation::ModelInput;
    use imc_berry::{ChannelLabels, Mask, Stack};
    use ndarray::Array3;

    struct Threshold;

    impl SegmentationModel for Threshold {
        fn predict(&self, input: &ModelInput) -> ImcResult<Array3<u32>> {
            Ok(input.data.mapv(|v| u32::from(v > 0.5)))
        }
    }

    fn settings(compartment: Compartment) -> Settings {
        Settings {
            kind: ModelKind::Deepcell,
            compartment,
            exclude: ChannelExclude::none(),
            mask_suffix: String::new(),
            save: true,
            overwrite: false,
            plot: true,
        }
    }

    #[test]
    fn test_paths() {
        let p = Path::new("/d/s1-01_full.tiff");
        assert_eq!(mask_path(p, MaskKind::Nuclei, ""), Path::new("/d/s1-01_full_nucmask.tiff"));
        assert_eq!(mask_path(p, MaskKind::Cell, ".v2"), Path::new("/d/s1-01_full_mask.v2.tiff"));
        assert_eq!(
            figure_path(p, ModelKind::Stardist, Compartment::Nuclear),
            Path::new("/d/s1-01_segmentation_stardist_nuclear.png")
        );
    }

    #[test]
    fn test_segment_all() {
        let dir = tempfile::tempdir().unwrap();
        let with = dir.path().join("a-01_full.tiff");
        let without = dir.path().join("b-01_full.tiff");
        let data = Array3::from_shape_fn((2, 6, 5), |(c, h, w)| ((c + 1) * (h * 5 + w)) as f32);
        Stack::new(data.clone()).save(&with).unwrap();
        Stack::new(data).save(&without).unwrap();
        ChannelLabels::new(["DNA1(Ir191)", "CD45(Sm152)"])
            .write_csv(std::fs::File::create(labels_path_of(&with)).unwrap())
            .unwrap();

        let report = segment_all(&[with.clone(), without], &Threshold, &settings(Compartment::Both));
        assert_eq!(report.n_segmented(), 1);
        assert_eq!(report.n_skipped(), 1);
        let nuc = Mask::open(mask_path(&with, MaskKind::Nuclei, "")).unwrap();
        assert_eq!(nuc.shape(), (6, 5));
        assert!(mask_path(&with, MaskKind::Cell, "").is_file());
        assert!(figure_path(&with, ModelKind::Deepcell, Compartment::Both).is_file());
    }
}
