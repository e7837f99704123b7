//! 程序运行函数.

use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use imc_berry::ops::{AdjacencyOptions, ClusterOptions, ComparisonOptions};
use imc_berry::project::{Project, ProjectConfig, RoiInput, Selection};
use imc_berry::{plot, ChannelExclude, Reduce};
use log::{info, warn};
use utils::loader;

use crate::Args;

/// 由命令行参数得到项目配置.
pub fn config_from_args(args: &Args) -> ProjectConfig {
    ProjectConfig {
        name: args.name.clone(),
        metadata: args.metadata.clone(),
        panel_metadata: args.panel_metadata.clone(),
        processed_dir: args
            .processed_dir
            .clone()
            .unwrap_or_else(loader::processed_dir_from_env_or_home),
        results_dir: args
            .results_dir
            .clone()
            .unwrap_or_else(loader::results_dir_from_env_or_home),
        channel_exclude: ChannelExclude::from_patterns(&args.channel_exclude),
        ..ProjectConfig::default()
    }
}

fn results_file(project: &Project, what: &str) -> PathBuf {
    project.results_dir().join(format!("{}.{what}", project.name()))
}

/// 通道概况与通道相关性.
fn channel_qc(project: &Project, plot: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(project.results_dir())?;
    let all = Selection::all();

    let summary = project.channel_summary(&all, Reduce::Mean)?;
    let path = results_file(project, "channel_summary.csv");
    summary.write_csv(File::create(&path)?, "channel")?;
    info!("Channel summary written to `{}`", path.display());

    let corr = project.channel_correlation(&all)?;
    corr.write_csv(File::create(results_file(project, "channel_correlation.csv"))?, "channel")?;
    if plot {
        plot::heatmap(
            results_file(project, "channel_summary.svg"),
            &summary,
            "mean channel intensity",
            false,
        )?;
        plot::heatmap(
            results_file(project, "channel_correlation.svg"),
            &corr,
            "Pearson correlation",
            true,
        )?;
        project.plot_channels(&all)?;
    }
    Ok(())
}

/// 单细胞分析: 定量、聚类、细胞类型图与邻接.
fn single_cell(project: &mut Project, args: &Args, plot: bool) -> anyhow::Result<()> {
    let with_masks: Vec<String> = project
        .rois()
        .into_iter()
        .filter(|r| r.input_path(RoiInput::CellMask).is_file())
        .map(|r| r.name().to_string())
        .collect();
    if with_masks.is_empty() {
        warn!("No ROI has a cell mask, skipping single-cell analysis");
        return Ok(());
    }
    let sel = Selection::rois(with_masks);

    let n = project.quantify_cells(&sel, true, true, true)?.n_cells();
    info!("Quantified {n} cells");

    let opts = ClusterOptions {
        k: args.clusters,
        seed: args.seed,
        ..ClusterOptions::default()
    };
    let clusters = project.cluster_cells(&opts, true)?;
    for (label, count) in clusters.counts() {
        info!("{label}: {count} cells");
    }

    if plot {
        project.plot_cell_types(&sel)?;
    }
    let adjacency = AdjacencyOptions {
        seed: args.seed,
        plot,
        ..AdjacencyOptions::default()
    };
    project.measure_adjacency(&sel, &adjacency)?;
    Ok(())
}

/// 实际运行.
pub fn run(args: &Args) -> anyhow::Result<()> {
    let plot = !args.no_plot;
    let mut project = Project::new(config_from_args(args)).context("Cannot build project")?;
    utils::sep();
    println!("{project}");
    utils::sep();
    if project.n_rois() == 0 {
        return Ok(());
    }

    channel_qc(&project, plot).context("Channel QC failed")?;
    single_cell(&mut project, args, plot).context("Single-cell analysis failed")?;

    let mut comparison = ComparisonOptions {
        plot,
        ..ComparisonOptions::default()
    };
    if !args.attributes.is_empty() {
        comparison.attributes = args.attributes.clone();
    }
    let res = project.sample_comparisons(&comparison).context("Sample comparison failed")?;
    info!(
        "{} channel tests, {} cell type abundance tests",
        res.channel_mean.len(),
        res.cell_type_abundance.len()
    );
    info!("Results written to `{}`", project.results_dir().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_config_from_args() {
        let args = Args::parse_from([
            "analyze-project",
            "--processed-dir",
            "/data/processed",
            "--results-dir",
            "/data/results",
            "--name",
            "covid",
            "-e",
            "80ArAr,<EMPTY>",
        ]);
        let c = config_from_args(&args);
        assert_eq!(c.name, "covid");
        assert_eq!(c.processed_dir, PathBuf::from("/data/processed"));
        assert_eq!(c.results_dir, PathBuf::from("/data/results"));
        assert!(c.channel_exclude.excludes("80ArAr(ArAr80)"));
        assert_eq!(args.clusters, 10);
        assert!(args.attributes.is_empty());
    }

    #[test]
    fn test_run_empty_project() {
        let dir = tempfile::tempdir().unwrap();
        let processed = dir.path().join("processed");
        std::fs::create_dir_all(&processed).unwrap();
        let args = Args::parse_from([
            "analyze-project".to_string(),
            "--processed-dir".to_string(),
            processed.display().to_string(),
            "--results-dir".to_string(),
            dir.path().join("results").display().to_string(),
        ]);
        run(&args).unwrap();
        assert!(!dir.path().join("results").exists());
    }
}
