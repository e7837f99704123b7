//! 检查 ilastik 像素分类模型, 并可提取训练标注、绘制训练数据、转换模型数据.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use imc_berry::ilastik::{self, ChannelReduction};
use log::info;

/// 检查 ilastik `.ilp` 模型.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// 模型文件.
    model_path: PathBuf,

    /// 绘制训练数据与标注.
    #[arg(short, long)]
    plot: bool,

    /// 绘图时如何合并通道: mean 或 last.
    #[arg(long, default_value = "mean")]
    channels_to_plot: String,

    /// 提取训练标注为 `.npy`.
    #[arg(short, long)]
    extract: bool,

    /// 训练标注的输出文件, 缺省为 `<model>.training_labels.npy`.
    #[arg(long)]
    labels_output: Option<PathBuf>,

    /// 转换模型内部的训练数据.
    #[arg(short, long)]
    convert: bool,

    /// 转换后模型的输出文件, 缺省为 `<model>.converted.ilp`.
    #[arg(long)]
    converted_model_output: Option<PathBuf>,

    /// 转换时保留的通道, 负数从末尾计数.
    #[arg(long, num_args = 1.., allow_negative_numbers = true, default_values_t = vec![-1isize])]
    keep_channels: Vec<isize>,

    /// 输出更多日志, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.verbose);

    let summary = ilastik::inspect_model(&args.model_path)
        .with_context(|| format!("Cannot inspect `{}`", args.model_path.display()))?;
    utils::sep();
    println!("{summary}");
    utils::sep();

    if args.plot {
        let how: ChannelReduction = args.channels_to_plot.parse().context("Invalid --channels-to-plot")?;
        let out = ilastik::plot_training_data(&args.model_path, how)?;
        info!("Training data plotted to `{}`", out.display());
    }
    if args.extract {
        let out = ilastik::extract_training_labels(&args.model_path, args.labels_output.as_deref())?;
        info!("Training labels written to `{}`", out.display());
    }
    if args.convert {
        let out = ilastik::convert_model_data(
            &args.model_path,
            args.converted_model_output.as_deref(),
            &args.keep_channels,
        )?;
        info!("Converted model written to `{}`", out.display());
    }
    Ok(())
}
