//! 分割若干图像栈.
//!
//! 每个 `<roi>_full.tiff` 旁边须有 `<roi>_full.csv` 通道标签文件, 否则跳过.

use std::path::PathBuf;

use clap::Parser;

mod result;
mod runner;

/// 用 StarDist 或 DeepCell 分割 IMC 图像栈.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// 多通道图像栈 TIFF 文件.
    #[arg(required = true)]
    pub tiffs: Vec<PathBuf>,

    /// 预训练模型.
    #[arg(short, long, default_value = "stardist")]
    pub model: String,

    /// 分割的区域: nuclear, cytoplasm 或 both.
    #[arg(short, long, default_value = "nuclear")]
    pub compartment: String,

    /// 逗号分隔的需要排除的通道 (子串匹配).
    #[arg(short = 'e', long, default_value = "")]
    pub channel_exclude: String,

    /// 掩膜文件名的额外后缀.
    #[arg(long, default_value = "")]
    pub output_mask_suffix: String,

    /// 不保存掩膜.
    #[arg(long)]
    pub no_save: bool,

    /// 覆盖已存在的掩膜与图.
    #[arg(long)]
    pub overwrite: bool,

    /// 不绘图.
    #[arg(long)]
    pub no_plot: bool,

    /// 运行模型的命令, 其中 `{input}`, `{output}`, `{compartment}`, `{model}` 会被替换.
    #[arg(long, env = "IMC_MODEL_COMMAND")]
    pub model_command: String,

    /// 输出更多日志, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.verbose);

    let report = runner::run(&args)?;
    report.analyze();
    Ok(())
}
