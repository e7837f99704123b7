//! 对一个 IMC 项目运行完整的下游分析:
//! 通道概况与相关性, 单细胞定量与聚类, 细胞类型邻接, 组间比较.

use std::path::PathBuf;

use clap::Parser;

mod runner;

/// 分析一个 IMC 项目.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// 样本元数据 CSV. 缺省时扫描预处理数据目录.
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// 通道面板元数据 CSV.
    #[arg(long)]
    pub panel_metadata: Option<PathBuf>,

    /// 预处理数据目录, 缺省为 `$IMC_PROCESSED_DIR` 或 `$HOME/imc/processed`.
    #[arg(long)]
    pub processed_dir: Option<PathBuf>,

    /// 结果目录, 缺省为 `$IMC_RESULTS_DIR` 或 `$HOME/imc/results`.
    #[arg(long)]
    pub results_dir: Option<PathBuf>,

    /// 项目名.
    #[arg(long, default_value = "project")]
    pub name: String,

    /// 用于组间比较的样本属性.
    #[arg(long, num_args = 1..)]
    pub attributes: Vec<String>,

    /// 逗号分隔的需要排除的通道 (子串匹配).
    #[arg(short = 'e', long, default_value = "")]
    pub channel_exclude: String,

    /// 聚类数.
    #[arg(long, default_value_t = 10)]
    pub clusters: usize,

    /// 随机种子.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// 不绘图.
    #[arg(long)]
    pub no_plot: bool,

    /// 输出更多日志, 可重复.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    utils::init_logger(args.verbose);
    runner::run(&args)
}
