//! 命令行脚本依赖的通用组件.

use log::LevelFilter;

pub mod loader;

const SEP: &str = "--------------------------------------------------------";

/// 控制日志级别的环境变量.
pub const LOG_ENV: &str = "IMC_LOG";

/// 简单分隔线.
#[inline]
pub fn sep() {
    println!("{SEP}");
}

/// 获得可并行核心数.
pub fn cpus() -> usize {
    std::thread::available_parallelism().map_or_else(|_| num_cpus::get(), usize::from)
}

/// 由 `-v` 出现的次数得到日志级别: 0 为 `Info`, 1 为 `Debug`, 更多为 `Trace`.
pub fn level_from_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// 安装日志器.
///
/// 若环境变量 `$IMC_LOG` 是合法的级别名 (如 `warn`, `debug`), 则以其为准,
/// 否则使用 `verbose` 对应的级别.
pub fn init_logger(verbose: u8) {
    let level = std::env::var(LOG_ENV)
        .ok()
        .and_then(|s| s.parse::<LevelFilter>().ok())
        .unwrap_or_else(|| level_from_verbosity(verbose));
    // 重复安装时保留已有的日志器.
    let _ = simple_logger::SimpleLogger::new().with_level(level).init();
}
