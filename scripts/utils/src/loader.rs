//! 对 `imc-berry::dataset` 的更一层封装. 提供数据目录的解析.

use std::env;
use std::path::{Path, PathBuf};

use imc_berry::consts::names::{DEFAULT_PROCESSED_DIR_NAME, DEFAULT_RESULTS_DIR_NAME};
use imc_berry::dataset::{self, StackLoader};

/// 预处理数据目录的环境变量.
pub const PROCESSED_DIR_ENV: &str = "IMC_PROCESSED_DIR";

/// 结果目录的环境变量.
pub const RESULTS_DIR_ENV: &str = "IMC_RESULTS_DIR";

fn dir_from_env_or_home(var: &str, default: &str) -> PathBuf {
    match env::var(var) {
        Ok(d) if !d.is_empty() => PathBuf::from(d),
        _ => dataset::home_imc_dir_with([default]).unwrap_or_else(|| PathBuf::from(default)),
    }
}

/// 获取预处理数据目录.
///
/// 1. 若环境变量 `$IMC_PROCESSED_DIR` 非空, 则返回其值;
/// 2. 否则, 返回 `$HOME/imc/processed`;
/// 3. 无法确定主目录时, 返回相对路径 `processed`.
pub fn processed_dir_from_env_or_home() -> PathBuf {
    dir_from_env_or_home(PROCESSED_DIR_ENV, DEFAULT_PROCESSED_DIR_NAME)
}

/// 获取结果目录, 规则同 [`processed_dir_from_env_or_home`], 环境变量为 `$IMC_RESULTS_DIR`.
pub fn results_dir_from_env_or_home() -> PathBuf {
    dir_from_env_or_home(RESULTS_DIR_ENV, DEFAULT_RESULTS_DIR_NAME)
}

/// 获取图像栈加载器.
#[inline]
pub fn stack_loader<P: AsRef<Path>>(paths: &[P]) -> StackLoader {
    dataset::stack_loader(paths.iter().map(|p| p.as_ref().to_path_buf()))
}
