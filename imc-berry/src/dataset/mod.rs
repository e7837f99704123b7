//! 数据目录与图像栈加载.

use std::path::{Path, PathBuf};

mod stacks;

pub use stacks::{
    find_stacks, labels_path_of, roi_name_of, stack_loader, StackLoader, StackWithLabels,
    STACK_SUFFIX,
};

/// 获取 `{用户主目录}/imc` 目录.
pub fn home_imc_dir() -> Option<PathBuf> {
    let mut ans = dirs::home_dir()?;
    ans.push("imc");
    Some(ans)
}

/// 获取 `{用户主目录}/imc` 目录下给定继续项组成的全路径.
pub fn home_imc_dir_with<P: AsRef<Path>, I: IntoIterator<Item = P>>(it: I) -> Option<PathBuf> {
    let mut ans = home_imc_dir()?;
    ans.extend(it);
    Some(ans)
}
