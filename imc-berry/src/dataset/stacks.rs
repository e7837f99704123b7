//! 通用图像栈加载器.
//!
//! 提供迭代器风格的图像栈获取模式. 每个 `<roi>_full.tiff` 图像栈旁边
//! 应有同名的 `<roi>_full.csv` 通道标签文件.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{ChannelLabels, ImcResult, Stack};

/// 图像栈文件名后缀.
pub const STACK_SUFFIX: &str = "_full.tiff";

/// 由图像栈文件名得到 ROI 名. 不符合 `<roi>_full.tiff` 时返回 `None`.
pub fn roi_name_of<P: AsRef<Path>>(stack: P) -> Option<String> {
    let name = stack.as_ref().file_name()?.to_str()?;
    name.strip_suffix(STACK_SUFFIX).map(str::to_string)
}

/// 图像栈对应的通道标签文件, 即把扩展名换为 `.csv`.
#[inline]
pub fn labels_path_of<P: AsRef<Path>>(stack: P) -> PathBuf {
    stack.as_ref().with_extension("csv")
}

/// 列出 `dir` 下所有 ROI 名满足 `pred` 的 `<roi>_full.tiff` 文件, 按 ROI 名排序.
pub fn find_stacks<P, F>(dir: P, mut pred: F) -> ImcResult<Vec<(String, PathBuf)>>
where
    P: AsRef<Path>,
    F: FnMut(&str) -> bool,
{
    let mut ans = vec![];
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(roi) = roi_name_of(&path) {
            if pred(&roi) {
                ans.push((roi, path));
            }
        }
    }
    ans.sort();
    Ok(ans)
}

/// 一个图像栈及其通道标签.
#[derive(Debug, Clone)]
pub struct StackWithLabels {
    /// ROI 名.
    pub name: String,

    /// 图像栈.
    pub stack: Stack,

    /// 通道标签.
    pub labels: ChannelLabels,
}

/// 从图像栈路径创建加载器.
///
/// 路径对应的图像栈或通道标签文件不存在时, 加载器在迭代时返回 `Result::Err`.
pub fn stack_loader<I, P>(paths: I) -> StackLoader
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut data: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
    data.reverse();
    StackLoader { data_rev: data }
}

/// 图像栈加载器, 在内部自动寻找通道标签文件.
#[derive(Debug)]
pub struct StackLoader {
    data_rev: Vec<PathBuf>,
}

impl Iterator for StackLoader {
    type Item = (PathBuf, ImcResult<StackWithLabels>);

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.data_rev.pop()?;
        let data = load(&path);
        Some((path, data))
    }
}

impl ExactSizeIterator for StackLoader {
    #[inline]
    fn len(&self) -> usize {
        self.data_rev.len()
    }
}

fn load(path: &Path) -> ImcResult<StackWithLabels> {
    // 先检查标签文件, 避免无谓地读取大图像栈.
    let labels = ChannelLabels::read_csv(labels_path_of(path))?;
    let stack = Stack::open(path)?;
    let name = roi_name_of(path).unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    Ok(StackWithLabels {
        name,
        stack,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImcError;
    use ndarray::Array3;
    use std::fs::File;

    fn write_roi(dir: &Path, roi: &str, with_labels: bool) -> PathBuf {
        let path = dir.join(format!("{roi}{STACK_SUFFIX}"));
        Stack::new(Array3::zeros((2, 3, 3))).save(&path).unwrap();
        if with_labels {
            ChannelLabels::new(["DNA1(Ir191)", "CD3(Er170)"])
                .write_csv(File::create(labels_path_of(&path)).unwrap())
                .unwrap();
        }
        path
    }

    #[test]
    fn test_names() {
        assert_eq!(roi_name_of("/x/s1-01_full.tiff").as_deref(), Some("s1-01"));
        assert_eq!(roi_name_of("/x/s1-01.tiff"), None);
        assert_eq!(labels_path_of("/x/s1-01_full.tiff"), PathBuf::from("/x/s1-01_full.csv"));
    }

    #[test]
    fn test_find_stacks_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_roi(dir.path(), "s1-02", false);
        write_roi(dir.path(), "s1-01", false);
        write_roi(dir.path(), "s2-01", false);
        let found = find_stacks(dir.path(), |r| r.starts_with("s1-")).unwrap();
        let names: Vec<_> = found.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["s1-01", "s1-02"]);
    }

    #[test]
    fn test_loader() {
        let dir = tempfile::tempdir().unwrap();
        let good = write_roi(dir.path(), "s1-01", true);
        let bad = write_roi(dir.path(), "s1-02", false);
        let mut loader = stack_loader([good, bad]);
        assert_eq!(loader.len(), 2);

        let (_, first) = loader.next().unwrap();
        let first = first.unwrap();
        assert_eq!(first.name, "s1-01");
        assert_eq!(first.stack.len_channels(), first.labels.len());

        let (_, second) = loader.next().unwrap();
        assert!(matches!(second, Err(ImcError::MissingFile(_))));
        assert!(loader.next().is_none());
    }
}
