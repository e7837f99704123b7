//! 运行结果.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// 单个图像栈的处理结果.
#[derive(Debug)]
pub enum Outcome {
    /// 缺少通道标签文件, 未处理.
    Skipped,

    /// 分割完成.
    Segmented {
        cells: Option<usize>,
        nuclei: Option<usize>,
        written: Vec<PathBuf>,
    },

    /// 出错.
    Failed(String),
}

/// 将 `outcome` 写进 `w` 中.
fn describe_into<W: Write>(path: &Path, outcome: &Outcome, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn count_to_display(n: Option<usize>) -> String {
        n.map_or_else(|| "/".to_string(), |n| n.to_string())
    }

    writeln!(w, "Stack `{}`:", path.display())?;
    match outcome {
        Outcome::Skipped => write!(w, "{S4}Skipped: no channel labels"),
        Outcome::Failed(e) => write!(w, "{S4}Failed: {e}"),
        Outcome::Segmented {
            cells,
            nuclei,
            written,
        } => {
            writeln!(w, "{S4}Cells: {}", count_to_display(*cells))?;
            writeln!(w, "{S4}Nuclei: {}", count_to_display(*nuclei))?;
            write!(w, "{S4}Files written: {}", written.len())?;
            for p in written {
                write!(w, "\n{S4}{S4}{}", p.display())?;
            }
            Ok(())
        }
    }
}

/// 全部图像栈的处理结果.
#[derive(Debug, Default)]
pub struct SegmentationReport {
    data: Vec<(PathBuf, Outcome)>,
}

impl SegmentationReport {
    /// 记录一个图像栈的结果.
    pub fn push<P: AsRef<Path>>(&mut self, path: P, outcome: Outcome) {
        self.data.push((path.as_ref().to_path_buf(), outcome));
    }

    /// 分割完成的图像栈数.
    pub fn n_segmented(&self) -> usize {
        self.data.iter().filter(|(_, o)| matches!(o, Outcome::Segmented { .. })).count()
    }

    /// 跳过的图像栈数.
    pub fn n_skipped(&self) -> usize {
        self.data.iter().filter(|(_, o)| matches!(o, Outcome::Skipped)).count()
    }

    /// 输出运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for (path, outcome) in self.data.iter() {
            if describe_into(path, outcome, &mut buf).is_ok() {
                println!("{}", String::from_utf8_lossy(&buf));
            }
            buf.clear();

            utils::sep();
        }
        println!(
            "{} segmented, {} skipped, {} failed",
            self.n_segmented(),
            self.n_skipped(),
            self.data.len() - self.n_segmented() - self.n_skipped()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let mut buf = vec![];
        let o = Outcome::Segmented {
            cells: None,
            nuclei: Some(12),
            written: vec![PathBuf::from("x_full_nucmask.tiff")],
        };
        describe_into(Path::new("x_full.tiff"), &o, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Cells: /"));
        assert!(text.contains("Nuclei: 12"));
        assert!(text.ends_with("x_full_nucmask.tiff"));
    }
}
