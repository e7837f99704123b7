//! 单细胞定量、聚类、邻接与组间比较.
//!
//! 所有以 ROI 为单位的计算都通过 [`par_map`] 分发: 打开 `rayon` feature
//! 时并行, 否则顺序执行; 结果总是保持 ROI 顺序.

mod adjacency;
mod cluster;
mod compare;
mod correlation;
mod quantify;
pub mod stats;
mod summary;

pub use adjacency::{
    adjacency_graph, cell_type_adjacency, measure_adjacency, AdjacencyGraph, AdjacencyOptions,
};
pub use cluster::{single_cell_analysis, ClusterOptions};
pub use compare::{sample_comparisons, ComparisonOptions, ComparisonResult, GroupTest};
pub use correlation::{channel_correlation, correlate_channels};
pub use quantify::{
    quantify_cell_intensity, quantify_cell_morphology, quantify_cells, CellTable, MORPHOLOGY_FEATURES,
};
pub use summary::channel_summary;

use indicatif::{ProgressBar, ProgressStyle};

use crate::ImcResult;

fn progress_bar(len: usize, what: &str) -> ProgressBar {
    let pb = ProgressBar::new(len as u64);
    if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("##-"));
    }
    pb.set_message(what.to_string());
    pb
}

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        fn map_all<T, R, F>(items: &[T], pb: &ProgressBar, f: F) -> ImcResult<Vec<R>>
        where
            T: Sync,
            R: Send,
            F: Fn(&T) -> ImcResult<R> + Sync + Send,
        {
            use indicatif::ParallelProgressIterator;
            use rayon::prelude::*;
            items.par_iter().progress_with(pb.clone()).map(f).collect()
        }
    } else {
        fn map_all<T, R, F>(items: &[T], pb: &ProgressBar, f: F) -> ImcResult<Vec<R>>
        where
            T: Sync,
            R: Send,
            F: Fn(&T) -> ImcResult<R> + Sync + Send,
        {
            use indicatif::ProgressIterator;
            items.iter().progress_with(pb.clone()).map(f).collect()
        }
    }
}

/// 对每个元素实施 `f`, 结果按输入顺序返回. 任一元素失败则返回错误.
///
/// `what` 显示在进度条上.
pub fn par_map<T, R, F>(items: &[T], what: &str, f: F) -> ImcResult<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> ImcResult<R> + Sync + Send,
{
    let pb = progress_bar(items.len(), what);
    let ans = map_all(items, &pb, f);
    pb.finish_and_clear();
    ans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ImcError;

    #[test]
    fn test_par_map_keeps_order() {
        let v: Vec<u32> = (0..100).collect();
        let out = par_map(&v, "squares", |&x| Ok(x * x)).unwrap();
        assert_eq!(out[7], 49);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn test_par_map_error() {
        let v = [1, 2, 3];
        let out: ImcResult<Vec<i32>> = par_map(&v, "fail", |&x| {
            if x == 2 {
                Err(ImcError::Unsupported("two".into()))
            } else {
                Ok(x)
            }
        });
        assert!(out.is_err());
    }
}
