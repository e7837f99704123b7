//! 单细胞聚类: log1p + z-score 之后做 k-means (k-means++ 初始化).

use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use ordered_float::OrderedFloat;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::CellTable;
use crate::project::Clusters;
use crate::{ImcError, ImcResult};

/// 聚类参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterOptions {
    /// 类数. 大于细胞数时取细胞数.
    pub k: usize,

    /// 随机数种子.
    pub seed: u64,

    /// 最大迭代次数.
    pub max_iter: usize,

    /// 标签中列出的高表达标记物个数.
    pub n_top_markers: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            k: 10,
            seed: 0,
            max_iter: 300,
            n_top_markers: 3,
        }
    }
}

fn sq_dist(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn init_centers(x: &Array2<f64>, k: usize, rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let mut centers = Array2::zeros((k, x.ncols()));
    centers.row_mut(0).assign(&x.row(rng.gen_range(0..n)));
    let mut d2: Vec<f64> = x.rows().into_iter().map(|r| sq_dist(r, centers.row(0))).collect();
    for c in 1..k {
        let pick = match WeightedIndex::new(&d2) {
            Ok(w) => w.sample(rng),
            // 所有点都与已有中心重合.
            Err(_) => rng.gen_range(0..n),
        };
        centers.row_mut(c).assign(&x.row(pick));
        for (i, r) in x.rows().into_iter().enumerate() {
            d2[i] = d2[i].min(sq_dist(r, centers.row(c)));
        }
    }
    centers
}

fn nearest(r: ArrayView1<'_, f64>, centers: &Array2<f64>) -> usize {
    centers
        .rows()
        .into_iter()
        .map(|c| OrderedFloat(sq_dist(r, c)))
        .position_min()
        .unwrap_or_default()
}

/// Lloyd 迭代. 返回每个样本点所属的类.
pub(crate) fn kmeans(x: &Array2<f64>, k: usize, max_iter: usize, seed: u64) -> Vec<usize> {
    let n = x.nrows();
    if n == 0 || k == 0 {
        return vec![0; n];
    }
    let k = k.min(n);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut centers = init_centers(x, k, &mut rng);
    let mut assign = vec![usize::MAX; n];

    for it in 0..max_iter {
        let mut changed = false;
        for (i, r) in x.rows().into_iter().enumerate() {
            let c = nearest(r, &centers);
            if assign[i] != c {
                assign[i] = c;
                changed = true;
            }
        }
        if !changed {
            debug!("k-means converged after {it} iteration(s)");
            break;
        }
        let mut sums = Array2::<f64>::zeros(centers.dim());
        let mut counts = vec![0usize; k];
        for (i, r) in x.rows().into_iter().enumerate() {
            let mut s = sums.row_mut(assign[i]);
            s += &r;
            counts[assign[i]] += 1;
        }
        for (c, &cnt) in counts.iter().enumerate() {
            // 空类保留原中心.
            if cnt > 0 {
                centers.row_mut(c).assign(&(&sums.row(c) / cnt as f64));
            }
        }
    }
    assign
}

fn standardize(values: &Array2<f64>) -> Array2<f64> {
    let mut x = values.mapv(|v| if v.is_nan() { 0.0 } else { v.max(0.0).ln_1p() });
    for mut col in x.axis_iter_mut(Axis(1)) {
        let mean = col.mean().unwrap_or_default();
        let std = col.std(0.0);
        if std > 0.0 {
            col.mapv_inplace(|v| (v - mean) / std);
        } else {
            col.fill(0.0);
        }
    }
    x
}

/// 对单细胞表聚类.
///
/// `channels` 给定时只使用这些特征 (缺失的被忽略), 否则使用全部特征.
/// 类按大小降序编号 (从 1 开始), 标签为 `"<编号> - <高表达标记物>"`,
/// 高表达标记物是类内平均 z-score 最高且为正的若干特征.
pub fn single_cell_analysis(
    table: &CellTable,
    channels: Option<&[String]>,
    opts: &ClusterOptions,
) -> ImcResult<Clusters> {
    let table = match channels {
        Some(ch) => table.select_features(ch),
        None => table.clone(),
    };
    if opts.k == 0 {
        return Err(ImcError::Unsupported("clustering into 0 clusters".to_string()));
    }
    if table.features().is_empty() {
        return Err(ImcError::NoChannels("cell type channels".to_string()));
    }
    if table.n_cells() == 0 {
        warn!("No cells to cluster");
        return Ok(Clusters::new());
    }
    info!(
        "Clustering {} cell(s) on {} feature(s) into at most {} cluster(s)",
        table.n_cells(),
        table.features().len(),
        opts.k
    );

    let x = standardize(table.values());
    let assign = kmeans(&x, opts.k, opts.max_iter, opts.seed);

    let sizes = assign.iter().copied().counts();
    let order: Vec<usize> = sizes
        .iter()
        .sorted_by_key(|&(c, n)| (std::cmp::Reverse(*n), *c))
        .map(|(&c, _)| c)
        .collect();

    let mut names = vec![String::new(); opts.k.min(x.nrows())];
    for (rank, &c) in order.iter().enumerate() {
        let rows: Vec<usize> = (0..assign.len()).filter(|&i| assign[i] == c).collect();
        let means: Array1<f64> = x
            .select(Axis(0), &rows)
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(x.ncols()));
        let top = means
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m > 0.0)
            .sorted_by_key(|&(j, &m)| (std::cmp::Reverse(OrderedFloat(m)), j))
            .take(opts.n_top_markers)
            .map(|(j, _)| table.features()[j].as_str())
            .join(", ");
        names[c] = if top.is_empty() {
            (rank + 1).to_string()
        } else {
            format!("{} - {}", rank + 1, top)
        };
    }

    Ok(table
        .cells()
        .iter()
        .cloned()
        .zip(assign.iter().map(|&c| names[c].clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::CellKey;

    fn two_blobs() -> CellTable {
        let mut cells = vec![];
        let mut values = Array2::zeros((20, 3));
        for i in 0..20 {
            cells.push(CellKey::new("s", "s-01", i as u32 + 1));
            let jitter = (i % 5) as f64 * 0.1;
            if i < 12 {
                values.row_mut(i).assign(&Array1::from(vec![100.0 + jitter, 1.0, 5.0]));
            } else {
                values.row_mut(i).assign(&Array1::from(vec![1.0, 100.0 + jitter, 5.0]));
            }
        }
        CellTable::new(cells, vec!["CD3".into(), "CD68".into(), "DNA".into()], values)
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let t = two_blobs();
        let opts = ClusterOptions { k: 2, ..Default::default() };
        let c = single_cell_analysis(&t, None, &opts).unwrap();
        assert_eq!(c.len(), 20);
        let first = c.get(&CellKey::new("s", "s-01", 1)).unwrap().to_string();
        let last = c.get(&CellKey::new("s", "s-01", 20)).unwrap().to_string();
        assert_eq!(first, "1 - CD3");
        assert_eq!(last, "2 - CD68");
        assert_eq!(c.counts()[&first], 12);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let t = two_blobs();
        let opts = ClusterOptions { k: 3, seed: 7, ..Default::default() };
        let a = single_cell_analysis(&t, None, &opts).unwrap();
        let b = single_cell_analysis(&t, None, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_channel_selection() {
        let t = two_blobs();
        let ch = vec!["DNA".to_string()];
        let opts = ClusterOptions { k: 2, ..Default::default() };
        // 唯一的特征为常数, 所有细胞落入同一类.
        let c = single_cell_analysis(&t, Some(&ch), &opts).unwrap();
        assert_eq!(c.counts().len(), 1);
        assert!(single_cell_analysis(&t, Some(&["nope".to_string()]), &opts).is_err());
    }
}
