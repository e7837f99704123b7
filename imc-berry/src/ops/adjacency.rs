//! 细胞邻接图, 以及细胞类型之间邻接程度相对随机标签的富集.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use log::{info, warn};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::par_map;
use crate::consts::mask::is_object;
use crate::project::Roi;
use crate::{plot, ImcResult, LabeledMatrix, Mask};

/// 邻接分析参数.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AdjacencyOptions {
    /// 两个细胞的像素在该 (棋盘) 距离以内即视为相邻. 1 表示 8-邻接.
    pub distance: usize,

    /// 随机打乱标签的次数.
    pub n_permutations: usize,

    /// 随机数种子.
    pub seed: u64,

    /// 是否绘制热图.
    pub plot: bool,
}

impl Default for AdjacencyOptions {
    fn default() -> Self {
        Self {
            distance: 1,
            n_permutations: 100,
            seed: 0,
            plot: true,
        }
    }
}

/// 无向邻接图. 顶点为对象编号, 边 `(a, b)` 总满足 `a < b`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdjacencyGraph {
    nodes: BTreeSet<u32>,
    edges: BTreeSet<(u32, u32)>,
}

impl AdjacencyGraph {
    /// 顶点.
    #[inline]
    pub fn nodes(&self) -> &BTreeSet<u32> {
        &self.nodes
    }

    /// 边.
    #[inline]
    pub fn edges(&self) -> &BTreeSet<(u32, u32)> {
        &self.edges
    }

    /// 边数.
    #[inline]
    pub fn n_edges(&self) -> usize {
        self.edges.len()
    }

    /// `a` 和 `b` 是否相邻?
    pub fn contains_edge(&self, a: u32, b: u32) -> bool {
        self.edges.contains(&(a.min(b), a.max(b)))
    }
}

/// 由掩膜构建邻接图. 只比较前向半窗口, 每对像素只检查一次.
pub fn adjacency_graph(mask: &Mask, distance: usize) -> AdjacencyGraph {
    let (h, w) = mask.shape();
    let d = distance as isize;
    let mut g = AdjacencyGraph::default();
    for ((y, x), v) in mask.indexed_iter() {
        if !is_object(v) {
            continue;
        }
        g.nodes.insert(v);
        for dy in 0..=d {
            for dx in -d..=d {
                if dy == 0 && dx <= 0 {
                    continue;
                }
                let (ny, nx) = (y as isize + dy, x as isize + dx);
                if nx < 0 || ny >= h as isize || nx >= w as isize {
                    continue;
                }
                let q = mask[(ny as usize, nx as usize)];
                if is_object(q) && q != v {
                    g.edges.insert((v.min(q), v.max(q)));
                }
            }
        }
    }
    g
}

fn pair_counts(edges: &[(usize, usize)], labels: &[usize], n: usize) -> Array2<f64> {
    let mut m = Array2::zeros((n, n));
    for &(a, b) in edges {
        let (la, lb) = (labels[a], labels[b]);
        m[(la, lb)] += 1.0;
        if la != lb {
            m[(lb, la)] += 1.0;
        }
    }
    m
}

/// 细胞类型 × 细胞类型的邻接富集: `log2((观测边数 + 1) / (随机标签期望边数 + 1))`.
///
/// 没有聚类标签的细胞不参与. 行列为排序后的细胞类型名.
pub fn cell_type_adjacency(
    graph: &AdjacencyGraph,
    clusters: &BTreeMap<u32, String>,
    opts: &AdjacencyOptions,
) -> LabeledMatrix {
    let types: Vec<String> = graph
        .nodes()
        .iter()
        .filter_map(|id| clusters.get(id))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .cloned()
        .collect();
    let type_idx: BTreeMap<&str, usize> =
        types.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();

    let nodes: Vec<u32> = graph.nodes().iter().copied().filter(|id| clusters.contains_key(id)).collect();
    let node_idx: BTreeMap<u32, usize> = nodes.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut labels: Vec<usize> = nodes
        .iter()
        .filter_map(|id| clusters.get(id).and_then(|t| type_idx.get(t.as_str()).copied()))
        .collect();
    let edges: Vec<(usize, usize)> = graph
        .edges()
        .iter()
        .filter_map(|(a, b)| Some((*node_idx.get(a)?, *node_idx.get(b)?)))
        .collect();

    let n = types.len();
    let observed = pair_counts(&edges, &labels, n);
    let mut expected = Array2::<f64>::zeros((n, n));
    let mut rng = StdRng::seed_from_u64(opts.seed);
    for _ in 0..opts.n_permutations {
        labels.shuffle(&mut rng);
        expected += &pair_counts(&edges, &labels, n);
    }
    if opts.n_permutations > 0 {
        expected /= opts.n_permutations as f64;
    }

    let values = ndarray::Zip::from(&observed)
        .and(&expected)
        .map_collect(|&o, &e| ((o + 1.0) / (e + 1.0)).log2());
    LabeledMatrix::new(types.clone(), types, values)
}

/// 每个 ROI 的细胞类型邻接富集.
///
/// 每个有聚类标签的 ROI 写出 `<output_prefix><roi>.cluster_adjacency_graph.norm_over_random.csv`;
/// `opts.plot` 为真时把所有 ROI 的热图排成网格写出
/// `<output_prefix>cluster_adjacency_graph.norm_over_random.svg`.
pub fn measure_adjacency(
    rois: &[&Roi],
    output_prefix: &Path,
    opts: &AdjacencyOptions,
) -> ImcResult<Vec<(String, LabeledMatrix)>> {
    let with_clusters: Vec<&Roi> = rois
        .iter()
        .copied()
        .filter(|r| {
            let ok = r.clusters().is_some();
            if !ok {
                warn!("ROI `{}` has no cluster assignments, skipping adjacency", r.name());
            }
            ok
        })
        .collect();
    info!("Measuring cell type adjacency of {} ROI(s)", with_clusters.len());

    let res = par_map(&with_clusters, "adjacency", |roi| {
        let graph = adjacency_graph(&roi.cell_mask()?, opts.distance);
        let empty = BTreeMap::new();
        let m = cell_type_adjacency(&graph, roi.clusters().unwrap_or(&empty), opts);
        Ok((roi.name().to_string(), m))
    })?;

    let prefix = output_prefix.to_string_lossy();
    for (name, m) in &res {
        let path = format!("{prefix}{name}.cluster_adjacency_graph.norm_over_random.csv");
        if let Some(parent) = Path::new(&path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        m.write_csv(std::fs::File::create(&path)?, "")?;
    }
    if opts.plot && !res.is_empty() {
        let path = format!("{prefix}cluster_adjacency_graph.norm_over_random.svg");
        plot::heatmap_grid(&path, &res, "log2 odds over random", true)?;
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn mask() -> Mask {
        Mask::new(arr2(&[
            [1, 1, 0, 3, 3],
            [1, 1, 0, 3, 3],
            [2, 2, 0, 0, 0],
            [2, 2, 0, 0, 4],
        ]))
    }

    #[test]
    fn test_graph_touching() {
        let g = adjacency_graph(&mask(), 1);
        assert_eq!(g.nodes().len(), 4);
        assert!(g.contains_edge(2, 1));
        assert!(!g.contains_edge(1, 3));
        assert_eq!(g.n_edges(), 1);
        assert!(g.nodes().contains(&4));
        assert!(!(1..=3).any(|o| g.contains_edge(4, o)));
    }

    #[test]
    fn test_graph_distance() {
        let g = adjacency_graph(&mask(), 2);
        assert!(g.contains_edge(1, 3));
        assert!(g.contains_edge(2, 3));
        assert!(!g.contains_edge(2, 4));
    }

    #[test]
    fn test_cell_type_adjacency() {
        let g = adjacency_graph(&mask(), 2);
        let clusters: BTreeMap<u32, String> = [(1, "T"), (2, "T"), (3, "B"), (4, "B")]
            .into_iter()
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        let opts = AdjacencyOptions { n_permutations: 20, ..Default::default() };
        let m = cell_type_adjacency(&g, &clusters, &opts);
        assert_eq!(m.rows(), &["B".to_string(), "T".to_string()]);
        assert_eq!(m.values(), m.values().t());
        assert!(!m.has_nan());

        let again = cell_type_adjacency(&g, &clusters, &opts);
        assert_eq!(m, again);
    }
}
