//! 组间比较用到的统计检验.

use ordered_float::OrderedFloat;
use statrs::distribution::{ContinuousCDF, Normal};

/// 平均秩. 相同值取其秩的平均, 秩从 1 开始.
///
/// 同时返回每组相同值的个数, 用于方差的结校正.
fn average_ranks(values: &[f64]) -> (Vec<f64>, Vec<usize>) {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by_key(|&i| OrderedFloat(values[i]));

    let mut ranks = vec![0.0; values.len()];
    let mut ties = vec![];
    let mut i = 0;
    while i < order.len() {
        let mut j = i + 1;
        while j < order.len() && values[order[j]] == values[order[i]] {
            j += 1;
        }
        // 位置 i..j 的秩为 i+1..=j, 平均为 (i + 1 + j) / 2.
        let r = (i + 1 + j) as f64 / 2.0;
        for &k in &order[i..j] {
            ranks[k] = r;
        }
        ties.push(j - i);
        i = j;
    }
    (ranks, ties)
}

/// Mann-Whitney U 检验 (双侧, 正态近似, 含结校正与连续性校正).
///
/// 返回 `(U, p)`, 其中 `U` 为第一组的 U 统计量.
/// 任一组为空, 或全部取值相同时返回 `(NaN, NaN)`. 输入中的 NaN 被忽略.
pub fn mann_whitney_u(a: &[f64], b: &[f64]) -> (f64, f64) {
    let a: Vec<f64> = a.iter().copied().filter(|v| !v.is_nan()).collect();
    let b: Vec<f64> = b.iter().copied().filter(|v| !v.is_nan()).collect();
    let (n1, n2) = (a.len() as f64, b.len() as f64);
    if a.is_empty() || b.is_empty() {
        return (f64::NAN, f64::NAN);
    }

    let all: Vec<f64> = a.iter().chain(b.iter()).copied().collect();
    let (ranks, ties) = average_ranks(&all);
    let r1: f64 = ranks[..a.len()].iter().sum();
    let u1 = r1 - n1 * (n1 + 1.0) / 2.0;
    let u2 = n1 * n2 - u1;

    let n = n1 + n2;
    let tie_term: f64 = ties.iter().map(|&t| (t * t * t - t) as f64).sum::<f64>() / (n * (n - 1.0));
    let sigma = (n1 * n2 / 12.0 * ((n + 1.0) - tie_term)).sqrt();
    if sigma.is_nan() || sigma <= 0.0 {
        return (f64::NAN, f64::NAN);
    }

    let mu = n1 * n2 / 2.0;
    let z = (u1.max(u2) - mu - 0.5) / sigma;
    let p = match Normal::new(0.0, 1.0) {
        Ok(norm) => (2.0 * (1.0 - norm.cdf(z))).min(1.0),
        Err(_) => f64::NAN,
    };
    (u1, p)
}

/// Benjamini-Hochberg 校正. NaN 原样保留, 且不计入检验个数.
pub fn fdr_bh(p: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..p.len()).filter(|&i| !p[i].is_nan()).collect();
    idx.sort_by_key(|&i| OrderedFloat(p[i]));
    let m = idx.len() as f64;

    let mut ans = vec![f64::NAN; p.len()];
    let mut running = 1.0f64;
    for (rank, &i) in idx.iter().enumerate().rev() {
        let q = p[i] * m / (rank + 1) as f64;
        running = running.min(q);
        ans[i] = running.min(1.0);
    }
    ans
}

/// Pearson 相关系数. 长度不足 2 或任一方差为 0 时返回 NaN.
pub fn pearson<I: IntoIterator<Item = (f64, f64)>>(pairs: I) -> f64 {
    let (mut n, mut sx, mut sy, mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
    for (x, y) in pairs {
        n += 1.0;
        sx += x;
        sy += y;
        sxx += x * x;
        syy += y * y;
        sxy += x * y;
    }
    if n < 2.0 {
        return f64::NAN;
    }
    let cov = sxy - sx * sy / n;
    let vx = sxx - sx * sx / n;
    let vy = syy - sy * sy / n;
    if vx <= 0.0 || vy <= 0.0 {
        return f64::NAN;
    }
    (cov / (vx * vy).sqrt()).clamp(-1.0, 1.0)
}
