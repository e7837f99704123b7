//! 带行列标签的二维数值表.

use std::collections::HashMap;
use std::io;

use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::ImcResult;

/// 带行标签和列标签的 `f64` 矩阵. 缺失值以 NaN 表示.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LabeledMatrix {
    rows: Vec<String>,
    cols: Vec<String>,
    values: Array2<f64>,
}

impl LabeledMatrix {
    /// 构建. `values` 形状必须是 (行数, 列数), 否则程序 panic.
    pub fn new(rows: Vec<String>, cols: Vec<String>, values: Array2<f64>) -> Self {
        assert_eq!(values.dim(), (rows.len(), cols.len()), "标签与数值形状不符");
        Self { rows, cols, values }
    }

    /// 由若干列构建. 每列是 (行标签, 值) 序列, 各列按行标签外连接,
    /// 缺失处填 NaN. 行按首次出现顺序排列.
    ///
    /// 同一列内重复的行标签各自成行 (第 k 次出现与其它列第 k 次出现对齐).
    pub fn from_columns<I, R>(columns: I) -> Self
    where
        I: IntoIterator<Item = (String, R)>,
        R: IntoIterator<Item = (String, f64)>,
    {
        let mut rows: Vec<String> = vec![];
        let mut row_at: HashMap<(String, usize), usize> = HashMap::new();
        let mut cols = vec![];
        let mut cells: Vec<Vec<(usize, f64)>> = vec![];

        for (name, col) in columns {
            let mut seen: HashMap<String, usize> = HashMap::new();
            let mut this = vec![];
            for (r, v) in col {
                let k = seen.entry(r.clone()).or_insert(0);
                let key = (r, *k);
                *k += 1;
                let idx = match row_at.get(&key) {
                    Some(&i) => i,
                    None => {
                        rows.push(key.0.clone());
                        row_at.insert(key, rows.len() - 1);
                        rows.len() - 1
                    }
                };
                this.push((idx, v));
            }
            cols.push(name);
            cells.push(this);
        }

        let mut values = Array2::from_elem((rows.len(), cols.len()), f64::NAN);
        for (c, col) in cells.into_iter().enumerate() {
            for (r, v) in col {
                values[(r, c)] = v;
            }
        }
        Self { rows, cols, values }
    }

    /// 行标签.
    #[inline]
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    /// 列标签.
    #[inline]
    pub fn cols(&self) -> &[String] {
        &self.cols
    }

    /// 数值.
    #[inline]
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// (行数, 列数).
    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// 行标签 `name` 第一次出现的位置.
    pub fn row_index(&self, name: &str) -> Option<usize> {
        self.rows.iter().position(|r| r == name)
    }

    /// 列标签 `name` 第一次出现的位置.
    pub fn col_index(&self, name: &str) -> Option<usize> {
        self.cols.iter().position(|c| c == name)
    }

    /// 第 `i` 行.
    #[inline]
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values.row(i)
    }

    /// 第 `j` 列.
    #[inline]
    pub fn col(&self, j: usize) -> ArrayView1<'_, f64> {
        self.values.column(j)
    }

    /// 是否存在 NaN?
    pub fn has_nan(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    /// 把 NaN 替换为 `v`.
    pub fn fill_nan(mut self, v: f64) -> Self {
        self.values.mapv_inplace(|x| if x.is_nan() { v } else { x });
        self
    }

    /// 保留 `keep` 为 `true` 的行.
    pub fn select_rows(&self, keep: &[bool]) -> Self {
        assert_eq!(keep.len(), self.rows.len());
        let idx: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        Self {
            rows: idx.iter().map(|&i| self.rows[i].clone()).collect(),
            cols: self.cols.clone(),
            values: self.values.select(Axis(0), &idx),
        }
    }

    /// 保留 `keep` 为 `true` 的列.
    pub fn select_cols(&self, keep: &[bool]) -> Self {
        assert_eq!(keep.len(), self.cols.len());
        let idx: Vec<usize> = (0..keep.len()).filter(|&i| keep[i]).collect();
        Self {
            rows: self.rows.clone(),
            cols: idx.iter().map(|&i| self.cols[i].clone()).collect(),
            values: self.values.select(Axis(1), &idx),
        }
    }

    /// 转置.
    pub fn transpose(&self) -> Self {
        Self {
            rows: self.cols.clone(),
            cols: self.rows.clone(),
            values: self.values.t().to_owned(),
        }
    }

    /// 每行忽略 NaN 的均值. 整行为 NaN 时结果为 NaN.
    pub fn row_means(&self) -> Array1<f64> {
        self.values.map_axis(Axis(1), |r| nan_mean(r.iter().copied()))
    }

    /// 每列忽略 NaN 的均值.
    pub fn col_means(&self) -> Array1<f64> {
        self.values.map_axis(Axis(0), |c| nan_mean(c.iter().copied()))
    }

    /// 每列除以该列 (忽略 NaN 的) 均值.
    pub fn normalize_columns_by_mean(mut self) -> Self {
        let means = self.col_means();
        for (mut c, m) in self.values.axis_iter_mut(Axis(1)).zip(means) {
            c.mapv_inplace(|v| v / m);
        }
        self
    }

    /// 逐元素 `ln(1 + x)`.
    pub fn log1p(mut self) -> Self {
        self.values.mapv_inplace(f64::ln_1p);
        self
    }

    /// 对每一列做 z-score (总体标准差). 标准差为 0 的列置 0.
    pub fn zscore_columns(mut self) -> Self {
        for mut c in self.values.axis_iter_mut(Axis(1)) {
            zscore_inplace(c.view_mut());
        }
        self
    }

    /// 对每一行做 z-score (总体标准差). 标准差为 0 的行置 0.
    pub fn zscore_rows(mut self) -> Self {
        for mut r in self.values.axis_iter_mut(Axis(0)) {
            zscore_inplace(r.view_mut());
        }
        self
    }

    /// 以 CSV 写出. 第一列为行标签, 表头第一格为 `index_name`. NaN 写为空串.
    pub fn write_csv<W: io::Write>(&self, writer: W, index_name: &str) -> ImcResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(std::iter::once(index_name).chain(self.cols.iter().map(String::as_str)))?;
        for (name, row) in self.rows.iter().zip(self.values.rows()) {
            let mut rec = vec![name.clone()];
            rec.extend(row.iter().map(|v| fmt_value(*v)));
            w.write_record(&rec)?;
        }
        w.flush()?;
        Ok(())
    }
}

/// 忽略 NaN 的均值. 没有有效值时为 NaN.
pub(crate) fn nan_mean<I: IntoIterator<Item = f64>>(it: I) -> f64 {
    let (n, s) = it
        .into_iter()
        .filter(|v| !v.is_nan())
        .fold((0usize, 0.0), |(n, s), v| (n + 1, s + v));
    if n == 0 {
        f64::NAN
    } else {
        s / n as f64
    }
}

fn zscore_inplace(mut v: ndarray::ArrayViewMut1<'_, f64>) {
    let mean = nan_mean(v.iter().copied());
    let (n, ss) = v
        .iter()
        .filter(|x| !x.is_nan())
        .fold((0usize, 0.0), |(n, ss), x| (n + 1, ss + (x - mean).powi(2)));
    let std = if n == 0 { 0.0 } else { (ss / n as f64).sqrt() };
    if std == 0.0 || std.is_nan() {
        v.mapv_inplace(|x| if x.is_nan() { x } else { 0.0 });
    } else {
        v.mapv_inplace(|x| (x - mean) / std);
    }
}

/// CSV 中数值的写法. NaN 为空串.
pub(crate) fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        String::new()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn s(v: &str) -> String {
        v.to_string()
    }

    #[test]
    fn test_from_columns_outer_join() {
        let m = LabeledMatrix::from_columns(vec![
            (s("r1"), vec![(s("a"), 1.0), (s("b"), 2.0)]),
            (s("r2"), vec![(s("b"), 3.0), (s("c"), 4.0)]),
        ]);
        assert_eq!(m.rows(), &[s("a"), s("b"), s("c")]);
        assert_eq!(m.cols(), &[s("r1"), s("r2")]);
        assert!(m.has_nan());
        assert_eq!(m.values()[(1, 1)], 3.0);
        assert!(m.values()[(2, 0)].is_nan());
        let filled = m.fill_nan(0.0);
        assert!(!filled.has_nan());
    }

    #[test]
    fn test_normalize_and_zscore() {
        let m = LabeledMatrix::new(
            vec![s("a"), s("b")],
            vec![s("x"), s("y")],
            arr2(&[[1.0, 2.0], [3.0, 2.0]]),
        );
        let n = m.clone().normalize_columns_by_mean();
        assert_eq!(n.values(), &arr2(&[[0.5, 1.0], [1.5, 1.0]]));
        let z = m.zscore_columns();
        assert_eq!(z.values(), &arr2(&[[-1.0, 0.0], [1.0, 0.0]]));
    }

    #[test]
    fn test_select_and_csv() {
        let m = LabeledMatrix::new(
            vec![s("a"), s("b")],
            vec![s("x")],
            arr2(&[[1.5], [f64::NAN]]),
        );
        let kept = m.select_rows(&[true, false]);
        assert_eq!(kept.dim(), (1, 1));
        let mut buf = vec![];
        m.write_csv(&mut buf, "channel").unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "channel,x\na,1.5\nb,\n");
    }
}
