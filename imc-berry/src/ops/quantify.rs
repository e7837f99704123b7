//! 单细胞定量: 每个细胞的通道强度与形态学参数.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use log::{info, warn};
use ndarray::{s, Array2, ArrayView1, Axis};

use super::par_map;
use crate::data::fmt_value;
use crate::project::{CellKey, Roi};
use crate::{ImcError, ImcResult, Idx2d, Mask, Reduce};

/// 形态学参数名.
pub const MORPHOLOGY_FEATURES: [&str; 7] = [
    "area",
    "perimeter",
    "centroid_y",
    "centroid_x",
    "major_axis_length",
    "minor_axis_length",
    "eccentricity",
];

/// 单细胞 × 特征表. 行以 [`CellKey`] 标识.
#[derive(Debug, Clone, PartialEq)]
pub struct CellTable {
    cells: Vec<CellKey>,
    features: Vec<String>,
    values: Array2<f64>,
}

impl CellTable {
    /// 构建. `values` 形状必须是 (细胞数, 特征数), 否则程序 panic.
    pub fn new(cells: Vec<CellKey>, features: Vec<String>, values: Array2<f64>) -> Self {
        assert_eq!(values.dim(), (cells.len(), features.len()));
        Self {
            cells,
            features,
            values,
        }
    }

    /// 空表.
    pub fn empty(features: Vec<String>) -> Self {
        let n = features.len();
        Self::new(vec![], features, Array2::zeros((0, n)))
    }

    /// 细胞.
    #[inline]
    pub fn cells(&self) -> &[CellKey] {
        &self.cells
    }

    /// 特征名.
    #[inline]
    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// 数值.
    #[inline]
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// 细胞数.
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    /// 特征 `name` 的列.
    pub fn feature(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.features.iter().position(|f| f == name)?;
        Some(self.values.column(j))
    }

    /// 只保留给定特征, 按给定顺序. 不存在的特征被忽略.
    pub fn select_features<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let idx: Vec<usize> = names
            .iter()
            .filter_map(|n| self.features.iter().position(|f| f == n.as_ref()))
            .collect();
        Self {
            cells: self.cells.clone(),
            features: idx.iter().map(|&j| self.features[j].clone()).collect(),
            values: self.values.select(Axis(1), &idx),
        }
    }

    /// 纵向拼接多张表. 特征取并集 (按首次出现顺序), 缺失处为 NaN.
    pub fn concat<I: IntoIterator<Item = CellTable>>(tables: I) -> Self {
        let tables: Vec<CellTable> = tables.into_iter().collect();
        let mut features: Vec<String> = vec![];
        for t in &tables {
            for f in &t.features {
                if !features.contains(f) {
                    features.push(f.clone());
                }
            }
        }
        let n: usize = tables.iter().map(CellTable::n_cells).sum();
        let mut values = Array2::from_elem((n, features.len()), f64::NAN);
        let mut cells = Vec::with_capacity(n);
        let mut offset = 0;
        for t in tables {
            for (j, f) in t.features.iter().enumerate() {
                let k = features.iter().position(|x| x == f).unwrap_or_default();
                values
                    .slice_mut(s![offset..offset + t.n_cells(), k])
                    .assign(&t.values.column(j));
            }
            offset += t.n_cells();
            cells.extend(t.cells);
        }
        Self::new(cells, features, values)
    }

    /// 按细胞横向连接. 结果保留 `self` 的细胞顺序, `other` 中缺失的细胞为 NaN.
    pub fn join(&self, other: &CellTable) -> Self {
        let pos: HashMap<&CellKey, usize> =
            other.cells.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let (n, a, b) = (self.n_cells(), self.features.len(), other.features.len());
        let mut values = Array2::from_elem((n, a + b), f64::NAN);
        values.slice_mut(s![.., ..a]).assign(&self.values);
        for (i, k) in self.cells.iter().enumerate() {
            if let Some(&r) = pos.get(k) {
                values.slice_mut(s![i, a..]).assign(&other.values.row(r));
            }
        }
        let mut features = self.features.clone();
        features.extend(other.features.iter().cloned());
        Self::new(self.cells.clone(), features, values)
    }

    /// 以 CSV 写出, 表头为 `sample,roi,obj_id,<特征...>`.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> ImcResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        let header = ["sample", "roi", "obj_id"]
            .into_iter()
            .map(str::to_string)
            .chain(self.features.iter().cloned());
        w.write_record(header)?;
        for (k, row) in self.cells.iter().zip(self.values.rows()) {
            let mut rec = vec![k.sample.clone(), k.roi.clone(), k.obj_id.to_string()];
            rec.extend(row.iter().map(|v| fmt_value(*v)));
            w.write_record(&rec)?;
        }
        w.flush()?;
        Ok(())
    }

    /// 写出 CSV 文件, 必要时创建父目录.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ImcResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.write_csv(std::fs::File::create(path)?)
    }

    /// 读取 [`CellTable::write_csv`] 写出的 CSV. 空值读为 NaN.
    pub fn read_csv<R: io::Read>(reader: R) -> ImcResult<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.clone();
        for (i, col) in ["sample", "roi", "obj_id"].into_iter().enumerate() {
            if headers.get(i) != Some(col) {
                return Err(ImcError::MissingColumn(col.to_string()));
            }
        }
        let features: Vec<String> = headers.iter().skip(3).map(str::to_string).collect();
        let mut cells = vec![];
        let mut flat = vec![];
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(i).unwrap_or_default();
            let obj_id = field(2).trim().parse::<u32>().map_err(|_| ImcError::InvalidValue {
                column: "obj_id".to_string(),
                value: field(2).to_string(),
            })?;
            cells.push(CellKey::new(field(0), field(1), obj_id));
            for j in 0..features.len() {
                flat.push(field(j + 3).trim().parse::<f64>().unwrap_or(f64::NAN));
            }
        }
        let values = Array2::from_shape_vec((cells.len(), features.len()), flat)?;
        Ok(Self::new(cells, features, values))
    }

    /// 读取 CSV 文件.
    pub fn open<P: AsRef<Path>>(path: P) -> ImcResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ImcError::MissingFile(path.to_path_buf()));
        }
        Self::read_csv(std::fs::File::open(path)?)
    }
}

fn intensity_of_roi(roi: &Roi, reduce: Reduce) -> ImcResult<CellTable> {
    let stack = roi.stack()?;
    let labels = roi.channel_labels()?.labels();
    let mask = roi.cell_mask()?;
    if mask.shape() != stack.spatial_shape() {
        return Err(ImcError::Shape(format!(
            "cell mask {:?} does not match stack {:?} of `{}`",
            mask.shape(),
            stack.spatial_shape(),
            roi.name()
        )));
    }
    let objects = mask.objects();
    let mut values = Array2::zeros((objects.len(), stack.len_channels()));
    let mut cells = Vec::with_capacity(objects.len());
    for (i, (id, pixels)) in objects.iter().enumerate() {
        cells.push(CellKey::new(roi.sample_name(), roi.name(), *id));
        for c in 0..stack.len_channels() {
            values[(i, c)] = stack.reduce_at(c, pixels.iter().copied(), reduce);
        }
    }
    Ok(CellTable::new(cells, labels, values))
}

/// 每个细胞中各通道的强度 (以 `reduce` 约简细胞内像素). 一行一个 (ROI, 细胞).
pub fn quantify_cell_intensity(rois: &[&Roi], reduce: Reduce) -> ImcResult<CellTable> {
    info!("Quantifying single-cell intensity of {} ROI(s)", rois.len());
    let tables = par_map(rois, "cell intensity", |roi| intensity_of_roi(roi, reduce))?;
    Ok(CellTable::concat(tables))
}

/// 由像素集合计算形态学参数, 顺序同 [`MORPHOLOGY_FEATURES`].
pub(crate) fn morphology_of(mask: &Mask, id: u32, pixels: &[Idx2d]) -> [f64; 7] {
    let area = pixels.len() as f64;
    let perimeter = pixels.iter().filter(|&&p| mask.is_boundary(p)).count() as f64;
    let (cy, cx) = pixels
        .iter()
        .fold((0.0, 0.0), |(y, x), &(h, w)| (y + h as f64, x + w as f64));
    let (cy, cx) = (cy / area, cx / area);

    let (mut myy, mut mxx, mut mxy) = (0.0, 0.0, 0.0);
    for &(h, w) in pixels {
        let (dy, dx) = (h as f64 - cy, w as f64 - cx);
        myy += dy * dy;
        mxx += dx * dx;
        mxy += dy * dx;
    }
    let (myy, mxx, mxy) = (myy / area, mxx / area, mxy / area);
    // 二阶中心矩构成的惯性张量的特征值.
    let half_trace = (myy + mxx) / 2.0;
    let delta = (((myy - mxx) / 2.0).powi(2) + mxy * mxy).sqrt();
    let (l1, l2) = (half_trace + delta, (half_trace - delta).max(0.0));
    let major = 4.0 * l1.sqrt();
    let minor = 4.0 * l2.sqrt();
    let eccentricity = if l1 > 0.0 { (1.0 - l2 / l1).sqrt() } else { 0.0 };
    debug_assert!(pixels.iter().all(|&p| mask[p] == id));
    [area, perimeter, cy, cx, major, minor, eccentricity]
}

fn morphology_of_roi(roi: &Roi) -> ImcResult<CellTable> {
    let mask = roi.cell_mask()?;
    let objects = mask.objects();
    let mut values = Array2::zeros((objects.len(), MORPHOLOGY_FEATURES.len()));
    let mut cells = Vec::with_capacity(objects.len());
    for (i, (id, pixels)) in objects.iter().enumerate() {
        cells.push(CellKey::new(roi.sample_name(), roi.name(), *id));
        for (j, v) in morphology_of(&mask, *id, pixels).into_iter().enumerate() {
            values[(i, j)] = v;
        }
    }
    let features = MORPHOLOGY_FEATURES.iter().map(|s| s.to_string()).collect();
    Ok(CellTable::new(cells, features, values))
}

/// 每个细胞的形态学参数, 见 [`MORPHOLOGY_FEATURES`].
pub fn quantify_cell_morphology(rois: &[&Roi]) -> ImcResult<CellTable> {
    info!("Quantifying single-cell morphology of {} ROI(s)", rois.len());
    let tables = par_map(rois, "cell morphology", |roi| morphology_of_roi(roi))?;
    Ok(CellTable::concat(tables))
}

/// 单细胞强度 (均值约简) 与形态学参数的连接. 两者都不要求时返回空表.
pub fn quantify_cells(rois: &[&Roi], intensity: bool, morphology: bool) -> ImcResult<CellTable> {
    match (intensity, morphology) {
        (true, true) => {
            let i = quantify_cell_intensity(rois, Reduce::Mean)?;
            let m = quantify_cell_morphology(rois)?;
            Ok(i.join(&m))
        }
        (true, false) => quantify_cell_intensity(rois, Reduce::Mean),
        (false, true) => quantify_cell_morphology(rois),
        (false, false) => {
            warn!("Neither intensity nor morphology requested; nothing to quantify");
            Ok(CellTable::empty(vec![]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::MaskKind;
    use crate::{ChannelLabels, Stack};
    use ndarray::{arr2, Array3};

    fn roi() -> Roi {
        let mut r = Roi::new("s-01".into(), "s".into(), "/nowhere", false, None);
        let data = Array3::from_shape_fn((2, 3, 4), |(c, h, w)| (c * 100 + h * 4 + w) as f32);
        r.set_stack(Stack::new(data));
        r.set_channel_labels(ChannelLabels::new(["DNA1(Ir191)", "CD3(Er170)"]));
        let mask = Mask::new(arr2(&[[1, 1, 0, 0], [1, 1, 0, 2], [0, 0, 0, 2]]));
        r.set_mask(MaskKind::Cell, &mask).unwrap();
        r
    }

    #[test]
    fn test_intensity() {
        let r = roi();
        let t = quantify_cell_intensity(&[&r], Reduce::Mean).unwrap();
        assert_eq!(t.n_cells(), 2);
        assert_eq!(t.cells()[1], CellKey::new("s", "s-01", 2));
        // 细胞 1: 像素值 0, 1, 4, 5.
        assert_eq!(t.values()[(0, 0)], 2.5);
        // 细胞 2: 像素值 7, 11 (+100).
        assert_eq!(t.values()[(1, 1)], 109.0);
    }

    #[test]
    fn test_morphology() {
        let r = roi();
        let t = quantify_cell_morphology(&[&r]).unwrap();
        assert_eq!(t.features().len(), MORPHOLOGY_FEATURES.len());
        let area = t.feature("area").unwrap();
        assert_eq!(area.to_vec(), vec![4.0, 2.0]);
        assert_eq!(t.feature("centroid_y").unwrap()[0], 0.5);
        // 正方形细胞的离心率为 0, 竖直线段为 1.
        assert!(t.feature("eccentricity").unwrap()[0].abs() < 1e-9);
        assert!((t.feature("eccentricity").unwrap()[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_quantify_cells_join_and_csv() {
        let r = roi();
        let t = quantify_cells(&[&r], true, true).unwrap();
        assert_eq!(t.features().len(), 2 + MORPHOLOGY_FEATURES.len());
        let mut buf = vec![];
        t.write_csv(&mut buf).unwrap();
        let back = CellTable::read_csv(buf.as_slice()).unwrap();
        assert_eq!(back.cells(), t.cells());
        assert_eq!(back.features(), t.features());
        assert!((back.values() - t.values()).iter().all(|d| d.abs() < 1e-9));
    }

    #[test]
    fn test_read_csv_rejects_fractional_ids() {
        let csv = "sample,roi,obj_id,A\ns,s-01,1,0.5\ns,s-01,1.5,0.7\n";
        assert!(matches!(
            CellTable::read_csv(csv.as_bytes()),
            Err(ImcError::InvalidValue { value, .. }) if value == "1.5"
        ));
    }

    #[test]
    fn test_concat_different_features() {
        let a = CellTable::new(
            vec![CellKey::new("s", "s-01", 1)],
            vec!["A".into(), "B".into()],
            arr2(&[[1.0, 2.0]]),
        );
        let b = CellTable::new(
            vec![CellKey::new("s", "s-02", 1)],
            vec!["B".into(), "C".into()],
            arr2(&[[3.0, 4.0]]),
        );
        let c = CellTable::concat([a, b]);
        assert_eq!(c.features(), &["A".to_string(), "B".to_string(), "C".to_string()]);
        assert!(c.values()[(1, 0)].is_nan());
        assert_eq!(c.values()[(1, 1)], 3.0);
    }
}
