//! 单细胞聚类标签.
//!
//! 以 (样本, ROI, 对象编号) 为复合键. CSV 表头固定为 `sample,roi,obj_id,cluster`.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

use crate::{ImcError, ImcResult};

/// CSV 必需的列.
const COLUMNS: [&str; 4] = ["sample", "roi", "obj_id", "cluster"];

/// 细胞的复合键, 按 (样本, ROI, 对象编号) 字典序排序.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CellKey {
    /// 样本名.
    pub sample: String,

    /// ROI 名.
    pub roi: String,

    /// ROI 掩膜中的对象编号.
    pub obj_id: u32,
}

impl CellKey {
    /// 构建.
    pub fn new<S: Into<String>, R: Into<String>>(sample: S, roi: R, obj_id: u32) -> Self {
        Self {
            sample: sample.into(),
            roi: roi.into(),
            obj_id,
        }
    }
}

/// 细胞到聚类标签的有序映射.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Clusters(BTreeMap<CellKey, String>);

impl FromIterator<(CellKey, String)> for Clusters {
    fn from_iter<T: IntoIterator<Item = (CellKey, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Clusters {
    /// 空映射.
    pub fn new() -> Self {
        Self::default()
    }

    /// 细胞个数.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 是否为空?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 插入或覆盖一个细胞的标签.
    pub fn insert(&mut self, key: CellKey, cluster: String) -> Option<String> {
        self.0.insert(key, cluster)
    }

    /// 查询一个细胞的标签.
    pub fn get(&self, key: &CellKey) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// 按键顺序迭代.
    pub fn iter(&self) -> impl Iterator<Item = (&CellKey, &str)> {
        self.0.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// 所有不同的标签, 升序.
    pub fn labels(&self) -> Vec<String> {
        let mut v: Vec<String> = self.0.values().cloned().collect();
        v.sort();
        v.dedup();
        v
    }

    /// 属于样本 `sample` 的子映射.
    pub fn for_sample(&self, sample: &str) -> Clusters {
        self.iter()
            .filter(|(k, _)| k.sample == sample)
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect()
    }

    /// ROI `roi` 中 对象编号 → 标签.
    pub fn for_roi(&self, sample: &str, roi: &str) -> BTreeMap<u32, String> {
        self.iter()
            .filter(|(k, _)| k.sample == sample && k.roi == roi)
            .map(|(k, v)| (k.obj_id, v.to_string()))
            .collect()
    }

    /// 按 `map` 重命名标签. 不在 `map` 中的标签保持不变.
    pub fn rename(&self, map: &HashMap<String, String>) -> Clusters {
        self.iter()
            .map(|(k, v)| (k.clone(), map.get(v).cloned().unwrap_or_else(|| v.to_string())))
            .collect()
    }

    /// 每个 (样本, ROI, 标签) 的细胞数.
    pub fn counts_by_roi(&self) -> BTreeMap<(String, String, String), usize> {
        let mut ans = BTreeMap::new();
        for (k, v) in self.iter() {
            *ans.entry((k.sample.clone(), k.roi.clone(), v.to_string()))
                .or_insert(0) += 1;
        }
        ans
    }

    /// 每个标签的细胞数.
    pub fn counts(&self) -> BTreeMap<String, usize> {
        let mut ans = BTreeMap::new();
        for v in self.0.values() {
            *ans.entry(v.clone()).or_insert(0) += 1;
        }
        ans
    }

    /// 写出 CSV.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> ImcResult<()> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(COLUMNS)?;
        for (k, v) in self.iter() {
            w.write_record([k.sample.as_str(), k.roi.as_str(), k.obj_id.to_string().as_str(), v])?;
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

    /// 读取 CSV. 样本名与 ROI 名总是按字符串读取, 列顺序任意, 多余的列被忽略.
    ///
    /// 对象编号必须是非负整数, 否则返回 [`ImcError::InvalidValue`].
    pub fn read_csv<R: io::Read>(reader: R) -> ImcResult<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.clone();
        let mut idx = [0usize; 4];
        for (slot, col) in idx.iter_mut().zip(COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h == col)
                .ok_or_else(|| ImcError::MissingColumn(col.to_string()))?;
        }
        let mut ans = Clusters::new();
        for record in reader.records() {
            let record = record?;
            let field = |i: usize| record.get(idx[i]).unwrap_or_default();
            let obj_id = field(2).trim().parse::<u32>().map_err(|_| ImcError::InvalidValue {
                column: COLUMNS[2].to_string(),
                value: field(2).to_string(),
            })?;
            ans.insert(CellKey::new(field(0), field(1), obj_id), field(3).to_string());
        }
        Ok(ans)
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

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_clusters() -> Clusters {
        [
            (CellKey::new("20200701", "20200701-01", 1), "1 - CD3+"),
            (CellKey::new("20200701", "20200701-01", 2), "2 - CD68+"),
            (CellKey::new("20200701", "20200701-02", 1), "1 - CD3+"),
            (CellKey::new("s2", "s2-01", 7), "2 - CD68+"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    #[test]
    fn test_csv_round_trip() {
        let c = sample_clusters();
        let mut buf = vec![];
        c.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("sample,roi,obj_id,cluster\n"));
        let back = Clusters::read_csv(buf.as_slice()).unwrap();
        assert_eq!(back, c);
        // 纯数字样本名按字符串保留.
        assert_eq!(back.iter().next().unwrap().0.sample, "20200701");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("single_cell").join("p.single_cell.cluster_assignments.csv");
        let c = sample_clusters();
        c.save(&path).unwrap();
        assert_eq!(Clusters::open(&path).unwrap(), c);
    }

    #[test]
    fn test_missing_column() {
        let csv = "sample,roi,cluster\na,a-01,1\n";
        assert!(matches!(
            Clusters::read_csv(csv.as_bytes()),
            Err(ImcError::MissingColumn(c)) if c == "obj_id"
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_serde_derives() {
        fn assert_serde<T: serde::Serialize + serde::de::DeserializeOwned>() {}
        assert_serde::<CellKey>();
        assert_serde::<Clusters>();
    }

    #[test]
    fn test_invalid_object_ids() {
        for bad in ["3.5", "-1", "x", ""] {
            let csv = format!("sample,roi,obj_id,cluster\na,a-01,3,x\na,a-01,{bad},y\n");
            assert!(matches!(
                Clusters::read_csv(csv.as_bytes()),
                Err(ImcError::InvalidValue { column, value }) if column == "obj_id" && value == bad
            ));
        }
        let csv = "sample,roi,obj_id,cluster\na,a-01, 3 ,x\na,a-01,4,y\n";
        let c = Clusters::read_csv(csv.as_bytes()).unwrap();
        assert_eq!(c.len(), 2);
        assert_eq!(c.get(&CellKey::new("a", "a-01", 3)), Some("x"));
    }

    #[test]
    fn test_slices_and_rename() {
        let c = sample_clusters();
        assert_eq!(c.for_sample("s2").len(), 1);
        let roi = c.for_roi("20200701", "20200701-01");
        assert_eq!(roi.len(), 2);
        assert_eq!(roi[&2], "2 - CD68+");

        let map = HashMap::from([("1 - CD3+".to_string(), "T cells".to_string())]);
        let renamed = c.rename(&map);
        assert_eq!(renamed.labels(), vec!["2 - CD68+", "T cells"]);

        let counts = c.counts_by_roi();
        assert_eq!(counts[&("20200701".into(), "20200701-01".into(), "1 - CD3+".into())], 1);
        assert_eq!(c.counts()["1 - CD3+"], 2);
    }
}
