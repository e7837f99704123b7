//! 字符串类型的元数据表, 以及按列分组.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use crate::{ImcError, ImcResult};

/// 开关列中被视为 "真" 的取值.
const TRUTHY: [&str; 5] = ["true", "True", "TRUE", "1", "yes"];

/// 从 CSV 读取的元数据表. 所有值按字符串保存.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MetadataTable {
    /// 直接构建. 每行长度必须等于列数, 否则程序 panic.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        assert!(rows.iter().all(|r| r.len() == columns.len()), "行长度与列数不符");
        Self { columns, rows }
    }

    /// 读取带表头的 CSV 文件.
    pub fn from_path<P: AsRef<Path>>(path: P) -> ImcResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ImcError::MissingFile(path.to_path_buf()));
        }
        Self::from_reader(std::fs::File::open(path)?)
    }

    /// 从任意读取器读取带表头的 CSV.
    pub fn from_reader<R: io::Read>(reader: R) -> ImcResult<Self> {
        let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let columns = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = vec![];
        for record in reader.records() {
            rows.push(record?.iter().map(str::to_string).collect());
        }
        Ok(Self { columns, rows })
    }

    /// 列名.
    #[inline]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// 所有行.
    #[inline]
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// 行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 是否没有任何行?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 列 `name` 的位置.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// 是否存在列 `name`?
    #[inline]
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// 列 `name` 的全部取值.
    pub fn column(&self, name: &str) -> ImcResult<Vec<&str>> {
        let i = self
            .column_index(name)
            .ok_or_else(|| ImcError::MissingColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r[i].as_str()).collect())
    }

    /// 第 `row` 行中列 `name` 的值.
    pub fn get(&self, row: usize, name: &str) -> Option<&str> {
        let i = self.column_index(name)?;
        self.rows.get(row).map(|r| r[i].as_str())
    }

    /// 只保留 `rows` 给出的行, 保持给定顺序.
    pub fn take_rows(&self, rows: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: rows.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// 若存在开关列, 删除开关值不为真的行. 返回删除的行数.
    pub fn filter_toggle(&mut self) -> usize {
        let Some(i) = self.column_index(crate::consts::names::DEFAULT_TOGGLE_ATTRIBUTE) else {
            return 0;
        };
        let before = self.rows.len();
        self.rows.retain(|r| TRUTHY.contains(&r[i].trim()));
        before - self.rows.len()
    }

    /// 按 `cols` 分组. 组按首次出现的顺序排列; `cols` 为空时按所有列分组.
    ///
    /// `cols` 中存在表中没有的列时返回 [`ImcError::MissingColumn`].
    pub fn group_by<S: AsRef<str>>(&self, cols: &[S]) -> ImcResult<Vec<MetadataGroup<'_>>> {
        let idx: Vec<usize> = if cols.is_empty() {
            (0..self.columns.len()).collect()
        } else {
            cols.iter()
                .map(|c| {
                    self.column_index(c.as_ref())
                        .ok_or_else(|| ImcError::MissingColumn(c.as_ref().to_string()))
                })
                .collect::<ImcResult<_>>()?
        };

        let mut position: HashMap<Vec<&str>, usize> = HashMap::new();
        let mut groups: Vec<MetadataGroup<'_>> = vec![];
        for (r, row) in self.rows.iter().enumerate() {
            let key: Vec<&str> = idx.iter().map(|&i| row[i].as_str()).collect();
            match position.get(&key) {
                Some(&g) => groups[g].rows.push(r),
                None => {
                    position.insert(key.clone(), groups.len());
                    groups.push(MetadataGroup {
                        table: self,
                        key: key.into_iter().map(str::to_string).collect(),
                        rows: vec![r],
                    });
                }
            }
        }
        Ok(groups)
    }
}

/// [`MetadataTable::group_by`] 得到的一组行.
#[derive(Debug, Clone)]
pub struct MetadataGroup<'a> {
    table: &'a MetadataTable,
    key: Vec<String>,
    rows: Vec<usize>,
}

impl<'a> MetadataGroup<'a> {
    /// 分组键.
    #[inline]
    pub fn key(&self) -> &[String] {
        &self.key
    }

    /// 组内行在原表中的序号.
    #[inline]
    pub fn row_indices(&self) -> &[usize] {
        &self.rows
    }

    /// 组内行数.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// 组是否为空? 由 `group_by` 得到的组总是非空.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// 组内所有行构成的子表.
    pub fn to_table(&self) -> MetadataTable {
        self.table.take_rows(&self.rows)
    }

    /// 组内取值恒定的列, 按列顺序给出 `(列名, 值)`.
    pub fn constant_columns(&self) -> Vec<(String, String)> {
        let Some(&first) = self.rows.first() else {
            return vec![];
        };
        let rows = &self.table.rows;
        self.table
            .columns
            .iter()
            .enumerate()
            .filter(|&(i, _)| self.rows.iter().all(|&r| rows[r][i] == rows[first][i]))
            .map(|(i, c)| (c.clone(), rows[first][i].clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
sample_name,roi_number,disease,toggle
s2,1,Healthy,true
s1,1,COVID,True
s2,2,Healthy,1
s1,2,COVID,false
s3,1,COVID,yes
";

    #[test]
    fn test_read_and_columns() {
        let t = MetadataTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(t.len(), 5);
        assert_eq!(t.column("sample_name").unwrap(), vec!["s2", "s1", "s2", "s1", "s3"]);
        assert!(matches!(t.column("nope"), Err(ImcError::MissingColumn(_))));
        assert_eq!(t.get(1, "disease"), Some("COVID"));
    }

    #[test]
    fn test_toggle() {
        let mut t = MetadataTable::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(t.filter_toggle(), 1);
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_group_by_first_appearance() {
        let t = MetadataTable::from_reader(CSV.as_bytes()).unwrap();
        let groups = t.group_by(&["sample_name"]).unwrap();
        let keys: Vec<_> = groups.iter().map(|g| g.key()[0].as_str()).collect();
        assert_eq!(keys, vec!["s2", "s1", "s3"]);
        assert_eq!(groups[0].row_indices(), &[0, 2]);

        let consts = groups[0].constant_columns();
        assert_eq!(
            consts,
            vec![
                ("sample_name".to_string(), "s2".to_string()),
                ("disease".to_string(), "Healthy".to_string()),
            ]
        );
        // 单行组的所有列都是恒定的.
        assert_eq!(groups[2].constant_columns().len(), 4);
        assert_eq!(groups[1].to_table().len(), 2);
    }

    #[test]
    fn test_group_by_all_and_missing() {
        let t = MetadataTable::from_reader(CSV.as_bytes()).unwrap();
        let empty: [&str; 0] = [];
        assert_eq!(t.group_by(&empty).unwrap().len(), 5);
        assert!(matches!(t.group_by(&["batch"]), Err(ImcError::MissingColumn(c)) if c == "batch"));
    }
}
