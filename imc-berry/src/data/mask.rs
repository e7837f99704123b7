//! 分割掩膜.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::ops::{Index, IndexMut};
use std::path::Path;

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::tiff_io;
use crate::consts::mask::{is_background, is_object};
use crate::{Area2d, Idx2d, ImcError, ImcResult};

/// 获得 `(h, w)` 的 4-邻居索引. 不检查越界.
#[inline]
fn neighbour4((h, w): Idx2d) -> [Idx2d; 4] {
    [
        (h.wrapping_sub(1), w),
        (h.saturating_add(1), w),
        (h, w.wrapping_sub(1)),
        (h, w.saturating_add(1)),
    ]
}

/// 二维分割掩膜. `0` 为背景, 其它值为对象 (细胞或细胞核) 编号.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    data: Array2<u32>,
}

impl Index<Idx2d> for Mask {
    type Output = u32;

    #[inline]
    fn index(&self, index: Idx2d) -> &Self::Output {
        &self.data[index]
    }
}

impl IndexMut<Idx2d> for Mask {
    #[inline]
    fn index_mut(&mut self, index: Idx2d) -> &mut Self::Output {
        &mut self.data[index]
    }
}

impl Mask {
    /// 由 (高, 宽) 数组构建.
    #[inline]
    pub fn new(data: Array2<u32>) -> Self {
        Self { data }
    }

    /// 读取单页 TIFF 掩膜.
    pub fn open<P: AsRef<Path>>(path: P) -> ImcResult<Self> {
        tiff_io::read_mask(path).map(Self::new)
    }

    /// 以 32 位灰度 TIFF 保存.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ImcResult<()> {
        tiff_io::write_mask(path, self.data.view())
    }

    /// 形状 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.data.dim()
    }

    /// 像素总数.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 检查索引是否越界.
    #[inline]
    pub fn check(&self, (h, w): Idx2d) -> bool {
        let (sh, sw) = self.shape();
        h < sh && w < sw
    }

    /// 获得数据的一份不可变 shallow copy.
    #[inline]
    pub fn array_view(&self) -> ArrayView2<'_, u32> {
        self.data.view()
    }

    /// 获得数据的一份可变 shallow copy.
    #[inline]
    pub fn array_view_mut(&mut self) -> ArrayViewMut2<'_, u32> {
        self.data.view_mut()
    }

    /// 直接获得底层数据.
    #[inline]
    pub fn into_raw(self) -> Array2<u32> {
        self.data
    }

    /// 迭代所有 (索引, 像素值).
    pub fn indexed_iter(&self) -> impl Iterator<Item = (Idx2d, u32)> + '_ {
        self.data.indexed_iter().map(|(p, &v)| (p, v))
    }

    /// 所有对象编号, 升序.
    pub fn object_ids(&self) -> Vec<u32> {
        self.data
            .iter()
            .copied()
            .filter(|&p| is_object(p))
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect()
    }

    /// 对象个数.
    pub fn n_objects(&self) -> usize {
        self.object_ids().len()
    }

    /// 是否没有任何对象?
    pub fn is_background(&self) -> bool {
        self.data.iter().all(|&p| is_background(p))
    }

    /// 每个对象包含的像素, 按对象编号升序, 像素按行优先顺序.
    pub fn objects(&self) -> BTreeMap<u32, Area2d> {
        let mut ans: BTreeMap<u32, Area2d> = BTreeMap::new();
        for (pos, &p) in self.data.indexed_iter() {
            if is_object(p) {
                ans.entry(p).or_default().push(pos);
            }
        }
        ans
    }

    /// 每个对象的面积 (像素数).
    pub fn areas(&self) -> BTreeMap<u32, usize> {
        let mut ans = BTreeMap::new();
        for &p in self.data.iter().filter(|&&p| is_object(p)) {
            *ans.entry(p).or_insert(0) += 1;
        }
        ans
    }

    /// `pos` 是否位于其对象的边界上?
    ///
    /// 边界像素是对象像素, 且其某个 4-邻居越界或属于不同的值.
    pub fn is_boundary(&self, pos: Idx2d) -> bool {
        let v = self.data[pos];
        is_object(v)
            && neighbour4(pos)
                .into_iter()
                .any(|n| self.data.get(n).map_or(true, |&q| q != v))
    }

    /// 所有对象的边界.
    pub fn boundaries(&self) -> Array2<bool> {
        Array2::from_shape_fn(self.shape(), |pos| self.is_boundary(pos))
    }

    /// 最近邻缩放到 `(h, w)`. 不会产生新的对象编号.
    pub fn resize_nearest(&self, (h, w): Idx2d) -> Mask {
        Mask::new(resize_nearest(self.data.view(), (h, w)))
    }

    /// 压缩数据.
    pub fn compress(&self) -> ImcResult<CompactMask> {
        let sh = self.shape();
        let mut e = ZlibEncoder::new(Vec::with_capacity(8), Compression::best());
        for p in self.data.iter() {
            e.write_all(&p.to_le_bytes())?;
        }
        Ok(CompactMask { buf: e.finish()?, sh })
    }
}

/// 最近邻缩放任意二维数组.
pub(crate) fn resize_nearest<T: Copy>(src: ArrayView2<'_, T>, (h, w): Idx2d) -> Array2<T> {
    let (sh, sw) = src.dim();
    assert!(sh > 0 && sw > 0, "不能缩放空数组");
    let map = |i: usize, from: usize, to: usize| {
        let x = ((i as f64 + 0.5) * from as f64 / to as f64).floor() as usize;
        x.min(from - 1)
    };
    Array2::from_shape_fn((h, w), |(i, j)| src[(map(i, sh, h), map(j, sw, w))])
}

/// 压缩存储的 [`Mask`]; 不透明类型.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CompactMask {
    /// 压缩的不透明字节流.
    buf: Vec<u8>,

    /// 形状.
    sh: Idx2d,
}

impl CompactMask {
    /// 形状 (高, 宽).
    #[inline]
    pub fn shape(&self) -> Idx2d {
        self.sh
    }

    /// 压缩后的字节数.
    #[inline]
    pub fn compressed_len(&self) -> usize {
        self.buf.len()
    }

    /// 解压缩数据.
    pub fn decompress(&self) -> ImcResult<Mask> {
        let (h, w) = self.sh;
        let mut d = ZlibDecoder::new(self.buf.as_slice());
        let mut bytes = Vec::with_capacity(h * w * 4);
        d.read_to_end(&mut bytes)?;
        if bytes.len() != h * w * 4 {
            return Err(ImcError::Shape(format!(
                "compact mask holds {} bytes for {h}x{w} pixels",
                bytes.len()
            )));
        }
        let data = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Mask::new(Array2::from_shape_vec((h, w), data)?))
    }
}
