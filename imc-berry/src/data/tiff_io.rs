//! TIFF 读写.
//!
//! 图像栈按 "每页一个通道" 保存为 32 位浮点多页 TIFF;
//! 掩膜保存为单页 32 位无符号整数 TIFF.
//! 读取时兼容 8/16/32/64 位整数与浮点像素, 以及单页多采样 (交错存储) 的图像栈.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::{colortype, TiffEncoder};

use crate::{ImcError, ImcResult};

/// TIFF 中的一页, 已转换为 `f32`. `samples` 为每像素采样数.
#[derive(Debug, Clone)]
pub struct Page {
    /// 高.
    pub height: usize,

    /// 宽.
    pub width: usize,

    /// 每个像素的采样数.
    pub samples: usize,

    /// 行优先排列的像素数据, 同一像素的采样相邻.
    pub data: Vec<f32>,
}

#[allow(unreachable_patterns)]
fn decoded_to_f32(res: DecodingResult) -> ImcResult<Vec<f32>> {
    Ok(match res {
        DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
        _ => return Err(ImcError::Unsupported("TIFF sample format".into())),
    })
}

/// 读取 TIFF 文件的所有页.
pub fn read_pages<P: AsRef<Path>>(path: P) -> ImcResult<Vec<Page>> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(ImcError::MissingFile(path.to_path_buf()));
    }
    let mut decoder =
        Decoder::new(BufReader::new(File::open(path)?))?.with_limits(Limits::unlimited());

    let mut pages = vec![];
    loop {
        let (w, h) = decoder.dimensions()?;
        let (width, height) = (w as usize, h as usize);
        let data = decoded_to_f32(decoder.read_image()?)?;
        let area = width * height;
        if area == 0 || data.len() % area != 0 {
            return Err(ImcError::Shape(format!(
                "page {} of `{}` holds {} samples for {height}x{width} pixels",
                pages.len(),
                path.display(),
                data.len()
            )));
        }
        pages.push(Page {
            height,
            width,
            samples: data.len() / area,
            data,
        });

        if !decoder.more_images() {
            break;
        }
        decoder.next_image()?;
    }
    Ok(pages)
}

/// 读取图像栈, 结果形状为 (通道, 高, 宽).
///
/// 多页文件每页视为一个通道 (每页必须是单采样且尺寸一致);
/// 单页多采样文件按采样拆分为通道.
pub fn read_stack<P: AsRef<Path>>(path: P) -> ImcResult<Array3<f32>> {
    let mut pages = read_pages(path)?;
    if pages.len() == 1 {
        let page = pages.remove(0);
        let (h, w, s) = (page.height, page.width, page.samples);
        let interleaved = Array3::from_shape_vec((h, w, s), page.data)?;
        return Ok(interleaved.permuted_axes([2, 0, 1]).as_standard_layout().to_owned());
    }

    let (h, w) = (pages[0].height, pages[0].width);
    if let Some(bad) = pages
        .iter()
        .position(|p| p.samples != 1 || (p.height, p.width) != (h, w))
    {
        return Err(ImcError::Shape(format!(
            "page {bad} differs from the first page ({h}x{w}, 1 sample)"
        )));
    }
    let c = pages.len();
    let data: Vec<f32> = pages.into_iter().flat_map(|p| p.data).collect();
    Ok(Array3::from_shape_vec((c, h, w), data)?)
}

/// 读取分割掩膜. 浮点或有符号像素会四舍五入后截断到非负整数.
pub fn read_mask<P: AsRef<Path>>(path: P) -> ImcResult<Array2<u32>> {
    let path = path.as_ref();
    let pages = read_pages(path)?;
    let page = &pages[0];
    if page.samples != 1 {
        return Err(ImcError::Shape(format!(
            "mask `{}` has {} samples per pixel",
            path.display(),
            page.samples
        )));
    }
    let data = page
        .data
        .iter()
        .map(|&v| v.round().max(0.0) as u32)
        .collect();
    Ok(Array2::from_shape_vec((page.height, page.width), data)?)
}

/// 以单页 32 位无符号整数 TIFF 保存掩膜.
pub fn write_mask<P: AsRef<Path>>(path: P, mask: ArrayView2<'_, u32>) -> ImcResult<()> {
    let (h, w) = mask.dim();
    let buf: Vec<u32> = mask.iter().copied().collect();
    let mut writer = BufWriter::new(File::create(path)?);
    let mut tiff = TiffEncoder::new(&mut writer)?;
    tiff.write_image::<colortype::Gray32>(w as u32, h as u32, &buf)?;
    Ok(())
}

/// 以多页 32 位浮点 TIFF 保存形状为 (通道, 高, 宽) 的图像栈.
pub fn write_stack<P: AsRef<Path>>(path: P, stack: ArrayView3<'_, f32>) -> ImcResult<()> {
    let (_, h, w) = stack.dim();
    let mut writer = BufWriter::new(File::create(path)?);
    let mut tiff = TiffEncoder::new(&mut writer)?;
    for channel in stack.axis_iter(Axis(0)) {
        let buf: Vec<f32> = channel.iter().copied().collect();
        tiff.write_image::<colortype::Gray32Float>(w as u32, h as u32, &buf)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array3};

    #[test]
    fn test_stack_tiff_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi_full.tiff");
        let stack = Array3::from_shape_fn((3, 4, 5), |(c, h, w)| (c * 20 + h * 5 + w) as f32 / 7.0);
        write_stack(&path, stack.view()).unwrap();
        let back = read_stack(&path).unwrap();
        assert_eq!(back, stack);
    }

    #[test]
    fn test_mask_tiff_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi_full_mask.tiff");
        let mask = arr2(&[[0u32, 1, 1], [70_000, 0, 2]]);
        write_mask(&path, mask.view()).unwrap();
        assert_eq!(read_mask(&path).unwrap(), mask);
    }

    #[test]
    fn test_interleaved_single_page() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.tiff");
        {
            let mut writer = BufWriter::new(File::create(&path).unwrap());
            let mut tiff = TiffEncoder::new(&mut writer).unwrap();
            // 2x1 像素, RGB.
            tiff.write_image::<colortype::RGB8>(2, 1, &[1, 2, 3, 4, 5, 6])
                .unwrap();
        }
        let s = read_stack(&path).unwrap();
        assert_eq!(s.dim(), (3, 1, 2));
        assert_eq!(s[(0, 0, 1)], 4.0);
        assert_eq!(s[(2, 0, 0)], 3.0);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            read_stack("/definitely/not/here.tiff"),
            Err(ImcError::MissingFile(_))
        ));
    }
}
