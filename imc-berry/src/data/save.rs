//! 图像的预览存储.

use std::path::Path;

use image::{GrayImage, ImageResult, Luma, Rgb, RgbImage};
use ndarray::ArrayView2;

use super::{DisplayWindow, Mask};
use crate::consts::{mask::is_background, TAB20};

/// 表明一个可以通过 **可视化友好** 模式持久化存储的图像对象.
///
/// 图像将以 "可视化友好" 的方式保存, 而不是 "as is" 的方式.
/// 对于通道强度图像, 保存时以 1% 与 99% 分位数为显示窗口;
/// 对于掩膜, 每个对象按编号映射到 `tab20` 调色板中的一种颜色.
pub trait ImgWriteVis {
    /// 按照一定的可视化规则将图片保存到 `path` 路径, 格式由扩展名决定.
    fn save_vis<P: AsRef<Path>>(&self, path: P) -> ImageResult<()>;
}

/// 通道强度的默认显示窗口. 无法估计时退回 `[0, 1]`.
pub(crate) fn auto_window(img: ArrayView2<'_, f32>) -> DisplayWindow {
    DisplayWindow::from_percentiles(img.iter().copied(), 1.0, 99.0).unwrap_or(DisplayWindow::unit())
}

/// 用 `window` 把强度图像转换为灰度图.
pub(crate) fn to_gray(img: ArrayView2<'_, f32>, window: DisplayWindow) -> GrayImage {
    let (height, width) = img.dim();
    let mut buf = GrayImage::new(width as u32, height as u32);
    for ((h, w), &v) in img.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, Luma([window.eval(v).unwrap_or(0)]));
    }
    buf
}

/// 对象编号对应的伪彩色. 背景为黑色.
#[inline]
pub(crate) fn object_color(id: u32) -> Rgb<u8> {
    if is_background(id) {
        Rgb([0, 0, 0])
    } else {
        let (r, g, b) = TAB20[(id as usize - 1) % TAB20.len()];
        Rgb([r, g, b])
    }
}

/// 把掩膜渲染为伪彩色图像.
pub fn mask_to_rgb(mask: &Mask) -> RgbImage {
    let (height, width) = mask.shape();
    let mut buf = RgbImage::new(width as u32, height as u32);
    for ((h, w), id) in mask.indexed_iter() {
        buf.put_pixel(w as u32, h as u32, object_color(id));
    }
    buf
}

/// 1% 与 99% 分位数窗口.
impl ImgWriteVis for ArrayView2<'_, f32> {
    fn save_vis<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        to_gray(self.view(), auto_window(self.view())).save(path)
    }
}

/// 对象伪彩色, 背景黑色.
impl ImgWriteVis for Mask {
    fn save_vis<P: AsRef<Path>>(&self, path: P) -> ImageResult<()> {
        mask_to_rgb(self).save(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2};

    #[test]
    fn test_mask_colors() {
        let m = Mask::new(arr2(&[[0, 1], [21, 2]]));
        let img = mask_to_rgb(&m);
        assert_eq!(img.get_pixel(0, 0), &Rgb([0, 0, 0]));
        // 编号 1 与 21 循环到同一颜色.
        assert_eq!(img.get_pixel(1, 0), img.get_pixel(0, 1));
        assert_ne!(img.get_pixel(1, 0), img.get_pixel(1, 1));
    }

    #[test]
    fn test_save_previews() {
        let dir = tempfile::tempdir().unwrap();
        let img = Array2::from_shape_fn((8, 6), |(h, w)| (h * 6 + w) as f32);
        img.view().save_vis(dir.path().join("ch.png")).unwrap();
        let m = Mask::new(Array2::from_shape_fn((8, 6), |(h, _)| (h / 2) as u32));
        m.save_vis(dir.path().join("mask.png")).unwrap();
        let back = image::open(dir.path().join("ch.png")).unwrap().to_luma8();
        assert_eq!(back.dimensions(), (6, 8));
        assert_eq!(back.get_pixel(0, 0).0[0], 0);
        assert_eq!(back.get_pixel(5, 7).0[0], 255);
    }
}
