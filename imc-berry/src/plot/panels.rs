//! PNG 图像面板.
//!
//! 面板之间以白色间隔拼接, 不绘制文字; 面板顺序与传入顺序一致.

use std::collections::BTreeMap;
use std::path::Path;

use image::{imageops, Rgb, RgbImage};
use log::debug;
use ndarray::ArrayView2;

use super::{get_grid_dims, palette, rgb_of};
use crate::consts::mask::is_background;
use crate::consts::TAB10;
use crate::data::{auto_window, to_gray};
use crate::{mask_to_rgb, ChannelLabels, ImcError, ImcResult, Mask, Stack};

/// 面板间隔 (像素).
const GAP: u32 = 2;

/// 有对象但未分配类别的细胞的颜色.
const UNASSIGNED: Rgb<u8> = Rgb([127, 127, 127]);

/// 轮廓颜色.
const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);

fn gray_rgb(img: ArrayView2<'_, f32>) -> RgbImage {
    let g = to_gray(img, auto_window(img));
    RgbImage::from_fn(g.width(), g.height(), |x, y| {
        let v = g.get_pixel(x, y).0[0];
        Rgb([v, v, v])
    })
}

/// 把同尺寸的面板按 `cols` 列拼接.
fn tile(panels: &[RgbImage], cols: usize) -> RgbImage {
    let (w, h) = panels.first().map_or((1, 1), |p| p.dimensions());
    let cols = cols.max(1) as u32;
    let rows = (panels.len() as u32 + cols - 1) / cols;
    let mut canvas = RgbImage::from_pixel(
        cols * (w + GAP) - GAP,
        (rows * (h + GAP)).max(GAP + 1) - GAP,
        Rgb([255, 255, 255]),
    );
    for (i, p) in panels.iter().enumerate() {
        let (r, c) = (i as u32 / cols, i as u32 % cols);
        imageops::replace(&mut canvas, p, i64::from(c * (w + GAP)), i64::from(r * (h + GAP)));
    }
    canvas
}

fn save(path: &Path, img: &RgbImage) -> ImcResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    debug!("Figure written to `{}`", path.display());
    Ok(())
}

fn check_shape(what: &str, got: (usize, usize), expected: (usize, usize)) -> ImcResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(ImcError::Shape(format!("{what} has shape {got:?}, expected {expected:?}")))
    }
}

/// 图像、掩膜与轮廓叠加.
///
/// 依次给出每幅图像 (1%~99% 分位数窗口), 每个掩膜 (对象伪彩色),
/// 最后一幅是第一幅图像上叠加第一个掩膜的对象轮廓. 所有输入形状须一致.
pub fn image_and_masks<P: AsRef<Path>>(
    path: P,
    images: &[(String, ArrayView2<'_, f32>)],
    masks: &[(String, &Mask)],
) -> ImcResult<()> {
    let Some(shape) = images
        .first()
        .map(|(_, i)| i.dim())
        .or_else(|| masks.first().map(|(_, m)| m.shape()))
    else {
        return Err(ImcError::Shape("nothing to plot".to_string()));
    };
    for (name, img) in images {
        check_shape(name, img.dim(), shape)?;
    }
    for (name, m) in masks {
        check_shape(name, m.shape(), shape)?;
    }

    let mut panels: Vec<RgbImage> = images.iter().map(|(_, i)| gray_rgb(*i)).collect();
    panels.extend(masks.iter().map(|(_, m)| mask_to_rgb(m)));
    if let (Some((_, img)), Some((_, m))) = (images.first(), masks.first()) {
        let mut overlay = gray_rgb(*img);
        for ((h, w), _) in m.indexed_iter().filter(|&(pos, _)| m.is_boundary(pos)) {
            overlay.put_pixel(w as u32, h as u32, OUTLINE);
        }
        panels.push(overlay);
    }
    let names: Vec<&str> = images
        .iter()
        .map(|(n, _)| n.as_str())
        .chain(masks.iter().map(|(n, _)| n.as_str()))
        .collect();
    debug!("Panels: {names:?}");
    save(path.as_ref(), &tile(&panels, panels.len()))
}

/// 图像栈每个通道一个面板, 排成近似正方形的网格.
pub fn channel_panels<P: AsRef<Path>>(path: P, stack: &Stack, labels: &ChannelLabels) -> ImcResult<()> {
    if labels.len() != stack.len_channels() {
        return Err(ImcError::Shape(format!(
            "{} channel labels for a stack of {} channels",
            labels.len(),
            stack.len_channels()
        )));
    }
    if stack.len_channels() == 0 {
        return Err(ImcError::NoChannels("any".to_string()));
    }
    let panels: Vec<RgbImage> = stack.channel_iter().map(gray_rgb).collect();
    let (_, cols) = get_grid_dims(panels.len());
    debug!("Channel panels: {:?}", labels.labels());
    save(path.as_ref(), &tile(&panels, cols))
}

/// 细胞类型图: 每个对象按其类别在 `labels` 中的位置着色.
///
/// 背景为黑色; 不在 `clusters` 中, 或其类别不在 `labels` 中的对象为灰色.
pub fn cell_type_map<P: AsRef<Path>>(
    path: P,
    mask: &Mask,
    clusters: &BTreeMap<u32, String>,
    labels: &[String],
) -> ImcResult<()> {
    let color_of: BTreeMap<u32, Rgb<u8>> = clusters
        .iter()
        .filter_map(|(&id, c)| {
            let i = labels.iter().position(|l| l == c)?;
            Some((id, rgb_of(palette(i, labels.len()))))
        })
        .collect();
    let (height, width) = mask.shape();
    let mut img = RgbImage::new(width as u32, height as u32);
    for ((h, w), id) in mask.indexed_iter() {
        let px = if is_background(id) {
            Rgb([0, 0, 0])
        } else {
            color_of.get(&id).copied().unwrap_or(UNASSIGNED)
        };
        img.put_pixel(w as u32, h as u32, px);
    }
    save(path.as_ref(), &img)
}

/// 训练标注叠加: 每个面板为一幅图像, 其上以半透明类别色标出标注像素.
///
/// 标注值 0 表示未标注, 值 `k` 使用 `tab10` 的第 `k - 1` 种颜色.
pub fn label_overlay<P: AsRef<Path>>(
    path: P,
    panels: &[(ArrayView2<'_, f32>, ArrayView2<'_, u8>)],
) -> ImcResult<()> {
    let Some((first, _)) = panels.first() else {
        return Err(ImcError::Shape("nothing to plot".to_string()));
    };
    let shape = first.dim();
    let mut out = Vec::with_capacity(panels.len());
    for (i, (img, lab)) in panels.iter().enumerate() {
        check_shape(&format!("image {i}"), img.dim(), shape)?;
        check_shape(&format!("labels {i}"), lab.dim(), shape)?;
        let mut rgb = gray_rgb(*img);
        for ((h, w), &l) in lab.indexed_iter().filter(|&(_, &l)| l > 0) {
            let (r, g, b) = TAB10[(usize::from(l) - 1) % TAB10.len()];
            let px = rgb.get_pixel_mut(w as u32, h as u32);
            let blend = |a: u8, c: u8| ((u16::from(a) + u16::from(c)) / 2) as u8;
            *px = Rgb([blend(px.0[0], r), blend(px.0[1], g), blend(px.0[2], b)]);
        }
        out.push(rgb);
    }
    let (_, cols) = get_grid_dims(out.len());
    save(path.as_ref(), &tile(&out, cols))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Array2, Array3};

    fn mask() -> Mask {
        Mask::new(arr2(&[[0, 1, 1, 0], [0, 1, 1, 0], [2, 2, 0, 3], [2, 2, 0, 3]]))
    }

    #[test]
    fn test_tile_dims() {
        let p = RgbImage::new(4, 3);
        let t = tile(&[p.clone(), p.clone(), p], 2);
        assert_eq!(t.dimensions(), (4 * 2 + GAP, 3 * 2 + GAP));
        assert_eq!(t.get_pixel(4, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_image_and_masks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg.png");
        let img = Array2::from_shape_fn((4, 4), |(h, w)| (h + w) as f32);
        let m = mask();
        image_and_masks(&path, &[("nuclear".into(), img.view())], &[("cell".into(), &m)]).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        // 图像、掩膜、轮廓三个面板.
        assert_eq!(back.dimensions(), (3 * 4 + 2 * GAP, 4));
        // 对象 1 的像素都在边界上.
        assert_eq!(back.get_pixel(2 * (4 + GAP) + 1, 0), &OUTLINE);

        let small = Array2::zeros((2, 2));
        let res = image_and_masks(&path, &[("x".into(), small.view())], &[("cell".into(), &m)]);
        assert!(matches!(res, Err(ImcError::Shape(_))));
    }

    #[test]
    fn test_channel_panels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("qc/channels.png");
        let stack = Stack::new(Array3::from_shape_fn((5, 3, 2), |(c, h, w)| (c * h + w) as f32));
        let labels = ChannelLabels::new(["a(1)", "b(2)", "c(3)", "d(4)", "e(5)"]);
        channel_panels(&path, &stack, &labels).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        // 5 个面板排成 2 行 3 列.
        assert_eq!(back.dimensions(), (3 * 2 + 2 * GAP, 2 * 3 + GAP));
        let wrong = ChannelLabels::new(["a(1)"]);
        assert!(channel_panels(&path, &stack, &wrong).is_err());
    }

    #[test]
    fn test_cell_type_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("types.png");
        let clusters: BTreeMap<u32, String> = [(1, "1 - CD3".to_string()), (2, "2 - CD68".to_string())].into();
        let labels = vec!["1 - CD3".to_string(), "2 - CD68".to_string()];
        cell_type_map(&path, &mask(), &clusters, &labels).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(back.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(back.get_pixel(1, 0), &rgb_of(TAB10[0]));
        assert_eq!(back.get_pixel(0, 2), &rgb_of(TAB10[1]));
        assert_eq!(back.get_pixel(3, 2), &UNASSIGNED);
    }

    #[test]
    fn test_label_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.png");
        let img = Array2::<f32>::zeros((3, 3));
        let lab = Array2::from_shape_fn((3, 3), |(h, _)| h as u8);
        label_overlay(&path, &[(img.view(), lab.view()), (img.view(), lab.view())]).unwrap();
        let back = image::open(&path).unwrap().to_rgb8();
        assert_eq!(back.dimensions(), (2 * 3 + GAP, 3));
        assert_eq!(back.get_pixel(0, 0), &Rgb([0, 0, 0]));
        let (r, g, b) = TAB10[0];
        assert_eq!(back.get_pixel(0, 1), &Rgb([r / 2, g / 2, b / 2]));
    }
}
