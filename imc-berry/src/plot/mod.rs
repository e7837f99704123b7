//! 诊断图.
//!
//! 统计图 (热图、柱状图、火山图) 用 `plotters` 输出为 SVG;
//! 图像类面板 (通道、掩膜、细胞类型、标注叠加) 用 `image` 拼接为 PNG.

use image::Rgb;
use plotters::style::RGBColor;

use crate::consts::{TAB10, TAB20};

mod charts;
mod panels;

pub use charts::{barplot, heatmap, heatmap_grid, volcano};
pub use panels::{cell_type_map, channel_panels, image_and_masks, label_overlay};

/// 把 `n` 个面板排成接近正方形的网格, 返回 (行, 列).
///
/// 列数为 `ceil(sqrt(n))`, 行数为容纳全部面板所需的最少行数.
pub fn get_grid_dims(n: usize) -> (usize, usize) {
    if n == 0 {
        return (0, 0);
    }
    let mut cols = (n as f64).sqrt().floor() as usize;
    if cols * cols < n {
        cols += 1;
    }
    let rows = (n + cols - 1) / cols;
    (rows, cols)
}

/// 第 `i` 种类别色. 不超过 10 类时使用 `tab10`, 否则使用 `tab20`.
pub fn palette(i: usize, n: usize) -> (u8, u8, u8) {
    if n <= TAB10.len() {
        TAB10[i % TAB10.len()]
    } else {
        TAB20[i % TAB20.len()]
    }
}

#[inline]
fn rgb_of((r, g, b): (u8, u8, u8)) -> Rgb<u8> {
    Rgb([r, g, b])
}

#[inline]
fn color_of((r, g, b): (u8, u8, u8)) -> RGBColor {
    RGBColor(r, g, b)
}

fn lerp(a: (u8, u8, u8), b: (u8, u8, u8), t: f64) -> (u8, u8, u8) {
    let t = t.clamp(0.0, 1.0);
    let f = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * t).round() as u8;
    (f(a.0, b.0), f(a.1, b.1), f(a.2, b.2))
}

/// 连续色图. `t` 位于 `[0, 1]`.
///
/// 顺序色图从深紫经青绿到黄; 发散色图从蓝经白到红, 0.5 处为白色.
fn colormap(t: f64, diverging: bool) -> (u8, u8, u8) {
    let stops: &[(u8, u8, u8)] = if diverging {
        &[(59, 76, 192), (247, 247, 247), (180, 4, 38)]
    } else {
        &[(68, 1, 84), (33, 145, 140), (253, 231, 37)]
    };
    let x = t.clamp(0.0, 1.0) * (stops.len() - 1) as f64;
    let i = (x.floor() as usize).min(stops.len() - 2);
    lerp(stops[i], stops[i + 1], x - i as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_dims() {
        assert_eq!(get_grid_dims(0), (0, 0));
        assert_eq!(get_grid_dims(1), (1, 1));
        assert_eq!(get_grid_dims(2), (1, 2));
        assert_eq!(get_grid_dims(4), (2, 2));
        assert_eq!(get_grid_dims(5), (2, 3));
        assert_eq!(get_grid_dims(10), (3, 4));
        for n in 1..50 {
            let (r, c) = get_grid_dims(n);
            assert!(r * c >= n);
            assert!((r - 1) * c < n);
        }
    }

    #[test]
    fn test_colormap_ends() {
        assert_eq!(colormap(0.0, true), (59, 76, 192));
        assert_eq!(colormap(0.5, true), (247, 247, 247));
        assert_eq!(colormap(1.0, true), (180, 4, 38));
        assert_eq!(colormap(2.0, false), (253, 231, 37));
        assert_eq!(palette(11, 12), TAB20[11]);
        assert_eq!(palette(11, 3), TAB10[1]);
    }
}
