//! SVG 统计图.

use std::path::Path;

use log::debug;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::FontTransform;

use super::{color_of, colormap, get_grid_dims, palette};
use crate::error::plot_err;
use crate::{ImcResult, LabeledMatrix};

const FONT: &str = "sans-serif";

/// 热图单元格边长 (像素).
const CELL: i32 = 18;

/// 估计的单个字符宽度 (像素), 用于给行列标签留出空间.
const CHAR_W: i32 = 7;

const TITLE_H: i32 = 30;
const COLORBAR_W: i32 = 70;
const COLORBAR_STEPS: i32 = 50;

/// 显著性阈值, 火山图中以水平线标出.
const P_THRESHOLD: f64 = 0.05;

/// 火山图中最多标注的点数.
const MAX_ANNOTATED: usize = 10;

fn ensure_parent(path: &Path) -> ImcResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn text_width(labels: &[String]) -> i32 {
    labels.iter().map(|s| s.chars().count()).max().unwrap_or(0) as i32 * CHAR_W + 10
}

/// 有限值的取值范围. 发散色图的范围关于 0 对称.
fn value_range<I: IntoIterator<Item = f64>>(values: I, diverging: bool) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return if diverging { (-1.0, 1.0) } else { (0.0, 1.0) };
    }
    if diverging {
        let m = lo.abs().max(hi.abs());
        return if m > 0.0 { (-m, m) } else { (-1.0, 1.0) };
    }
    if lo == hi {
        (lo - 0.5, hi + 0.5)
    } else {
        (lo, hi)
    }
}

fn heatmap_size(m: &LabeledMatrix) -> (u32, u32) {
    let (nr, nc) = m.dim();
    let w = text_width(m.rows()) + nc as i32 * CELL + COLORBAR_W;
    let h = TITLE_H + nr as i32 * CELL + text_width(m.cols());
    (w.max(200) as u32, h.max(120) as u32)
}

fn draw_heatmap<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    m: &LabeledMatrix,
    title: &str,
    diverging: bool,
) -> ImcResult<()> {
    let (lo, hi) = value_range(m.values().iter().copied(), diverging);
    let (nr, nc) = m.dim();
    let left = text_width(m.rows());
    let top = TITLE_H;
    let small = (FONT, 11).into_font();

    area.draw(&Text::new(title.to_string(), (left, 8), (FONT, 15).into_font()))
        .map_err(plot_err)?;
    for (i, r) in m.rows().iter().enumerate() {
        let y = top + i as i32 * CELL + CELL / 2 - 5;
        area.draw(&Text::new(r.clone(), (4, y), small.clone())).map_err(plot_err)?;
    }
    let rotated = small.clone().transform(FontTransform::Rotate90);
    for (j, c) in m.cols().iter().enumerate() {
        let x = left + j as i32 * CELL + CELL / 2 + 5;
        let y = top + nr as i32 * CELL + 4;
        area.draw(&Text::new(c.clone(), (x, y), rotated.clone())).map_err(plot_err)?;
    }

    for ((i, j), &v) in m.values().indexed_iter() {
        let (x0, y0) = (left + j as i32 * CELL, top + i as i32 * CELL);
        let color = if v.is_finite() {
            color_of(colormap((v - lo) / (hi - lo), diverging))
        } else {
            RGBColor(200, 200, 200)
        };
        area.draw(&Rectangle::new([(x0, y0), (x0 + CELL, y0 + CELL)], color.filled()))
            .map_err(plot_err)?;
    }

    let bar_x = left + nc as i32 * CELL + 12;
    let bar_h = (nr as i32 * CELL).max(COLORBAR_STEPS);
    let step = bar_h as f64 / COLORBAR_STEPS as f64;
    for k in 0..COLORBAR_STEPS {
        let t = 1.0 - (k as f64 + 0.5) / COLORBAR_STEPS as f64;
        let y0 = top + (k as f64 * step) as i32;
        let y1 = top + ((k + 1) as f64 * step).ceil() as i32;
        let color = color_of(colormap(t, diverging));
        area.draw(&Rectangle::new([(bar_x, y0), (bar_x + 12, y1)], color.filled()))
            .map_err(plot_err)?;
    }
    area.draw(&Text::new(format!("{hi:.2}"), (bar_x + 16, top), small.clone()))
        .map_err(plot_err)?;
    area.draw(&Text::new(format!("{lo:.2}"), (bar_x + 16, top + bar_h - 10), small))
        .map_err(plot_err)?;
    Ok(())
}

/// 把带标签的矩阵绘制为热图.
///
/// NaN 显示为灰色. `diverging` 时使用蓝白红色图, 范围关于 0 对称.
pub fn heatmap<P: AsRef<Path>>(
    path: P,
    m: &LabeledMatrix,
    title: &str,
    diverging: bool,
) -> ImcResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let root = SVGBackend::new(path, heatmap_size(m)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    draw_heatmap(&root, m, title, diverging)?;
    root.present().map_err(plot_err)?;
    debug!("Heatmap written to `{}`", path.display());
    Ok(())
}

/// 把多个矩阵绘制在同一张图的网格中, 每个面板以其名称为标题.
pub fn heatmap_grid<P: AsRef<Path>>(
    path: P,
    panels: &[(String, LabeledMatrix)],
    title: &str,
    diverging: bool,
) -> ImcResult<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let (rows, cols) = get_grid_dims(panels.len().max(1));
    let (pw, ph) = panels
        .iter()
        .map(|(_, m)| heatmap_size(m))
        .fold((200, 120), |(w, h), (a, b)| (w.max(a), h.max(b)));
    let size = (pw * cols as u32, ph * rows as u32 + TITLE_H as u32);

    let root = SVGBackend::new(path, size).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let body = root.titled(title, (FONT, 18)).map_err(plot_err)?;
    for (area, (name, m)) in body.split_evenly((rows, cols)).iter().zip(panels) {
        draw_heatmap(area, m, name, diverging)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}

/// 分组柱状图. 横轴为 `categories`, 每个序列在每个类别上一根柱子.
///
/// `series` 中每个序列的长度须与 `categories` 相同. 非有限值不绘制.
pub fn barplot<P: AsRef<Path>>(
    path: P,
    title: &str,
    categories: &[String],
    series: &[(String, Vec<f64>)],
) -> ImcResult<()> {
    assert!(series.iter().all(|(_, v)| v.len() == categories.len()));
    let path = path.as_ref();
    let (n, k) = (categories.len(), series.len());
    if n == 0 || k == 0 {
        debug!("Nothing to plot for `{}`", path.display());
        return Ok(());
    }
    ensure_parent(path)?;

    let (lo, hi) = series
        .iter()
        .flat_map(|(_, v)| v.iter().copied())
        .filter(|v| v.is_finite())
        .fold((0f64, 0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let (lo, hi) = if hi > lo { (lo * 1.1, hi * 1.1) } else { (0.0, 1.0) };

    let width = (120 + n * (k * 12 + 8)).max(480) as u32;
    let root = SVGBackend::new(path, (width, 520)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    // 第 i 个类别位于 x = i.
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 18))
        .margin(10)
        .x_label_area_size(text_width(categories) as u32)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..n as f64 - 0.5, lo..hi)
        .map_err(plot_err)?;

    let label_of = |x: &f64| category_at(categories, *x);
    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n)
        .x_label_formatter(&label_of)
        .x_label_style((FONT, 11).into_font().transform(FontTransform::Rotate90))
        .y_desc("mean")
        .draw()
        .map_err(plot_err)?;

    let bar_w = 0.8 / k as f64;
    for (s, (name, values)) in series.iter().enumerate() {
        let color = color_of(palette(s, k));
        chart
            .draw_series(
                values
                    .iter()
                    .enumerate()
                    .filter(|(_, v)| v.is_finite())
                    .map(|(i, &v)| {
                        let x0 = i as f64 - 0.4 + s as f64 * bar_w;
                        Rectangle::new([(x0, 0.0), (x0 + bar_w, v)], color.filled())
                    }),
            )
            .map_err(plot_err)?
            .label(name.as_str())
            .legend(move |(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], color.filled()));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// 横坐标 `x` 处的类别名; 不在整数位置上的刻度不标注.
fn category_at(categories: &[String], x: f64) -> String {
    let i = x.round();
    if (x - i).abs() > 1e-6 || i < 0.0 {
        return String::new();
    }
    categories.get(i as usize).cloned().unwrap_or_default()
}

/// 火山图. `points` 为 (标签, log2 倍数变化, p 值).
///
/// 纵轴为 `-log10(p)`; p 值小于 0.05 的点标红, 其中最显著的若干个点标注标签.
pub fn volcano<P: AsRef<Path>>(path: P, title: &str, points: &[(String, f64, f64)]) -> ImcResult<()> {
    let path = path.as_ref();
    let pts: Vec<(&str, f64, f64, bool)> = points
        .iter()
        .filter(|(_, fold, p)| fold.is_finite() && p.is_finite() && *p > 0.0)
        .map(|(l, fold, p)| (l.as_str(), *fold, -p.log10(), *p < P_THRESHOLD))
        .collect();
    if pts.is_empty() {
        debug!("No finite points for volcano plot `{}`", path.display());
        return Ok(());
    }
    ensure_parent(path)?;

    let x_lim = pts.iter().map(|p| p.1.abs()).fold(0f64, f64::max).max(0.5) * 1.1;
    let y_lim = pts.iter().map(|p| p.2).fold(0f64, f64::max).max(2.0) * 1.1;
    let threshold = -P_THRESHOLD.log10();

    let root = SVGBackend::new(path, (640, 560)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 18))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-x_lim..x_lim, 0f64..y_lim)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10(p-value)")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(LineSeries::new(
            vec![(-x_lim, threshold), (x_lim, threshold)],
            BLACK.mix(0.4),
        ))
        .map_err(plot_err)?;
    let gray = RGBColor(127, 127, 127);
    chart
        .draw_series(pts.iter().map(|&(_, x, y, sig)| {
            let style = if sig { RED.filled() } else { gray.mix(0.6).filled() };
            Circle::new((x, y), 3, style)
        }))
        .map_err(plot_err)?;

    let mut significant: Vec<_> = pts.iter().filter(|p| p.3).collect();
    significant.sort_by(|a, b| b.2.total_cmp(&a.2));
    chart
        .draw_series(
            significant
                .into_iter()
                .take(MAX_ANNOTATED)
                .map(|&(l, x, y, _)| Text::new(l.to_string(), (x, y), (FONT, 10).into_font())),
        )
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    fn matrix() -> LabeledMatrix {
        LabeledMatrix::new(
            vec!["1 - CD3".into(), "2 - CD68".into()],
            vec!["s1".into(), "s2".into(), "s3".into()],
            arr2(&[[1.0, -2.0, f64::NAN], [0.5, 0.0, 3.0]]),
        )
    }

    fn read(path: &Path) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_value_range() {
        assert_eq!(value_range([1.0, -3.0, f64::NAN], true), (-3.0, 3.0));
        assert_eq!(value_range([1.0, -3.0, 2.0], false), (-3.0, 2.0));
        assert_eq!(value_range([2.0, 2.0], false), (1.5, 2.5));
        assert_eq!(value_range([f64::NAN], false), (0.0, 1.0));
    }

    #[test]
    fn test_heatmaps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub/heat.svg");
        heatmap(&path, &matrix(), "density", false).unwrap();
        let svg = read(&path);
        assert!(svg.contains("<svg"));
        assert!(svg.contains("2 - CD68"));

        let path = dir.path().join("grid.svg");
        let panels = vec![("roi-01".to_string(), matrix()), ("roi-02".to_string(), matrix())];
        heatmap_grid(&path, &panels, "log2 odds", true).unwrap();
        let svg = read(&path);
        assert!(svg.contains("roi-02"));
        assert!(svg.contains("log2 odds"));
    }

    #[test]
    fn test_barplot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bar.svg");
        let cats = vec!["CD3".to_string(), "CD68".to_string()];
        let series = vec![
            ("COVID".to_string(), vec![1.0, 2.0]),
            ("Healthy".to_string(), vec![0.5, f64::NAN]),
        ];
        barplot(&path, "channel mean", &cats, &series).unwrap();
        let svg = read(&path);
        assert!(svg.contains("Healthy"));
        assert!(svg.contains("CD68"));

        let empty = dir.path().join("empty.svg");
        barplot(&empty, "nothing", &[], &[]).unwrap();
        assert!(!empty.exists());
    }

    #[test]
    fn test_category_at() {
        let cats = vec!["CD3".to_string(), "CD68".to_string()];
        assert_eq!(category_at(&cats, 0.0), "CD3");
        assert_eq!(category_at(&cats, 1.0), "CD68");
        assert_eq!(category_at(&cats, 0.5), "");
        assert_eq!(category_at(&cats, -1.0), "");
        assert_eq!(category_at(&cats, 2.0), "");
    }

    #[test]
    fn test_volcano() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        let points = vec![
            ("CD3".to_string(), 2.0, 0.001),
            ("CD68".to_string(), -0.5, 0.4),
            ("bad".to_string(), f64::NAN, f64::NAN),
        ];
        volcano(&path, "disease", &points).unwrap();
        let svg = read(&path);
        assert!(svg.contains("CD3"));
        // 不显著的点不标注.
        assert!(!svg.contains("CD68"));
    }
}
