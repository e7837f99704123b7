use ordered_float::OrderedFloat;

/// 显示窗口, 把 `[lower, upper]` 区间的强度线性映射到 8 位灰度.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DisplayWindow {
    lower: f32,
    upper: f32,
}

impl DisplayWindow {
    /// 构建显示窗口.
    ///
    /// `lower` 和 `upper` 必须有限且 `lower < upper`, 否则返回 `None`.
    pub fn new(lower: f32, upper: f32) -> Option<DisplayWindow> {
        if lower.is_finite() && upper.is_finite() && lower < upper {
            Some(Self { lower, upper })
        } else {
            None
        }
    }

    /// 把 `[0, 1]` 映射到灰度的窗口, 适用于已均衡化或归一化的图像.
    #[inline]
    pub const fn unit() -> DisplayWindow {
        Self {
            lower: 0.0,
            upper: 1.0,
        }
    }

    /// 以 `values` 中有限值的 `lo` 和 `hi` 百分位 (0 到 100) 为上下限.
    ///
    /// 有限值为空或上下限重合时返回 `None`.
    pub fn from_percentiles<I: IntoIterator<Item = f32>>(values: I, lo: f32, hi: f32) -> Option<Self> {
        let mut v: Vec<OrderedFloat<f32>> = values
            .into_iter()
            .filter(|x| x.is_finite())
            .map(OrderedFloat)
            .collect();
        if v.is_empty() {
            return None;
        }
        v.sort_unstable();
        let at = |p: f32| {
            let r = (p.clamp(0.0, 100.0) / 100.0) * (v.len() - 1) as f32;
            let (i, frac) = (r.floor() as usize, r.fract());
            let j = (i + 1).min(v.len() - 1);
            v[i].0 + (v[j].0 - v[i].0) * frac
        };
        Self::new(at(lo), at(hi))
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 求 `x` 对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `x` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, x: f32) -> Option<u8> {
        self.eval_f32(x).map(|v| v as u8)
    }

    /// 求 `x` 对应的灰度分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `x` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, x: f32) -> Option<f32> {
        if !x.is_finite() {
            return None;
        }
        if x <= self.lower {
            Some(0.0)
        } else if x >= self.upper {
            Some(255.0)
        } else {
            // 255, not 256.
            Some((x - self.lower) / self.width() * 255.0)
        }
    }
}
