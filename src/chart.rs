//! Text charts for the terminal page.

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// A labeled numeric series rendered as a one-line sparkline.
#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub label: String,
    pub points: Vec<f64>,
    pub width: usize,
}

impl Chart {
    pub fn new(label: &str, points: Vec<f64>, width: usize) -> Self {
        Self {
            label: label.to_string(),
            points,
            width: width.max(1),
        }
    }

    /// Last `width` finite points.
    fn window(&self) -> Vec<f64> {
        let finite: Vec<f64> = self.points.iter().copied().filter(|p| p.is_finite()).collect();
        let start = finite.len().saturating_sub(self.width);
        finite[start..].to_vec()
    }

    pub fn sparkline(&self) -> String {
        let pts = self.window();
        let (min, max) = min_max(&pts);
        let span = max - min;
        pts.iter()
            .map(|p| {
                if span <= 0.0 {
                    BARS[BARS.len() / 2]
                } else {
                    let idx = ((p - min) / span * (BARS.len() - 1) as f64).round() as usize;
                    BARS[idx.min(BARS.len() - 1)]
                }
            })
            .collect()
    }

    pub fn render(&self) -> String {
        let pts = self.window();
        if pts.is_empty() {
            return format!("{:<14} (no data)", self.label);
        }
        let (min, max) = min_max(&pts);
        format!(
            "{:<14} {} min={:.6} max={:.6} last={:.6}",
            self.label,
            self.sparkline(),
            min,
            max,
            pts[pts.len() - 1]
        )
    }
}

fn min_max(pts: &[f64]) -> (f64, f64) {
    pts.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| {
        (lo.min(p), hi.max(p))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparkline_scales_to_range() {
        let c = Chart::new("XLM->ADA", vec![1.0, 2.0, 3.0], 10);
        assert_eq!(c.sparkline(), "▁▅█");
    }

    #[test]
    fn test_flat_series_is_mid_bar() {
        let c = Chart::new("x", vec![5.0, 5.0], 10);
        assert_eq!(c.sparkline(), "▅▅");
    }

    #[test]
    fn test_window_keeps_latest_and_drops_nan() {
        let c = Chart::new("x", vec![9.0, f64::NAN, 1.0, 2.0], 2);
        assert_eq!(c.sparkline(), "▁█");
        assert!(c.render().contains("last=2.000000"));
    }

    #[test]
    fn test_empty_chart() {
        assert!(Chart::new("x", vec![], 5).render().contains("(no data)"));
    }
}
