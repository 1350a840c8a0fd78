use crate::types::{GeometryFeature, Rgb};
use tracing::info;

pub const DEFAULT_LOW: Rgb = Rgb([0, 255, 0]);
pub const DEFAULT_HIGH: Rgb = Rgb([255, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
    pub low: Rgb,
    pub high: Rgb,
}

impl ColorScale {
    /// Bounds are taken over the numeric values present; with none the range is `0..1`.
    pub fn from_values(values: impl IntoIterator<Item = f64>, low: Rgb, high: Rgb) -> Self {
        let (min, max) = values
            .into_iter()
            .fold(None, |acc: Option<(f64, f64)>, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
            .unwrap_or((0.0, 1.0));
        Self {
            min,
            max,
            low,
            high,
        }
    }

    pub fn ratio(&self, value: f64) -> f64 {
        if self.max == self.min {
            return 0.0;
        }
        ((value - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
    }

    pub fn color(&self, value: f64) -> Rgb {
        let t = self.ratio(value);
        let mut out = [0u8; 3];
        for (i, channel) in out.iter_mut().enumerate() {
            let lo = self.low.0[i] as f64;
            let hi = self.high.0[i] as f64;
            *channel = (lo + (hi - lo) * t).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    }
}

/// Writes `color_attribute` onto every feature from its `variable` value.
/// Features without a numeric value get the low end of the ramp.
pub fn apply_color_scale(
    features: &mut [GeometryFeature],
    variable: &str,
    color_attribute: &str,
    low: Rgb,
    high: Rgb,
) -> ColorScale {
    let scale = ColorScale::from_values(
        features.iter().filter_map(|f| f.numeric_attribute(variable)),
        low,
        high,
    );

    for feature in features.iter_mut() {
        let color = match feature.numeric_attribute(variable) {
            Some(v) => scale.color(v),
            None => scale.low,
        };
        feature
            .attributes
            .insert(color_attribute.to_string(), color.to_value());
    }

    info!(
        features = features.len(),
        min = scale.min,
        max = scale.max,
        "applied color scale"
    );
    scale
}
