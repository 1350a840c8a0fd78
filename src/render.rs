use crate::types::GeometryFeature;
use anyhow::{anyhow, Context, Result};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::{MultiPolygon, Point, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;
use tracing::info;

const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Rasterizes colored features into a PNG fitted to their combined bounds.
pub fn render_preview(
    path: &Path,
    features: &[GeometryFeature],
    color_attribute: &str,
    width: u32,
    height: u32,
) -> Result<()> {
    let img = rasterize(features, color_attribute, width, height)?;
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).context("Failed to create preview directory")?;
    }
    img.save(path)
        .with_context(|| format!("Failed to save preview {:?}", path))?;
    info!("Wrote {}x{} preview to {:?}", width, height, path);
    Ok(())
}

pub fn rasterize(
    features: &[GeometryFeature],
    color_attribute: &str,
    width: u32,
    height: u32,
) -> Result<RgbaImage> {
    if width == 0 || height == 0 {
        return Err(anyhow!("Preview size must be non-zero, got {}x{}", width, height));
    }
    let mut img: RgbaImage = ImageBuffer::from_pixel(width, height, BACKGROUND);

    let shapes: Vec<(MultiPolygon<f64>, Rgba<u8>)> = features
        .iter()
        .map(|f| (f.geometry.to_multi_polygon(), fill_of(f, color_attribute)))
        .collect();
    let Some(view) = Viewport::fit(&shapes, width, height) else {
        return Ok(img);
    };

    // Each feature is scanned independently; painting happens afterwards in input order.
    let painted: Vec<Vec<(u32, u32, Rgba<u8>)>> = shapes
        .par_iter()
        .map(|(shape, color)| view.cover(shape, *color))
        .collect();

    for (x, y, color) in painted.into_iter().flatten() {
        img.put_pixel(x, y, color);
    }
    Ok(img)
}

fn fill_of(feature: &GeometryFeature, color_attribute: &str) -> Rgba<u8> {
    let channels: Option<Vec<u8>> = feature
        .attributes
        .get(color_attribute)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|c| c.as_u64())
                .map(|c| c.min(255) as u8)
                .collect()
        });
    match channels.as_deref() {
        Some([r, g, b, ..]) => Rgba([*r, *g, *b, 255]),
        _ => Rgba([160, 160, 160, 255]),
    }
}

struct Viewport {
    min_x: f64,
    max_y: f64,
    scale: f64,
    width: u32,
    height: u32,
}

impl Viewport {
    fn fit(shapes: &[(MultiPolygon<f64>, Rgba<u8>)], width: u32, height: u32) -> Option<Self> {
        let bounds = shapes
            .iter()
            .filter_map(|(shape, _)| shape.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    geo::Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    geo::Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            })?;

        let (min_x, min_y) = project(bounds.min().y, bounds.min().x);
        let (max_x, max_y) = project(bounds.max().y, bounds.max().x);
        let span_x = (max_x - min_x).max(f64::EPSILON);
        let span_y = (max_y - min_y).max(f64::EPSILON);
        let scale = (width as f64 / span_x).min(height as f64 / span_y);

        Some(Self {
            min_x,
            max_y,
            scale,
            width,
            height,
        })
    }

    fn pixel_to_lon_lat(&self, px: u32, py: u32) -> (f64, f64) {
        let x = self.min_x + (px as f64 + 0.5) / self.scale;
        let y = self.max_y - (py as f64 + 0.5) / self.scale;
        unproject(x, y)
    }

    fn lon_lat_to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = project(lat, lon);
        ((x - self.min_x) * self.scale, (self.max_y - y) * self.scale)
    }

    /// Pixels whose centers fall inside `shape`.
    fn cover(&self, shape: &MultiPolygon<f64>, color: Rgba<u8>) -> Vec<(u32, u32, Rgba<u8>)> {
        let Some(bbox) = shape.bounding_rect() else {
            return Vec::new();
        };
        let (x0, y0) = self.lon_lat_to_pixel(bbox.min().x, bbox.max().y);
        let (x1, y1) = self.lon_lat_to_pixel(bbox.max().x, bbox.min().y);
        let clamp_x = |v: f64| (v.max(0.0) as u32).min(self.width - 1);
        let clamp_y = |v: f64| (v.max(0.0) as u32).min(self.height - 1);

        let mut out = Vec::new();
        for py in clamp_y(y0.floor())..=clamp_y(y1.ceil()) {
            for px in clamp_x(x0.floor())..=clamp_x(x1.ceil()) {
                let (lon, lat) = self.pixel_to_lon_lat(px, py);
                if shape.contains(&Point::new(lon, lat)) {
                    out.push((px, py, color));
                }
            }
        }
        out
    }
}

// Spherical Web Mercator in unit-circle radians.
fn project(lat: f64, lon: f64) -> (f64, f64) {
    let lat_rad = lat.clamp(-85.0511, 85.0511).to_radians();
    let x = lon.to_radians();
    let y = (PI / 4.0 + lat_rad / 2.0).tan().ln();
    (x, y)
}

fn unproject(x: f64, y: f64) -> (f64, f64) {
    let lon = x.to_degrees();
    let lat = (2.0 * y.exp().atan() - PI / 2.0).to_degrees();
    (lon, lat)
}
