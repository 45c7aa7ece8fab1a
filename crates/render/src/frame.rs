use glam::Vec3;

use crate::postfx::PassError;

/// Rec. 709 luma of a linear color.
pub fn luminance(c: Vec3) -> f32 {
    c.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}

/// Hermite smoothstep; a step function when `edge0 == edge1`.
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if edge1 <= edge0 {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// ACES filmic tone curve (Narkowicz fit), output in [0, 1].
pub fn aces_filmic(c: Vec3) -> Vec3 {
    let num = c * (c * 2.51 + 0.03);
    let den = c * (c * 2.43 + 0.59) + 0.14;
    (num / den).clamp(Vec3::ZERO, Vec3::ONE)
}

/// CPU image with optional per-pixel depth.
///
/// Used for the reference implementation of the reflection and post passes
/// and for testing their composition. Colors are linear HDR; depth is the
/// camera's normalized [0, 1] linear depth.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    color: Vec<Vec3>,
    depth: Option<Vec<f32>>,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Self::filled(width, height, Vec3::ZERO)
    }

    pub fn filled(width: usize, height: usize, color: Vec3) -> Self {
        Self {
            width,
            height,
            color: vec![color; width * height],
            depth: None,
        }
    }

    /// Attach a depth buffer; it must match the color buffer's size.
    pub fn with_depth(mut self, depth: Vec<f32>) -> Result<Self, PassError> {
        if depth.len() != self.color.len() {
            return Err(PassError::SizeMismatch {
                expected: self.color.len(),
                actual: depth.len(),
            });
        }
        self.depth = Some(depth);
        Ok(self)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Vec3] {
        &self.color
    }

    pub fn depth(&self) -> Option<&[f32]> {
        self.depth.as_deref()
    }

    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn get(&self, x: usize, y: usize) -> Vec3 {
        self.color[self.index(x, y)]
    }

    pub fn set(&mut self, x: usize, y: usize, c: Vec3) {
        let i = self.index(x, y);
        self.color[i] = c;
    }

    pub fn set_depth(&mut self, x: usize, y: usize, d: f32) {
        let i = self.index(x, y);
        let len = self.color.len();
        self.depth.get_or_insert_with(|| vec![1.0; len])[i] = d;
    }

    pub fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Apply `f` to every color, keeping depth.
    pub fn map_pixels(&self, f: impl Fn(Vec3) -> Vec3) -> Self {
        self.with_pixels(self.color.iter().map(|c| f(*c)).collect())
    }

    /// Replace the color buffer, keeping depth.
    pub(crate) fn with_pixels(&self, color: Vec<Vec3>) -> Self {
        debug_assert_eq!(color.len(), self.color.len());
        Self {
            width: self.width,
            height: self.height,
            color,
            depth: self.depth.clone(),
        }
    }

    /// Largest per-channel absolute difference.
    pub fn max_abs_diff(&self, other: &Frame) -> f32 {
        self.color
            .iter()
            .zip(&other.color)
            .map(|(a, b)| (*a - *b).abs().max_element())
            .fold(0.0, f32::max)
    }

    /// Separable box blur with clamped edges.
    pub fn box_blur(&self, radius_x: usize, radius_y: usize) -> Self {
        let horizontal = self.blur_axis(radius_x, true);
        let color = horizontal.blur_axis(radius_y, false).color;
        self.with_pixels(color)
    }

    fn blur_axis(&self, radius: usize, horizontal: bool) -> Self {
        if radius == 0 || self.color.is_empty() {
            return self.clone();
        }
        let (w, h) = (self.width as isize, self.height as isize);
        let r = radius as isize;
        let norm = 1.0 / (2 * radius + 1) as f32;
        let mut out = vec![Vec3::ZERO; self.color.len()];
        for y in 0..h {
            for x in 0..w {
                let mut sum = Vec3::ZERO;
                for k in -r..=r {
                    let (sx, sy) = if horizontal {
                        ((x + k).clamp(0, w - 1), y)
                    } else {
                        (x, (y + k).clamp(0, h - 1))
                    };
                    sum += self.color[(sy * w + sx) as usize];
                }
                out[(y * w + x) as usize] = sum * norm;
            }
        }
        self.with_pixels(out)
    }

    /// Halve both dimensions (rounding up) with a 2×2 average.
    pub fn downsample(&self) -> Self {
        let w = self.width.div_ceil(2).max(1);
        let h = self.height.div_ceil(2).max(1);
        let mut color = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                let mut sum = Vec3::ZERO;
                let mut n = 0.0;
                for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                    let (sx, sy) = (2 * x + dx, 2 * y + dy);
                    if sx < self.width && sy < self.height {
                        sum += self.get(sx, sy);
                        n += 1.0;
                    }
                }
                color.push(sum / n);
            }
        }
        Self {
            width: w,
            height: h,
            color,
            depth: None,
        }
    }

    /// Bilinear resample to `width × height`. Depth is dropped.
    pub fn resize(&self, width: usize, height: usize) -> Self {
        if width == self.width && height == self.height {
            return Self {
                depth: None,
                ..self.clone()
            };
        }
        let mut color = Vec::with_capacity(width * height);
        let sx = self.width as f32 / width as f32;
        let sy = self.height as f32 / height as f32;
        for y in 0..height {
            for x in 0..width {
                let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, (self.width - 1) as f32);
                let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, (self.height - 1) as f32);
                let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
                let (x1, y1) = ((x0 + 1).min(self.width - 1), (y0 + 1).min(self.height - 1));
                let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
                let top = self.get(x0, y0).lerp(self.get(x1, y0), tx);
                let bottom = self.get(x0, y1).lerp(self.get(x1, y1), tx);
                color.push(top.lerp(bottom, ty));
            }
        }
        Self {
            width,
            height,
            color,
            depth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothstep_edges() {
        assert_eq!(smoothstep(0.4, 1.4, 0.0), 0.0);
        assert_eq!(smoothstep(0.4, 1.4, 2.0), 1.0);
        assert!((smoothstep(0.0, 1.0, 0.5) - 0.5).abs() < 1e-6);
        assert_eq!(smoothstep(1.0, 1.0, 0.5), 0.0);
        assert_eq!(smoothstep(1.0, 1.0, 1.0), 1.0);
    }

    #[test]
    fn aces_maps_hdr_into_unit_range() {
        assert_eq!(aces_filmic(Vec3::ZERO), Vec3::ZERO);
        let hot = aces_filmic(Vec3::splat(50.0));
        assert!(hot.x <= 1.0 && hot.x > 0.95);
        assert!(aces_filmic(Vec3::splat(0.5)).x < aces_filmic(Vec3::splat(1.0)).x);
    }

    #[test]
    fn blur_preserves_uniform_frame() {
        let f = Frame::filled(8, 6, Vec3::splat(0.25));
        let b = f.box_blur(3, 2);
        assert!(b.max_abs_diff(&f) < 1e-6);
    }

    #[test]
    fn blur_spreads_impulse() {
        let mut f = Frame::new(9, 9);
        f.set(4, 4, Vec3::splat(9.0));
        let b = f.box_blur(1, 1);
        assert!((b.get(4, 4).x - 1.0).abs() < 1e-5);
        assert!((b.get(3, 5).x - 1.0).abs() < 1e-5);
        assert_eq!(b.get(0, 0), Vec3::ZERO);
    }

    #[test]
    fn downsample_averages() {
        let mut f = Frame::new(4, 2);
        f.set(0, 0, Vec3::splat(4.0));
        let d = f.downsample();
        assert_eq!((d.width(), d.height()), (2, 1));
        assert_eq!(d.get(0, 0), Vec3::splat(1.0));
    }

    #[test]
    fn resize_round_trip_keeps_uniform() {
        let f = Frame::filled(5, 3, Vec3::new(0.1, 0.2, 0.3));
        let r = f.resize(13, 7).resize(5, 3);
        assert!(r.max_abs_diff(&f) < 1e-5);
    }

    #[test]
    fn depth_must_match() {
        assert!(Frame::new(2, 2).with_depth(vec![0.0; 3]).is_err());
        assert!(Frame::new(2, 2).with_depth(vec![0.0; 4]).is_ok());
    }
}
