//! Image augmentation and tensor conversion for the mini-Imagenet pipeline.

use image::{imageops, Rgb, RgbImage};
use rand::Rng;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
pub const MINI_IMAGENET_SIZE: u32 = 84;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorJitter {
    /// Saturation factor is drawn from `[1 - saturation, 1 + saturation]`.
    pub saturation: f32,
    /// Fraction of a full hue turn, drawn from `[-hue, hue]`.
    pub hue: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    pub size: u32,
    pub jitter: Option<ColorJitter>,
    pub flip_prob: f64,
    pub max_rotation_deg: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Transform {
    /// Resize, convert and normalize only.
    pub fn plain() -> Self {
        Self {
            size: MINI_IMAGENET_SIZE,
            jitter: None,
            flip_prob: 0.0,
            max_rotation_deg: 0.0,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn augmented() -> Self {
        Self {
            jitter: Some(ColorJitter {
                saturation: 0.05,
                hue: 0.05,
            }),
            flip_prob: 0.5,
            max_rotation_deg: 10.0,
            ..Self::plain()
        }
    }

    pub fn new(data_aug: bool) -> Self {
        if data_aug {
            Self::augmented()
        } else {
            Self::plain()
        }
    }

    pub fn is_augmenting(&self) -> bool {
        self.jitter.is_some() || self.flip_prob > 0.0 || self.max_rotation_deg > 0.0
    }

    pub fn num_values(&self) -> usize {
        3 * self.size as usize * self.size as usize
    }

    /// Applies the augmentations to a resized copy, returning the image before
    /// tensor conversion.
    pub fn augment<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let mut img = resize_to(img, self.size);
        if let Some(jitter) = self.jitter {
            img = color_jitter(&img, jitter, rng);
        }
        if self.flip_prob > 0.0 && rng.gen_bool(self.flip_prob.min(1.0)) {
            imageops::flip_horizontal_in_place(&mut img);
        }
        if self.max_rotation_deg > 0.0 {
            let angle = rng.gen_range(-self.max_rotation_deg..=self.max_rotation_deg);
            img = rotate_bilinear(&img, angle);
        }
        img
    }

    /// Full pipeline: augment, then CHW floats normalized per channel.
    pub fn apply<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> Vec<f32> {
        let img = self.augment(img, rng);
        to_normalized_chw(&img, self.mean, self.std)
    }
}

fn resize_to(img: &RgbImage, size: u32) -> RgbImage {
    if img.dimensions() == (size, size) {
        img.clone()
    } else {
        imageops::resize(img, size, size, imageops::FilterType::Triangle)
    }
}

impl ColorJitter {
    /// Draws the factors for one image.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> JitterParams {
        let saturation = if self.saturation > 0.0 {
            Some(rng.gen_range((1.0 - self.saturation).max(0.0)..=1.0 + self.saturation))
        } else {
            None
        };
        let hue = if self.hue > 0.0 {
            Some(rng.gen_range(-self.hue..=self.hue))
        } else {
            None
        };
        JitterParams {
            saturation,
            hue,
            saturation_first: rng.gen_bool(0.5),
        }
    }
}

/// One draw of [ColorJitter].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterParams {
    pub saturation: Option<f32>,
    pub hue: Option<f32>,
    pub saturation_first: bool,
}

impl JitterParams {
    pub fn apply(&self, img: &RgbImage) -> RgbImage {
        let saturate = |img: RgbImage| match self.saturation {
            Some(f) => adjust_saturation(&img, f),
            None => img,
        };
        let shift_hue = |img: RgbImage| match self.hue {
            Some(h) => adjust_hue(&img, h),
            None => img,
        };
        if self.saturation_first {
            shift_hue(saturate(img.clone()))
        } else {
            saturate(shift_hue(img.clone()))
        }
    }
}

/// Saturation and hue adjustments applied in random order.
pub fn color_jitter<R: Rng>(img: &RgbImage, jitter: ColorJitter, rng: &mut R) -> RgbImage {
    jitter.sample(rng).apply(img)
}

/// Blends with the luma grayscale: `factor = 0` is gray, `1` is unchanged.
pub fn adjust_saturation(img: &RgbImage, factor: f32) -> RgbImage {
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let [r, g, b] = px.0.map(f32::from);
        let gray = 0.299 * r + 0.587 * g + 0.114 * b;
        px.0 = [r, g, b].map(|c| (gray + factor * (c - gray)).round().clamp(0.0, 255.0) as u8);
    }
    out
}

/// Shifts the HSV hue by `shift`, a fraction of a full turn. Saturation and
/// value are kept.
pub fn adjust_hue(img: &RgbImage, shift: f32) -> RgbImage {
    if shift == 0.0 {
        return img.clone();
    }
    let mut out = img.clone();
    for px in out.pixels_mut() {
        let (h, s, v) = rgb_to_hsv(px.0);
        px.0 = hsv_to_rgb((h + shift).rem_euclid(1.0), s, v);
    }
    out
}

/// Hue in `[0, 1)`, saturation and value in `[0, 1]`.
fn rgb_to_hsv(px: [u8; 3]) -> (f32, f32, f32) {
    let [r, g, b] = px.map(|c| c as f32 / 255.0);
    let max = r.max(g).max(b);
    let delta = max - r.min(g).min(b);
    let h = if delta == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let s = if max == 0.0 { 0.0 } else { delta / max };
    (h, s, max)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> [u8; 3] {
    let h6 = h * 6.0;
    let sector = h6.floor();
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    // h rounding up to 1.0 lands in sector 6, which is red again
    let rgb = match sector as i32 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    };
    rgb.map(|c| (c * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Counter-clockwise rotation about the center, bilinear, zero fill,
/// same output size.
pub fn rotate_bilinear(img: &RgbImage, angle_deg: f32) -> RgbImage {
    let (w, h) = img.dimensions();
    if angle_deg == 0.0 {
        return img.clone();
    }
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;

    RgbImage::from_fn(w, h, |x, y| {
        // inverse map: output pixel -> source coordinate. y points down, so a
        // counter-clockwise rotation on screen flips the sign of sin.
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        sample_bilinear(img, sx, sy)
    })
}

fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = img.dimensions();
    if x < -0.5 || y < -0.5 || x > w as f32 - 0.5 || y > h as f32 - 0.5 {
        return Rgb([0, 0, 0]);
    }
    let x = x.clamp(0.0, w as f32 - 1.0);
    let y = y.clamp(0.0, h as f32 - 1.0);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

/// Channel-major floats in `[0, 1]`, then `(v - mean) / std`.
pub fn to_normalized_chw(img: &RgbImage, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
    let (w, h) = img.dimensions();
    let plane = (w * h) as usize;
    let mut out = vec![0.0; 3 * plane];
    for (x, y, px) in img.enumerate_pixels() {
        let i = (y * w + x) as usize;
        for c in 0..3 {
            out[c * plane + i] = (px.0[c] as f32 / 255.0 - mean[c]) / std[c];
        }
    }
    out
}
