//! Image preprocessing for low-quality scans.
//!
//! Pipeline: grayscale, CLAHE contrast normalization, median denoise,
//! projection-profile deskew. Box coordinates produced on a preprocessed
//! image are mapped back to the original page with `unrotate_box`.

use image::{imageops, DynamicImage, GrayImage, Luma};

use crate::models::WordBox;

/// Maximum rotation searched by the deskew pass, in degrees.
const DESKEW_MAX_ANGLE: f32 = 15.0;
/// Step between candidate angles, in degrees.
const DESKEW_STEP: f32 = 0.5;
/// Width the image is thumbnailed to for angle detection.
const DESKEW_DETECT_WIDTH: u32 = 1000;

/// A preprocessed page and the rotation that was applied to it.
pub struct Preprocessed {
    pub image: DynamicImage,
    /// Degrees the image was rotated counter-clockwise to deskew it.
    pub rotation_angle: f32,
}

/// Run the full preprocessing pipeline.
pub fn preprocess(image: &DynamicImage, deskew: bool) -> Preprocessed {
    let gray = image.to_luma8();
    let contrasted = clahe(&gray, 2.0, 8);
    let denoised = median_filter(&contrasted);

    let mut rotation_angle = 0.0;
    let result = if deskew {
        let angle = detect_skew_angle(&denoised);
        if angle.abs() >= 0.25 {
            rotation_angle = -angle;
            rotate_about_center(&denoised, -angle)
        } else {
            denoised
        }
    } else {
        denoised
    };

    Preprocessed {
        image: DynamicImage::ImageLuma8(result),
        rotation_angle,
    }
}

/// Contrast Limited Adaptive Histogram Equalization.
///
/// Computes a clipped equalization mapping per tile and interpolates
/// bilinearly between the four surrounding tile mappings per pixel.
pub fn clahe(img: &GrayImage, clip_limit: f32, tiles: u32) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }
    let tiles = tiles.max(1);
    let tile_w = width.div_ceil(tiles).max(1);
    let tile_h = height.div_ceil(tiles).max(1);
    let tiles_x = width.div_ceil(tile_w);
    let tiles_y = height.div_ceil(tile_h);

    // Per-tile lookup tables.
    let mut luts: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        for tx in 0..tiles_x {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(width);
            let y1 = (y0 + tile_h).min(height);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[img.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let pixels = ((x1 - x0) * (y1 - y0)) as f32;
            let clip = ((clip_limit * pixels) / 256.0).max(1.0) as u32;

            // Clip spikes and redistribute the excess uniformly.
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let bonus = excess / 256;
            for bin in hist.iter_mut() {
                *bin += bonus;
            }

            let mut lut = [0u8; 256];
            let mut cum = 0u32;
            let total: u32 = hist.iter().sum();
            for (i, &count) in hist.iter().enumerate() {
                cum += count;
                lut[i] = ((cum as f32 / total.max(1) as f32) * 255.0) as u8;
            }
            luts.push(lut);
        }
    }

    let lut_at = |tx: u32, ty: u32| -> &[u8; 256] {
        let tx = tx.min(tiles_x - 1);
        let ty = ty.min(tiles_y - 1);
        &luts[(ty * tiles_x + tx) as usize]
    };

    let mut out = GrayImage::new(width, height);
    for (x, y, pixel) in img.enumerate_pixels() {
        let v = pixel[0] as usize;

        // Position relative to tile centers for bilinear interpolation.
        let fx = (x as f32 / tile_w as f32) - 0.5;
        let fy = (y as f32 / tile_h as f32) - 0.5;
        let tx0 = fx.floor().max(0.0) as u32;
        let ty0 = fy.floor().max(0.0) as u32;
        let wx = (fx - fx.floor()).clamp(0.0, 1.0);
        let wy = (fy - fy.floor()).clamp(0.0, 1.0);
        let wx = if fx < 0.0 { 0.0 } else { wx };
        let wy = if fy < 0.0 { 0.0 } else { wy };

        let v00 = lut_at(tx0, ty0)[v] as f32;
        let v10 = lut_at(tx0 + 1, ty0)[v] as f32;
        let v01 = lut_at(tx0, ty0 + 1)[v] as f32;
        let v11 = lut_at(tx0 + 1, ty0 + 1)[v] as f32;

        let top = v00 * (1.0 - wx) + v10 * wx;
        let bottom = v01 * (1.0 - wx) + v11 * wx;
        let value = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
        out.put_pixel(x, y, Luma([value]));
    }
    out
}

/// 3x3 median filter; removes salt-and-pepper noise from scans.
pub fn median_filter(img: &GrayImage) -> GrayImage {
    let (width, height) = img.dimensions();
    if width < 3 || height < 3 {
        return img.clone();
    }
    let mut out = img.clone();
    let mut window = [0u8; 9];
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut i = 0;
            for dy in 0..3 {
                for dx in 0..3 {
                    window[i] = img.get_pixel(x + dx - 1, y + dy - 1)[0];
                    i += 1;
                }
            }
            window.sort_unstable();
            out.put_pixel(x, y, Luma([window[4]]));
        }
    }
    out
}

/// Detect the text skew angle by projection-profile search.
///
/// Rotates a thumbnail through candidate angles and keeps the one whose
/// horizontal projection has the highest variance (text lines aligned
/// with rows produce the sharpest profile).
pub fn detect_skew_angle(img: &GrayImage) -> f32 {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }

    // Angle detection does not need full resolution.
    let thumb = if width > DESKEW_DETECT_WIDTH {
        let scale = DESKEW_DETECT_WIDTH as f32 / width as f32;
        imageops::resize(
            img,
            DESKEW_DETECT_WIDTH,
            ((height as f32 * scale) as u32).max(1),
            imageops::FilterType::Triangle,
        )
    } else {
        img.clone()
    };

    let mut best_angle = 0.0f32;
    let mut best_var = row_projection_variance(&thumb);

    let steps = (2.0 * DESKEW_MAX_ANGLE / DESKEW_STEP) as i32;
    for i in 0..=steps {
        let angle = -DESKEW_MAX_ANGLE + i as f32 * DESKEW_STEP;
        if angle.abs() < f32::EPSILON {
            continue;
        }
        let rotated = rotate_about_center(&thumb, angle);
        let var = row_projection_variance(&rotated);
        if var > best_var {
            best_var = var;
            best_angle = -angle;
        }
    }

    best_angle
}

fn row_projection_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if height == 0 || width == 0 {
        return 0.0;
    }
    let sums: Vec<f64> = (0..height)
        .map(|y| {
            (0..width)
                .map(|x| 255.0 - img.get_pixel(x, y)[0] as f64)
                .sum()
        })
        .collect();
    let mean = sums.iter().sum::<f64>() / sums.len() as f64;
    sums.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / sums.len() as f64
}

/// Rotate about the image center, keeping the canvas size and filling
/// uncovered pixels with white.
pub fn rotate_about_center(img: &GrayImage, angle_degrees: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut out = GrayImage::from_pixel(width, height, Luma([255]));

    let theta = angle_degrees.to_radians();
    let (sin, cos) = theta.sin_cos();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);

    // Inverse mapping: for each destination pixel, sample the source.
    for y in 0..height {
        for x in 0..width {
            let dx = x as f32 - cx;
            let dy = y as f32 - cy;
            let sx = cos * dx + sin * dy + cx;
            let sy = -sin * dx + cos * dy + cy;
            if sx >= 0.0 && sy >= 0.0 && (sx as u32) < width && (sy as u32) < height {
                out.put_pixel(x, y, *img.get_pixel(sx as u32, sy as u32));
            }
        }
    }
    out
}

/// Map a word box from a rotated image back to original coordinates.
///
/// `rotation_angle` is the rotation that produced the image the box was
/// detected in; the box center is rotated back around the page center.
pub fn unrotate_box(word: &WordBox, rotation_angle: f32, width: u32, height: u32) -> WordBox {
    if rotation_angle.abs() < f32::EPSILON {
        return word.clone();
    }
    let theta = (-rotation_angle).to_radians();
    let (sin, cos) = theta.sin_cos();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);

    let wx = word.x + word.width / 2.0 - cx;
    let wy = word.y + word.height / 2.0 - cy;
    let rx = cos * wx - sin * wy + cx;
    let ry = sin * wx + cos * wy + cy;

    WordBox {
        text: word.text.clone(),
        x: (rx - word.width / 2.0).max(0.0),
        y: (ry - word.height / 2.0).max(0.0),
        width: word.width,
        height: word.height,
        confidence: word.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Synthetic page: dark horizontal stripes on white, like text lines.
    fn striped_page(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |_x, y| {
            if (y / 10) % 3 == 0 {
                Luma([40])
            } else {
                Luma([250])
            }
        })
    }

    #[test]
    fn test_detect_skew_on_straight_page_is_zero() {
        let img = striped_page(400, 300);
        let angle = detect_skew_angle(&img);
        assert!(angle.abs() < 0.6, "angle was {angle}");
    }

    #[test]
    fn test_detect_skew_recovers_rotation() {
        let img = striped_page(400, 300);
        let rotated = rotate_about_center(&img, 4.0);
        let angle = detect_skew_angle(&rotated);
        // The detected skew equals the applied rotation; correction is -angle.
        assert!((angle - 4.0).abs() < 1.0, "angle was {angle}");
    }

    #[test]
    fn test_clahe_preserves_dimensions() {
        let img = striped_page(123, 77);
        let out = clahe(&img, 2.0, 8);
        assert_eq!(out.dimensions(), (123, 77));
    }

    #[test]
    fn test_clahe_spreads_low_contrast() {
        // Flat mid-gray with a faint square: output range should widen.
        let img = GrayImage::from_fn(64, 64, |x, y| {
            if x > 20 && x < 40 && y > 20 && y < 40 {
                Luma([128])
            } else {
                Luma([120])
            }
        });
        let out = clahe(&img, 4.0, 4);
        let (min, max) = out
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        let (in_min, in_max) = img
            .pixels()
            .fold((255u8, 0u8), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])));
        assert!(max - min >= in_max - in_min);
    }

    #[test]
    fn test_median_filter_removes_speckle() {
        let mut img = GrayImage::from_pixel(21, 21, Luma([255]));
        img.put_pixel(10, 10, Luma([0]));
        let out = median_filter(&img);
        assert_eq!(out.get_pixel(10, 10)[0], 255);
    }

    #[test]
    fn test_unrotate_box_round_trip() {
        let word = WordBox {
            text: "word".into(),
            x: 100.0,
            y: 50.0,
            width: 40.0,
            height: 12.0,
            confidence: 0.9,
        };
        // Rotating by zero is the identity.
        let same = unrotate_box(&word, 0.0, 800, 600);
        assert_eq!(same, word);

        // A box rotated back by the applied angle lands near the original
        // center.
        let rotated = unrotate_box(&word, 5.0, 800, 600);
        let restored = unrotate_box(&rotated, -5.0, 800, 600);
        assert!((restored.x - word.x).abs() < 2.0);
        assert!((restored.y - word.y).abs() < 2.0);
    }
}
