//! Image scaling comparison: the five library resampling filters side by
//! side with two hand-rolled scalers, a 2x box average and a bilinear
//! sampler, both parallelized across output rows with rayon.
//!
//! With no arguments a synthetic test card is scaled to twice its size and
//! every result lands in image_scale_out/ with per-filter wall times.
//!
//! Run with: cargo run --release --bin image_scale [-- input.png [width height]]

use std::path::Path;
use std::time::Instant;

use colored::Colorize;
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use rayon::prelude::*;

const FILTERS: [(&str, FilterType); 5] = [
    ("nearest", FilterType::Nearest),
    ("triangle", FilterType::Triangle),
    ("catmull-rom", FilterType::CatmullRom),
    ("gaussian", FilterType::Gaussian),
    ("lanczos3", FilterType::Lanczos3),
];

// ============================================================================
// Test card
// ============================================================================

/// Gradient band over a checkerboard, framed in white. Deterministic, so
/// scaled outputs can be compared across runs.
pub fn test_card(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
            Rgb([255, 255, 255])
        } else if y < height / 2 {
            let r = (x * 255 / width) as u8;
            Rgb([r, 64, 255 - r])
        } else if ((x / 8) + (y / 8)) % 2 == 0 {
            Rgb([230, 230, 230])
        } else {
            Rgb([25, 25, 25])
        }
    })
}

// ============================================================================
// Hand-rolled scalers
// ============================================================================

/// Maps an output coordinate to the source, sampling at pixel centers.
fn src_coord(out: u32, out_len: u32, src_len: u32) -> f32 {
    ((out as f32 + 0.5) * src_len as f32 / out_len as f32 - 0.5)
        .clamp(0.0, (src_len - 1) as f32)
}

fn bilinear_pixel(src: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let (w, h) = src.dimensions();
    let x0 = sx.floor() as u32;
    let y0 = sy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;
    let tl = src.get_pixel(x0, y0);
    let tr = src.get_pixel(x1, y0);
    let bl = src.get_pixel(x0, y1);
    let br = src.get_pixel(x1, y1);
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] as f32 * (1.0 - fx) + tr[c] as f32 * fx;
        let bottom = bl[c] as f32 * (1.0 - fx) + br[c] as f32 * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round() as u8;
    }
    Rgb(out)
}

/// Arbitrary-ratio bilinear resampling, one rayon task per output row.
pub fn bilinear(src: &RgbImage, out_w: u32, out_h: u32) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    let row_bytes = out_w as usize * 3;
    let mut pixels = vec![0u8; row_bytes * out_h as usize];
    pixels
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let sy = src_coord(y as u32, out_h, src_h);
            for x in 0..out_w {
                let px = bilinear_pixel(src, src_coord(x, out_w, src_w), sy);
                let i = x as usize * 3;
                row[i..i + 3].copy_from_slice(&px.0);
            }
        });
    RgbImage::from_raw(out_w, out_h, pixels).expect("buffer sized for the output")
}

/// Halves both dimensions, each output pixel the rounded mean of a 2x2
/// block. An odd trailing row or column is dropped.
pub fn box2x(src: &RgbImage) -> RgbImage {
    let (w, h) = src.dimensions();
    let out_w = (w / 2).max(1);
    let out_h = (h / 2).max(1);
    let row_bytes = out_w as usize * 3;
    let mut pixels = vec![0u8; row_bytes * out_h as usize];
    pixels
        .par_chunks_mut(row_bytes)
        .enumerate()
        .for_each(|(y, row)| {
            let y0 = 2 * y as u32;
            let y1 = (y0 + 1).min(h - 1);
            for x in 0..out_w {
                let x0 = 2 * x;
                let x1 = (x0 + 1).min(w - 1);
                let mut sums = [0u32; 3];
                for (px, py) in [(x0, y0), (x1, y0), (x0, y1), (x1, y1)] {
                    let p = src.get_pixel(px, py);
                    for c in 0..3 {
                        sums[c] += p[c] as u32;
                    }
                }
                let i = x as usize * 3;
                for c in 0..3 {
                    row[i + c] = ((sums[c] + 2) / 4) as u8;
                }
            }
        });
    RgbImage::from_raw(out_w, out_h, pixels).expect("buffer sized for the output")
}

// ============================================================================
// Demo
// ============================================================================

fn usage() -> ! {
    eprintln!("usage: image_scale [input-image [width height]]");
    std::process::exit(2);
}

fn save_and_report(name: &str, img: &RgbImage, ms: f64, out_dir: &Path) {
    let file = out_dir.join(format!("{}.png", name));
    let (w, h) = img.dimensions();
    match img.save(&file) {
        Ok(()) => println!(
            "{} {:>12}  {}x{}  {:>8.2} ms  {}",
            "✓".green(),
            name,
            w,
            h,
            ms,
            file.display()
        ),
        Err(e) => println!("{} {:>12}  {}", "✗".red(), name, e),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() == 2 || args.len() > 3 {
        usage();
    }

    let (source, label) = match args.first() {
        Some(path) => match image::open(path) {
            Ok(img) => (img.to_rgb8(), path.clone()),
            Err(e) => {
                eprintln!("{} cannot open {}: {}", "✗".red(), path, e);
                std::process::exit(1);
            }
        },
        None => (test_card(320, 240), "built-in test card".to_string()),
    };
    let (src_w, src_h) = source.dimensions();

    let (out_w, out_h) = match (args.get(1), args.get(2)) {
        (Some(w), Some(h)) => match (w.parse::<u32>(), h.parse::<u32>()) {
            (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
            _ => usage(),
        },
        _ => (src_w * 2, src_h * 2),
    };

    println!("=== Scaling {} ===", label);
    println!("source {}x{}, target {}x{}\n", src_w, src_h, out_w, out_h);

    let out_dir = Path::new("image_scale_out");
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        eprintln!("{} cannot create {}: {}", "✗".red(), out_dir.display(), e);
        std::process::exit(1);
    }

    for (name, filter) in FILTERS {
        let start = Instant::now();
        let scaled = imageops::resize(&source, out_w, out_h, filter);
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        save_and_report(name, &scaled, ms, out_dir);
    }

    let start = Instant::now();
    let own = bilinear(&source, out_w, out_h);
    let ms = start.elapsed().as_secs_f64() * 1000.0;
    save_and_report("own-bilinear", &own, ms, out_dir);

    if src_w >= 2 && src_h >= 2 {
        let start = Instant::now();
        let half = box2x(&source);
        let ms = start.elapsed().as_secs_f64() * 1000.0;
        save_and_report("own-box2x", &half, ms, out_dir);
    }

    println!("\ncompare own-bilinear.png against triangle.png, they use the same kernel");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RgbImage {
        RgbImage::from_fn(6, 4, |x, y| {
            Rgb([(x * 40) as u8, (y * 60) as u8, (x * y * 10) as u8])
        })
    }

    #[test]
    fn every_filter_hits_the_requested_dimensions() {
        let src = sample();
        for (name, filter) in FILTERS {
            let out = imageops::resize(&src, 13, 4, filter);
            assert_eq!(out.dimensions(), (13, 4), "{}", name);
        }
        assert_eq!(bilinear(&src, 13, 4).dimensions(), (13, 4));
        assert_eq!(bilinear(&src, 1, 1).dimensions(), (1, 1));
        assert_eq!(box2x(&src).dimensions(), (3, 2));
        assert_eq!(box2x(&test_card(9, 6)).dimensions(), (4, 3));
    }

    #[test]
    fn nearest_integer_upscale_replicates_pixels() {
        let mut src = RgbImage::new(2, 2);
        src.put_pixel(0, 0, Rgb([255, 0, 0]));
        src.put_pixel(1, 0, Rgb([0, 255, 0]));
        src.put_pixel(0, 1, Rgb([0, 0, 255]));
        src.put_pixel(1, 1, Rgb([255, 255, 0]));
        let up = imageops::resize(&src, 4, 4, FilterType::Nearest);
        for (x, y) in [(0u32, 0u32), (1, 0), (0, 1), (1, 1)] {
            let expected = src.get_pixel(x, y);
            for dy in 0..2 {
                for dx in 0..2 {
                    assert_eq!(
                        up.get_pixel(2 * x + dx, 2 * y + dy),
                        expected,
                        "block for source pixel ({}, {})",
                        x,
                        y
                    );
                }
            }
        }
    }

    #[test]
    fn box2x_averages_each_quad() {
        let mut src = RgbImage::new(2, 2);
        src.put_pixel(0, 0, Rgb([10, 20, 30]));
        src.put_pixel(1, 0, Rgb([20, 30, 40]));
        src.put_pixel(0, 1, Rgb([30, 40, 50]));
        src.put_pixel(1, 1, Rgb([40, 50, 60]));
        let out = box2x(&src);
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(*out.get_pixel(0, 0), Rgb([25, 35, 45]));
    }

    #[test]
    fn box2x_rounds_half_up_and_drops_odd_edges() {
        // 2x2 checker averages to the 127.5 midpoint.
        let mut checker = RgbImage::new(2, 2);
        checker.put_pixel(0, 0, Rgb([255, 255, 255]));
        checker.put_pixel(1, 1, Rgb([255, 255, 255]));
        assert_eq!(*box2x(&checker).get_pixel(0, 0), Rgb([128, 128, 128]));

        // A 3x3 input only uses its top-left 2x2 block.
        let mut src = RgbImage::from_pixel(3, 3, Rgb([200, 200, 200]));
        src.put_pixel(0, 0, Rgb([0, 0, 0]));
        src.put_pixel(1, 0, Rgb([0, 0, 0]));
        src.put_pixel(0, 1, Rgb([0, 0, 0]));
        src.put_pixel(1, 1, Rgb([0, 0, 0]));
        let out = box2x(&src);
        assert_eq!(out.dimensions(), (1, 1));
        assert_eq!(*out.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn bilinear_midpoint_between_black_and_white_is_gray() {
        let mut src = RgbImage::new(2, 1);
        src.put_pixel(0, 0, Rgb([0, 0, 0]));
        src.put_pixel(1, 0, Rgb([255, 255, 255]));
        let out = bilinear(&src, 3, 1);
        let mid = out.get_pixel(1, 0);
        for c in 0..3 {
            assert!(
                (126..=129).contains(&mid[c]),
                "midpoint channel {} was {}",
                c,
                mid[c]
            );
        }
    }

    #[test]
    fn bilinear_at_the_same_size_is_the_identity() {
        let src = sample();
        let out = bilinear(&src, 6, 4);
        assert_eq!(out.as_raw(), src.as_raw());
    }

    #[test]
    fn parallel_rows_agree_with_direct_sampling() {
        let src = sample();
        let out = bilinear(&src, 9, 5);
        for (x, y) in [(0u32, 0u32), (8, 4), (4, 2), (7, 1)] {
            let sx = src_coord(x, 9, 6);
            let sy = src_coord(y, 5, 4);
            assert_eq!(
                *out.get_pixel(x, y),
                bilinear_pixel(&src, sx, sy),
                "pixel ({}, {})",
                x,
                y
            );
        }
    }

    #[test]
    fn test_card_is_deterministic_and_contrasty() {
        let a = test_card(64, 48);
        let b = test_card(64, 48);
        assert_eq!(a.dimensions(), (64, 48));
        assert_eq!(a.as_raw(), b.as_raw());
        assert!(a.pixels().any(|p| p[0] > 200 && p[1] > 200 && p[2] > 200));
        assert!(a.pixels().any(|p| p[0] < 50 && p[1] < 50 && p[2] < 50));
    }
}
