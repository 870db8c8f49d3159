//! Spinning cube rendered in software, one PNG per frame.
//!
//! The whole pipeline lives here: vector and matrix math, Y/X rotations,
//! perspective projection, back-face culling, a painter's depth sort, flat
//! Lambert shading per face, and half-space triangle fill. No GPU, no GL
//! context; the output is a folder of numbered frames you can flip through
//! or assemble into a GIF.
//!
//! Run with: cargo run --bin cube_render [-- frames [size]]

use std::ops::{Add, Mul, Sub};

use colored::Colorize;
use image::{Rgb, RgbImage};

const CAMERA_DISTANCE: f32 = 4.0;
const TILT: f32 = 0.4;
const AMBIENT: f32 = 0.25;
const BACKGROUND: Rgb<u8> = Rgb([20, 24, 32]);

// ============================================================================
// Vector and matrix math
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Vec3 { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalized(self) -> Vec3 {
        let len = self.length();
        if len == 0.0 {
            self
        } else {
            self * (1.0 / len)
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, other: Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Vec3;
    fn mul(self, factor: f32) -> Vec3 {
        Vec3::new(self.x * factor, self.y * factor, self.z * factor)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Mat3 {
    pub m: [[f32; 3]; 3],
}

impl Mat3 {
    pub fn rotation_y(angle: f32) -> Mat3 {
        let (s, c) = angle.sin_cos();
        Mat3 {
            m: [[c, 0.0, s], [0.0, 1.0, 0.0], [-s, 0.0, c]],
        }
    }

    pub fn rotation_x(angle: f32) -> Mat3 {
        let (s, c) = angle.sin_cos();
        Mat3 {
            m: [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]],
        }
    }

    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        Vec3 {
            x: self.m[0][0] * v.x + self.m[0][1] * v.y + self.m[0][2] * v.z,
            y: self.m[1][0] * v.x + self.m[1][1] * v.y + self.m[1][2] * v.z,
            z: self.m[2][0] * v.x + self.m[2][1] * v.y + self.m[2][2] * v.z,
        }
    }

    pub fn mul(&self, other: &Mat3) -> Mat3 {
        let mut out = [[0.0f32; 3]; 3];
        for (r, row) in out.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell = (0..3).map(|k| self.m[r][k] * other.m[k][c]).sum();
            }
        }
        Mat3 { m: out }
    }
}

// ============================================================================
// Cube geometry
// ============================================================================

const VERTICES: [Vec3; 8] = [
    Vec3 { x: -1.0, y: -1.0, z: -1.0 },
    Vec3 { x: 1.0, y: -1.0, z: -1.0 },
    Vec3 { x: 1.0, y: 1.0, z: -1.0 },
    Vec3 { x: -1.0, y: 1.0, z: -1.0 },
    Vec3 { x: -1.0, y: -1.0, z: 1.0 },
    Vec3 { x: 1.0, y: -1.0, z: 1.0 },
    Vec3 { x: 1.0, y: 1.0, z: 1.0 },
    Vec3 { x: -1.0, y: 1.0, z: 1.0 },
];

// Counter-clockwise seen from outside, so the winding gives outward normals.
const FACES: [([usize; 4], Rgb<u8>); 6] = [
    ([4, 5, 6, 7], Rgb([220, 60, 60])),  // +z
    ([1, 0, 3, 2], Rgb([60, 180, 75])),  // -z
    ([5, 1, 2, 6], Rgb([65, 105, 225])), // +x
    ([0, 4, 7, 3], Rgb([240, 200, 60])), // -x
    ([3, 7, 6, 2], Rgb([70, 200, 200])), // +y
    ([0, 1, 5, 4], Rgb([200, 90, 200])), // -y
];

/// A face that survived culling: shaded, projected, ready to paint.
#[derive(Debug, Clone)]
pub struct RenderedFace {
    pub depth: f32,
    pub color: Rgb<u8>,
    pub quad: [(f32, f32); 4],
}

fn shade(base: Rgb<u8>, intensity: f32) -> Rgb<u8> {
    let scale = |channel: u8| (channel as f32 * intensity).round().clamp(0.0, 255.0) as u8;
    Rgb([scale(base.0[0]), scale(base.0[1]), scale(base.0[2])])
}

fn project(v: Vec3, size: u32) -> (f32, f32) {
    let half = size as f32 / 2.0;
    // Sized so the cube stays on screen even with a corner nearest the
    // camera: |x| <= sqrt(3), z >= CAMERA_DISTANCE - sqrt(3).
    let focal = size as f32 * 0.55;
    (half + focal * v.x / v.z, half - focal * v.y / v.z)
}

/// Rotates, translates, culls, shades, projects, and depth-sorts the cube's
/// faces for one frame. Farthest faces come first so the painter's loop can
/// just draw in order.
pub fn visible_faces(angle_y: f32, tilt: f32, size: u32) -> Vec<RenderedFace> {
    let rotation = Mat3::rotation_y(angle_y).mul(&Mat3::rotation_x(tilt));
    let transformed: Vec<Vec3> = VERTICES
        .iter()
        .map(|v| {
            let r = rotation.mul_vec(*v);
            Vec3::new(r.x, r.y, r.z + CAMERA_DISTANCE)
        })
        .collect();

    let light = Vec3::new(0.3, 0.5, -0.8).normalized();

    let mut faces: Vec<RenderedFace> = FACES
        .iter()
        .filter_map(|(indices, base)| {
            let corners = [
                transformed[indices[0]],
                transformed[indices[1]],
                transformed[indices[2]],
                transformed[indices[3]],
            ];
            let normal = (corners[1] - corners[0])
                .cross(corners[2] - corners[1])
                .normalized();
            let center = (corners[0] + corners[1] + corners[2] + corners[3]) * 0.25;

            // Camera sits at the origin looking along +z; a face whose outward
            // normal points away from us is invisible.
            if normal.dot(center) >= 0.0 {
                return None;
            }

            let lambert = normal.dot(light).max(0.0);
            let intensity = AMBIENT + (1.0 - AMBIENT) * lambert;
            Some(RenderedFace {
                depth: center.z,
                color: shade(*base, intensity),
                quad: [
                    project(corners[0], size),
                    project(corners[1], size),
                    project(corners[2], size),
                    project(corners[3], size),
                ],
            })
        })
        .collect();

    faces.sort_by(|a, b| b.depth.total_cmp(&a.depth));
    faces
}

// ============================================================================
// Rasterizer
// ============================================================================

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn fill_triangle(img: &mut RgbImage, a: (f32, f32), b: (f32, f32), c: (f32, f32), color: Rgb<u8>) {
    let min_x = a.0.min(b.0).min(c.0).floor().max(0.0) as u32;
    let max_x = (a.0.max(b.0).max(c.0).ceil() as i64).min(img.width() as i64 - 1);
    let min_y = a.1.min(b.1).min(c.1).floor().max(0.0) as u32;
    let max_y = (a.1.max(b.1).max(c.1).ceil() as i64).min(img.height() as i64 - 1);
    if max_x < 0 || max_y < 0 {
        return;
    }

    // Orient once so the half-space test works for either winding.
    let area = edge(a, b, c);
    if area == 0.0 {
        return;
    }
    let flip = if area < 0.0 { -1.0 } else { 1.0 };

    for py in min_y..=max_y as u32 {
        for px in min_x..=max_x as u32 {
            let p = (px as f32 + 0.5, py as f32 + 0.5);
            let w0 = edge(a, b, p) * flip;
            let w1 = edge(b, c, p) * flip;
            let w2 = edge(c, a, p) * flip;
            if w0 >= 0.0 && w1 >= 0.0 && w2 >= 0.0 {
                img.put_pixel(px, py, color);
            }
        }
    }
}

pub fn render_frame(size: u32, angle_y: f32, tilt: f32) -> RgbImage {
    let mut img = RgbImage::from_pixel(size, size, BACKGROUND);
    for face in visible_faces(angle_y, tilt, size) {
        // Both halves of a quad go down back to back, so the split is
        // invisible to the depth sort.
        fill_triangle(&mut img, face.quad[0], face.quad[1], face.quad[2], face.color);
        fill_triangle(&mut img, face.quad[0], face.quad[2], face.quad[3], face.color);
    }
    img
}

// ============================================================================
// Main
// ============================================================================

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let frames: u32 = args.first().and_then(|a| a.parse().ok()).unwrap_or(24);
    let size: u32 = args.get(1).and_then(|a| a.parse().ok()).unwrap_or(256);

    let out_dir = "cube_frames";
    if let Err(e) = std::fs::create_dir_all(out_dir) {
        eprintln!("{} cannot create {}: {}", "✗".red(), out_dir, e);
        std::process::exit(1);
    }

    println!("=== Spinning Cube ===\n");
    println!("{} frames at {}x{} into {}/", frames, size, size, out_dir);

    for frame in 0..frames {
        let angle = std::f32::consts::TAU * frame as f32 / frames.max(1) as f32;
        let img = render_frame(size, angle, TILT);
        let path = format!("{}/frame_{:03}.png", out_dir, frame);
        if let Err(e) = img.save(&path) {
            eprintln!("{} cannot write {}: {}", "✗".red(), path, e);
            std::process::exit(1);
        }
    }

    println!("{} wrote {} frames", "✓".green(), frames);
    println!("assemble with: ffmpeg -i {}/frame_%03d.png cube.gif", out_dir);
}

// ============================================================================
// Tests
// ============================================================================
