//! Map widget math: Web-Mercator projection, tiles, and a waypoint tour.
//!
//! Every slippy map rests on the same arithmetic: a latitude/longitude to
//! world-pixel projection at some zoom, world pixels to 256px tile
//! addresses, and great-circle distances between stops. The demo walks a
//! hardcoded waypoint tour the way the original map sample did, printing
//! per-leg distances, tile coordinates, and an ASCII minimap of whatever
//! waypoints fall inside the viewport.
//!
//! Run with: cargo run --bin map_tiles [-- zoom]

use colored::Colorize;

const TILE_SIZE: f64 = 256.0;
const MAX_LATITUDE: f64 = 85.051_128_78;
const MAX_ZOOM: u8 = 19;
const EARTH_RADIUS_KM: f64 = 6371.0088;

// The logical screen the viewport represents.
const SCREEN_W: f64 = 480.0;
const SCREEN_H: f64 = 360.0;

const TOUR: [(&str, f64, f64); 6] = [
    ("Waterloo", 43.4643, -80.5204),
    ("New York", 40.7128, -74.0060),
    ("London", 51.5074, -0.1278),
    ("Paris", 48.8566, 2.3522),
    ("Dubai", 25.2048, 55.2708),
    ("Tokyo", 35.6762, 139.6503),
];

// ============================================================================
// Projection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        GeoPoint {
            lat: clamp_lat(lat),
            lon: wrap_lon(lon),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldPixel {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub z: u8,
}

pub fn clamp_lat(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

pub fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

pub fn world_size(zoom: u8) -> f64 {
    TILE_SIZE * (1u64 << zoom.min(MAX_ZOOM)) as f64
}

pub fn to_world(point: GeoPoint, zoom: u8) -> WorldPixel {
    let size = world_size(zoom);
    let lat = clamp_lat(point.lat).to_radians();
    let x = (wrap_lon(point.lon) + 180.0) / 360.0 * size;
    let y = (1.0 - lat.tan().asinh() / std::f64::consts::PI) / 2.0 * size;
    WorldPixel { x, y }
}

pub fn from_world(pixel: WorldPixel, zoom: u8) -> GeoPoint {
    let size = world_size(zoom);
    let lon = pixel.x / size * 360.0 - 180.0;
    let lat = (std::f64::consts::PI * (1.0 - 2.0 * pixel.y / size))
        .sinh()
        .atan()
        .to_degrees();
    GeoPoint::new(lat, lon)
}

/// Tile address plus the pixel offset inside that tile.
pub fn tile_for(pixel: WorldPixel, zoom: u8) -> (Tile, (u32, u32)) {
    let max_tile = (1u64 << zoom.min(MAX_ZOOM)) - 1;
    let tx = ((pixel.x / TILE_SIZE).floor() as u64).min(max_tile) as u32;
    let ty = ((pixel.y / TILE_SIZE).floor() as u64).min(max_tile) as u32;
    let ox = (pixel.x - tx as f64 * TILE_SIZE).clamp(0.0, TILE_SIZE - 1.0) as u32;
    let oy = (pixel.y - ty as f64 * TILE_SIZE).clamp(0.0, TILE_SIZE - 1.0) as u32;
    (Tile { x: tx, y: ty, z: zoom }, (ox, oy))
}

pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let dphi = (b.lat - a.lat).to_radians();
    let dlambda = (b.lon - a.lon).to_radians();
    let h = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    // Rounding can push h a hair past 1.0 near antipodes; asin would then
    // return NaN.
    2.0 * EARTH_RADIUS_KM * h.min(1.0).sqrt().asin()
}

/// Ground resolution at a latitude, meters per pixel.
pub fn meters_per_pixel(lat: f64, zoom: u8) -> f64 {
    156_543.033_92 * clamp_lat(lat).to_radians().cos() / (1u64 << zoom.min(MAX_ZOOM)) as f64
}

// ============================================================================
// Viewport
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    pub center: GeoPoint,
    pub zoom: u8,
}

impl Viewport {
    pub fn new(center: GeoPoint, zoom: u8) -> Self {
        Viewport {
            center,
            zoom: zoom.min(MAX_ZOOM),
        }
    }

    /// Moves the center by screen pixels at the current zoom.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        let size = world_size(self.zoom);
        let mut world = to_world(self.center, self.zoom);
        world.x = (world.x + dx).rem_euclid(size);
        world.y = (world.y + dy).clamp(0.0, size);
        self.center = from_world(world, self.zoom);
    }

    pub fn zoom_in(&mut self) {
        self.zoom = (self.zoom + 1).min(MAX_ZOOM);
    }

    pub fn zoom_out(&mut self) {
        self.zoom = self.zoom.saturating_sub(1);
    }
}

// ============================================================================
// ASCII minimap
// ============================================================================

const MAP_COLS: usize = 61;
const MAP_ROWS: usize = 21;

/// Projects each waypoint into the viewport's screen and draws the ones
/// that fit. The center cell is always '+'.
pub fn render_minimap(viewport: &Viewport, waypoints: &[(&str, GeoPoint)]) -> String {
    let mut grid = vec![vec![' '; MAP_COLS]; MAP_ROWS];
    let center = to_world(viewport.center, viewport.zoom);
    let px_per_col = SCREEN_W / MAP_COLS as f64;
    let px_per_row = SCREEN_H / MAP_ROWS as f64;

    for (name, point) in waypoints {
        let world = to_world(*point, viewport.zoom);
        let col = ((world.x - center.x) / px_per_col + MAP_COLS as f64 / 2.0).floor();
        let row = ((world.y - center.y) / px_per_row + MAP_ROWS as f64 / 2.0).floor();
        if (0.0..MAP_COLS as f64).contains(&col) && (0.0..MAP_ROWS as f64).contains(&row) {
            let marker = name.chars().next().unwrap_or('?');
            grid[row as usize][col as usize] = marker;
        }
    }
    grid[MAP_ROWS / 2][MAP_COLS / 2] = '+';

    let mut out = String::new();
    out.push('+');
    out.push_str(&"-".repeat(MAP_COLS));
    out.push_str("+\n");
    for row in grid {
        out.push('|');
        out.extend(row);
        out.push_str("|\n");
    }
    out.push('+');
    out.push_str(&"-".repeat(MAP_COLS));
    out.push_str("+\n");
    out
}

// ============================================================================
// Demo
// ============================================================================

fn main() {
    let zoom: u8 = std::env::args()
        .nth(1)
        .and_then(|z| z.parse().ok())
        .unwrap_or(5);

    println!("=== Map Tour at zoom {} ===\n", zoom);

    let waypoints: Vec<(&str, GeoPoint)> = TOUR
        .iter()
        .map(|(name, lat, lon)| (*name, GeoPoint::new(*lat, *lon)))
        .collect();

    let mut viewport = Viewport::new(waypoints[0].1, zoom);
    let mut total_km = 0.0;

    for pair in waypoints.windows(2) {
        let (from_name, from) = pair[0];
        let (to_name, to) = pair[1];
        let leg_km = haversine_km(from, to);
        total_km += leg_km;

        viewport.center = to;
        let world = to_world(to, viewport.zoom);
        let (tile, (ox, oy)) = tile_for(world, viewport.zoom);

        println!(
            "{} {} -> {}: {:.0} km",
            "leg".cyan(),
            from_name,
            to_name,
            leg_km
        );
        println!(
            "    tile {}/{}/{} offset ({}, {}), {:.1} m/px here",
            tile.z,
            tile.x,
            tile.y,
            ox,
            oy,
            meters_per_pixel(to.lat, viewport.zoom)
        );
        print!("{}", render_minimap(&viewport, &waypoints));
        println!();
    }

    println!("{} tour complete, {:.0} km over {} legs", "✓".green(), total_km, TOUR.len() - 1);

    println!("\nzooming in on {}:", waypoints[waypoints.len() - 1].0);
    for _ in 0..3 {
        viewport.zoom_in();
        println!(
            "  zoom {:>2}: {:.2} m/px",
            viewport.zoom,
            meters_per_pixel(viewport.center.lat, viewport.zoom)
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
