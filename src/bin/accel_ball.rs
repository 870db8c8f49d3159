//! Accelerometer ball: a worker thread polls a tilt sensor and posts raw
//! samples over a channel; the main thread integrates a bouncing ball on a
//! fixed 50 ms tick and draws it as an ASCII frame.
//!
//! Without arguments the sensor is a simulated tilt (slow random walk plus
//! jitter). Pass a .csv path with `x,y` columns to replay recorded samples,
//! and a number to change how many ticks the demo runs.
//!
//! Run with: cargo run --bin accel_ball [-- ticks] [-- recording.csv]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use colored::Colorize;
use crossbeam::channel::{self, Receiver, TrySendError};
use crossbeam::select;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use thiserror::Error;

const SCREEN_W: i32 = 480;
const SCREEN_H: i32 = 360;

/// ±1000 raw units is about ±1 g.
const RAW_PER_G: f32 = 1000.0;
const ACCEL_GAIN: f32 = 2.5;
const FRICTION: f32 = 0.98;
const BOUNCE_DAMPING: f32 = 0.65;

const TICK: Duration = Duration::from_millis(50);
const POLL_PERIOD: Duration = Duration::from_millis(20);
const RENDER_EVERY: u64 = 10;

// ============================================================================
// Physics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RawSample {
    pub x: i16,
    pub y: i16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ball {
    pub x: i32,
    pub y: i32,
    pub vx: f32,
    pub vy: f32,
}

impl Ball {
    pub fn centered() -> Self {
        Ball {
            x: SCREEN_W / 2,
            y: SCREEN_H / 2,
            vx: 0.0,
            vy: 0.0,
        }
    }

    /// One physics tick: accelerate, apply friction, move with the velocity
    /// truncated to whole units, then bounce off any crossed edge by
    /// clamping to it and invert-and-damping that velocity component.
    /// Returns true when an edge was hit.
    pub fn step(&mut self, sample: RawSample) -> bool {
        let ax = sample.x as f32 / RAW_PER_G;
        let ay = sample.y as f32 / RAW_PER_G;
        self.vx = (self.vx + ax * ACCEL_GAIN) * FRICTION;
        self.vy = (self.vy + ay * ACCEL_GAIN) * FRICTION;
        self.x += self.vx as i32;
        self.y += self.vy as i32;

        let mut bounced = false;
        if self.x < 0 {
            self.x = 0;
            self.vx = -self.vx * BOUNCE_DAMPING;
            bounced = true;
        } else if self.x > SCREEN_W - 1 {
            self.x = SCREEN_W - 1;
            self.vx = -self.vx * BOUNCE_DAMPING;
            bounced = true;
        }
        if self.y < 0 {
            self.y = 0;
            self.vy = -self.vy * BOUNCE_DAMPING;
            bounced = true;
        } else if self.y > SCREEN_H - 1 {
            self.y = SCREEN_H - 1;
            self.vy = -self.vy * BOUNCE_DAMPING;
            bounced = true;
        }
        bounced
    }

    pub fn speed(&self) -> f32 {
        (self.vx * self.vx + self.vy * self.vy).sqrt()
    }
}

// ============================================================================
// Sensor sources
// ============================================================================

pub trait SensorSource: Send {
    /// Next raw sample, or None once the source is exhausted.
    fn next_sample(&mut self) -> Option<RawSample>;
}

/// Random walk of a tilt angle per axis, with per-sample jitter on top.
/// Never exhausts.
pub struct SimulatedTilt {
    rng: StdRng,
    tilt_x: f32,
    tilt_y: f32,
}

impl SimulatedTilt {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    pub fn with_seed(seed: u64) -> Self {
        SimulatedTilt {
            rng: StdRng::seed_from_u64(seed),
            tilt_x: 0.0,
            tilt_y: 0.0,
        }
    }
}

impl Default for SimulatedTilt {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for SimulatedTilt {
    fn next_sample(&mut self) -> Option<RawSample> {
        self.tilt_x = (self.tilt_x + self.rng.gen_range(-0.04..0.04)).clamp(-0.6, 0.6);
        self.tilt_y = (self.tilt_y + self.rng.gen_range(-0.04..0.04)).clamp(-0.6, 0.6);
        let jitter_x = self.rng.gen_range(-15.0..15.0);
        let jitter_y = self.rng.gen_range(-15.0..15.0);
        let x = (self.tilt_x.sin() * RAW_PER_G + jitter_x).round() as i16;
        let y = (self.tilt_y.sin() * RAW_PER_G + jitter_y).round() as i16;
        Some(RawSample { x, y })
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("cannot replay {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// Replays samples recorded to a CSV file with `x,y` columns.
#[derive(Debug)]
pub struct CsvReplay {
    samples: std::vec::IntoIter<RawSample>,
}

impl CsvReplay {
    pub fn open(path: &Path) -> Result<Self, ReplayError> {
        let wrap = |source| ReplayError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut reader = csv::Reader::from_path(path).map_err(wrap)?;
        let samples: Vec<RawSample> = reader
            .deserialize()
            .collect::<Result<_, csv::Error>>()
            .map_err(wrap)?;
        Ok(CsvReplay {
            samples: samples.into_iter(),
        })
    }
}

impl SensorSource for CsvReplay {
    fn next_sample(&mut self) -> Option<RawSample> {
        self.samples.next()
    }
}

// ============================================================================
// Worker thread
// ============================================================================

/// Polls the source at its own cadence and posts samples to the returned
/// channel. A full channel drops the sample rather than stalling the poll.
/// The worker exits on the stop flag, on source exhaustion, or when the
/// receiver is dropped.
pub fn spawn_sensor(
    mut source: Box<dyn SensorSource>,
    period: Duration,
    stop: Arc<AtomicBool>,
) -> (Receiver<RawSample>, JoinHandle<()>) {
    let (tx, rx) = channel::bounded(8);
    let handle = thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            let sample = match source.next_sample() {
                Some(sample) => sample,
                None => break,
            };
            match tx.try_send(sample) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }
            thread::sleep(period);
        }
    });
    (rx, handle)
}

// ============================================================================
// Rendering
// ============================================================================

const GRID_COLS: usize = 60;
const GRID_ROWS: usize = 18;

fn render_frame(ball: &Ball, sample: RawSample, tick: u64) -> String {
    let col = (ball.x as usize * GRID_COLS / SCREEN_W as usize).min(GRID_COLS - 1);
    let row = (ball.y as usize * GRID_ROWS / SCREEN_H as usize).min(GRID_ROWS - 1);

    let mut out = format!(
        "tick {:>4}  accel x={:+.3}g y={:+.3}g  pos ({:>3},{:>3})  vel ({:+6.1},{:+6.1})\n",
        tick,
        sample.x as f32 / RAW_PER_G,
        sample.y as f32 / RAW_PER_G,
        ball.x,
        ball.y,
        ball.vx,
        ball.vy,
    );
    out.push('+');
    out.push_str(&"-".repeat(GRID_COLS));
    out.push_str("+\n");
    for r in 0..GRID_ROWS {
        out.push('|');
        for c in 0..GRID_COLS {
            out.push(if r == row && c == col { 'O' } else { ' ' });
        }
        out.push_str("|\n");
    }
    out.push('+');
    out.push_str(&"-".repeat(GRID_COLS));
    out.push_str("+\n");
    out
}

// ============================================================================
// Demo
// ============================================================================

fn usage() -> ! {
    eprintln!("usage: accel_ball [ticks] [recording.csv]");
    std::process::exit(2);
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut total_ticks: u64 = 200;
    let mut replay: Option<String> = None;
    for arg in &args {
        if let Ok(n) = arg.parse::<u64>() {
            total_ticks = n;
        } else if arg.ends_with(".csv") {
            replay = Some(arg.clone());
        } else {
            usage();
        }
    }

    let source: Box<dyn SensorSource> = match &replay {
        Some(path) => match CsvReplay::open(Path::new(path)) {
            Ok(recorded) => {
                println!("replaying samples from {}", path);
                Box::new(recorded)
            }
            Err(e) => {
                eprintln!("{} {}", "✗".red(), e);
                std::process::exit(1);
            }
        },
        None => {
            println!("simulated tilt sensor, {} ticks", total_ticks);
            Box::new(SimulatedTilt::new())
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let (rx, worker) = spawn_sensor(source, POLL_PERIOD, stop.clone());
    let ticker = channel::tick(TICK);

    let mut sensor_rx = rx;
    let mut ball = Ball::centered();
    let mut latest = RawSample { x: 0, y: 0 };
    let mut ticks_done: u64 = 0;
    let mut bounces: u64 = 0;
    let mut peak_speed: f32 = 0.0;

    loop {
        select! {
            recv(sensor_rx) -> msg => match msg {
                Ok(sample) => latest = sample,
                // Exhausted source; the ball coasts on the last sample.
                Err(_) => sensor_rx = channel::never(),
            },
            recv(ticker) -> _ => {
                if ticks_done >= total_ticks {
                    break;
                }
                if ball.step(latest) {
                    bounces += 1;
                }
                peak_speed = peak_speed.max(ball.speed());
                ticks_done += 1;
                if ticks_done % RENDER_EVERY == 0 {
                    print!("{}", render_frame(&ball, latest, ticks_done));
                }
            }
        }
    }

    stop.store(true, Ordering::Relaxed);
    drop(sensor_rx);
    let _ = worker.join();

    print!("{}", render_frame(&ball, latest, ticks_done));
    println!("\n=== Summary ===");
    println!(
        "{} {} ticks, {} bounces, peak speed {:.1} units/tick, came to rest at ({}, {})",
        "✓".green(),
        ticks_done,
        bounces,
        peak_speed,
        ball.x,
        ball.y
    );
}

// ============================================================================
// Tests
// ============================================================================
