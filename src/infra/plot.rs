// ============================================================
// Layer 6 — Training History Plot
// ============================================================
// Renders a TrainingHistory to a PNG with image + imageproc:
//
//   ┌──────────────────────────────────────────┬─────────────┐
//   │ TRAINING HISTORY (SIMULATED)             │             │
//   │  1.00 ┤ ─────────                        │ ── loss     │
//   │       │ - - - - -                        │ -- val_loss │
//   │  0.00 ┤                                  │ ...         │
//   │       1   2   3   ...  EPOCH             │             │
//   └──────────────────────────────────────────┴─────────────┘
//
// One colour per metric; the train series is solid and its
// `val_` twin dashed. X ticks are whole epochs. Non-finite
// values are skipped and break the line. Labels use a built-in
// 3×5 bitmap font, so no font files are needed.

use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::{
    drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut},
    rect::Rect,
};
use std::{fs, path::Path};

use crate::domain::history::{TrainingHistory, TRACKED_METRICS, VAL_PREFIX};

const WIDTH:  u32 = 1200;
const HEIGHT: u32 = 600;

const LEFT:   i64 = 90;
const RIGHT:  i64 = 250;
const TOP:    i64 = 50;
const BOTTOM: i64 = 70;

const TEXT_SCALE: i64 = 2;
const DASH:       i64 = 8;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);
const GRID:  Rgb<u8> = Rgb([225, 225, 225]);

/// Matplotlib's default cycle, one colour per tracked metric.
const PALETTE: [Rgb<u8>; 4] = [
    Rgb([31, 119, 180]),
    Rgb([255, 127, 14]),
    Rgb([44, 160, 44]),
    Rgb([214, 39, 40]),
];

struct Frame {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
    epochs: usize,
    lo: f64,
    hi: f64,
}

impl Frame {
    fn new(epochs: usize, lo: f64, hi: f64) -> Self {
        Self {
            x0: LEFT,
            y0: TOP,
            x1: WIDTH as i64 - RIGHT,
            y1: HEIGHT as i64 - BOTTOM,
            epochs,
            lo,
            hi,
        }
    }

    /// Epoch index (0-based) → pixel column; a single epoch sits in the middle.
    fn x(&self, epoch: usize) -> i64 {
        if self.epochs <= 1 {
            return (self.x0 + self.x1) / 2;
        }
        let t = epoch as f64 / (self.epochs - 1) as f64;
        self.x0 + 20 + (t * (self.x1 - self.x0 - 40) as f64).round() as i64
    }

    fn y(&self, value: f64) -> i64 {
        let t = (value - self.lo) / (self.hi - self.lo);
        self.y1 - (t * (self.y1 - self.y0) as f64).round() as i64
    }
}

/// Finite min/max over every series, padded; [0, 1] when nothing is finite.
fn value_range(history: &TrainingHistory) -> (f64, f64) {
    let finite = history
        .names()
        .filter_map(|n| history.series(n))
        .flatten()
        .copied()
        .filter(|v| v.is_finite());

    let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < 1e-9 {
        return (lo - 0.5, hi + 0.5);
    }
    let pad = (hi - lo) * 0.05;
    (lo - pad, hi + pad)
}

pub fn render_history(history: &TrainingHistory) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, HEIGHT, WHITE);
    let (lo, hi) = value_range(history);
    let frame = Frame::new(history.epochs(), lo, hi);

    // ── Grid, axes, ticks ─────────────────────────────────────────────────────
    let y_ticks = 5;
    for i in 0..=y_ticks {
        let v = lo + (hi - lo) * i as f64 / y_ticks as f64;
        let y = frame.y(v);
        line(&mut img, frame.x0, y, frame.x1, y, GRID, None);
        line(&mut img, frame.x0 - 6, y, frame.x0, y, BLACK, None);
        let label = format!("{v:.2}");
        text(&mut img, frame.x0 - 10 - text_width(&label), y - 5, &label, BLACK);
    }

    let step = history.epochs().div_ceil(10).max(1);
    for epoch in (0..history.epochs()).step_by(step) {
        let x = frame.x(epoch);
        line(&mut img, x, frame.y0, x, frame.y1, GRID, None);
        line(&mut img, x, frame.y1, x, frame.y1 + 6, BLACK, None);
        let label = (epoch + 1).to_string();
        text(&mut img, x - text_width(&label) / 2, frame.y1 + 12, &label, BLACK);
    }

    rect(&mut img, frame.x0, frame.y0, frame.x1, frame.y1, BLACK);

    text(&mut img, frame.x0, 16, "training history (simulated)", BLACK);
    text(&mut img, (frame.x0 + frame.x1) / 2 - text_width("epoch") / 2, frame.y1 + 36, "epoch", BLACK);
    text(&mut img, 8, frame.y0 - 24, "metric value", BLACK);

    // ── Curves and legend ─────────────────────────────────────────────────────
    let mut legend_y = frame.y0 + 10;
    for (metric, colour) in TRACKED_METRICS.iter().zip(PALETTE) {
        for (name, dashed) in [(metric.to_string(), false), (format!("{VAL_PREFIX}{metric}"), true)] {
            let Some(values) = history.series(&name) else { continue };
            let dash = dashed.then_some(DASH);
            draw_series(&mut img, &frame, values, colour, dash);

            let lx = frame.x1 + 20;
            thick_line(&mut img, lx, legend_y + 4, lx + 36, legend_y + 4, colour, dash);
            text(&mut img, lx + 46, legend_y, &legend_label(&name), BLACK);
            legend_y += 22;
        }
    }

    img
}

/// Legend entry: train series get a `train_` prefix, val series keep theirs.
fn legend_label(name: &str) -> String {
    if name.starts_with(VAL_PREFIX) {
        name.to_string()
    } else {
        format!("train_{name}")
    }
}

fn draw_series(img: &mut RgbImage, frame: &Frame, values: &[f64], colour: Rgb<u8>, dash: Option<i64>) {
    let mut previous: Option<(i64, i64)> = None;
    for (epoch, &v) in values.iter().enumerate() {
        if !v.is_finite() {
            previous = None;
            continue;
        }
        let point = (frame.x(epoch), frame.y(v));
        if let Some((px, py)) = previous {
            thick_line(img, px, py, point.0, point.1, colour, dash);
        }
        marker(img, point.0, point.1, colour);
        previous = Some(point);
    }
}

// ─── Raster primitives ────────────────────────────────────────────────────────

fn point(x: f64, y: f64) -> (f32, f32) {
    (x as f32, y as f32)
}

/// Straight segment; `dash` = on/off run length in pixels.
fn line(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, colour: Rgb<u8>, dash: Option<i64>) {
    let (fx, fy) = (x0 as f64, y0 as f64);
    let Some(dash) = dash else {
        draw_line_segment_mut(img, point(fx, fy), point(x1 as f64, y1 as f64), colour);
        return;
    };

    let (dx, dy) = ((x1 - x0) as f64, (y1 - y0) as f64);
    let length   = dx.hypot(dy);
    if length == 0.0 {
        draw_line_segment_mut(img, point(fx, fy), point(fx, fy), colour);
        return;
    }
    let at = |t: f64| point(fx + dx * t / length, fy + dy * t / length);

    let (on, period) = (dash as f64, 2.0 * dash as f64);
    let mut start = 0.0;
    while start <= length {
        let end = (start + on - 1.0).min(length);
        draw_line_segment_mut(img, at(start), at(end), colour);
        start += period;
    }
}

fn thick_line(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, colour: Rgb<u8>, dash: Option<i64>) {
    for (ox, oy) in [(0, 0), (0, 1), (1, 0)] {
        line(img, x0 + ox, y0 + oy, x1 + ox, y1 + oy, colour, dash);
    }
}

fn block(img: &mut RgbImage, x: i64, y: i64, size: i64, colour: Rgb<u8>) {
    draw_filled_rect_mut(img, Rect::at(x as i32, y as i32).of_size(size as u32, size as u32), colour);
}

fn marker(img: &mut RgbImage, x: i64, y: i64, colour: Rgb<u8>) {
    block(img, x - 2, y - 2, 5, colour);
}

fn rect(img: &mut RgbImage, x0: i64, y0: i64, x1: i64, y1: i64, colour: Rgb<u8>) {
    let (w, h) = ((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
    draw_hollow_rect_mut(img, Rect::at(x0 as i32, y0 as i32).of_size(w, h), colour);
}

// ─── 3×5 bitmap font ──────────────────────────────────────────────────────────

fn glyph(c: char) -> [&'static str; 5] {
    match c.to_ascii_lowercase() {
        'a' => [".#.", "#.#", "###", "#.#", "#.#"],
        'b' => ["##.", "#.#", "##.", "#.#", "##."],
        'c' => [".##", "#..", "#..", "#..", ".##"],
        'd' => ["##.", "#.#", "#.#", "#.#", "##."],
        'e' => ["###", "#..", "##.", "#..", "###"],
        'f' => ["###", "#..", "##.", "#..", "#.."],
        'g' => [".##", "#..", "#.#", "#.#", ".##"],
        'h' => ["#.#", "#.#", "###", "#.#", "#.#"],
        'i' => ["###", ".#.", ".#.", ".#.", "###"],
        'j' => ["..#", "..#", "..#", "#.#", ".#."],
        'k' => ["#.#", "#.#", "##.", "#.#", "#.#"],
        'l' => ["#..", "#..", "#..", "#..", "###"],
        'm' => ["#.#", "###", "###", "#.#", "#.#"],
        'n' => ["##.", "#.#", "#.#", "#.#", "#.#"],
        'o' => [".#.", "#.#", "#.#", "#.#", ".#."],
        'p' => ["##.", "#.#", "##.", "#..", "#.."],
        'q' => [".#.", "#.#", "#.#", "##.", ".##"],
        'r' => ["##.", "#.#", "##.", "#.#", "#.#"],
        's' => [".##", "#..", ".#.", "..#", "##."],
        't' => ["###", ".#.", ".#.", ".#.", ".#."],
        'u' => ["#.#", "#.#", "#.#", "#.#", "###"],
        'v' => ["#.#", "#.#", "#.#", "#.#", ".#."],
        'w' => ["#.#", "#.#", "###", "###", "#.#"],
        'x' => ["#.#", "#.#", ".#.", "#.#", "#.#"],
        'y' => ["#.#", "#.#", ".#.", ".#.", ".#."],
        'z' => ["###", "..#", ".#.", "#..", "###"],
        '0' => ["###", "#.#", "#.#", "#.#", "###"],
        '1' => [".#.", "##.", ".#.", ".#.", "###"],
        '2' => ["##.", "..#", ".#.", "#..", "###"],
        '3' => ["##.", "..#", ".#.", "..#", "##."],
        '4' => ["#.#", "#.#", "###", "..#", "..#"],
        '5' => ["###", "#..", "##.", "..#", "##."],
        '6' => [".##", "#..", "###", "#.#", "###"],
        '7' => ["###", "..#", ".#.", ".#.", ".#."],
        '8' => ["###", "#.#", "###", "#.#", "###"],
        '9' => ["###", "#.#", "###", "..#", "##."],
        '_' => ["...", "...", "...", "...", "###"],
        '.' => ["...", "...", "...", "...", ".#."],
        '-' => ["...", "...", "###", "...", "..."],
        '(' => [".#.", "#..", "#..", "#..", ".#."],
        ')' => [".#.", "..#", "..#", "..#", ".#."],
        _   => ["...", "...", "...", "...", "..."],
    }
}

fn text_width(s: &str) -> i64 {
    s.chars().count() as i64 * 4 * TEXT_SCALE
}

fn text(img: &mut RgbImage, x: i64, y: i64, s: &str, colour: Rgb<u8>) {
    for (i, c) in s.chars().enumerate() {
        let gx = x + i as i64 * 4 * TEXT_SCALE;
        for (row, bits) in glyph(c).iter().enumerate() {
            for (col, bit) in bits.bytes().enumerate() {
                if bit != b'#' {
                    continue;
                }
                block(img, gx + col as i64 * TEXT_SCALE, y + row as i64 * TEXT_SCALE, TEXT_SCALE, colour);
            }
        }
    }
}

/// Render and write the PNG through a temporary sibling.
pub fn save_history_plot(history: &TrainingHistory, path: &Path) -> Result<()> {
    let img = render_history(history);
    let tmp_path = path.with_extension("png.tmp");

    img.save_with_format(&tmp_path, ImageFormat::Png)
        .with_context(|| format!("Cannot write plot '{}'", tmp_path.display()))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("Cannot move plot into '{}'", path.display()));
    }

    tracing::debug!("Wrote history plot '{}'", path.display());
    Ok(())
}
