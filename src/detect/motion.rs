// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Pixel-level motion estimation.
//!
//! A per-pixel exponential moving average models the background; the
//! foreground mask is a threshold on |frame − background|. The frame maps
//! onto a 10×10 cell grid and the reported activity is the fraction of
//! ROI-enabled cells whose foreground ratio exceeds a small cell threshold.

/// Fraction of a cell's pixels that must be foreground before the cell
/// counts as active.
pub const CELL_FG_THRESHOLD: f32 = 0.1;

/// Enabled cells of the 10×10 grid. The UI sends a comma-separated list of
/// cell indices 0..99; an empty mask enables everything.
#[derive(Debug, Clone)]
pub struct RoiMask {
    enabled: [bool; 100],
}

impl RoiMask {
    pub fn parse(mask: &str) -> RoiMask {
        if mask.trim().is_empty() {
            return RoiMask { enabled: [true; 100] };
        }
        let mut enabled = [false; 100];
        for part in mask.split(',') {
            if let Ok(idx) = part.trim().parse::<usize>() {
                if idx < 100 {
                    enabled[idx] = true;
                }
            }
        }
        // A mask that parses to nothing behaves as all-enabled rather than
        // silently disabling detection.
        if !enabled.iter().any(|e| *e) {
            return RoiMask { enabled: [true; 100] };
        }
        RoiMask { enabled }
    }

    pub fn is_enabled(&self, cell: usize) -> bool {
        self.enabled.get(cell).copied().unwrap_or(false)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled.iter().filter(|e| **e).count()
    }
}

/// |frame − background| threshold; a decreasing function of sensitivity so
/// high sensitivity reacts to smaller luminance changes.
pub fn diff_threshold(sensitivity: i64) -> f32 {
    let s = sensitivity.clamp(1, 100) as f32;
    80.0 - 0.7 * s
}

/// Background adaptation rate; high sensitivity adapts slower so motion
/// stays foreground longer.
pub fn adaptation_alpha(sensitivity: i64) -> f32 {
    let s = sensitivity.clamp(1, 100) as f32;
    (0.1 - 0.001 * s).max(0.02)
}

/// Activity threshold that opens an interval. At sensitivity 100 a single
/// active cell of a full grid (activity 0.01) is enough.
pub fn open_threshold(sensitivity: i64) -> f32 {
    let s = sensitivity.clamp(1, 100) as f32;
    ((105.0 - s) / 1000.0).max(0.005)
}

pub struct PixelMotion {
    width: usize,
    height: usize,
    background: Vec<f32>,
    alpha: f32,
    threshold: f32,
    roi: RoiMask,
    initialized: bool,
    // Scratch: foreground pixel count per cell, reused across frames.
    cell_fg: [u32; 100],
    cell_px: [u32; 100],
}

impl PixelMotion {
    pub fn new(width: usize, height: usize, sensitivity: i64, roi: RoiMask) -> PixelMotion {
        let mut cell_px = [0u32; 100];
        for y in 0..height {
            for x in 0..width {
                cell_px[cell_index(x, y, width, height)] += 1;
            }
        }
        PixelMotion {
            width,
            height,
            background: vec![0.0; width * height],
            alpha: adaptation_alpha(sensitivity),
            threshold: diff_threshold(sensitivity),
            roi,
            initialized: false,
            cell_fg: [0; 100],
            cell_px,
        }
    }

    /// Update the background estimate with one grayscale frame and return
    /// the activity fraction over enabled cells. The first frame only seeds
    /// the background.
    pub fn activity(&mut self, frame: &[u8]) -> f32 {
        if frame.len() != self.width * self.height {
            return 0.0;
        }
        if !self.initialized {
            for (bg, px) in self.background.iter_mut().zip(frame) {
                *bg = *px as f32;
            }
            self.initialized = true;
            return 0.0;
        }

        self.cell_fg = [0; 100];
        for y in 0..self.height {
            let row = y * self.width;
            for x in 0..self.width {
                let i = row + x;
                let px = frame[i] as f32;
                let diff = (px - self.background[i]).abs();
                self.background[i] += self.alpha * (px - self.background[i]);
                if diff > self.threshold {
                    self.cell_fg[cell_index(x, y, self.width, self.height)] += 1;
                }
            }
        }

        let enabled = self.roi.enabled_count();
        if enabled == 0 {
            return 0.0;
        }
        let mut active = 0usize;
        for cell in 0..100 {
            if !self.roi.is_enabled(cell) || self.cell_px[cell] == 0 {
                continue;
            }
            let ratio = self.cell_fg[cell] as f32 / self.cell_px[cell] as f32;
            if ratio > CELL_FG_THRESHOLD {
                active += 1;
            }
        }
        active as f32 / enabled as f32
    }
}

fn cell_index(x: usize, y: usize, width: usize, height: usize) -> usize {
    let cx = (x * 10 / width).min(9);
    let cy = (y * 10 / height).min(9);
    cy * 10 + cx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_frame(w: usize, h: usize, value: u8) -> Vec<u8> {
        vec![value; w * h]
    }

    /// Paint one grid cell of a flat frame with `value`.
    fn paint_cell(frame: &mut [u8], w: usize, h: usize, cell: usize, value: u8, fraction: f32) {
        let (cy, cx) = (cell / 10, cell % 10);
        let x0 = cx * w / 10;
        let x1 = (cx + 1) * w / 10;
        let y0 = cy * h / 10;
        let y1 = (cy + 1) * h / 10;
        let total = (x1 - x0) * (y1 - y0);
        let mut painted = 0usize;
        'outer: for y in y0..y1 {
            for x in x0..x1 {
                if painted as f32 >= fraction * total as f32 {
                    break 'outer;
                }
                frame[y * w + x] = value;
                painted += 1;
            }
        }
    }

    #[test]
    fn empty_roi_enables_all_cells() {
        assert_eq!(RoiMask::parse("").enabled_count(), 100);
        assert_eq!(RoiMask::parse("55").enabled_count(), 1);
        assert!(RoiMask::parse("55").is_enabled(55));
        assert!(!RoiMask::parse("55").is_enabled(54));
    }

    #[test]
    fn thresholds_move_with_sensitivity() {
        assert!(diff_threshold(100) < diff_threshold(1));
        assert!(open_threshold(100) < open_threshold(1));
        // A single full-grid cell clears the open threshold at max sensitivity.
        assert!(0.01 >= open_threshold(100));
    }

    #[test]
    fn low_sensitivity_ignores_noise() {
        let (w, h) = (80, 60);
        let mut det = PixelMotion::new(w, h, 1, RoiMask::parse(""));
        det.activity(&flat_frame(w, h, 100));
        // ±5 luminance jitter stays under the sensitivity-1 threshold.
        for i in 0..30 {
            let v = if i % 2 == 0 { 105 } else { 95 };
            assert_eq!(det.activity(&flat_frame(w, h, v)), 0.0);
        }
    }

    #[test]
    fn single_cell_change_registers_at_max_sensitivity() {
        let (w, h) = (80, 60);
        let mut det = PixelMotion::new(w, h, 100, RoiMask::parse(""));
        det.activity(&flat_frame(w, h, 100));
        let mut frame = flat_frame(w, h, 100);
        paint_cell(&mut frame, w, h, 55, 220, 1.0);
        let activity = det.activity(&frame);
        assert!(activity >= open_threshold(100), "activity {activity}");
    }

    #[test]
    fn roi_masks_out_other_cells() {
        let (w, h) = (80, 60);
        let mut det = PixelMotion::new(w, h, 50, RoiMask::parse("55"));
        det.activity(&flat_frame(w, h, 100));

        // Change outside the ROI: invisible.
        let mut outside = flat_frame(w, h, 100);
        paint_cell(&mut outside, w, h, 12, 220, 1.0);
        assert_eq!(det.activity(&outside), 0.0);

        // 60% of cell 55 turns foreground: full activity (1 of 1 cells).
        let mut inside = flat_frame(w, h, 100);
        paint_cell(&mut inside, w, h, 55, 220, 0.6);
        let activity = det.activity(&inside);
        assert!((activity - 1.0).abs() < f32::EPSILON, "activity {activity}");
    }
}
