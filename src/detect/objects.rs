// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Object-detection gating for AI mode.
//!
//! The model itself is external: anything implementing [`ObjectDetector`]
//! (a pure `frame → [detections]` function). This module filters detections
//! against the camera's class allow-set and keeps the 10-second sliding
//! window that defines when an AI interval is live.

use std::collections::{BTreeSet, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};

use super::frames::Frame;

pub const CONFIDENCE_MIN: f32 = 0.4;
pub const WINDOW: Duration = Duration::seconds(10);
/// Run inference every Nth analysis frame.
pub const FRAME_STRIDE: u64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class: String,
    pub confidence: f32,
}

/// The external model boundary. Implementations must be pure with respect to
/// the frame; the worker runs them off the control-plane executor.
pub trait ObjectDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Vec<Detection>;
}

/// Sliding-window state for one camera.
pub struct AiFilter {
    allow: HashSet<String>,
    window: VecDeque<DateTime<Utc>>,
    /// Classes observed during the current interval, for the reason tag.
    classes: BTreeSet<String>,
}

impl AiFilter {
    pub fn new(allow_csv: &str) -> AiFilter {
        let allow = allow_csv
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();
        AiFilter {
            allow,
            window: VecDeque::new(),
            classes: BTreeSet::new(),
        }
    }

    fn allowed(&self, class: &str) -> bool {
        self.allow.is_empty() || self.allow.contains(&class.to_ascii_lowercase())
    }

    /// Feed one inference result. Returns the number of detections that
    /// passed the class and confidence filters.
    pub fn ingest(&mut self, now: DateTime<Utc>, detections: &[Detection]) -> usize {
        let mut kept = 0;
        for det in detections {
            if det.confidence >= CONFIDENCE_MIN && self.allowed(&det.class) {
                self.window.push_back(now);
                self.classes.insert(det.class.to_ascii_lowercase());
                kept += 1;
            }
        }
        self.expire(now);
        kept
    }

    fn expire(&mut self, now: DateTime<Utc>) {
        while let Some(front) = self.window.front() {
            if now - *front > WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    /// True while at least one allowed detection sits inside the window.
    pub fn active(&mut self, now: DateTime<Utc>) -> bool {
        self.expire(now);
        !self.window.is_empty()
    }

    /// Most recent allowed detection, if any is still in the window.
    pub fn last_detection(&self) -> Option<DateTime<Utc>> {
        self.window.back().copied()
    }

    /// Comma-joined set of classes seen during the current interval.
    pub fn reason(&self) -> String {
        self.classes.iter().cloned().collect::<Vec<_>>().join(",")
    }

    /// Clear the per-interval class set once an interval closes.
    pub fn clear_classes(&mut self) {
        self.classes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class: &str, conf: f32) -> Detection {
        Detection { class: class.into(), confidence: conf }
    }

    #[test]
    fn filters_class_and_confidence() {
        let mut f = AiFilter::new("person,car");
        let t = Utc::now();
        assert_eq!(f.ingest(t, &[det("person", 0.9)]), 1);
        assert_eq!(f.ingest(t, &[det("person", 0.2)]), 0);
        assert_eq!(f.ingest(t, &[det("dog", 0.9)]), 0);
        assert_eq!(f.ingest(t, &[det("Car", 0.5)]), 1);
        assert_eq!(f.reason(), "car,person");
    }

    #[test]
    fn empty_allow_set_accepts_everything() {
        let mut f = AiFilter::new("");
        assert_eq!(f.ingest(Utc::now(), &[det("dog", 0.5)]), 1);
    }

    #[test]
    fn window_empties_after_ten_seconds() {
        let mut f = AiFilter::new("person");
        let t0 = Utc::now();
        f.ingest(t0, &[det("person", 0.9)]);
        assert!(f.active(t0 + Duration::seconds(9)));
        assert!(!f.active(t0 + Duration::seconds(11)));
    }

    #[test]
    fn later_detections_extend_the_window() {
        let mut f = AiFilter::new("person");
        let t0 = Utc::now();
        f.ingest(t0, &[det("person", 0.9)]);
        f.ingest(t0 + Duration::seconds(8), &[det("person", 0.9)]);
        assert!(f.active(t0 + Duration::seconds(17)));
        assert!(!f.active(t0 + Duration::seconds(19)));
    }
}
