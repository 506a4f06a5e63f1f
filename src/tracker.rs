use crate::bbox::{BBox, Ltrb};
use crate::track::TrackedObject;

use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    /// A detection continues a track only when IoU is strictly above this.
    pub match_iou_threshold: f32,

    /// Tracks unmatched for more than this many frames are dropped.
    pub retirement_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_iou_threshold: 0.5,
            retirement_frames: 10,
        }
    }
}

/// Greedy IoU tracker handing out stable identities to hazard boxes.
///
/// One instance lives for exactly one video; identities are never reused.
#[derive(Debug)]
pub struct IdentityTracker {
    config: TrackerConfig,
    objects: BTreeMap<u64, TrackedObject>,
    next_identity: u64,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            objects: BTreeMap::new(),
            next_identity: 0,
        }
    }

    #[inline]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Feeds one frame of detections, returns `(identity, box)` in input order.
    pub fn update(&mut self, detections: &[BBox<Ltrb>]) -> Vec<(u64, BBox<Ltrb>)> {
        for obj in self.objects.values_mut() {
            obj.frames_since_seen = obj.frames_since_seen.saturating_add(1);
        }

        let mut taken = HashSet::with_capacity(detections.len());
        let mut visible = Vec::with_capacity(detections.len());

        for det in detections {
            let identity = match self.best_match(det, &taken) {
                Some(id) => {
                    if let Some(obj) = self.objects.get_mut(&id) {
                        obj.refresh(*det);
                    }
                    taken.insert(id);
                    id
                }
                None => {
                    let id = self.next_identity;
                    self.next_identity += 1;
                    self.objects.insert(id, TrackedObject::new(id, *det));
                    id
                }
            };

            visible.push((identity, *det));
        }

        let retirement = self.config.retirement_frames;
        self.objects
            .retain(|_, obj| obj.frames_since_seen <= retirement);

        visible
    }

    fn best_match(&self, det: &BBox<Ltrb>, taken: &HashSet<u64>) -> Option<u64> {
        let mut best: Option<(u64, f32)> = None;

        for (id, obj) in &self.objects {
            if taken.contains(id) {
                continue;
            }

            let iou = det.iou(&obj.last_box);
            if iou <= self.config.match_iou_threshold {
                continue;
            }

            match best {
                Some((_, best_iou)) if best_iou >= iou => {}
                _ => best = Some((*id, iou)),
            }
        }

        best.map(|(id, _)| id)
    }

    /// Number of distinct identities ever created.
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.next_identity
    }

    #[inline]
    pub fn active_count(&self) -> usize {
        self.objects.len()
    }

    #[inline]
    pub fn tracks(&self) -> impl Iterator<Item = &TrackedObject> {
        self.objects.values()
    }
}

impl Default for IdentityTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(l: i32, t: i32, r: i32, bt: i32) -> BBox<Ltrb> {
        BBox::ltrb(l, t, r, bt)
    }

    fn ids(out: &[(u64, BBox<Ltrb>)]) -> Vec<u64> {
        out.iter().map(|(id, _)| *id).collect()
    }

    #[test]
    fn drifting_box_keeps_identity() {
        let mut tracker = IdentityTracker::default();

        for step in 0..30 {
            let out = tracker.update(&[b(100 + step, 200, 200 + step, 260)]);
            assert_eq!(ids(&out), vec![0]);
        }

        assert_eq!(tracker.total_count(), 1);
        assert_eq!(tracker.active_count(), 1);
    }

    #[test]
    fn overlap_at_threshold_creates_new_identity() {
        let mut tracker = IdentityTracker::default();
        tracker.update(&[b(0, 0, 10, 10)]);

        // IoU is exactly 0.5 here
        let out = tracker.update(&[b(0, 0, 10, 5)]);
        assert_eq!(ids(&out), vec![1]);
        assert_eq!(tracker.total_count(), 2);
    }

    #[test]
    fn output_follows_detection_order() {
        let mut tracker = IdentityTracker::default();
        tracker.update(&[b(0, 0, 10, 10), b(100, 100, 110, 110)]);

        let out = tracker.update(&[b(100, 100, 110, 111), b(0, 0, 10, 11)]);
        assert_eq!(ids(&out), vec![1, 0]);
        assert_eq!(out[0].1, b(100, 100, 110, 111));
    }

    #[test]
    fn track_is_matched_at_most_once_per_frame() {
        let mut tracker = IdentityTracker::default();
        tracker.update(&[b(0, 0, 100, 100)]);

        // both overlap the single track; the first one wins it
        let out = tracker.update(&[b(0, 0, 100, 90), b(0, 0, 100, 95)]);
        assert_eq!(ids(&out), vec![0, 1]);
    }

    #[test]
    fn same_frame_duplicates_share_identity() {
        let mut tracker = IdentityTracker::default();

        // a track born in this frame is still open to later detections
        let out = tracker.update(&[b(0, 0, 100, 100), b(0, 0, 100, 95)]);
        assert_eq!(ids(&out), vec![0, 0]);
        assert_eq!(tracker.total_count(), 1);
        assert_eq!(tracker.active_count(), 1);

        // but only once: a third copy opens a second track
        let out = tracker.update(&[b(0, 0, 100, 100), b(0, 0, 100, 95), b(0, 0, 100, 98)]);
        assert_eq!(ids(&out), vec![0, 1, 1]);
    }

    #[test]
    fn best_overlap_wins() {
        let mut tracker = IdentityTracker::default();
        tracker.update(&[b(0, 0, 100, 100), b(10, 0, 110, 100)]);

        let out = tracker.update(&[b(10, 0, 110, 100)]);
        assert_eq!(ids(&out), vec![1]);
    }

    #[test]
    fn matched_box_replaces_track_box() {
        let mut tracker = IdentityTracker::default();
        tracker.update(&[b(0, 0, 100, 100)]);
        tracker.update(&[b(5, 5, 105, 105)]);

        let track = tracker.tracks().next().unwrap();
        assert_eq!(track.last_box, b(5, 5, 105, 105));
        assert_eq!(track.frames_since_seen, 0);
    }

    #[test]
    fn absent_for_retirement_frames_is_still_tracked() {
        let mut tracker = IdentityTracker::default();
        let hazard = b(50, 50, 150, 120);

        tracker.update(&[hazard]);
        for _ in 0..10 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.active_count(), 1);

        let out = tracker.update(&[hazard]);
        assert_eq!(ids(&out), vec![0]);
        assert_eq!(tracker.total_count(), 1);
    }

    #[test]
    fn absent_longer_than_retirement_is_not_resurrected() {
        let mut tracker = IdentityTracker::default();
        let hazard = b(50, 50, 150, 120);

        tracker.update(&[hazard]);
        for _ in 0..11 {
            tracker.update(&[]);
        }
        assert_eq!(tracker.active_count(), 0);

        let out = tracker.update(&[hazard]);
        assert_eq!(ids(&out), vec![1]);
        assert_eq!(tracker.total_count(), 2);
    }

    #[test]
    fn zero_retirement_drops_after_one_missed_frame() {
        let mut tracker = IdentityTracker::new(TrackerConfig {
            match_iou_threshold: 0.5,
            retirement_frames: 0,
        });

        tracker.update(&[b(0, 0, 10, 10)]);
        tracker.update(&[b(0, 0, 10, 10)]);
        assert_eq!(tracker.total_count(), 1);

        tracker.update(&[]);
        assert_eq!(tracker.active_count(), 0);
    }

    #[test]
    fn total_count_never_decreases() {
        let mut tracker = IdentityTracker::new(TrackerConfig {
            match_iou_threshold: 0.3,
            retirement_frames: 2,
        });

        let frames: Vec<Vec<BBox<Ltrb>>> = vec![
            vec![b(0, 0, 10, 10), b(50, 50, 60, 60)],
            vec![],
            vec![b(1, 1, 11, 11)],
            vec![],
            vec![],
            vec![],
            vec![b(0, 0, 10, 10), b(200, 200, 220, 220), b(50, 50, 60, 60)],
        ];

        let mut seen = HashSet::new();
        let mut last = 0;
        for dets in &frames {
            let out = tracker.update(dets);
            assert!(tracker.total_count() >= last);
            last = tracker.total_count();

            for (id, _) in out {
                assert!(id < tracker.total_count());
                seen.insert(id);
            }
        }

        assert_eq!(seen.len() as u64, tracker.total_count());
    }
}
