use crate::bbox::{BBox, Ltrb};

/// Raw detector output: corners in source frame pixels plus score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    pub class: i32,
}

impl Detection {
    #[inline]
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32, class: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
            class,
        }
    }

    #[inline(always)]
    pub fn w(&self) -> f32 {
        self.xmax - self.xmin
    }

    #[inline(always)]
    pub fn h(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let i_xmin = self.xmin.max(other.xmin);
        let i_xmax = self.xmax.min(other.xmax);
        let i_ymin = self.ymin.max(other.ymin);
        let i_ymax = self.ymax.min(other.ymax);
        let i_area = (i_xmax - i_xmin).max(0.) * (i_ymax - i_ymin).max(0.);

        let union = self.w().max(0.) * self.h().max(0.) + other.w().max(0.) * other.h().max(0.)
            - i_area;

        if union <= 0.0 {
            0.0
        } else {
            i_area / union
        }
    }

    /// Integer box clamped to a `fw`x`fh` frame, `None` if nothing valid remains.
    pub fn bbox(&self, fw: i32, fh: i32) -> Option<BBox<Ltrb>> {
        let clamp_x = |v: f32| (v as i32).clamp(0, fw);
        let clamp_y = |v: f32| (v as i32).clamp(0, fh);

        let bbox = BBox::ltrb(
            clamp_x(self.xmin),
            clamp_y(self.ymin),
            clamp_x(self.xmax),
            clamp_y(self.ymax),
        );

        if bbox.is_valid() {
            Some(bbox)
        } else {
            None
        }
    }
}

/// Greedy class-agnostic non-maximum suppression, keeps higher scores first.
pub fn non_maximum_suppression(mut dets: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    dets.sort_unstable_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::with_capacity(dets.len());
    for det in dets {
        if keep.iter().all(|k| k.iou(&det) <= iou_threshold) {
            keep.push(det);
        }
    }

    keep
}
