use crate::bbox::{BBox, Ltrb};

#[derive(Debug, Clone)]
pub struct TrackedObject {
    pub identity: u64,
    pub last_box: BBox<Ltrb>,

    // consecutive frames without a matching detection
    pub frames_since_seen: u32,
}

impl TrackedObject {
    #[inline]
    pub fn new(identity: u64, bbox: BBox<Ltrb>) -> Self {
        Self {
            identity,
            last_box: bbox,
            frames_since_seen: 0,
        }
    }

    #[inline]
    pub fn refresh(&mut self, bbox: BBox<Ltrb>) {
        self.last_box = bbox;
        self.frames_since_seen = 0;
    }
}
