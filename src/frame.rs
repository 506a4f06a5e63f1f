/// Per-frame snapshot handed to the overlay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStats {
    pub live_count: usize,
    pub unique_count: u64,
    pub distance_km: f64,
    pub frame_index: u64,
    pub total_frames: u64,
    pub source_fps: f64, // may be 0 for broken containers
}

impl FrameStats {
    /// Playback position in seconds, `0.0` when fps is unknown.
    #[inline]
    pub fn elapsed_seconds(&self) -> f64 {
        if self.source_fps > 0.0 {
            self.frame_index as f64 / self.source_fps
        } else {
            0.0
        }
    }

    /// `MM:SS` of the playback position.
    pub fn elapsed_label(&self) -> String {
        let secs = self.elapsed_seconds() as u64;
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(frame_index: u64, source_fps: f64) -> FrameStats {
        FrameStats {
            live_count: 0,
            unique_count: 0,
            distance_km: 0.0,
            frame_index,
            total_frames: 10_000,
            source_fps,
        }
    }

    #[test]
    fn elapsed_label() {
        assert_eq!(stats(0, 30.0).elapsed_label(), "00:00");
        assert_eq!(stats(45, 30.0).elapsed_label(), "00:01");
        assert_eq!(stats(30 * 75, 30.0).elapsed_label(), "01:15");
        assert_eq!(stats(25 * 3600, 25.0).elapsed_label(), "60:00");
    }

    #[test]
    fn zero_fps_stays_at_start() {
        assert_eq!(stats(500, 0.0).elapsed_label(), "00:00");
    }
}
