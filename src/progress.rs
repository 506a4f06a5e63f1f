use crate::detector::Device;

use serde_derive::Serialize;
use std::fmt;
use std::time::Duration;
use tracing::{error, info};

/// Lifecycle of one pipeline run.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    Opened,
    Running,
    Finalizing,
    Done,
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Opened => "opened",
            PipelineState::Running => "running",
            PipelineState::Finalizing => "finalizing",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };

        f.write_str(name)
    }
}

/// Periodic throughput report.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub frame_index: u64,
    pub total_frames: u64,
    pub percent: f64,
    pub fps: f64,
    pub eta_seconds: f64,
    pub device: Device,
}

impl Progress {
    pub fn new(frame_index: u64, total_frames: u64, elapsed: Duration, device: Device) -> Self {
        let secs = elapsed.as_secs_f64();
        let fps = if secs > 0.0 {
            frame_index as f64 / secs
        } else {
            0.0
        };

        let percent = if total_frames > 0 {
            frame_index as f64 / total_frames as f64 * 100.0
        } else {
            0.0
        };

        let eta_seconds = if fps > 0.0 && total_frames > frame_index {
            (total_frames - frame_index) as f64 / fps
        } else {
            0.0
        };

        Self {
            frame_index,
            total_frames,
            percent,
            fps,
            eta_seconds,
            device,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged {
        from: PipelineState,
        to: PipelineState,
    },
    Progress(Progress),
}

/// Receives lifecycle and progress events from a running pipeline.
pub trait ProgressSink: Send {
    fn observe(&mut self, event: &PipelineEvent);
}

/// Forwards pipeline events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn observe(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::StateChanged {
                to: PipelineState::Failed,
                from,
            } => error!("Pipeline failed while {}", from),
            PipelineEvent::StateChanged { from, to } => info!("Pipeline {} -> {}", from, to),
            PipelineEvent::Progress(p) => info!(
                "Progress: {:.1}% ({}/{}) - {:.1} fps - ETA: {:.0}s - {}",
                p.percent, p.frame_index, p.total_frames, p.fps, p.eta_seconds, p.device
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_eta() {
        let p = Progress::new(100, 400, Duration::from_secs(10), Device::Cpu);

        assert_eq!(p.fps, 10.0);
        assert_eq!(p.percent, 25.0);
        assert_eq!(p.eta_seconds, 30.0);
    }

    #[test]
    fn progress_without_elapsed_time() {
        let p = Progress::new(100, 400, Duration::ZERO, Device::Cuda);

        assert_eq!(p.fps, 0.0);
        assert_eq!(p.eta_seconds, 0.0);
        assert_eq!(p.device, Device::Cuda);
    }

    #[test]
    fn progress_with_unknown_length() {
        let p = Progress::new(300, 0, Duration::from_secs(3), Device::Cpu);

        assert_eq!(p.percent, 0.0);
        assert_eq!(p.eta_seconds, 0.0);
    }

    #[test]
    fn state_names() {
        assert_eq!(PipelineState::Finalizing.to_string(), "finalizing");
        assert_eq!(
            serde_json::to_string(&PipelineState::Done).unwrap(),
            "\"done\""
        );
    }
}
