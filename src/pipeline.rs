use crate::config::Config;
use crate::detector::{Device, FrameDetectors};
use crate::error::Error;
use crate::frame::FrameStats;
use crate::geo::{route_distance_km, GeoPoint};
use crate::overlay::OverlayRenderer;
use crate::progress::{PipelineEvent, PipelineState, Progress, ProgressSink};
use crate::redact::RegionRedactor;
use crate::tracker::IdentityTracker;
use crate::video::{open_with_fallback, FrameSink, FrameSource, VideoBackend, VideoInfo};

use opencv::core::Mat;
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Writer frame rate when the source does not report one.
const FALLBACK_FPS: f64 = 30.0;

/// Arguments of a single run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub start_point: Option<GeoPoint>,
    pub end_point: Option<GeoPoint>,
    pub confidence_threshold: f32,
    pub prefer_accelerated: bool,
}

impl RunRequest {
    pub fn new<S: Into<PathBuf>, O: Into<PathBuf>>(source_path: S, output_path: O) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: output_path.into(),
            start_point: None,
            end_point: None,
            confidence_threshold: 0.25,
            prefer_accelerated: true,
        }
    }

    pub fn with_route(mut self, start: GeoPoint, end: GeoPoint) -> Self {
        self.start_point = Some(start);
        self.end_point = Some(end);
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        let conf = self.confidence_threshold;
        if !(conf > 0.0 && conf <= 1.0) {
            return Err(Error::Config(format!(
                "confidence threshold must be in (0, 1], got {}",
                conf
            )));
        }

        if self.start_point.is_some() != self.end_point.is_some() {
            return Err(Error::Config(
                "route needs both a start and an end point".into(),
            ));
        }

        Ok(())
    }
}

/// Whole-video result, produced once when a run completes.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub total_potholes: u64,
    pub distance_km: f64,
    pub duration_seconds: f64,
    pub total_frames: u64,
    pub output_path: PathBuf,
    pub processing_time: f64,
    pub processing_fps: f64,
    pub device_used: Device,
}

impl RunStatistics {
    /// Video duration over processing time, `0.0` when nothing was timed.
    #[inline]
    pub fn realtime_factor(&self) -> f64 {
        if self.processing_time > 0.0 {
            self.duration_seconds / self.processing_time
        } else {
            0.0
        }
    }
}

struct Lifecycle {
    state: PipelineState,
    observer: Box<dyn ProgressSink>,
}

impl Lifecycle {
    fn advance(&mut self, to: PipelineState) {
        let from = std::mem::replace(&mut self.state, to);
        self.observer
            .observe(&PipelineEvent::StateChanged { from, to });
    }

    fn report(&mut self, progress: Progress) {
        self.observer.observe(&PipelineEvent::Progress(progress));
    }
}

/// What the frame loop leaves behind for finalization.
#[derive(Debug, Clone, Copy)]
struct Tally {
    info: VideoInfo,
    frames_read: u64,
    unique_hazards: u64,
    device: Device,
}

/// Builds the detectors once the source is known to be readable.
pub type DetectorLoader = Box<dyn FnOnce() -> Result<FrameDetectors, Error> + Send>;

/// Runs one video through detection, tracking, redaction and overlay.
///
/// A pipeline is consumed by [`VideoPipeline::run`]; the tracker inside it
/// never outlives the video it was created for.
pub struct VideoPipeline {
    config: Config,
    backend: Box<dyn VideoBackend>,
    loader: Option<DetectorLoader>,
    lifecycle: Lifecycle,
    redactor: RegionRedactor,
    overlay: OverlayRenderer,
}

impl VideoPipeline {
    pub fn new(
        config: Config,
        backend: Box<dyn VideoBackend>,
        detectors: FrameDetectors,
        observer: Box<dyn ProgressSink>,
    ) -> Self {
        Self::with_loader(config, backend, Box::new(move || Ok::<_, Error>(detectors)), observer)
    }

    /// Like [`VideoPipeline::new`], but the detectors are only built after the
    /// source opened, so a missing model is reported as a failed run.
    pub fn with_loader(
        config: Config,
        backend: Box<dyn VideoBackend>,
        loader: DetectorLoader,
        observer: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            config,
            backend,
            loader: Some(loader),
            lifecycle: Lifecycle {
                state: PipelineState::Idle,
                observer,
            },
            redactor: RegionRedactor::default(),
            overlay: OverlayRenderer,
        }
    }

    pub fn run(mut self, request: &RunRequest) -> Result<RunStatistics, Error> {
        let started = Instant::now();
        info!(
            "Processing {} -> {}",
            request.source_path.display(),
            request.output_path.display()
        );

        let result = self.execute(request, started);

        match result {
            Ok(tally) => {
                let stats = finalize(&tally, request, tally.device, started.elapsed());
                self.lifecycle.advance(PipelineState::Done);

                info!(
                    "Done: {} unique potholes, {} frames in {:.1}s ({:.1} fps, {:.1}x real-time)",
                    stats.total_potholes,
                    stats.total_frames,
                    stats.processing_time,
                    stats.processing_fps,
                    stats.realtime_factor()
                );

                Ok(stats)
            }
            Err(err) => {
                self.lifecycle.advance(PipelineState::Failed);
                Err(err)
            }
        }
    }

    fn execute(&mut self, request: &RunRequest, started: Instant) -> Result<Tally, Error> {
        self.config.validate()?;
        request.validate()?;

        let mut source = self.backend.open_source(&request.source_path)?;
        self.lifecycle.advance(PipelineState::Opened);

        let loaded = match self.loader.take() {
            Some(load) => load(),
            None => Err(Error::DetectorUnavailable("detectors already consumed".into())),
        };
        let mut detectors = match loaded {
            Ok(detectors) => detectors,
            Err(err) => {
                source.release();
                return Err(err);
            }
        };

        let info = source.info();
        let fps = if info.fps > 0.0 { info.fps } else { FALLBACK_FPS };

        let (mut sink, codec) = match open_with_fallback(
            self.backend.as_mut(),
            &request.output_path,
            &self.config.video.codecs,
            fps,
            info.size(),
        ) {
            Ok(opened) => opened,
            Err(err) => {
                source.release();
                detectors.release();
                return Err(err);
            }
        };
        info!("Writing {} ({})", request.output_path.display(), codec);

        self.lifecycle.advance(PipelineState::Running);
        let looped = self.process_frames(
            &mut detectors,
            source.as_mut(),
            sink.as_mut(),
            info,
            request,
            started,
        );

        source.release();
        sink.release();
        let device = detectors.device();
        detectors.release();

        let (frames_read, unique_hazards) = looped?;
        self.lifecycle.advance(PipelineState::Finalizing);

        Ok(Tally {
            info,
            frames_read,
            unique_hazards,
            device,
        })
    }

    fn process_frames(
        &mut self,
        detectors: &mut FrameDetectors,
        source: &mut dyn FrameSource,
        sink: &mut dyn FrameSink,
        info: VideoInfo,
        request: &RunRequest,
        started: Instant,
    ) -> Result<(u64, u64), Error> {
        let device = detectors.device();
        info!("Using device: {}", device);
        detectors.warm_up()?;

        let mut tracker = IdentityTracker::new(self.config.tracker);
        let distance_km = route_distance_km(request.start_point, request.end_point);
        let interval = self.config.pipeline.progress_interval.max(1);

        let mut frame = Mat::default();
        let mut frame_index = 0u64;

        while source.read(&mut frame)? {
            frame_index += 1;

            let hazards = detectors.detect_hazards(&frame, request.confidence_threshold)?;
            let regions = detectors.detect_privacy_regions(&frame)?;

            let visible = tracker.update(&hazards);
            debug!(
                "frame {}: {} hazards, {} tracked, {} redacted",
                frame_index,
                visible.len(),
                tracker.active_count(),
                regions.len()
            );

            if let Err(err) = self.overlay.draw_hazards(&mut frame, &visible) {
                warn!("frame {}: failed to draw hazards: {}", frame_index, err);
            }

            if let Err(err) = self.redactor.redact(&mut frame, &regions) {
                warn!("frame {}: failed to redact: {}", frame_index, err);
            }

            let stats = FrameStats {
                live_count: visible.len(),
                unique_count: tracker.total_count(),
                distance_km,
                frame_index,
                total_frames: info.frame_count,
                source_fps: info.fps,
            };

            if let Err(err) = self.overlay.render(&mut frame, &stats) {
                warn!("frame {}: failed to draw overlay: {}", frame_index, err);
            }

            sink.write(&frame)?;

            if frame_index % interval == 0 {
                self.lifecycle.report(Progress::new(
                    frame_index,
                    info.frame_count,
                    started.elapsed(),
                    device,
                ));
            }
        }

        Ok((frame_index, tracker.total_count()))
    }
}

fn finalize(tally: &Tally, request: &RunRequest, device: Device, elapsed: Duration) -> RunStatistics {
    let total_frames = if tally.info.frame_count > 0 {
        tally.info.frame_count
    } else {
        tally.frames_read
    };

    let processing_time = elapsed.as_secs_f64();
    let processing_fps = if processing_time > 0.0 {
        tally.frames_read as f64 / processing_time
    } else {
        0.0
    };

    let duration_seconds = if tally.info.fps > 0.0 {
        total_frames as f64 / tally.info.fps
    } else {
        0.0
    };

    RunStatistics {
        total_potholes: tally.unique_hazards,
        distance_km: route_distance_km(request.start_point, request.end_point),
        duration_seconds,
        total_frames,
        output_path: request.output_path.clone(),
        processing_time,
        processing_fps,
        device_used: device,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(frame_count: u64, fps: f64, frames_read: u64) -> Tally {
        Tally {
            info: VideoInfo {
                width: 640,
                height: 480,
                fps,
                frame_count,
            },
            frames_read,
            unique_hazards: 3,
            device: Device::Cpu,
        }
    }

    fn request() -> RunRequest {
        RunRequest::new("in.mp4", "out/in.mp4")
    }

    #[test]
    fn statistics_from_tally() {
        let stats = finalize(
            &tally(300, 30.0, 300),
            &request(),
            Device::Cpu,
            Duration::from_secs(5),
        );

        assert_eq!(stats.total_potholes, 3);
        assert_eq!(stats.total_frames, 300);
        assert_eq!(stats.duration_seconds, 10.0);
        assert_eq!(stats.processing_fps, 60.0);
        assert_eq!(stats.realtime_factor(), 2.0);
        assert_eq!(stats.distance_km, 0.0);
        assert_eq!(stats.output_path, PathBuf::from("out/in.mp4"));
    }

    #[test]
    fn unreported_frame_count_uses_frames_read() {
        let stats = finalize(&tally(0, 25.0, 50), &request(), Device::Cpu, Duration::from_secs(1));

        assert_eq!(stats.total_frames, 50);
        assert_eq!(stats.duration_seconds, 2.0);
    }

    #[test]
    fn zero_fps_and_zero_time_do_not_divide() {
        let stats = finalize(&tally(100, 0.0, 100), &request(), Device::Cpu, Duration::ZERO);

        assert_eq!(stats.duration_seconds, 0.0);
        assert_eq!(stats.processing_fps, 0.0);
        assert_eq!(stats.realtime_factor(), 0.0);
    }

    #[test]
    fn route_distance_is_reported() {
        let req = request().with_route(GeoPoint::new(0.0, 0.0), GeoPoint::new(0.0, 1.0));
        let stats = finalize(&tally(10, 10.0, 10), &req, Device::Cuda, Duration::from_secs(1));

        assert!((stats.distance_km - 111.19).abs() < 0.01);
        assert_eq!(stats.device_used, Device::Cuda);
    }

    #[test]
    fn statistics_serialize_with_service_field_names() {
        let stats = finalize(&tally(10, 10.0, 10), &request(), Device::Cuda, Duration::from_secs(1));
        let json = serde_json::to_value(&stats).unwrap();

        for key in [
            "total_potholes",
            "distance_km",
            "duration_seconds",
            "total_frames",
            "output_path",
            "processing_time",
            "processing_fps",
            "device_used",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["device_used"], "cuda");
    }

    #[test]
    fn request_validation() {
        assert!(request().validate().is_ok());

        let mut req = request();
        req.confidence_threshold = 0.0;
        assert!(matches!(req.validate(), Err(Error::Config(_))));

        let mut req = request();
        req.confidence_threshold = 1.0;
        assert!(req.validate().is_ok());

        let mut req = request();
        req.start_point = Some(GeoPoint::new(10.0, 10.0));
        assert!(matches!(req.validate(), Err(Error::Config(_))));
    }
}
