pub mod bbox;
pub mod config;
pub mod detection;
pub mod detector;
pub mod error;
pub mod frame;
pub mod geo;
pub mod overlay;
pub mod pipeline;
pub mod progress;
pub mod redact;
pub mod tracker;
pub mod video;

mod track;

pub use config::Config;
pub use detection::Detection;
pub use error::Error;
pub use frame::FrameStats;
pub use geo::GeoPoint;
pub use pipeline::{DetectorLoader, RunRequest, RunStatistics, VideoPipeline};
pub use track::TrackedObject;

use detector::FrameDetectors;
use progress::TracingSink;
use video::OpenCvBackend;

/// Processes one video file with the OpenCV backend and the configured models.
///
/// Progress goes to `tracing`. The returned statistics are the only output
/// besides the annotated video at `request.output_path`. Models are loaded
/// after the source opens, so an unreadable source is reported first.
pub fn run(request: &RunRequest, config: &Config) -> Result<RunStatistics, Error> {
    let detector_config = config.detector.clone();
    let prefer_accelerated = request.prefer_accelerated;

    VideoPipeline::with_loader(
        config.clone(),
        Box::new(OpenCvBackend),
        Box::new(move || FrameDetectors::from_config(&detector_config, prefer_accelerated)),
        Box::new(TracingSink),
    )
    .run(request)
}
