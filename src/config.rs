use crate::detector::DetectorConfig;
use crate::error::Error;
use crate::tracker::TrackerConfig;

use serde_derive::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// Writer codecs in order of preference.
    pub codecs: Vec<String>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codecs: vec!["avc1".into(), "mp4v".into()],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames between progress events.
    pub progress_interval: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            progress_interval: 100,
        }
    }
}

/// Run settings. Every field has a default so an empty file is valid.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub detector: DetectorConfig,
    pub video: VideoConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;

        content.parse()
    }

    pub fn validate(&self) -> Result<(), Error> {
        let iou = self.tracker.match_iou_threshold;
        if !(iou > 0.0 && iou <= 1.0) {
            return Err(Error::Config(format!(
                "tracker.match_iou_threshold must be in (0, 1], got {}",
                iou
            )));
        }

        if self.detector.input_size <= 0 {
            return Err(Error::Config("detector.input_size must be positive".into()));
        }

        if self.video.codecs.is_empty() {
            return Err(Error::Config("video.codecs is empty".into()));
        }

        if let Some(codec) = self.video.codecs.iter().find(|c| c.chars().count() != 4) {
            return Err(Error::Config(format!(
                "video.codecs: {:?} is not a fourcc",
                codec
            )));
        }

        if self.pipeline.progress_interval == 0 {
            return Err(Error::Config(
                "pipeline.progress_interval must be positive".into(),
            ));
        }

        Ok(())
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s).map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = "".parse().unwrap();

        assert_eq!(config, Config::default());
        assert_eq!(config.tracker.match_iou_threshold, 0.5);
        assert_eq!(config.tracker.retirement_frames, 10);
        assert_eq!(config.video.codecs, vec!["avc1", "mp4v"]);
        assert_eq!(config.pipeline.progress_interval, 100);
        assert_eq!(config.detector.face_min_neighbors, 5);
        assert_eq!(config.detector.plate_scale_factor, 1.1);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = r#"
            [tracker]
            retirement_frames = 30

            [detector]
            model_path = "weights/road.onnx"

            [video]
            codecs = ["mp4v"]
        "#
        .parse()
        .unwrap();

        assert_eq!(config.tracker.retirement_frames, 30);
        assert_eq!(config.tracker.match_iou_threshold, 0.5);
        assert_eq!(config.detector.model_path, PathBuf::from("weights/road.onnx"));
        assert_eq!(config.detector.input_size, 640);
        assert_eq!(config.video.codecs, vec!["mp4v"]);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for toml in [
            "[tracker]\nmatch_iou_threshold = 0.0",
            "[tracker]\nmatch_iou_threshold = 1.5",
            "[video]\ncodecs = []",
            "[video]\ncodecs = [\"h264x\"]",
            "[pipeline]\nprogress_interval = 0",
            "[tracker]\nretirement_frames = \"ten\"",
        ] {
            assert!(
                matches!(toml.parse::<Config>(), Err(Error::Config(_))),
                "accepted {:?}",
                toml
            );
        }
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[pipeline]\nprogress_interval = 25").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.pipeline.progress_interval, 25);
    }

    #[test]
    fn missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let res = Config::from_file(dir.path().join("roadscan.toml"));

        assert!(matches!(res, Err(Error::Config(_))));
    }
}
