use crate::error::Error;

use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use serde_derive::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Container properties as reported when the source was opened.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: i32,
    pub height: i32,
    pub fps: f64,
    pub frame_count: u64,
}

impl VideoInfo {
    #[inline]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

/// Sequential frame reader.
pub trait FrameSource: Send {
    fn info(&self) -> VideoInfo;

    /// Reads the next frame into `frame`, `Ok(false)` at end of stream.
    fn read(&mut self, frame: &mut Mat) -> Result<bool, Error>;

    /// Closes the stream. Calling it twice is a no-op.
    fn release(&mut self);
}

/// Sequential frame writer.
pub trait FrameSink: Send {
    fn write(&mut self, frame: &Mat) -> Result<(), Error>;

    /// Flushes and closes the container. Calling it twice is a no-op.
    fn release(&mut self);
}

/// Opens the streams a run reads from and writes to.
pub trait VideoBackend: Send {
    fn open_source(&mut self, path: &Path) -> Result<Box<dyn FrameSource>, Error>;

    fn open_sink(
        &mut self,
        path: &Path,
        codec: &str,
        fps: f64,
        size: Size,
    ) -> Result<Box<dyn FrameSink>, Error>;
}

/// Tries each codec in order and returns the first writer that opens, with its codec.
///
/// The parent directory of `path` is created first.
pub fn open_with_fallback(
    backend: &mut dyn VideoBackend,
    path: &Path,
    codecs: &[String],
    fps: f64,
    size: Size,
) -> Result<(Box<dyn FrameSink>, String), Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|err| {
            Error::OutputUnwritable(format!("{}: {}", parent.display(), err))
        })?;
    }

    for (i, codec) in codecs.iter().enumerate() {
        match backend.open_sink(path, codec, fps, size) {
            Ok(sink) => {
                if i > 0 {
                    warn!("Writing {} with fallback codec {}", path.display(), codec);
                }

                return Ok((sink, codec.clone()));
            }
            Err(err) => warn!("Codec {} unavailable: {}", codec, err),
        }
    }

    Err(Error::OutputUnwritable(format!(
        "{}: no usable codec in [{}]",
        path.display(),
        codecs.join(", ")
    )))
}

/// FOURCC code of a four character codec name such as `mp4v`.
pub fn fourcc(codec: &str) -> Result<i32, Error> {
    let chars: Vec<char> = codec.chars().collect();
    match chars.as_slice() {
        [a, b, c, d] => VideoWriter::fourcc(*a, *b, *c, *d)
            .map_err(|err| Error::OutputUnwritable(err.to_string())),
        _ => Err(Error::OutputUnwritable(format!(
            "codec {:?} is not a fourcc",
            codec
        ))),
    }
}

/// Video container access through OpenCV's videoio.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCvBackend;

impl VideoBackend for OpenCvBackend {
    fn open_source(&mut self, path: &Path) -> Result<Box<dyn FrameSource>, Error> {
        Ok(Box::new(OpenCvSource::open(path)?))
    }

    fn open_sink(
        &mut self,
        path: &Path,
        codec: &str,
        fps: f64,
        size: Size,
    ) -> Result<Box<dyn FrameSink>, Error> {
        Ok(Box::new(OpenCvSink::open(path, codec, fps, size)?))
    }
}

pub struct OpenCvSource {
    cap: VideoCapture,
    info: VideoInfo,
    released: bool,
}

impl OpenCvSource {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let unreadable = |msg: String| Error::SourceUnreadable(format!("{}: {}", path.display(), msg));

        if !path.is_file() {
            return Err(unreadable("no such file".into()));
        }

        let name = path
            .to_str()
            .ok_or_else(|| unreadable("path is not valid UTF-8".into()))?;

        let cap = VideoCapture::from_file(name, videoio::CAP_ANY)
            .map_err(|err| unreadable(err.to_string()))?;

        if !cap.is_opened().map_err(|err| unreadable(err.to_string()))? {
            return Err(unreadable("container could not be opened".into()));
        }

        let prop = |id| cap.get(id).map_err(|err| unreadable(err.to_string()));
        let info = VideoInfo {
            width: prop(videoio::CAP_PROP_FRAME_WIDTH)? as i32,
            height: prop(videoio::CAP_PROP_FRAME_HEIGHT)? as i32,
            fps: prop(videoio::CAP_PROP_FPS)?,
            frame_count: prop(videoio::CAP_PROP_FRAME_COUNT)?.max(0.0) as u64,
        };

        info!(
            "Video properties: {}x{} @ {:.1} FPS, {} frames",
            info.width, info.height, info.fps, info.frame_count
        );

        Ok(Self {
            cap,
            info,
            released: false,
        })
    }
}

impl FrameSource for OpenCvSource {
    #[inline]
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read(&mut self, frame: &mut Mat) -> Result<bool, Error> {
        if self.released {
            return Ok(false);
        }

        let ok = self
            .cap
            .read(frame)
            .map_err(|err| Error::SourceUnreadable(err.to_string()))?;

        Ok(ok && !frame.empty())
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        if let Err(err) = self.cap.release() {
            warn!("Failed to release video source: {}", err);
        }
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct OpenCvSink {
    writer: VideoWriter,
    released: bool,
}

impl OpenCvSink {
    pub fn open(path: &Path, codec: &str, fps: f64, size: Size) -> Result<Self, Error> {
        let unwritable =
            |msg: String| Error::OutputUnwritable(format!("{} ({}): {}", path.display(), codec, msg));

        let name = path
            .to_str()
            .ok_or_else(|| unwritable("path is not valid UTF-8".into()))?;

        let writer = VideoWriter::new(name, fourcc(codec)?, fps, size, true)
            .map_err(|err| unwritable(err.to_string()))?;

        if !writer.is_opened().map_err(|err| unwritable(err.to_string()))? {
            return Err(unwritable("writer did not open".into()));
        }

        Ok(Self {
            writer,
            released: false,
        })
    }
}

impl FrameSink for OpenCvSink {
    fn write(&mut self, frame: &Mat) -> Result<(), Error> {
        self.writer
            .write(frame)
            .map_err(|err| Error::OutputUnwritable(err.to_string()))
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }

        if let Err(err) = self.writer.release() {
            warn!("Failed to release video writer: {}", err);
        }
    }
}

impl Drop for OpenCvSink {
    fn drop(&mut self) {
        self.release();
    }
}
