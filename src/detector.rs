use crate::bbox::{BBox, Ltrb, Ltwh};
use crate::detection::{non_maximum_suppression, Detection};
use crate::error::Error;

use ndarray::prelude::*;
use opencv::{
    core::{self, Mat},
    imgproc, objdetect,
    prelude::*,
};
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const LETTERBOX_FILL: f32 = 114.0 / 255.0;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    #[inline]
    pub fn is_accelerated(&self) -> bool {
        matches!(self, Device::Cuda)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => f.write_str("cuda"),
            Device::Cpu => f.write_str("cpu"),
        }
    }
}

/// Finds hazards in a BGR frame.
pub trait HazardDetector: Send {
    fn detect(&mut self, frame: &Mat, confidence_threshold: f32) -> Result<Vec<Detection>, Error>;

    fn device(&self) -> Device {
        Device::Cpu
    }
}

/// Finds regions to redact (faces, plates) in a BGR frame.
pub trait PrivacyDetector: Send {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<BBox<Ltwh>>, Error>;
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    pub input_size: i32,
    pub nms_iou_threshold: f32,
    pub face_cascade: PathBuf,
    pub face_scale_factor: f64,
    pub face_min_neighbors: i32,
    pub plate_cascade: PathBuf,
    pub plate_scale_factor: f64,
    pub plate_min_neighbors: i32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("model/best.onnx"),
            input_size: 640,
            nms_iou_threshold: 0.45,
            face_cascade: PathBuf::from("model/haarcascade_frontalface_default.xml"),
            face_scale_factor: 1.3,
            face_min_neighbors: 5,
            plate_cascade: PathBuf::from("model/haarcascade_russian_plate_number.xml"),
            plate_scale_factor: 1.1,
            plate_min_neighbors: 4,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    frame_width: i32,
    frame_height: i32,
}

/// YOLOv8 ONNX model executed by onnxruntime.
pub struct YoloDetector {
    session: Session,
    device: Device,
    input_size: i32,
    nms_iou_threshold: f32,
}

impl YoloDetector {
    /// Loads the model, trying CUDA first when `prefer_accelerated` is set.
    pub fn new(
        model_path: &Path,
        input_size: i32,
        nms_iou_threshold: f32,
        prefer_accelerated: bool,
    ) -> Result<Self, Error> {
        if !model_path.is_file() {
            return Err(Error::DetectorUnavailable(format!(
                "model missing at {}",
                model_path.display()
            )));
        }

        info!("Loading hazard model: {}", model_path.display());

        let accelerated = if prefer_accelerated {
            match Self::session(model_path, Device::Cuda) {
                Ok(session) => Some(session),
                Err(err) => {
                    warn!("CUDA unavailable, falling back to CPU: {}", err);
                    None
                }
            }
        } else {
            None
        };

        let (session, device) = match accelerated {
            Some(session) => (session, Device::Cuda),
            None => (Self::session(model_path, Device::Cpu)?, Device::Cpu),
        };

        info!("Hazard detector ready on {}", device);

        Ok(Self {
            session,
            device,
            input_size,
            nms_iou_threshold,
        })
    }

    fn session(model_path: &Path, device: Device) -> Result<Session, Error> {
        let provider = match device {
            Device::Cuda => CUDAExecutionProvider::default()
                .with_device_id(0)
                .build()
                .error_on_failure(),
            Device::Cpu => CPUExecutionProvider::default().build(),
        };

        Session::builder()
            .map_err(Error::detector)?
            .with_execution_providers([provider])
            .map_err(Error::detector)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(Error::detector)?
            .commit_from_file(model_path)
            .map_err(Error::detector)
    }

    fn preprocess(&self, frame: &Mat) -> Result<(Array4<f32>, Letterbox), Error> {
        ensure_bgr8(frame)?;

        let size = self.input_size;
        let (fw, fh) = (frame.cols(), frame.rows());
        let scale = (size as f32 / fw as f32).min(size as f32 / fh as f32);
        let sw = ((fw as f32 * scale).round() as i32).clamp(1, size);
        let sh = ((fh as f32 * scale).round() as i32).clamp(1, size);
        let pad_x = (size - sw) / 2;
        let pad_y = (size - sh) / 2;

        let mut resized = Mat::default();
        imgproc::resize(
            frame,
            &mut resized,
            core::Size::new(sw, sh),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(Error::detector)?;

        let data = resized.data_bytes().map_err(Error::detector)?;
        let n = size as usize;
        let mut input = Array4::from_elem((1, 3, n, n), LETTERBOX_FILL);

        for y in 0..sh as usize {
            let row = &data[y * sw as usize * 3..(y + 1) * sw as usize * 3];
            let dy = y + pad_y as usize;

            for (x, px) in row.chunks_exact(3).enumerate() {
                let dx = x + pad_x as usize;

                // BGR -> RGB
                input[[0, 0, dy, dx]] = px[2] as f32 / 255.0;
                input[[0, 1, dy, dx]] = px[1] as f32 / 255.0;
                input[[0, 2, dy, dx]] = px[0] as f32 / 255.0;
            }
        }

        let letterbox = Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            frame_width: fw,
            frame_height: fh,
        };

        Ok((input, letterbox))
    }

    fn infer(&mut self, input: Array4<f32>) -> Result<Array3<f32>, Error> {
        let tensor = Tensor::from_array(input).map_err(Error::detector)?;
        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .map_err(Error::detector)?;

        let preds = outputs[0]
            .try_extract_array::<f32>()
            .map_err(Error::detector)?
            .into_dimensionality::<Ix3>()
            .map_err(Error::detector)?
            .to_owned();

        Ok(preds)
    }
}

/// Decodes a `[1, 4 + classes, anchors]` YOLOv8 head (or its transpose).
fn postprocess(
    preds: ArrayView3<'_, f32>,
    letterbox: Letterbox,
    confidence_threshold: f32,
    nms_iou_threshold: f32,
) -> Vec<Detection> {
    let batch = preds.index_axis(Axis(0), 0);
    let rows = if batch.shape()[0] < batch.shape()[1] {
        batch.reversed_axes()
    } else {
        batch
    };

    if rows.shape()[1] <= 4 {
        return Vec::new();
    }

    let fw = letterbox.frame_width as f32;
    let fh = letterbox.frame_height as f32;
    let mut dets = Vec::new();

    for row in rows.outer_iter() {
        let mut class = -1;
        let mut confidence = 0.0;

        for (idx, val) in row.slice(s![4..]).iter().copied().enumerate() {
            if val > confidence {
                class = idx as i32;
                confidence = val;
            }
        }

        if class < 0 || confidence < confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        let unbox_x = |v: f32| ((v - letterbox.pad_x) / letterbox.scale).clamp(0.0, fw);
        let unbox_y = |v: f32| ((v - letterbox.pad_y) / letterbox.scale).clamp(0.0, fh);

        dets.push(Detection::new(
            unbox_x(cx - w / 2.0),
            unbox_y(cy - h / 2.0),
            unbox_x(cx + w / 2.0),
            unbox_y(cy + h / 2.0),
            confidence,
            class,
        ));
    }

    non_maximum_suppression(dets, nms_iou_threshold)
}

/// The letterbox reads three `u8` per pixel, anything else would be misread.
fn ensure_bgr8(frame: &Mat) -> Result<(), Error> {
    if frame.typ() != core::CV_8UC3 {
        return Err(Error::DetectorUnavailable(format!(
            "expected an 8-bit 3-channel frame, got type {} with {} channels",
            frame.typ(),
            frame.channels()
        )));
    }

    Ok(())
}

impl HazardDetector for YoloDetector {
    fn detect(&mut self, frame: &Mat, confidence_threshold: f32) -> Result<Vec<Detection>, Error> {
        let (input, letterbox) = self.preprocess(frame)?;
        let preds = self.infer(input)?;

        Ok(postprocess(
            preds.view(),
            letterbox,
            confidence_threshold,
            self.nms_iou_threshold,
        ))
    }

    #[inline]
    fn device(&self) -> Device {
        self.device
    }
}

/// Haar cascade over the grayscale frame.
pub struct CascadeDetector {
    classifier: objdetect::CascadeClassifier,
    scale_factor: f64,
    min_neighbors: i32,
    gray: Mat,
}

impl CascadeDetector {
    pub fn new(path: &Path, scale_factor: f64, min_neighbors: i32) -> Result<Self, Error> {
        if !path.is_file() {
            return Err(Error::DetectorUnavailable(format!(
                "cascade missing at {}",
                path.display()
            )));
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| Error::DetectorUnavailable(format!("bad path {}", path.display())))?;

        let classifier = objdetect::CascadeClassifier::new(path_str).map_err(Error::detector)?;
        if classifier.empty().map_err(Error::detector)? {
            return Err(Error::DetectorUnavailable(format!(
                "cascade {} failed to load",
                path.display()
            )));
        }

        Ok(Self {
            classifier,
            scale_factor,
            min_neighbors,
            gray: Mat::default(),
        })
    }
}

impl PrivacyDetector for CascadeDetector {
    fn detect(&mut self, frame: &Mat) -> Result<Vec<BBox<Ltwh>>, Error> {
        if frame.channels() == 1 {
            frame.copy_to(&mut self.gray).map_err(Error::detector)?;
        } else {
            imgproc::cvt_color(frame, &mut self.gray, imgproc::COLOR_BGR2GRAY, 0)
                .map_err(Error::detector)?;
        }

        let mut rects = core::Vector::<core::Rect>::new();
        self.classifier
            .detect_multi_scale(
                &self.gray,
                &mut rects,
                self.scale_factor,
                self.min_neighbors,
                0,
                core::Size::default(),
                core::Size::default(),
            )
            .map_err(Error::detector)?;

        Ok(rects.iter().map(BBox::from).collect())
    }
}

/// The detectors one run needs, bound to a single compute device.
pub struct FrameDetectors {
    hazard: Box<dyn HazardDetector>,
    privacy: Vec<Box<dyn PrivacyDetector>>,
    warmup_size: i32,
}

impl FrameDetectors {
    pub fn new(hazard: Box<dyn HazardDetector>, privacy: Vec<Box<dyn PrivacyDetector>>) -> Self {
        Self {
            hazard,
            privacy,
            warmup_size: 640,
        }
    }

    /// YOLO hazard model plus face and plate cascades.
    pub fn from_config(config: &DetectorConfig, prefer_accelerated: bool) -> Result<Self, Error> {
        let hazard = YoloDetector::new(
            &config.model_path,
            config.input_size,
            config.nms_iou_threshold,
            prefer_accelerated,
        )?;

        let faces = CascadeDetector::new(
            &config.face_cascade,
            config.face_scale_factor,
            config.face_min_neighbors,
        )?;
        let plates = CascadeDetector::new(
            &config.plate_cascade,
            config.plate_scale_factor,
            config.plate_min_neighbors,
        )?;

        let mut detectors = Self::new(Box::new(hazard), vec![Box::new(faces), Box::new(plates)]);
        detectors.warmup_size = config.input_size;

        Ok(detectors)
    }

    #[inline]
    pub fn device(&self) -> Device {
        self.hazard.device()
    }

    /// One inference on a blank frame so device setup is not billed to frame one.
    pub fn warm_up(&mut self) -> Result<(), Error> {
        if !self.device().is_accelerated() {
            return Ok(());
        }

        info!("Warming up {}", self.device());

        let blank = Mat::new_rows_cols_with_default(
            self.warmup_size,
            self.warmup_size,
            core::CV_8UC3,
            core::Scalar::all(0.0),
        )
        .map_err(Error::detector)?;

        self.hazard.detect(&blank, 1.0)?;
        info!("{} ready", self.device());

        Ok(())
    }

    pub fn detect_hazards(
        &mut self,
        frame: &Mat,
        confidence_threshold: f32,
    ) -> Result<Vec<BBox<Ltrb>>, Error> {
        let (fw, fh) = (frame.cols(), frame.rows());
        let boxes: Vec<_> = self
            .hazard
            .detect(frame, confidence_threshold)?
            .iter()
            .filter_map(|det| det.bbox(fw, fh))
            .collect();

        debug!("{} hazards", boxes.len());
        Ok(boxes)
    }

    /// Faces and plates, each detector run independently and concatenated.
    pub fn detect_privacy_regions(&mut self, frame: &Mat) -> Result<Vec<BBox<Ltwh>>, Error> {
        let mut regions = Vec::new();
        for detector in self.privacy.iter_mut() {
            regions.extend(detector.detect(frame)?);
        }

        debug!("{} privacy regions", regions.len());
        Ok(regions)
    }

    /// Drops the models, returning any device memory they held.
    pub fn release(self) {
        let device = self.device();
        drop(self);

        if device.is_accelerated() {
            info!("Released {} detector memory", device);
        }
    }
}
