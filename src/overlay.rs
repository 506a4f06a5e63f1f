use crate::bbox::{BBox, Ltrb};
use crate::frame::FrameStats;

use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const PANEL: core::Rect = core::Rect {
    x: 10,
    y: 10,
    width: 391,
    height: 141,
};
const PANEL_ALPHA: f64 = 0.6;

const FONT: i32 = imgproc::FONT_HERSHEY_SIMPLEX;
const FONT_SCALE: f64 = 0.6;
const THICKNESS: i32 = 2;

const TEXT_X: i32 = 20;
const FIRST_LINE_Y: i32 = 35;
const LINE_STEP: i32 = 30;

// BGR
mod colors {
    use opencv::core::Scalar;

    pub const BLACK: Scalar = Scalar::new(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Scalar = Scalar::new(255.0, 255.0, 255.0, 0.0);
    pub const RED: Scalar = Scalar::new(0.0, 0.0, 255.0, 0.0);
    pub const YELLOW: Scalar = Scalar::new(0.0, 255.0, 255.0, 0.0);
    pub const GREEN: Scalar = Scalar::new(0.0, 255.0, 0.0, 0.0);
    pub const CYAN: Scalar = Scalar::new(255.0, 255.0, 0.0, 0.0);
}

const HAZARD_THICKNESS: i32 = 3;

/// Draws the statistics panel and the tracked hazard labels.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverlayRenderer;

impl OverlayRenderer {
    /// Semi-transparent panel in the top-left corner with four stat lines.
    pub fn render(&self, frame: &mut Mat, stats: &FrameStats) -> opencv::Result<()> {
        let mut panel = frame.try_clone()?;
        imgproc::rectangle(&mut panel, PANEL, colors::BLACK, -1, imgproc::LINE_8, 0)?;

        let mut blended = Mat::default();
        core::add_weighted(
            &panel,
            PANEL_ALPHA,
            &*frame,
            1.0 - PANEL_ALPHA,
            0.0,
            &mut blended,
            -1,
        )?;
        blended.copy_to(frame)?;

        for (i, (text, color)) in panel_lines(stats).iter().enumerate() {
            imgproc::put_text(
                frame,
                text,
                core::Point::new(TEXT_X, FIRST_LINE_Y + LINE_STEP * i as i32),
                FONT,
                FONT_SCALE,
                *color,
                THICKNESS,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(())
    }

    /// Red box per hazard with a `Pothole #<id>` tag sitting on its top edge.
    pub fn draw_hazards(&self, frame: &mut Mat, hazards: &[(u64, BBox<Ltrb>)]) -> opencv::Result<()> {
        for (identity, bbox) in hazards {
            imgproc::rectangle(
                frame,
                bbox.as_ltwh().into(),
                colors::RED,
                HAZARD_THICKNESS,
                imgproc::LINE_8,
                0,
            )?;

            let label = format!("Pothole #{}", identity);
            let mut baseline = 0;
            let text = imgproc::get_text_size(&label, FONT, FONT_SCALE, THICKNESS, &mut baseline)?;

            imgproc::rectangle(
                frame,
                core::Rect::new(
                    bbox.left(),
                    bbox.top() - text.height - 10,
                    text.width,
                    text.height + 10,
                ),
                colors::RED,
                -1,
                imgproc::LINE_8,
                0,
            )?;

            imgproc::put_text(
                frame,
                &label,
                core::Point::new(bbox.left(), bbox.top() - 5),
                FONT,
                FONT_SCALE,
                colors::WHITE,
                THICKNESS,
                imgproc::LINE_8,
                false,
            )?;
        }

        Ok(())
    }
}

fn panel_lines(stats: &FrameStats) -> [(String, core::Scalar); 4] {
    [
        (
            format!("Potholes (Frame): {}", stats.live_count),
            colors::YELLOW,
        ),
        (format!("Total Unique: {}", stats.unique_count), colors::GREEN),
        (
            format!("Distance: {:.2} km", stats.distance_km),
            colors::CYAN,
        ),
        (format!("Time: {}", stats.elapsed_label()), colors::WHITE),
    ]
}
