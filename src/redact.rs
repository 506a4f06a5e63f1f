use crate::bbox::{BBox, Ltwh};

use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

/// Regions are squeezed to at most this many cells per side before blurring.
const PIXEL_CELLS: i32 = 8;

/// Pixelates then blurs rectangular regions so faces and plates cannot be read back.
#[derive(Debug, Clone, Copy)]
pub struct RegionRedactor {
    cells: i32,
}

impl Default for RegionRedactor {
    fn default() -> Self {
        Self { cells: PIXEL_CELLS }
    }
}

impl RegionRedactor {
    pub fn new(cells: i32) -> Self {
        Self {
            cells: cells.max(1),
        }
    }

    /// Redacts every region in place. Empty or off-frame regions are skipped.
    pub fn redact(&self, frame: &mut Mat, regions: &[BBox<Ltwh>]) -> opencv::Result<()> {
        let (cols, rows) = (frame.cols(), frame.rows());

        for region in regions {
            if let Some(region) = region.clip(cols, rows) {
                self.redact_region(frame, region)?;
            }
        }

        Ok(())
    }

    fn redact_region(&self, frame: &mut Mat, region: BBox<Ltwh>) -> opencv::Result<()> {
        let rect: core::Rect = region.into();
        let size = core::Size::new(region.width(), region.height());

        let mut small = Mat::default();
        {
            let roi = Mat::roi(frame, rect)?;
            let cells = core::Size::new(
                region.width().min(self.cells),
                region.height().min(self.cells),
            );
            imgproc::resize(&roi, &mut small, cells, 0.0, 0.0, imgproc::INTER_AREA)?;
        }

        let mut coarse = Mat::default();
        imgproc::resize(&small, &mut coarse, size, 0.0, 0.0, imgproc::INTER_NEAREST)?;

        let k = kernel_size(region.width().min(region.height()));
        let mut blurred = Mat::default();
        imgproc::gaussian_blur(
            &coarse,
            &mut blurred,
            core::Size::new(k, k),
            0.0,
            0.0,
            core::BORDER_REPLICATE,
        )?;

        let mut dst = Mat::roi_mut(frame, rect)?;
        blurred.copy_to(&mut dst)?;

        Ok(())
    }
}

// odd, at least 3, about half the short side
#[inline]
fn kernel_size(short_side: i32) -> i32 {
    (short_side / 2).max(3) | 1
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(size: i32) -> Mat {
        let mut frame =
            Mat::new_rows_cols_with_default(size, size, core::CV_8UC3, core::Scalar::all(0.0))
                .unwrap();

        for y in 0..size {
            for x in 0..size {
                if (x + y) % 2 == 0 {
                    *frame.at_2d_mut::<core::Vec3b>(y, x).unwrap() = core::Vec3b::all(255);
                }
            }
        }

        frame
    }

    fn pixel(frame: &Mat, x: i32, y: i32) -> [u8; 3] {
        frame.at_2d::<core::Vec3b>(y, x).unwrap().0
    }

    #[test]
    fn region_loses_detail() {
        let mut frame = checkerboard(64);
        RegionRedactor::default()
            .redact(&mut frame, &[BBox::ltwh(16, 16, 32, 32)])
            .unwrap();

        // neighbouring checker pixels used to differ by 255
        for y in 20..44 {
            for x in 20..43 {
                let a = pixel(&frame, x, y)[0] as i32;
                let b = pixel(&frame, x + 1, y)[0] as i32;
                assert!((a - b).abs() < 64, "edge kept at ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn outside_region_is_untouched() {
        let mut frame = checkerboard(64);
        let before = frame.try_clone().unwrap();

        RegionRedactor::default()
            .redact(&mut frame, &[BBox::ltwh(16, 16, 32, 32)])
            .unwrap();

        for (x, y) in [(0, 0), (15, 15), (48, 48), (63, 10), (10, 63)] {
            assert_eq!(pixel(&frame, x, y), pixel(&before, x, y));
        }
    }

    #[test]
    fn empty_and_offscreen_regions_are_skipped() {
        let mut frame = checkerboard(32);
        let before = frame.try_clone().unwrap();

        RegionRedactor::default()
            .redact(
                &mut frame,
                &[
                    BBox::ltwh(4, 4, 0, 10),
                    BBox::ltwh(4, 4, 10, -1),
                    BBox::ltwh(100, 100, 10, 10),
                    BBox::ltwh(-20, -20, 10, 10),
                ],
            )
            .unwrap();

        for y in 0..32 {
            for x in 0..32 {
                assert_eq!(pixel(&frame, x, y), pixel(&before, x, y));
            }
        }
    }

    #[test]
    fn partially_visible_region_is_clipped() {
        let mut frame = checkerboard(32);
        RegionRedactor::default()
            .redact(&mut frame, &[BBox::ltwh(20, 20, 40, 40)])
            .unwrap();

        let a = pixel(&frame, 26, 26)[0] as i32;
        let b = pixel(&frame, 27, 26)[0] as i32;
        assert!((a - b).abs() < 64);
    }

    #[test]
    fn overlapping_regions_are_each_redacted() {
        let mut frame = checkerboard(64);
        RegionRedactor::default()
            .redact(
                &mut frame,
                &[BBox::ltwh(8, 8, 24, 24), BBox::ltwh(16, 16, 24, 24)],
            )
            .unwrap();

        for (x, y) in [(10, 10), (20, 20), (36, 36)] {
            let a = pixel(&frame, x, y)[0] as i32;
            let b = pixel(&frame, x + 1, y)[0] as i32;
            assert!((a - b).abs() < 64);
        }
    }

    #[test]
    fn kernel_is_odd() {
        assert_eq!(kernel_size(1), 3);
        assert_eq!(kernel_size(10), 5);
        assert_eq!(kernel_size(64), 33);
    }
}
