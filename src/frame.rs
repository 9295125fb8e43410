//! Image buffers the pipeline moves between queues.

use image::{imageops, imageops::FilterType, RgbImage};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Crop region {x},{y} {width}x{height} lies outside a {frame_width}x{frame_height} frame")]
    RegionOutOfBounds {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        frame_width: u32,
        frame_height: u32,
    },
    #[cfg(feature = "opencv")]
    #[error("OpenCV error: {0}")]
    OpenCvError(#[from] opencv::Error),
}

/// Rectangle in pixel space, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    fn fits(&self, frame_width: u32, frame_height: u32) -> bool {
        self.x as u64 + self.width as u64 <= frame_width as u64
            && self.y as u64 + self.height as u64 <= frame_height as u64
    }
}

/// An image the detector and the extractor can work on.
///
/// Implementors own their pixel data: a frame moved out of a queue belongs to
/// the receiver, and `crop_resized` must return a buffer that shares nothing
/// with `self`, since producers are free to recycle their capture buffers.
pub trait FrameBuffer: Send + 'static {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Copies `region` out of the frame and resizes it to `side × side` with
    /// cubic interpolation.
    fn crop_resized(&self, region: Region, side: u32) -> Result<Self, FrameError>
    where
        Self: Sized;
}

impl FrameBuffer for RgbImage {
    fn width(&self) -> u32 {
        self.dimensions().0
    }

    fn height(&self) -> u32 {
        self.dimensions().1
    }

    fn crop_resized(&self, region: Region, side: u32) -> Result<Self, FrameError> {
        let (frame_width, frame_height) = self.dimensions();
        if !region.fits(frame_width, frame_height) {
            return Err(FrameError::RegionOutOfBounds {
                x: region.x,
                y: region.y,
                width: region.width,
                height: region.height,
                frame_width,
                frame_height,
            });
        }

        let crop =
            imageops::crop_imm(self, region.x, region.y, region.width, region.height).to_image();
        Ok(imageops::resize(&crop, side, side, FilterType::CatmullRom))
    }
}

#[cfg(feature = "opencv")]
mod cv {
    use super::{FrameBuffer, FrameError, Region};
    use opencv::{
        core::{Mat, Rect, Size},
        imgproc,
        prelude::*,
    };

    impl FrameBuffer for Mat {
        fn width(&self) -> u32 {
            self.cols().max(0) as u32
        }

        fn height(&self) -> u32 {
            self.rows().max(0) as u32
        }

        fn is_empty(&self) -> bool {
            self.empty()
        }

        fn crop_resized(&self, region: Region, side: u32) -> Result<Self, FrameError> {
            if !region.fits(FrameBuffer::width(self), FrameBuffer::height(self)) {
                return Err(FrameError::RegionOutOfBounds {
                    x: region.x,
                    y: region.y,
                    width: region.width,
                    height: region.height,
                    frame_width: FrameBuffer::width(self),
                    frame_height: FrameBuffer::height(self),
                });
            }

            let rect = Rect::new(
                region.x as i32,
                region.y as i32,
                region.width as i32,
                region.height as i32,
            );
            // The ROI is a view into the capture buffer; the clone detaches it.
            let crop = Mat::roi(self, rect)?.try_clone()?;
            let mut sign = Mat::default();
            imgproc::resize(
                &crop,
                &mut sign,
                Size::new(side as i32, side as i32),
                0.0,
                0.0,
                imgproc::INTER_CUBIC,
            )?;
            Ok(sign)
        }
    }
}
