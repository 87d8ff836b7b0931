use chrono::{DateTime, Utc};
use image::{imageops, imageops::FilterType, Rgb, RgbImage};
use std::sync::Arc;
use uuid::Uuid;

pub const CANONICAL_WIDTH: u32 = 640;
pub const CANONICAL_HEIGHT: u32 = 480;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const CANONICAL: Resolution = Resolution {
        width: CANONICAL_WIDTH,
        height: CANONICAL_HEIGHT,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::CANONICAL
    }
}

/// Channel order of a frame's pixel buffer.
///
/// Stream decoders hand out `Bgr` (capture format); everything shown to a
/// person or sent to the scene-description service is `Rgb` (display format).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr,
    Rgb,
}

/// An immutable three-channel raster. Cloning shares the pixel buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    pixels: Arc<RgbImage>,
    format: PixelFormat,
    captured_at: DateTime<Utc>,
    frame_id: Uuid,
}

impl Frame {
    pub fn new(pixels: RgbImage, format: PixelFormat) -> Self {
        Self {
            pixels: Arc::new(pixels),
            format,
            captured_at: Utc::now(),
            frame_id: Uuid::new_v4(),
        }
    }

    pub fn from_raw(width: u32, height: u32, data: Vec<u8>, format: PixelFormat) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|pixels| Self::new(pixels, format))
    }

    pub fn filled(resolution: Resolution, value: [u8; 3], format: PixelFormat) -> Self {
        Self::new(
            RgbImage::from_pixel(resolution.width, resolution.height, Rgb(value)),
            format,
        )
    }

    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn frame_id(&self) -> Uuid {
        self.frame_id
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.pixels.width(), self.pixels.height())
    }

    /// Returns a frame of exactly `target` size. Frame identity and capture
    /// time survive the resize; a frame already at size is shared, not copied.
    pub fn resized(&self, target: Resolution) -> Frame {
        if self.resolution() == target {
            return self.clone();
        }
        let resized = imageops::resize(
            self.pixels.as_ref(),
            target.width,
            target.height,
            FilterType::Triangle,
        );
        Frame {
            pixels: Arc::new(resized),
            ..self.clone()
        }
    }

    /// Converts to display (RGB) channel order.
    pub fn to_display(&self) -> Frame {
        self.to_format(PixelFormat::Rgb)
    }

    pub fn to_format(&self, format: PixelFormat) -> Frame {
        if self.format == format {
            return self.clone();
        }
        let mut swapped = self.pixels.as_ref().clone();
        for pixel in swapped.pixels_mut() {
            pixel.0.swap(0, 2);
        }
        Frame {
            pixels: Arc::new(swapped),
            format,
            ..self.clone()
        }
    }

    /// A mutable display-format copy, used to draw overlays.
    pub fn display_pixels(&self) -> RgbImage {
        match self.format {
            PixelFormat::Rgb => self.pixels.as_ref().clone(),
            PixelFormat::Bgr => self.to_display().pixels.as_ref().clone(),
        }
    }

    /// Wraps pixels derived from this frame, keeping its identity and capture time.
    pub fn derive(&self, pixels: RgbImage, format: PixelFormat) -> Frame {
        Frame {
            pixels: Arc::new(pixels),
            format,
            captured_at: self.captured_at,
            frame_id: self.frame_id,
        }
    }

    pub fn shares_pixels_with(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.pixels, &other.pixels)
    }
}
