use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::{EventBatch, Resolution};

pub const ON_INTENSITY: u8 = 255;
pub const OFF_INTENSITY: u8 = 127;

// Dual-colour pixels are stored B, G, R (display byte order).
const GREEN: usize = 1;
const RED: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RasterMode {
    /// ON -> 255, OFF -> 127, last write wins.
    #[default]
    Mono,
    /// ON lights green, OFF lights red; both can land on one pixel.
    DualColor,
}

impl RasterMode {
    pub fn channels(&self) -> usize {
        match self {
            RasterMode::Mono => 1,
            RasterMode::DualColor => 3,
        }
    }
}

// -----------------------------------------------------------------------------
// RASTER IMAGE
// -----------------------------------------------------------------------------

/// Dense image of the most recent batch only. Background is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    resolution: Resolution,
    mode: RasterMode,
    data: Vec<u8>,
}

impl RasterImage {
    pub fn new(resolution: Resolution, mode: RasterMode) -> Self {
        Self {
            resolution,
            mode,
            data: vec![0; resolution.pixel_count() * mode.channels()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn mode(&self) -> RasterMode {
        self.mode
    }

    pub fn channels(&self) -> usize {
        self.mode.channels()
    }

    /// Row-major bytes, `channels()` per pixel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u16, y: u16) -> Option<&[u8]> {
        if !self.resolution.contains(x, y) {
            return None;
        }
        let c = self.channels();
        let start = self.resolution.index(x, y) * c;
        Some(&self.data[start..start + c])
    }

    /// Number of non-background pixels.
    pub fn active_pixels(&self) -> usize {
        self.data
            .chunks_exact(self.channels())
            .filter(|px| px.iter().any(|&v| v != 0))
            .count()
    }
}

// -----------------------------------------------------------------------------
// RASTERIZER
// -----------------------------------------------------------------------------

/// Owns one pre-sized image per sensor and overwrites it on every call.
pub struct Rasterizer {
    image: RasterImage,
}

impl Rasterizer {
    pub fn new(resolution: Resolution, mode: RasterMode) -> Self {
        Self {
            image: RasterImage::new(resolution, mode),
        }
    }

    pub fn image(&self) -> &RasterImage {
        &self.image
    }

    pub fn into_image(self) -> RasterImage {
        self.image
    }

    /// Clears the image and scatters `batch` into it in one pass.
    ///
    /// Out-of-range events are skipped and the rest of the batch is still
    /// drawn; the call then fails with `OutOfBounds`. `image()` holds the
    /// partial raster either way.
    pub fn rasterize(&mut self, batch: &EventBatch) -> Result<&RasterImage> {
        let Resolution { width, height } = self.image.resolution;
        let row = width as usize;
        let data = &mut self.image.data;
        data.fill(0);

        let mut rejected = 0usize;
        let mut first_rejected = None;

        let coords = batch.xs().iter().zip(batch.ys()).zip(batch.polarities());
        match self.image.mode {
            RasterMode::Mono => {
                for ((&x, &y), &on) in coords {
                    if x >= width || y >= height {
                        rejected += 1;
                        first_rejected.get_or_insert((x, y));
                        continue;
                    }
                    data[y as usize * row + x as usize] = if on { ON_INTENSITY } else { OFF_INTENSITY };
                }
            }
            RasterMode::DualColor => {
                for ((&x, &y), &on) in coords {
                    if x >= width || y >= height {
                        rejected += 1;
                        first_rejected.get_or_insert((x, y));
                        continue;
                    }
                    let base = (y as usize * row + x as usize) * 3;
                    data[base + if on { GREEN } else { RED }] = 255;
                }
            }
        }

        if let Some((x, y)) = first_rejected {
            return Err(Error::OutOfBounds {
                x,
                y,
                width,
                height,
                rejected,
            });
        }
        Ok(&self.image)
    }
}

/// One-shot rasterization into a freshly allocated image.
pub fn rasterize(batch: &EventBatch, resolution: Resolution, mode: RasterMode) -> Result<RasterImage> {
    let mut rasterizer = Rasterizer::new(resolution, mode);
    rasterizer.rasterize(batch)?;
    Ok(rasterizer.into_image())
}
