use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use image::imageops::{self, FilterType};

/// A decoded image, normalised to 8-bit RGB.
#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub pixels: RgbImage,
}

impl ImageFrame {
    pub fn load(path: impl AsRef<Path>) -> Result<ImageFrame> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .with_context(|| format!("Decoding {}", path.display()))
            .context(
                "failed to load the image file, make sure you are using fully qualified paths",
            )?;
        let (width, height) = (decoded.width(), decoded.height());
        debug!("Decoded {} ({width}x{height}, {:?})", path.display(), decoded.color());
        Ok(ImageFrame { pixels: decoded.to_rgb8() })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn resized(&self, width: u32, height: u32) -> ImageFrame {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        ImageFrame { pixels: imageops::resize(&self.pixels, width, height, FilterType::Triangle) }
    }
}

impl From<RgbImage> for ImageFrame {
    fn from(pixels: RgbImage) -> ImageFrame {
        ImageFrame { pixels }
    }
}
