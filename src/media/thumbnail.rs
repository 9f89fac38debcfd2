use image::{codecs::jpeg::JpegEncoder, DynamicImage, ImageResult};

/// Size of generated thumbnails (bounding square)
pub const THUMBNAIL_SIZE: u32 = 256;

/// JPEG quality used for thumbnails
pub const THUMBNAIL_QUALITY: u8 = 85;

/// Turns a decoded image into compact preview bytes.
pub trait ThumbnailEncoder: Send + Sync {
    fn encode(&self, image: &DynamicImage) -> ImageResult<Vec<u8>>;
}

/// Downscales into a square bounding box (aspect ratio kept) and encodes as JPEG.
#[derive(Debug, Clone, Copy)]
pub struct JpegThumbnailer {
    pub size: u32,
    pub quality: u8,
}

impl Default for JpegThumbnailer {
    fn default() -> Self {
        Self {
            size: THUMBNAIL_SIZE,
            quality: THUMBNAIL_QUALITY,
        }
    }
}

impl ThumbnailEncoder for JpegThumbnailer {
    fn encode(&self, image: &DynamicImage) -> ImageResult<Vec<u8>> {
        // thumbnail() would upscale small images, so only shrink
        let rgb = if image.width() > self.size || image.height() > self.size {
            image.thumbnail(self.size, self.size).to_rgb8()
        } else {
            image.to_rgb8()
        };

        let mut bytes = Vec::new();
        rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, self.quality))?;
        Ok(bytes)
    }
}
