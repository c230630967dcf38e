// Captured frame shared by detection, actions and diagnostics.
use std::path::Path;
use std::sync::{Arc, OnceLock};

use image::{DynamicImage, GrayImage};

use crate::errors::{BotError, BotResult};

/// One screen capture. Cheap to clone; the pixel data is shared.
#[derive(Debug, Clone)]
pub struct Capture {
    image: Arc<DynamicImage>,
    gray: Arc<OnceLock<Arc<GrayImage>>>,
    pub taken_at: chrono::DateTime<chrono::Utc>,
}

impl Capture {
    pub fn new(image: DynamicImage) -> Self {
        Self {
            image: Arc::new(image),
            gray: Arc::new(OnceLock::new()),
            taken_at: chrono::Utc::now(),
        }
    }

    /// Decode a PNG (or any format `image` can sniff) as produced by `screencap -p`.
    pub fn from_encoded(bytes: &[u8]) -> BotResult<Self> {
        if bytes.is_empty() {
            return Err(BotError::Perception("empty capture buffer".into()));
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| BotError::Perception(format!("capture decode: {e}")))?;
        Ok(Self::new(img))
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }

    /// Grayscale view, converted on first use and reused for every pattern of the cycle.
    pub fn gray(&self) -> Arc<GrayImage> {
        self.gray
            .get_or_init(|| Arc::new(self.image.to_luma8()))
            .clone()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn save_png(&self, path: &Path) -> BotResult<()> {
        self.image
            .save_with_format(path, image::ImageFormat::Png)
            .map_err(|e| BotError::Diagnostics(format!("save {}: {e}", path.display())))
    }
}
