//! Decode and OCR capabilities consumed by the worker pool.
//!
//! Engines are created per worker through an [`EngineFactory`] and owned by that worker, so no
//! engine state is shared between threads.

use image::{DynamicImage, ImageError, ImageFormat};
use std::path::Path;
use std::sync::Arc;

use crate::Settings;
use crate::engine::tesseract::TesseractCli;
use crate::error::FailureReason;

/// Text recognized in one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Recognition {
    pub text: String,
    /// Mean word confidence, 0..=100.
    pub confidence: f32,
}

/// An OCR engine instance. One per worker; may keep state between calls.
pub trait OcrEngine: Send {
    fn name(&self) -> &'static str;

    /// Extract text from decoded pixels. The error string is recorded as the failure reason.
    fn recognize(&mut self, image: &DynamicImage) -> Result<Recognition, String>;
}

/// Turns raw file bytes into pixels.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: Option<ImageFormat>)
    -> Result<DynamicImage, FailureReason>;
}

/// Builds a fresh engine for a worker.
pub type EngineFactory = dyn Fn() -> anyhow::Result<Box<dyn OcrEngine>> + Send + Sync;

/// Handles passed explicitly to the pipeline.
#[derive(Clone)]
pub struct Capabilities {
    pub decoder: Arc<dyn ImageDecoder>,
    pub engines: Arc<EngineFactory>,
}

impl Capabilities {
    pub fn new(decoder: Arc<dyn ImageDecoder>, engines: Arc<EngineFactory>) -> Self {
        Capabilities { decoder, engines }
    }

    /// `image` crate decoding + the tesseract executable from `settings`.
    pub fn tesseract(settings: &Settings) -> Self {
        let program = settings.tesseract_path.clone();
        let lang = settings.tesseract_lang.clone();
        Capabilities {
            decoder: Arc::new(ImageCrateDecoder),
            engines: Arc::new(move || -> anyhow::Result<Box<dyn OcrEngine>> {
                Ok(Box::new(TesseractCli::new(program.clone(), lang.clone())))
            }),
        }
    }
}

/// Decoder backed by the `image` crate. Content sniffing wins over the extension hint.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageCrateDecoder;

impl ImageDecoder for ImageCrateDecoder {
    fn decode(
        &self,
        bytes: &[u8],
        hint: Option<ImageFormat>,
    ) -> Result<DynamicImage, FailureReason> {
        let format = match image::guess_format(bytes) {
            Ok(f) => f,
            Err(err) => match hint {
                Some(f) => f,
                None => return Err(FailureReason::UnsupportedFormat(err.to_string())),
            },
        };
        image::load_from_memory_with_format(bytes, format).map_err(|err| match err {
            ImageError::Unsupported(e) => FailureReason::UnsupportedFormat(e.to_string()),
            ImageError::Limits(e) => FailureReason::UnsupportedFormat(e.to_string()),
            other => FailureReason::CorruptImage(other.to_string()),
        })
    }
}

/// Format hint from the file extension.
pub fn format_hint(path: &Path) -> Option<ImageFormat> {
    ImageFormat::from_path(path).ok()
}
