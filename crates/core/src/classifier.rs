use crate::config::InferenceConfig;
use crate::error::TaggerError;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use providers::KeywordProvider;
use std::fs;
use std::path::PathBuf;
use tokio::task;
use tracing::debug;

/// Turns image bytes into a keyword list using one inference endpoint.
/// Never retries; the caller owns retry and endpoint re-probing.
#[derive(Debug, Clone)]
pub struct Classifier {
    prompt: String,
    dimension: u32,
    quality: u8,
}

impl Classifier {
    pub fn new(prompt: impl Into<String>, dimension: u32, quality: u8) -> Self {
        Self {
            prompt: prompt.into(),
            dimension,
            quality,
        }
    }

    pub fn from_config(cfg: &InferenceConfig) -> Self {
        Self::new(cfg.prompt.clone(), cfg.image_size, cfg.jpeg_quality)
    }

    /// Square resize with a bicubic filter, RGB conversion and JPEG
    /// re-encode. Bounds payload size and normalizes aspect ratio.
    pub fn prepare(&self, image_bytes: &[u8]) -> Result<Vec<u8>, TaggerError> {
        let decoded = image::load_from_memory(image_bytes)?;
        let rgb = decoded
            .resize_exact(self.dimension, self.dimension, FilterType::CatmullRom)
            .to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, self.quality).encode_image(&rgb)?;
        Ok(out)
    }

    pub async fn classify(
        &self,
        image_bytes: &[u8],
        provider: &dyn KeywordProvider,
    ) -> Result<Vec<String>, TaggerError> {
        let payload = self.prepare(image_bytes)?;
        self.send(&payload, provider).await
    }

    /// Reads and prepares `path` on the blocking pool, then sends it.
    pub async fn classify_file(
        &self,
        path: PathBuf,
        provider: &dyn KeywordProvider,
    ) -> Result<Vec<String>, TaggerError> {
        let this = self.clone();
        let payload = task::spawn_blocking(move || this.prepare(&fs::read(path)?))
            .await
            .map_err(|e| TaggerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        self.send(&payload, provider).await
    }

    async fn send(
        &self,
        payload: &[u8],
        provider: &dyn KeywordProvider,
    ) -> Result<Vec<String>, TaggerError> {
        debug!(endpoint = %provider.address(), bytes = payload.len(), "sending image");
        Ok(provider.keywords(&self.prompt, payload).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgba, RgbaImage};
    use providers::fixed::FixedProvider;
    use std::io::Cursor;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba([200, 40, 40, 128]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn prepare_produces_square_rgb_jpeg() {
        let classifier = Classifier::new("p", 64, 90);
        let jpeg = classifier.prepare(&png(120, 30)).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn undecodable_bytes_fail() {
        let classifier = Classifier::new("p", 64, 90);
        assert!(matches!(
            classifier.prepare(b"definitely not an image"),
            Err(TaggerError::Image(_))
        ));
    }

    #[tokio::test]
    async fn classify_returns_provider_keywords() {
        let classifier = Classifier::new("p", 16, 80);
        let provider = FixedProvider::new("http://a", &["strand", "meer"]);
        let kws = classifier.classify(&png(20, 20), &provider).await.unwrap();
        assert_eq!(kws, vec!["strand", "meer"]);
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn classify_file_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        std::fs::write(&path, png(40, 10)).unwrap();
        let classifier = Classifier::new("p", 16, 80);
        let provider = FixedProvider::new("http://a", &["hund"]);

        let kws = classifier.classify_file(path, &provider).await.unwrap();
        assert_eq!(kws, vec!["hund"]);

        let missing = dir.path().join("gone.jpg");
        let err = classifier.classify_file(missing, &provider).await.unwrap_err();
        assert!(matches!(err, TaggerError::Io(_)));
        assert_eq!(provider.request_count(), 1);
    }

    #[tokio::test]
    async fn malformed_response_is_inference_error() {
        let classifier = Classifier::new("p", 16, 80);
        let provider = FixedProvider::new("http://a", &["x"]);
        provider.set_answering(false);
        let err = classifier.classify(&png(20, 20), &provider).await.unwrap_err();
        assert!(matches!(err, TaggerError::Inference(_)));
    }
}
