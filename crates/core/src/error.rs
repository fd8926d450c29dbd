use providers::ProviderError;
use storage::MetadataError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaggerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no inference endpoint available")]
    NoEndpointAvailable,
    #[error("inference failed: {0}")]
    Inference(#[from] ProviderError),
    #[error("image preprocessing failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("metadata i/o failed: {0}")]
    Metadata(#[from] MetadataError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaggerError {
    /// Per-file failures degrade to "stays untagged this sweep"; only
    /// configuration problems stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaggerError::Configuration(_))
    }
}
