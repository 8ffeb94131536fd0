//! Traits and types for the rendering and AI collaborators

use async_trait::async_trait;

use crate::error::Result;
use crate::types::PageId;

/// Rendered page image handed from the renderer to the recognition provider
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    /// Page the image was rendered from
    pub page: PageId,
    /// Encoded image bytes
    pub data: Vec<u8>,
    /// MIME type of `data` (e.g. "image/png")
    pub mime_type: String,
}

impl ImageArtifact {
    /// Create a PNG artifact
    pub fn png(page: PageId, data: Vec<u8>) -> Self {
        Self {
            page,
            data,
            mime_type: "image/png".to_string(),
        }
    }
}

/// Renders pages of the active document into images
///
/// Implementations report failures as [`crate::Error::Render`]; the reason text
/// is classified by the retry executor, so transient causes (e.g. a timed-out
/// worker process) should say so.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render a single page
    async fn render(&self, page: PageId) -> Result<ImageArtifact>;
}

/// Turns a page image into text
///
/// Calls are wrapped by the retry executor, so implementations should make a
/// single attempt and surface the raw failure.
///
/// # Examples
///
/// ```no_run
/// use ocr_batch::providers::{ImageArtifact, OpenAiProvider, RecognitionProvider};
/// use ocr_batch::config::ProviderConfig;
/// use ocr_batch::PageId;
///
/// # async fn example() -> ocr_batch::Result<()> {
/// let provider = OpenAiProvider::new(ProviderConfig::default())?;
/// let image = ImageArtifact::png(PageId(1), std::fs::read("page-1.png")?);
/// let text = provider.recognize(&image).await?;
/// println!("{text}");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    /// Recognize the text in an image
    async fn recognize(&self, image: &ImageArtifact) -> Result<String>;

    /// Provider name for logs
    fn name(&self) -> &str;
}

/// Rewrites text according to an instruction (translate, summarize, fix OCR errors, ...)
#[async_trait]
pub trait TextTransformProvider: Send + Sync {
    /// Apply `instruction` to `text`
    async fn transform(&self, text: &str, instruction: &str) -> Result<String>;

    /// Provider name for logs
    fn name(&self) -> &str;
}
