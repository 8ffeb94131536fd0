//! Rendering and AI provider collaborators
//!
//! The engine only depends on the traits in this module:
//!
//! - [`PageRenderer`]: page number to image
//! - [`RecognitionProvider`]: image to text
//! - [`TextTransformProvider`]: text plus instruction to text
//!
//! [`OpenAiProvider`] implements both AI traits against any
//! OpenAI-compatible `/chat/completions` endpoint. Rendering is left to the
//! embedding application, which knows the document format.

mod openai;
mod traits;

pub use openai::OpenAiProvider;
pub use traits::{ImageArtifact, PageRenderer, RecognitionProvider, TextTransformProvider};
