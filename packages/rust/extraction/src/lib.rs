//! Content extraction for ConceptGraph.
//!
//! Two independent channels read a source document:
//! - [`NativeTextChannel`] pulls the embedded text layer (PDF, PPTX, HTML)
//! - [`OcrChannel`] renders pages / embedded pictures and runs Tesseract on them
//!
//! [`ExtractionCollector`] runs both off the async runtime and merges their
//! output into a [`MergePayload`] for the generation service.

mod channel;
mod collector;
mod native;
mod ocr;
mod pptx;

pub use channel::{ExtractionChannel, SourceFormat};
pub use collector::{ExtractionCollector, MergePayload, merge};
pub use native::NativeTextChannel;
pub use ocr::{OcrChannel, is_tool_available};
