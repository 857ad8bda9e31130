pub mod align;
pub mod asr;
pub mod bilingual;
pub mod config;
pub mod error;
pub mod jobs;
pub mod llm;
pub mod media;
pub mod pipeline;
pub mod split;
pub mod subtitle;
pub mod text;
pub mod translate;
pub mod trim;

pub use config::Config;
pub use error::{Result, TransubError};
pub use pipeline::{ArtifactPaths, SubtitlePipeline};
