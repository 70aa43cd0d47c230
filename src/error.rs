use std::path::PathBuf;

use thiserror::Error;

/// Whole-document failures. Anything reported through this type aborts the
/// job; per-slide and per-batch problems are recovered and only counted.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("input document not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("input is not a readable slide-deck container: {0}")]
    NotAContainer(String),

    #[error("invalid deck structure: missing {0}/")]
    MissingSlidesDir(String),

    #[error("no slide parts found in {0}/")]
    NoSlides(String),

    #[error("none of the {0} slide parts could be parsed")]
    NoSlidesParsed(usize),

    #[error("no translatable text found in {0} slides")]
    NoParagraphs(usize),

    #[error("repacked container failed verification: {0}")]
    Integrity(String),
}
