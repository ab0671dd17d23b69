pub mod analysis;
pub mod consts;
pub mod error;
pub mod inference;
pub mod layout;
pub mod parse;
pub mod render;

// Re-export commonly used types
pub use error::{ErrorKind, FailureReport, ScreenParseError};
pub use layout::{
    element::{Element, ElementKind, Source},
    result::{AnalysisResult, CoordinateMap},
};
pub use parse::{
    BatchOutcome, BatchResults, ImageInput, ParseOptions, ParseOptionsBuilder, ParserConfig,
    ScreenParser,
};
