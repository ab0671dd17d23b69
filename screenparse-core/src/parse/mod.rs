mod batch;
pub mod caption;
pub mod config;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod fusion;
pub mod input;
pub mod output;
mod parser;
pub mod stage;

pub use batch::*;
pub use config::{ParseOptions, ParseOptionsBuilder, ParserConfig};
pub use input::ImageInput;
pub use parser::*;
