pub mod detect;
pub mod recognize;

mod ocr;

pub use ocr::*;
