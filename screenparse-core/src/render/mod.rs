mod annotate;

pub use annotate::*;
