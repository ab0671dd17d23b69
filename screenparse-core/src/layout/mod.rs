pub mod element;
pub mod result;
