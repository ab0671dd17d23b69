mod model;
mod session;

pub use model::*;
pub use session::*;
