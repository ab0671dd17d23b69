pub mod caption;
pub mod detector;
pub mod model;
pub mod paddle;
pub mod slot;
pub mod yolo;
