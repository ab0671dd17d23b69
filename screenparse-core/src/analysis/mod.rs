pub mod bbox;
pub mod reconcile;
