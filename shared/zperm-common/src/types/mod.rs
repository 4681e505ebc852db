//! Permission model types.

mod entity;

pub use entity::*;
