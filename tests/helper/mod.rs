#![allow(dead_code)]

pub mod registry;
pub mod templates;

pub use registry::*;
pub use templates::*;
