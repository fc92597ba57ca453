#![doc = include_str!("../README.md")]
#![warn(missing_docs, missing_debug_implementations)]
mod error;
mod factory;
mod intern;
mod pool;

pub use error::*;
pub use factory::*;
pub use intern::*;
pub use pool::*;
