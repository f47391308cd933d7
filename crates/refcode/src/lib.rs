#![doc = include_str!("../README.md")]

mod batch;
mod code;
mod error;
mod event;
mod generator;
mod oracle;
mod pool;
mod rand;
mod resolver;
pub mod store;
mod task;
#[cfg(test)]
mod testing;

pub use crate::batch::*;
pub use crate::code::*;
pub use crate::error::*;
pub use crate::event::*;
pub use crate::generator::*;
pub use crate::oracle::is_unique;
pub use crate::pool::*;
pub use crate::rand::*;
pub use crate::resolver::*;
pub use crate::store::{Connection, Connector, Schema, StoreKind};
pub use crate::task::*;
