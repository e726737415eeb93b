#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod events;
#[cfg(feature = "health")]
pub mod health;
pub mod queue;
pub mod reducer;
pub mod registry;
pub mod transport;
pub mod types;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;
