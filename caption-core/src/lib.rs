#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod device_map;
pub mod loader;
mod blip;
mod bundle;
mod caption;
mod config;
mod error;
mod processor;
mod provider;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use blip::{BlipLoader, BlipModel};
pub use bundle::*;
pub use caption::*;
pub use config::*;
pub use device_map::*;
pub use error::*;
pub use loader::*;
pub use processor::Processor;
pub use provider::*;
