pub mod action;
pub mod callback;
pub mod command;
pub mod config;
pub mod deploy;
pub mod engine;
pub mod error;
pub mod io;
pub mod notifier;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod telegram;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Result, TagwatchError};
