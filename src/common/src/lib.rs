pub mod cli;
pub mod config;
pub mod store;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigurationError, Configuration, TieBreak};
pub use store::{Dialect, Store, StoreError};
