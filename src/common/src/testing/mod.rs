//! Test utilities for dbreconcile.
//!
//! Provides configuration builders and fixture stores carrying the metadata
//! schema, so engine tests can seed inconsistencies directly.
//!
//! # Feature Flag
//!
//! This module is only available when the `testing` feature is enabled or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use common::testing::{FixtureStore, TestConfigBuilder};
//!
//! let fixture = FixtureStore::new().await?;
//! fixture.model(1, "res.partner").await?;
//! let config = TestConfigBuilder::new()
//!     .with_database_dsn(fixture.dsn())
//!     .with_model("res.partner", "res_partner")
//!     .build();
//! ```

mod config_builder;
mod fixture;

pub use config_builder::TestConfigBuilder;
pub use fixture::{FixtureStore, TranslationRow, create_schema};
