//! Bonus Data -- loads bonus catalogs from RON, JSON or TOML files.
//!
//! A catalog directory holds `effects.*` and `sources.*` (required) and
//! `engine.*` (optional [`BonusConfig`](bonus_core::config::BonusConfig)).
//! Effect references are resolved and formula tags validated at load time,
//! so a loaded catalog only fails to build on dependency cycles.

pub mod catalog;
pub mod loader;
pub mod schema;

pub use catalog::{Catalog, load_bonus_system, load_catalog};
pub use loader::DataLoadError;
