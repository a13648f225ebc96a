pub mod config;
pub mod db;
pub mod sql;
pub mod store;

#[cfg(feature = "python")]
pub mod python;
