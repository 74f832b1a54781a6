pub mod config;
pub mod core;
pub mod error;
pub mod models;
pub mod monitor;
pub mod output;
pub mod remote;
pub mod session;
#[cfg(test)]
pub mod test_helpers;
