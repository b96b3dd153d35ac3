pub mod broker;
pub mod commands;
pub mod config;
pub mod defense;
pub mod error;
pub mod evaluator;
pub mod market;
pub mod models;
pub mod store;
#[cfg(test)]
pub mod test_helpers;
