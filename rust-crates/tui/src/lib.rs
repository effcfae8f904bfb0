pub mod action;
pub mod client;
pub mod config;
pub mod connector;
pub mod countdown;
pub mod errors;
pub mod reader;
pub mod scheduler;
pub mod snapshot;
pub mod store;
pub mod transactions;
pub mod ui;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
