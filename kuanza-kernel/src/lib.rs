//! Offline resilience kernel for field devices: network / power failure
//! records, local buffering with delayed sync, SMS / USSD proof-of-delivery
//! fallback and offline map downloads.

pub mod buffer;
pub mod config;
pub mod error;
pub mod failures;
pub mod fallback;
pub mod health;
pub mod http;
pub mod maps;
pub mod network;
pub mod resilience;
pub mod state;
pub mod store;
pub mod sync;
pub mod upstream;
