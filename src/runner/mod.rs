//! Runner module containing the runtime lifecycle and execution components.

pub mod cache;
pub mod classify;
pub mod config;
pub mod engine;
pub mod fetch;
pub mod guest;
pub mod instance;
pub mod io;
pub mod loader;
pub mod session;
pub mod store;
pub mod syntax;
