#![allow(clippy::uninlined_format_args)]

pub mod activity;
pub mod app;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod model;
pub mod oauth;
pub mod pagination;
pub mod refresh;
pub mod registry;
pub mod session;
pub mod storage;
pub mod transport;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
pub use error::{Error, Result};
