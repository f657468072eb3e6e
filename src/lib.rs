pub mod auth;
pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod realtime;
pub mod recent;
pub mod session;
pub mod state;

pub use config::Config;
pub use error::{ClientError, JoinRejection, Result};
pub use state::ClientContext;
