pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod logging;
pub mod models;

pub use error::*;
pub use models::*;
