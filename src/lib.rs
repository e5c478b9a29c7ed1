pub mod config;
pub mod error;
pub mod fs;
pub mod script;
pub mod state;
pub mod stress;
