pub mod buffer;
pub mod config;
pub mod credentials;
pub mod frame;
