// Public API for integration tests and embedding in another server

pub mod abuse;
pub mod api;
pub mod app;
pub mod captcha;
pub mod contact;
pub mod session;
pub mod state;
pub mod sweeper;
pub mod types;
