pub mod check;
pub mod clash_proxy;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod proxy;
pub mod ui;
