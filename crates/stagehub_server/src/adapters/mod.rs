#![forbid(unsafe_code)]

pub mod bridge;
pub mod demo;

pub use bridge::BridgeAdapter;
pub use demo::DemoAdapter;
