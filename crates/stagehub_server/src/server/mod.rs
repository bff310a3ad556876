#![forbid(unsafe_code)]

pub mod announce;
pub mod broadcaster;
pub mod commands;
pub mod cooldown;
pub mod dedupe;
pub mod health;
pub mod history;
pub mod hub;
pub mod live_status;
pub mod probes;
pub mod resolver;
pub mod songs;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod broadcaster_tests;



#[cfg(test)]
mod transport_tests;
