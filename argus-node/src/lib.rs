pub mod config;
pub mod constants;
pub mod events;
pub mod logging;
pub mod node;
pub mod peer;
pub mod registry;
