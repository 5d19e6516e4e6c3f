pub mod config;
pub mod events;
pub mod generation;
pub mod notify;
pub mod queue;
