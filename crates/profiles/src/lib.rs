pub mod commands;
pub mod setup;
