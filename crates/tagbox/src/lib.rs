pub mod cli;
pub mod config;
pub mod runtime;

mod tag_input;
