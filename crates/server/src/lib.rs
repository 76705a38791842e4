// mathnote-server library entry point.

pub mod config;
pub mod engine;
pub mod runtime;
pub mod sync;
pub mod tools;
