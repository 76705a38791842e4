pub mod connection;
pub mod state;
pub mod trace;
pub mod ws;

pub use state::ServerState;
