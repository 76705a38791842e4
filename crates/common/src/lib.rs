// mathnote-common: notebook model, change vocabulary and sync protocol shared by server and client.

pub mod change;
pub mod model;
pub mod protocol;
pub mod store;
