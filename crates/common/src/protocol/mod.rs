// Wire protocol shared by the notebook server and its clients.

pub mod ws;
