pub mod connection;
pub mod presence;
pub mod rooms;
pub mod threads;
