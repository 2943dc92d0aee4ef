pub mod attachment;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod state;
pub mod threads;
