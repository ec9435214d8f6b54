pub mod api;
pub mod config;
pub mod error;
pub mod message_log;
pub mod messages;
pub mod presence;
pub mod server;
pub mod store;
pub mod sweeper;

pub use error::ChatError;
pub use server::Server;
pub use store::Store;
