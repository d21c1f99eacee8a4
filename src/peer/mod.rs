pub mod connection;
pub mod media;
pub mod types;

pub use connection::{create_connection, detach_handlers};
pub use media::{LocalStream, RemoteStream};
pub use types::ServerConfig;
