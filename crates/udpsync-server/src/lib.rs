//! udpsync server: receives files over the udpsync transfer protocol into a
//! storage directory and deletes them on request.

pub mod server;
pub mod storage;

pub use server::{Server, ServerConfig};
pub use storage::Storage;
