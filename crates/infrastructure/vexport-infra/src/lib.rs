pub mod net;

// Re-exports for convenience
pub use net::{
    http_client, ChunkStream, ClientOptions, HttpSession, NetError, OpenedStream, Throttle,
};
