mod blob;
mod transport;

pub use blob::BlobStore;
pub use transport::{ReplyHandler, TransportAdapter};
