mod transport;

pub use transport::{bind_multicast, TokioMulticast};
