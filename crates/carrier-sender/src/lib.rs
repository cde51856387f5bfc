//! The outbound sender pool.
//!
//! A fixed set of workers consumes the backend's outgoing queue, enforces
//! per-channel concurrency and rate caps, invokes the matching handler's
//! send path, and records the resulting status. The pool itself never
//! retries: transient failures surface as `errored` statuses and the
//! backend's higher layer decides whether to re-enqueue.

mod pool;

pub use pool::{SenderPool, SenderPoolConfig};
