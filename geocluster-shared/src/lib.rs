//! Types shared by every geocluster layer.
//!
//! Two failure channels:
//! - [`ClusterError`]: fatal aborts (bad configuration, store I/O, unknown strategy)
//! - [`Status`]: the outcome a stage reports, propagated unchanged to the caller

pub mod errors;
pub mod status;

pub use errors::{ClusterError, ClusterResult};
pub use status::Status;
