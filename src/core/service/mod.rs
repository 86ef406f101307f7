//! Background services over the stores and the bus.

mod graduation;
mod recovery;
mod staleness;
mod status;
mod writer;

pub use graduation::GraduationFixer;
pub use recovery::{BlockFetcher, RpcBlockFetcher, SlotRecoveryService};
pub use staleness::{default_tiers, StalenessMonitor, StalenessTier};
pub use status::{StatusReport, StatusReporter};
pub use writer::TokenStateWriter;
