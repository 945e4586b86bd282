//! Audit trail for pipeline runs.
//!
//! Every significant state transition emits an [`AuditEvent`] through an
//! [`AuditHandle`]; a background [`AuditWriter`] drains the channel and
//! persists records to an [`AuditStore`] so that a run can be reconstructed
//! after the fact.

mod events;
mod handle;
mod sqlite;
mod store;
mod writer;

pub use events::*;
pub use handle::*;
pub use sqlite::*;
pub use store::*;
pub use writer::*;
