//! The resumable pipeline: step table, classifier, router, executor and
//! completion writer.
//!
//! A run is one classification of the batch plus one pass over the routed
//! queues. Groups entering at `Pending` run multi-hop (all steps in one
//! pass); every other group advances one step and is re-routed by the next
//! run. All state changes funnel through the completion writer, so an
//! interrupted run resumes from the last persisted status.

mod classifier;
mod completion;
mod executor;
mod report;
mod router;
mod steps;

pub use classifier::*;
pub use completion::*;
pub use executor::*;
pub use report::*;
pub use router::*;
pub use steps::*;
