//! Batch data model and persisted state.

mod store;
mod types;

pub use store::{BatchStore, GroupMutator, JsonBatchStore, StoreError};
pub use types::{
    normalize_tax_id, ArtifactRefs, Batch, BatchDocument, ExtraDocKind, GroupStatus, InvoiceGroup,
    LineItem, LocationInfo, StepFailure, StepName, UNKNOWN_LOCATION,
};
