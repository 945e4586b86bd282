//! Testing utilities and mock implementations for E2E tests.
//!
//! This module provides mock implementations of the external service
//! traits, allowing the whole pipeline to run in tests without real
//! infrastructure.
//!
//! # Example
//!
//! ```rust,ignore
//! use billrun_core::testing::{fixtures, MockActionClient, MockLookupClient};
//!
//! let actions = MockActionClient::new();
//! let lookup = MockLookupClient::new();
//!
//! // Configure mock responses
//! actions.fail_next("generate_invoice", "PO-2", error).await;
//!
//! let group = fixtures::invoice_group("12.345.678/0001-90", &["PO-1", "PO-2"]);
//! // Run the executor against the mocks...
//! ```

mod in_memory_store;
mod mock_actions;
mod mock_lookup;

pub use in_memory_store::InMemoryBatchStore;
pub use mock_actions::{MockActionClient, RecordedAction};
pub use mock_lookup::MockLookupClient;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::NaiveDate;

    use crate::batch::{
        Batch, BatchDocument, ExtraDocKind, InvoiceGroup, LineItem, LocationInfo,
    };

    /// Create a date without the `from_ymd_opt` ceremony.
    pub fn period(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    /// Create a line item with a fixed period.
    pub fn line_item(reference: &str, value: f64) -> LineItem {
        LineItem::new(reference, value, period(2024, 3, 1))
    }

    /// Create a pending group with one 100.0 line item per reference.
    pub fn invoice_group(tax_id: &str, references: &[&str]) -> InvoiceGroup {
        let items = references
            .iter()
            .map(|reference| line_item(reference, 100.0))
            .collect();
        InvoiceGroup::new(tax_id, LocationInfo::new("Springfield", "SP"), items)
    }

    /// Create a pending group that requires the given extra document.
    pub fn group_with_extra(
        tax_id: &str,
        references: &[&str],
        kind: ExtraDocKind,
    ) -> InvoiceGroup {
        invoice_group(tax_id, references).with_extra(kind)
    }

    /// Wrap groups in a batch document ready for persistence.
    pub fn batch_document(groups: Vec<InvoiceGroup>) -> BatchDocument {
        BatchDocument {
            batch: Batch::new("fixtures"),
            groups,
        }
    }
}
