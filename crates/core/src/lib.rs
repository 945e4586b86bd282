pub mod action;
pub mod artifact;
pub mod audit;
pub mod batch;
pub mod config;
pub mod lookup;
pub mod metrics;
pub mod pipeline;
pub mod testing;

pub use action::{ActionClient, ActionError, HttpActionClient};
pub use artifact::{ArtifactManager, ArtifactStore};
pub use audit::{create_audit_system, AuditEvent, AuditHandle, AuditStore, SqliteAuditStore};
pub use batch::{Batch, BatchStore, GroupStatus, InvoiceGroup, JsonBatchStore};
pub use config::{load_config, validate_config, Config, ConfigError};
pub use pipeline::{PipelineError, PipelineExecutor, RunReport};
