pub mod composition;
pub mod document_lifecycle;
pub mod workspace_registry;

pub use composition::{RagSystem, RagSystemConfig};
pub use document_lifecycle::{AdmissionResult, DocumentLifecycle, DocumentLifecycleError, DocumentListFilter};
pub use workspace_registry::{WorkspaceRegistry, WorkspaceRegistryError};
