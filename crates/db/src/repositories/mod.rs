use leadquote_core::ports::CollaboratorError;
use thiserror::Error;

pub mod dispatch_ledger;
pub mod memory;

pub use dispatch_ledger::SqlDispatchLedger;
pub use memory::{
    InMemoryDispatchLedger, InMemoryEmailChannel, InMemoryLeadStore, InMemoryMessageTemplateStore,
    InMemoryPlanProvider, InMemoryPricingTemplateStore, InMemoryQuoteStore, InMemorySmsChannel,
    InMemoryStatusStore, InMemoryVariableStore, MemoryCollaborators, default_statuses,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for CollaboratorError {
    fn from(value: RepositoryError) -> Self {
        CollaboratorError::unavailable("dispatch_ledger", value.to_string())
    }
}
