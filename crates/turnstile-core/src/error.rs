use thiserror::Error;

/// Errors raised by an [`Identifier`](crate::identifier::Identifier) table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No live object is registered under the code.
    #[error("unknown code {0}")]
    NotFound(u32),

    /// Every 32-bit code has been handed out.
    #[error("identifier codes exhausted")]
    Exhausted,
}
