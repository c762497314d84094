//! Shared building blocks for the debugger bridge.

pub mod error;
pub mod identifier;
pub mod logging;

pub use error::RegistryError;
pub use identifier::{decode, encode, Identifier, SCALAR_HANDLE};
