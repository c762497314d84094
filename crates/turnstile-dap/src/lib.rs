//! turnstile-dap — debugger bridge for multi-turn dialog engines.
//!
//! A [`DebugAdapter`] sits between an engine that reports every step it
//! executes and a debugger speaking the Debug Adapter Protocol. Each live
//! turn is shown as a thread; breakpoints, pause and `next` block the
//! engine's step call until the debugger lets it go.

pub mod adapter;
pub mod breakpoint;
pub mod capabilities;
pub mod data;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod memory;
pub mod model;
pub mod outbox;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod source;
pub mod transport;

// Re-export key types for convenience.
pub use adapter::{DebugAdapter, TerminateFn, TurnGuard};
pub use breakpoint::{BreakpointService, Breakpoints};
pub use data::{DataModel, JsonDataModel, JsonNode, Memory, Scope, ValueRef};
pub use dispatch::{Command, Reply};
pub use error::DapError;
pub use events::{EventFilters, Events};
pub use memory::MemoryContext;
pub use model::{CodeModel, Context, DialogCodeModel, DialogContext, Frame, Item, Step, Traceable};
pub use registry::SessionRegistry;
pub use server::{serve_connection, DebugServer};
pub use session::{Phase, Session, TurnInfo};
pub use source::{Position, SourceMap, SourceRange, SourceRegistry};
