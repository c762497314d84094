pub mod error;
pub mod paths;

pub use error::PlatformError;
pub use paths::{DefaultPaths, PlatformPaths};
