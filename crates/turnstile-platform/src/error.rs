use thiserror::Error;

/// Errors that can occur while resolving platform resources.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("path error: {0}")]
    Path(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_error_display_contains_message() {
        let err = PlatformError::Path("no home".into());
        assert_eq!(err.to_string(), "path error: no home");
    }
}
