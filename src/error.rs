//! Error types for the model loading library.
//!
//! [`AnveshakError`] is the boundary error: it enriches a message with the
//! source file, line number and backtrace text of the deepest failure it can
//! resolve, so a single log line carries everything needed to locate the
//! fault. The smaller enums below classify the failures raised inside the
//! loader and the provider clients before they are wrapped.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::panic::Location;

pub const UNKNOWN_FILE: &str = "<unknown file>";
pub const UNKNOWN_LINE: i64 = -1;
pub const NO_TRACEBACK: &str = "<no traceback available>";

/// File and line of the deepest frame known for an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: i64,
}

impl SourceLocation {
    /// Sentinel used when no frame could be resolved.
    pub fn unknown() -> SourceLocation {
        SourceLocation {
            file: UNKNOWN_FILE.to_string(),
            line: UNKNOWN_LINE,
        }
    }

    fn from_caller(caller: &'static Location<'static>) -> SourceLocation {
        SourceLocation {
            file: caller.file().to_string(),
            line: caller.line() as i64,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Explicit accessor for error context an object may carry.
///
/// Types that record where they were raised implement this so that wrapping
/// them preserves the original location and backtrace instead of the wrap
/// site.
pub trait ErrorInfo {
    fn source_location(&self) -> Option<SourceLocation>;
    fn traceback(&self) -> Option<String>;
}

/// Where the location and backtrace of a wrapped error come from.
pub enum ErrorDetails<'a> {
    /// Capture at the construction site.
    None,
    /// An explicit error-info accessor supplies them.
    Provider(&'a dyn ErrorInfo),
    /// A caught error; its source chain is searched for the deepest context.
    Caught(&'a (dyn Error + 'static)),
}

/// An error enriched with the source location and backtrace of the deepest
/// failure. Immutable once constructed; construction itself never fails, a
/// missing context degrades to sentinel values.
#[derive(Clone)]
pub struct AnveshakError {
    message: String,
    location: SourceLocation,
    traceback: String,
}

impl AnveshakError {
    /// Create an error capturing the context at the call site.
    #[track_caller]
    pub fn new(message: impl fmt::Display) -> AnveshakError {
        AnveshakError::with_details(message, ErrorDetails::None)
    }

    /// Wrap a caught error under a new message. The deepest enriched error
    /// found in its source chain supplies the location and backtrace; a
    /// chain without one falls back to capturing at the call site.
    #[track_caller]
    pub fn wrap(message: impl fmt::Display, cause: &(dyn Error + 'static)) -> AnveshakError {
        AnveshakError::with_details(message, ErrorDetails::Caught(cause))
    }

    /// Create an error resolving its context from an explicit detail source.
    /// Passing an error value as the message stringifies it.
    #[track_caller]
    pub fn with_details(message: impl fmt::Display, details: ErrorDetails<'_>) -> AnveshakError {
        let caller = Location::caller();
        let message = message.to_string();

        let (location, traceback) = match details {
            ErrorDetails::None => capture_context(caller),
            ErrorDetails::Provider(info) => (
                info.source_location().unwrap_or_else(SourceLocation::unknown),
                info.traceback().unwrap_or_else(|| NO_TRACEBACK.to_string()),
            ),
            ErrorDetails::Caught(cause) => match deepest_context(cause) {
                Some(context) => context,
                None => capture_context(caller),
            },
        };

        AnveshakError {
            message,
            location,
            traceback,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn source_location(&self) -> &SourceLocation {
        &self.location
    }

    pub fn traceback(&self) -> &str {
        &self.traceback
    }
}

fn capture_context(caller: &'static Location<'static>) -> (SourceLocation, String) {
    let backtrace = Backtrace::capture();
    let traceback = match backtrace.status() {
        BacktraceStatus::Captured => backtrace.to_string(),
        _ => NO_TRACEBACK.to_string(),
    };
    (SourceLocation::from_caller(caller), traceback)
}

/// Walk the source chain to its end, keeping the context of the deepest
/// enriched error seen along the way.
fn deepest_context(caught: &(dyn Error + 'static)) -> Option<(SourceLocation, String)> {
    let mut deepest = None;
    let mut current = Some(caught);
    while let Some(err) = current {
        if let Some(wrapped) = err.downcast_ref::<AnveshakError>() {
            deepest = Some((wrapped.location.clone(), wrapped.traceback.clone()));
        }
        current = err.source();
    }
    deepest
}

impl fmt::Display for AnveshakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error in [{}] at line [{}] | Message: {}",
            self.location.file, self.location.line, self.message
        )?;
        if !self.traceback.is_empty() {
            write!(f, "\nTraceback:\n{}", self.traceback)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AnveshakError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnveshakError")
            .field("file", &self.location.file)
            .field("line", &self.location.line)
            .field("message", &self.message)
            .finish()
    }
}

impl Error for AnveshakError {}

impl ErrorInfo for AnveshakError {
    fn source_location(&self) -> Option<SourceLocation> {
        Some(self.location.clone())
    }

    fn traceback(&self) -> Option<String> {
        Some(self.traceback.clone())
    }
}

/// Errors raised while resolving models from the configuration.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("LLM provider {0} not found in configuration")]
    ProviderNotConfigured(String),

    #[error("Unsupported LLM provider {0}")]
    UnsupportedProvider(String),

    #[error("Failed to start the embedding runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Errors from the provider API clients.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} API request failed: {source}")]
    Request {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} API returned status {status}: {message}")]
    Api {
        provider: &'static str,
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("{provider} API did not generate any content")]
    Empty { provider: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct PlainError(String);

    impl fmt::Display for PlainError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl Error for PlainError {}

    struct EmptyInfo;

    impl ErrorInfo for EmptyInfo {
        fn source_location(&self) -> Option<SourceLocation> {
            None
        }

        fn traceback(&self) -> Option<String> {
            None
        }
    }

    #[test]
    fn records_the_construction_site() {
        let err = AnveshakError::new("boom");
        let expected_line = line!() - 1;
        assert_eq!(err.source_location().file, file!());
        assert_eq!(err.source_location().line, expected_line as i64);
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn wrapping_reuses_the_deepest_context() {
        #[derive(Debug)]
        struct Outer(AnveshakError);

        impl fmt::Display for Outer {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "outer: {}", self.0.message())
            }
        }

        impl Error for Outer {
            fn source(&self) -> Option<&(dyn Error + 'static)> {
                Some(&self.0)
            }
        }

        let inner = AnveshakError::new("inner failure");
        let inner_location = inner.source_location().clone();
        let inner_traceback = inner.traceback().to_string();

        let outer = Outer(inner);
        let wrapped = AnveshakError::wrap("request failed", &outer);

        assert_eq!(*wrapped.source_location(), inner_location);
        assert_eq!(wrapped.traceback(), inner_traceback);
        assert_eq!(wrapped.message(), "request failed");
    }

    #[test]
    fn error_passed_as_message_is_stringified() {
        let cause = PlainError("connection reset".to_string());
        let wrapped = AnveshakError::with_details(&cause, ErrorDetails::Caught(&cause));
        assert_eq!(wrapped.message(), cause.to_string());
        // the chain carries no enriched error, so the construction site is used
        assert_eq!(wrapped.source_location().file, file!());
    }

    #[test]
    fn sentinels_when_no_context_is_resolvable() {
        let err = AnveshakError::with_details("lost", ErrorDetails::Provider(&EmptyInfo));
        assert_eq!(*err.source_location(), SourceLocation::unknown());
        assert_eq!(err.traceback(), NO_TRACEBACK);

        let rendered = err.to_string();
        assert!(rendered.contains("Error in [<unknown file>] at line [-1] | Message: lost"));
        // the rendered form always carries a traceback block
        assert!(rendered.contains("Traceback:\n<no traceback available>"));
    }

    #[test]
    fn display_renders_file_line_message_and_traceback() {
        let err = AnveshakError::new("bad config");
        let rendered = err.to_string();
        assert!(rendered.starts_with(&format!("Error in [{}] at line [", file!())));
        assert!(rendered.contains("| Message: bad config"));
        assert!(rendered.contains("\nTraceback:\n"));
    }
}
