use crate::language::{errors::SyntaxError, span::Span};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, InterpreterFault>;

/// Errors attributable to the program being run or to its module graph.
#[derive(Clone, Debug, Error)]
pub enum RuntimeError {
    #[error("Unknown symbol `{name}`")]
    UnknownSymbol { name: String },
    #[error("Unknown type `{name}`")]
    UnknownType { name: String },
    #[error("`{name}` is already bound in this scope")]
    DuplicateBinding { name: String },
    #[error("`{name}` was read before it was initialized")]
    Uninitialized { name: String },
    #[error("Circular initialization of `{name}`")]
    CircularInitialization { name: String },
    #[error("Immutable binding `{name}` cannot be reassigned")]
    ImmutableBinding { name: String },
    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("Function `{name}` expected {expected} arguments but received {received}")]
    ArityMismatch {
        name: String,
        expected: usize,
        received: usize,
    },
    #[error("Cannot resolve {kind} `{name}`: {reason}")]
    UnresolvedModule {
        kind: String,
        name: String,
        reason: String,
    },
    #[error("Syntax error in `{unit}`: {}", first_syntax_message(.errors))]
    Syntax {
        unit: String,
        path: Option<PathBuf>,
        text: Arc<str>,
        errors: Vec<SyntaxError>,
    },
    #[error("Component `{component}` does not implement `{name}` declared by API `{api}`")]
    MissingExport {
        component: String,
        api: String,
        name: String,
    },
    #[error("API `{api}` does not declare `{name}`")]
    UnknownImport { api: String, name: String },
    #[error("No native implementation of `{name}` for API `{api}`")]
    MissingNative { api: String, name: String },
    #[error("{message}")]
    Thrown { message: String },
    #[error("Assertion failed: {message}")]
    AssertionFailed { message: String },
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Integer overflow in `{op}`")]
    IntegerOverflow { op: String },
    #[error("Evaluation nested deeper than {depth} levels")]
    StackOverflow { depth: usize },
    #[error("Task `{task}` was cancelled")]
    Cancelled { task: String },
    #[error("`{found}` is not callable")]
    NotCallable { found: String },
    #[error("No applicable method `{name}` for {receiver}")]
    NoApplicableMethod { name: String, receiver: String },
    #[error("Unknown field `{name}` on {receiver}")]
    UnknownField { name: String, receiver: String },
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

fn first_syntax_message(errors: &[SyntaxError]) -> String {
    errors
        .first()
        .map(|err| format!("{} at {}", err.message, err.span))
        .unwrap_or_else(|| "unknown syntax error".into())
}

/// Internal invariant violation. Never caught by `try`.
#[derive(Clone, Debug, Error)]
#[error("Interpreter bug: {message}")]
pub struct InterpreterBug {
    pub message: String,
}

impl InterpreterBug {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Location {
    pub unit: String,
    pub span: Option<Span>,
}

impl Location {
    pub fn unit(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            span: None,
        }
    }

    pub fn at(unit: impl Into<String>, span: Span) -> Self {
        Self {
            unit: unit.into(),
            span: Some(span),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.span {
            Some(span) => write!(f, "{}@{}", self.unit, span),
            None => write!(f, "{}", self.unit),
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum InterpreterFault {
    #[error("{location}: {error}")]
    Program {
        location: Location,
        error: RuntimeError,
    },
    #[error(transparent)]
    Bug(#[from] InterpreterBug),
}

impl InterpreterFault {
    pub fn program(location: Location, error: RuntimeError) -> Self {
        InterpreterFault::Program { location, error }
    }

    pub fn bug(message: impl Into<String>) -> Self {
        InterpreterFault::Bug(InterpreterBug::new(message))
    }

    pub fn is_bug(&self) -> bool {
        matches!(self, InterpreterFault::Bug(_))
    }

    pub fn program_error(&self) -> Option<&RuntimeError> {
        match self {
            InterpreterFault::Program { error, .. } => Some(error),
            InterpreterFault::Bug(_) => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self.program_error(), Some(RuntimeError::Cancelled { .. }))
    }

    /// Attaches `span` unless the fault already points somewhere more precise.
    pub fn located(self, unit: &str, span: Span) -> Self {
        match self {
            InterpreterFault::Program { location, error } if location.span.is_none() => {
                let unit = if location.unit.is_empty() {
                    unit.to_string()
                } else {
                    location.unit
                };
                InterpreterFault::Program {
                    location: Location::at(unit, span),
                    error,
                }
            }
            other => other,
        }
    }

    /// Text bound by `catch`: the thrown message, or the error description.
    pub fn message(&self) -> String {
        match self {
            InterpreterFault::Program {
                error: RuntimeError::Thrown { message },
                ..
            } => message.clone(),
            InterpreterFault::Program { error, .. } => error.to_string(),
            InterpreterFault::Bug(bug) => bug.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_prints_unit_and_span() {
        assert_eq!(Location::at("Main", Span::new(3, 9)).to_string(), "Main@3..9");
        assert_eq!(Location::unit("Main").to_string(), "Main");
    }

    #[test]
    fn located_only_fills_missing_spans() {
        let fault = InterpreterFault::program(
            Location::unit("Lib"),
            RuntimeError::UnknownSymbol { name: "x".into() },
        );
        let located = fault.located("Main", Span::new(1, 2));
        assert_eq!(located.to_string(), "Lib@1..2: Unknown symbol `x`");
        let again = located.located("Main", Span::new(7, 8));
        assert_eq!(again.to_string(), "Lib@1..2: Unknown symbol `x`");
    }

    #[test]
    fn thrown_messages_are_bound_verbatim() {
        let fault = InterpreterFault::program(
            Location::unit("Main"),
            RuntimeError::Thrown {
                message: "boom".into(),
            },
        );
        assert_eq!(fault.message(), "boom");
        assert!(!fault.is_bug());
        assert!(InterpreterFault::bug("duplicate init").is_bug());
    }
}
