use crate::span::Span;

/// Errors raised while analyzing or evaluating a program.
///
/// Every variant is fatal at the module level: the core performs no local
/// recovery. The only "try again" mechanism in the compiler is the
/// analyzer's recursion sentinel, which is not an error but a rescheduling
/// signal (see `analyzer`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    UndefinedName {
        name: String,
        /// `import M.(name);` lines for modules that define the name publicly.
        suggestions: Vec<String>,
    },
    DuplicateName(String),
    NameRedefined(String),
    NameImportedAlready(String),
    ImportedNameNotFound(String),
    AmbiguousImport {
        name: String,
        /// One `import M.(name);` line per candidate module.
        suggestions: Vec<String>,
    },
    ImportLoop(Vec<String>),
    Arity {
        expected: usize,
        got: usize,
        variadic: bool,
    },
    TypeMismatch {
        expected: String,
        got: String,
    },
    ArgumentError {
        index: usize,
        message: String,
    },
    NoMatchingOverload {
        callable: String,
        /// One rendered reason per attempted candidate, in consult order.
        failures: Vec<String>,
        failed_interface: bool,
    },
    AmbiguousCall(String),
    PredicateLoop,
    RecursionWithoutBaseCase,
    UnboundPatternVariable(String),
    RecursivePatternInit,
    InterfaceMismatch(String),
    IntegerOverflow(String),
    DivisionByZero,
    InvalidShift(String),
    InvalidBitcast(String),
    UnsupportedAtCompileTime(String),
    InvalidOperation(String),
    UntypeableObject,
    AddressOfTemporary,
    StaticAssertFailed(Option<String>),
    PredicateFailed,
    MismatchingDispatchResults(String),
    NonMatchingAlias,
    PatternError(String),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UndefinedName { name, suggestions } => {
                write!(f, "undefined name: {}", name)?;
                if !suggestions.is_empty() {
                    write!(f, "\n  maybe you need one of:")?;
                    for s in suggestions {
                        write!(f, "\n    {}", s)?;
                    }
                }
                Ok(())
            }
            Self::DuplicateName(name) => write!(f, "duplicate name: {}", name),
            Self::NameRedefined(name) => write!(f, "name redefined: {}", name),
            Self::NameImportedAlready(name) => write!(f, "name imported already: {}", name),
            Self::ImportedNameNotFound(name) => write!(f, "imported name not found: {}", name),
            Self::AmbiguousImport { name, suggestions } => {
                write!(f, "ambiguous imported symbol: {}", name)?;
                write!(f, "\n  disambiguate with one of:")?;
                for s in suggestions {
                    write!(f, "\n    {}", s)?;
                }
                Ok(())
            }
            Self::ImportLoop(modules) => {
                write!(f, "import loop:")?;
                for m in modules {
                    write!(f, "\n    {}", m)?;
                }
                Ok(())
            }
            Self::Arity {
                expected,
                got,
                variadic,
            } => {
                write!(f, "incorrect number of arguments: expected ")?;
                if *variadic {
                    write!(f, "at least ")?;
                }
                write!(f, "{} arguments, got {} arguments", expected, got)
            }
            Self::TypeMismatch { expected, got } => {
                write!(f, "type mismatch: expected {}, got {}", expected, got)
            }
            Self::ArgumentError { index, message } => {
                write!(f, "argument {}: {}", index + 1, message)
            }
            Self::NoMatchingOverload {
                callable,
                failures,
                failed_interface,
            } => {
                if *failed_interface {
                    write!(f, "call does not conform to the interface of {}", callable)?;
                } else {
                    write!(
                        f,
                        "no matching operation: tried {} candidates for {}, none matched",
                        failures.len(),
                        callable
                    )?;
                }
                for failure in failures {
                    write!(f, "\n    {}", failure)?;
                }
                Ok(())
            }
            Self::AmbiguousCall(callable) => {
                write!(f, "ambiguous call to overloaded {}", callable)
            }
            Self::PredicateLoop => write!(f, "predicate evaluation loop"),
            Self::RecursionWithoutBaseCase => {
                write!(f, "type propagation failed due to recursion without base case")
            }
            Self::UnboundPatternVariable(name) => {
                write!(f, "unbound pattern variable: {}", name)
            }
            Self::RecursivePatternInit => {
                write!(f, "recursive overload pattern initialization")
            }
            Self::InterfaceMismatch(msg) => write!(f, "{}", msg),
            Self::IntegerOverflow(msg) => write!(f, "integer overflow: {}", msg),
            Self::DivisionByZero => write!(f, "integer division by zero"),
            Self::InvalidShift(msg) => write!(f, "invalid shift: {}", msg),
            Self::InvalidBitcast(msg) => write!(f, "invalid bitcast: {}", msg),
            Self::UnsupportedAtCompileTime(what) => {
                write!(f, "{} not supported at compile time", what)
            }
            Self::InvalidOperation(msg) => write!(f, "{}", msg),
            Self::UntypeableObject => write!(f, "untypeable object"),
            Self::AddressOfTemporary => write!(f, "can't take address of a temporary"),
            Self::StaticAssertFailed(None) => write!(f, "static assert failed"),
            Self::StaticAssertFailed(Some(msg)) => {
                write!(f, "static assert failed: {}", msg)
            }
            Self::PredicateFailed => write!(f, "definition predicate failed"),
            Self::MismatchingDispatchResults(msg) => {
                write!(f, "mismatching result types with dispatch{}", msg)
            }
            Self::NonMatchingAlias => write!(f, "non-matching alias"),
            Self::PatternError(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

/// A CompileError paired with the source span where it was raised and the
/// compile-context stack: the ordered list of `callable(arg types)` frames
/// the compiler was specializing when the error occurred.
///
/// The wrapper preserves the plain `CompileError` for pattern matching
/// while carrying enough information to show the user how the compiler
/// arrived at the failing point.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub error: CompileError,
    pub span: Span,
    pub context: Vec<String>,
}

impl Diagnostic {
    pub fn new(error: CompileError, span: Span) -> Self {
        Self {
            error,
            span,
            context: Vec::new(),
        }
    }

    pub fn with_context(error: CompileError, span: Span, context: Vec<String>) -> Self {
        Self {
            error,
            span,
            context,
        }
    }
}

impl From<CompileError> for Diagnostic {
    fn from(error: CompileError) -> Self {
        Self::new(error, Span::default())
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.context.is_empty() {
            writeln!(f, "compile context:")?;
            for entry in &self.context {
                writeln!(f, "    {}", entry)?;
            }
        }
        if self.span.is_synthetic() {
            write!(f, "error: {}", self.error)
        } else {
            write!(
                f,
                "error at line {}:{}: {}",
                self.span.start_line, self.span.start_column, self.error
            )
        }
    }
}

impl std::error::Error for Diagnostic {}

pub type Result<T> = std::result::Result<T, Diagnostic>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_message_shape() {
        let err = CompileError::IntegerOverflow("100 + 100".to_string());
        assert_eq!(format!("{}", err), "integer overflow: 100 + 100");
    }

    #[test]
    fn test_ambiguous_import_lists_suggestions() {
        let err = CompileError::AmbiguousImport {
            name: "foo".to_string(),
            suggestions: vec!["import b.(foo);".to_string(), "import c.(foo);".to_string()],
        };
        let rendered = format!("{}", err);
        assert!(rendered.starts_with("ambiguous imported symbol: foo"));
        assert!(rendered.contains("import b.(foo);"));
        assert!(rendered.contains("import c.(foo);"));
    }

    #[test]
    fn test_diagnostic_display_with_span() {
        let diag = Diagnostic::new(
            CompileError::DivisionByZero,
            Span::new(4, 5, 3, 3, 7, 8),
        );
        assert_eq!(
            format!("{}", diag),
            "error at line 3:7: integer division by zero"
        );
    }

    #[test]
    fn test_diagnostic_from_error_has_no_span() {
        let diag: Diagnostic = CompileError::PredicateLoop.into();
        assert!(diag.span.is_synthetic());
        assert!(diag.context.is_empty());
    }

    #[test]
    fn test_arity_variadic_display() {
        let err = CompileError::Arity {
            expected: 2,
            got: 1,
            variadic: true,
        };
        assert_eq!(
            format!("{}", err),
            "incorrect number of arguments: expected at least 2 arguments, got 1 arguments"
        );
    }
}
