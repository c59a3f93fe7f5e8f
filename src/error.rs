//! Error types for dynsql.

use thiserror::Error;

/// The main error type for dynsql operations.
#[derive(Debug, Error)]
pub enum DynSqlError {
    /// An element tag with no registered handler.
    #[error("Unknown element <{0}> in SQL statement")]
    UnknownDirective(String),

    /// A `<choose>` with more than one `<otherwise>`.
    #[error("Too many default (otherwise) elements in choose statement")]
    MultipleDefaultBranches,

    /// Missing required attribute on an element.
    #[error("Missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute { element: String, attribute: &'static str },

    /// Attribute present but not parseable.
    #[error("Invalid value '{value}' for attribute '{attribute}' on <{element}>")]
    InvalidAttribute {
        element: String,
        attribute: &'static str,
        value: String,
    },

    /// A statement id already registered for the same dialect scope.
    #[error("Mapped statement '{0}' is already registered")]
    DuplicateIdentifier(String),

    /// Lookup of an unknown statement id.
    #[error("Mapped statement '{0}' not found")]
    StatementNotFound(String),

    /// Short id declared by more than one namespace.
    #[error("Statement id '{0}' is ambiguous; use the namespace-qualified id")]
    AmbiguousStatement(String),

    /// `<include>` of an unknown fragment.
    #[error("SQL fragment '{0}' not found")]
    FragmentNotFound(String),

    /// `<include>` chain that refers back to itself.
    #[error("Circular include of SQL fragment '{0}'")]
    CircularInclude(String),

    /// Malformed template markup.
    #[error("Markup error at position {position}: {message}")]
    Markup { position: usize, message: String },

    /// Guard, bind or collection expression failed.
    #[error(transparent)]
    Expression(#[from] ExpressionError),

    /// `${}` name with no binding while strict substitution is on.
    #[error("Unresolved substitution '${{{0}}}'")]
    UnresolvedSubstitution(String),

    /// Malformed `#{…}` parameter marker.
    #[error("Invalid parameter mapping '#{{{content}}}': {message}")]
    InvalidMapping { content: String, message: String },

    /// Key generator could not copy keys into the parameter.
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DynSqlError {
    /// Create a markup error at the given byte position.
    pub fn markup(position: usize, message: impl Into<String>) -> Self {
        Self::Markup {
            position,
            message: message.into(),
        }
    }

    /// Create a missing attribute error.
    pub fn missing(element: impl Into<String>, attribute: &'static str) -> Self {
        Self::MissingAttribute {
            element: element.into(),
            attribute,
        }
    }

    /// Create an invalid attribute error.
    pub fn invalid(element: impl Into<String>, attribute: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidAttribute {
            element: element.into(),
            attribute,
            value: value.into(),
        }
    }
}

/// A failed expression evaluation, carrying the source expression.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Error evaluating expression '{expression}': {reason}")]
pub struct ExpressionError {
    pub expression: String,
    pub reason: ExpressionFailure,
}

impl ExpressionError {
    pub fn new(expression: impl Into<String>, reason: ExpressionFailure) -> Self {
        Self {
            expression: expression.into(),
            reason,
        }
    }
}

/// Why an expression failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionFailure {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("no binding or attribute named '{0}'")]
    Unresolved(String),

    #[error("cannot read '{0}' of null")]
    NullTarget(String),

    #[error("evaluated to null, expected a collection")]
    NullCollection,

    #[error("expected a collection, found {0}")]
    NotIterable(&'static str),

    #[error("{0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("unknown method '{0}'")]
    UnknownMethod(String),
}

/// Result type alias for dynsql operations.
pub type DynSqlResult<T> = Result<T, DynSqlError>;
