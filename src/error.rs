use thiserror::Error;

use crate::value::ValueKind;

/// Errors surfaced by the engine.
///
/// Unification failures are not errors: a combination that fails to unify is
/// simply skipped.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A head variable was still free after its body matched. The rule is not
    /// range-restricted.
    #[error("unbound variable `{variable}` while grounding the head of `{relation}`")]
    UnboundVariable {
        /// Name of the free variable
        variable: String,
        /// Head relation of the offending rule
        relation: String,
    },

    /// An atom or fact refers to a relation the state does not declare.
    #[error("unknown relation `{0}`")]
    UnknownRelation(String),

    /// A schema with this name is already part of the state.
    #[error("relation `{0}` is already declared")]
    DuplicateRelation(String),

    /// Wrong number of columns.
    #[error("relation `{relation}` has {expected} columns, got {found}")]
    ArityMismatch {
        /// Relation name
        relation: String,
        /// Arity from the schema
        expected: usize,
        /// Arity of the atom or fact
        found: usize,
    },

    /// A value (constant term, inserted fact or derived fact) of the wrong kind.
    #[error("column {column} of `{relation}` holds {expected} values, got {found}")]
    KindMismatch {
        /// Relation name
        relation: String,
        /// Zero-based column
        column: usize,
        /// Kind from the schema
        expected: ValueKind,
        /// Kind that was supplied
        found: ValueKind,
    },

    /// One variable used in columns of different kinds.
    #[error("variable `{variable}` is used both as {first} and as {second}")]
    VariableKindConflict {
        /// Variable name
        variable: String,
        /// Kind from its first occurrence
        first: ValueKind,
        /// Conflicting kind
        second: ValueKind,
    },

    /// A variable handle from another rule's scope.
    #[error("variable #{index} is not declared by the rule deriving `{relation}`")]
    UndeclaredVariable {
        /// Arena index of the handle
        index: usize,
        /// Head relation of the offending rule
        relation: String,
    },

    /// An evaluation was stepped with a state whose relations differ from
    /// the one it was created for.
    #[error("state does not match the evaluation at relation `{0}`")]
    StateMismatch(String),

    /// The configured round cap was reached before the fixpoint.
    #[error("no fixpoint after {rounds} rounds")]
    RoundLimitExceeded {
        /// Rounds completed before giving up
        rounds: usize,
    },

    /// Snapshot serialization failed.
    #[cfg(feature = "serde")]
    #[error("failed to serialize state: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
