//! # Fixlog
//!
//! A typed, in-memory Datalog engine computing the least fixpoint of a rule
//! set by semi-naive evaluation.
//!
//! ## Features
//!
//! - Relations with declared column kinds; ill-typed facts are rejected
//! - Rules with constants, repeated variables and host-computed externals
//! - Semi-naive rounds: each body combination is unified at most once
//! - Round-by-round driving with an optional round cap
//!
//! ## Example
//!
//! ```rust
//! use fixlog::{atom, fact, fix_point, Rule, RuleSet, Schema, State, ValueKind, Variables};
//!
//! let state = State::new()
//!     .with_relation(
//!         Schema::new("Adviser", [ValueKind::Str, ValueKind::Str]),
//!         [fact!["Rice", "Contrastin"], fact!["Hopper", "Rice"]],
//!     )?
//!     .with_relation(Schema::new("Ancestor", [ValueKind::Str, ValueKind::Str]), [])?;
//!
//! let mut vars = Variables::new();
//! let (x, y) = (vars.var("x"), vars.var("y"));
//! let direct = Rule::new(vars, atom!(Ancestor(x, y)), vec![atom!(Adviser(x, y))]);
//!
//! let mut vars = Variables::new();
//! let (x, y, z) = (vars.var("x"), vars.var("y"), vars.var("z"));
//! let indirect = Rule::new(
//!     vars,
//!     atom!(Ancestor(x, z)),
//!     vec![atom!(Adviser(x, y)), atom!(Ancestor(y, z))],
//! );
//!
//! let rules: RuleSet = [direct, indirect].into_iter().collect();
//! let state = fix_point(&rules, state)?;
//! assert_eq!(state.facts("Ancestor").len(), 3);
//! # Ok::<(), fixlog::EngineError>(())
//! ```

/// Errors.
pub mod error;
/// Round loop.
pub mod fixpoint;
pub mod matcher;
/// Relation schemas, facts and fact sets.
pub mod relation;
/// Atoms, rules and single-rule application.
pub mod rule;
/// The evaluation state and queries over it.
pub mod state;
/// Variables, terms and binding arenas.
pub mod term;
pub mod unify;
/// Domain values.
pub mod value;

pub use error::{EngineError, Result};
pub use fixpoint::{
    fix_point, fix_point_with, Evaluation, EvaluationStats, FixpointConfig, Progress,
};
pub use relation::{Fact, Relation, Schema};
pub use rule::{apply_rule, Atom, External, Rule, RuleSet};
pub use state::{Query, QueryResult, SizeDelta, Sizes, State};
pub use term::{Bindings, IntoTerm, Term, Var, Variables};
pub use value::{Float, Value, ValueKind};
