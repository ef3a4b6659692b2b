use crate::error::{EngineError, Result};
use crate::value::Value;

/// Handle to a logic variable: an index into the binding arena of the rule
/// (or query) whose [`Variables`] scope created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(usize);

impl Var {
    /// Position of this variable in its arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A scope handing out variable handles for one rule or query.
///
/// The scope only records names and which handles are anonymous; values
/// live in a [`Bindings`] arena sized with [`Variables::len`].
#[derive(Debug, Clone, Default)]
pub struct Variables {
    declared: Vec<Declared>,
}

#[derive(Debug, Clone)]
struct Declared {
    name: String,
    anonymous: bool,
}

impl Variables {
    /// Create an empty scope
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, name: String, anonymous: bool) -> Var {
        self.declared.push(Declared { name, anonymous });
        Var(self.declared.len() - 1)
    }

    /// Declare a named variable.
    pub fn var(&mut self, name: &str) -> Var {
        self.push(name.to_string(), false)
    }

    /// Declare a fresh anonymous variable, the `_` of a pattern.
    pub fn anon(&mut self) -> Var {
        let name = format!("_{}", self.declared.len());
        self.push(name, true)
    }

    /// Number of declared variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.declared.len()
    }

    /// Returns true if no variable was declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.declared.is_empty()
    }

    /// Name of `var`, or `None` if it does not belong to this scope.
    #[must_use]
    pub fn name(&self, var: Var) -> Option<&str> {
        self.declared.get(var.0).map(|declared| declared.name.as_str())
    }

    /// Returns whether `var` came from [`Variables::anon`].
    #[must_use]
    pub fn is_anonymous(&self, var: Var) -> bool {
        self.declared.get(var.0).is_some_and(|declared| declared.anonymous)
    }

    /// Returns whether `var` was declared by this scope.
    #[must_use]
    pub fn contains(&self, var: Var) -> bool {
        var.0 < self.declared.len()
    }

    pub(crate) fn display(&self, var: Var) -> String {
        self.name(var)
            .map_or_else(|| format!("#{}", var.0), str::to_string)
    }
}

/// A term inside an atom: either a constant or a variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    /// A constant that only matches an equal column value
    Value(Value),
    /// A variable that binds on first use and must agree afterwards
    Var(Var),
}

impl Term {
    /// Clear the variable this term refers to. No-op for constants.
    pub fn unbind(&self, bindings: &mut Bindings) {
        if let Term::Var(var) = self {
            bindings.unbind(*var);
        }
    }

    /// The value this term currently stands for.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnboundVariable`] if the term is a variable with
    /// no value; `relation` and `vars` only feed the error message.
    pub fn ground(&self, bindings: &Bindings, vars: &Variables, relation: &str) -> Result<Value> {
        match self {
            Term::Value(value) => Ok(value.clone()),
            Term::Var(var) => {
                bindings
                    .get(*var)
                    .cloned()
                    .ok_or_else(|| EngineError::UnboundVariable {
                        variable: vars.display(*var),
                        relation: relation.to_string(),
                    })
            }
        }
    }

    /// The variable of this term, if it is one.
    #[must_use]
    pub fn as_var(&self) -> Option<Var> {
        match self {
            Term::Var(var) => Some(*var),
            Term::Value(_) => None,
        }
    }
}

/// Conversion into a [`Term`], used by the [`atom!`](crate::atom) macro so
/// that variables and plain Rust constants can be mixed in one atom.
pub trait IntoTerm {
    /// Perform the conversion
    fn into_term(self) -> Term;
}

impl IntoTerm for Term {
    fn into_term(self) -> Term {
        self
    }
}

impl IntoTerm for Var {
    fn into_term(self) -> Term {
        Term::Var(self)
    }
}

impl IntoTerm for Value {
    fn into_term(self) -> Term {
        Term::Value(self)
    }
}

macro_rules! constant_into_term {
    ($($t:ty),*) => {
        $(
            impl IntoTerm for $t {
                fn into_term(self) -> Term {
                    Term::Value(Value::from(self))
                }
            }
        )*
    };
}

constant_into_term!(bool, i32, i64, u32, u64, f64, &str, String);

/// The binding arena of one evaluation: one optional value per variable.
///
/// A variable is bound at most once per match attempt; the evaluator unbinds
/// every participating variable before the next attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    slots: Vec<Option<Value>>,
}

impl Bindings {
    /// An arena with `len` unbound slots.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            slots: vec![None; len],
        }
    }

    /// The value bound to `var`, if any.
    #[must_use]
    pub fn get(&self, var: Var) -> Option<&Value> {
        self.slots.get(var.0).and_then(Option::as_ref)
    }

    /// Returns whether `var` holds a value.
    #[must_use]
    pub fn is_bound(&self, var: Var) -> bool {
        self.get(var).is_some()
    }

    /// Store `value` in `var`, replacing whatever it held.
    ///
    /// # Panics
    ///
    /// Panics if `var` is outside this arena; rules are validated so that
    /// this cannot happen during evaluation.
    pub fn bind(&mut self, var: Var, value: Value) {
        self.slots[var.0] = Some(value);
    }

    /// Make `var` free again.
    pub fn unbind(&mut self, var: Var) {
        if let Some(slot) = self.slots.get_mut(var.0) {
            *slot = None;
        }
    }

    /// Number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the arena has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
