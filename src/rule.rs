use std::fmt;
use std::rc::Rc;

use indexmap::IndexSet;
use log::trace;
use smallvec::SmallVec;

use crate::error::{EngineError, Result};
use crate::matcher::{bind_slice, is_unseen, may_derive_unseen, Odometer};
use crate::relation::{Fact, Relation};
use crate::state::{SizeDelta, State};
use crate::term::{Bindings, Term, Var, Variables};
use crate::unify::{bind, ground_atom};
use crate::value::{Value, ValueKind};

/// A relation applied to terms, e.g. `Ancestor(x, z)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Atom {
    /// Name of the relation
    pub relation: String,
    /// One term per column
    pub terms: Vec<Term>,
}

impl Atom {
    /// Build an atom over `relation`.
    pub fn new(relation: &str, terms: impl IntoIterator<Item = Term>) -> Self {
        Self {
            relation: relation.to_string(),
            terms: terms.into_iter().collect(),
        }
    }

    /// The variables of this atom, left to right, repeats included.
    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.terms.iter().filter_map(Term::as_var)
    }
}

/// Build an [`Atom`] from a relation name and a list of terms.
///
/// Terms may be variables, [`Value`]s, [`Term`]s or plain Rust constants.
///
/// ```rust
/// use fixlog::{atom, Value, Variables};
///
/// let mut vars = Variables::new();
/// let x = vars.var("x");
/// let pattern = atom!(Thing(x, Value::symbol("person")));
/// assert_eq!(pattern.relation, "Thing");
/// ```
#[macro_export]
macro_rules! atom {
    ($relation:ident ( $($term:expr),* $(,)? )) => {
        $crate::Atom::new(
            ::std::stringify!($relation),
            ::std::vec![$($crate::IntoTerm::into_term($term)),*],
        )
    };
}

/// A host computation whose result is bound into `target` after the body
/// matched. It may read the variables the match bound.
#[derive(Clone)]
pub struct External {
    target: Var,
    compute: Rc<dyn Fn(&Bindings) -> Value>,
}

impl External {
    /// The variable receiving the computed value
    #[must_use]
    pub fn target(&self) -> Var {
        self.target
    }
}

impl fmt::Debug for External {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("External")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// A Horn clause `head :- body`, optionally with external bindings.
///
/// The rule owns the scope its variables were declared in. Rules are plain
/// data: every evaluation allocates its own binding arena, so one rule can
/// be applied any number of times.
#[derive(Debug, Clone)]
pub struct Rule {
    vars: Variables,
    head: Atom,
    body: Vec<Atom>,
    externals: Vec<External>,
}

impl Rule {
    /// A rule deriving `head` whenever every atom of `body` matches.
    #[must_use]
    pub fn new(vars: Variables, head: Atom, body: Vec<Atom>) -> Self {
        Self {
            vars,
            head,
            body,
            externals: Vec::new(),
        }
    }

    /// A body-less rule: asserts its ground head once.
    #[must_use]
    pub fn fact(head: Atom) -> Self {
        Self::new(Variables::new(), head, Vec::new())
    }

    /// Bind `target` to `compute(bindings)` after each successful body match.
    ///
    /// Externals run in the order they were added. If `target` already holds
    /// a different value the combination is rejected.
    #[must_use]
    pub fn with_external(
        mut self,
        target: Var,
        compute: impl Fn(&Bindings) -> Value + 'static,
    ) -> Self {
        self.externals.push(External {
            target,
            compute: Rc::new(compute),
        });
        self
    }

    /// The head atom
    #[must_use]
    pub fn head(&self) -> &Atom {
        &self.head
    }

    /// The body atoms, in matching order
    #[must_use]
    pub fn body(&self) -> &[Atom] {
        &self.body
    }

    /// The external bindings, in invocation order
    #[must_use]
    pub fn externals(&self) -> &[External] {
        &self.externals
    }

    /// The rule's variable scope
    #[must_use]
    pub fn vars(&self) -> &Variables {
        &self.vars
    }

    /// Returns whether every head variable is bound by the body or by an
    /// external. Only such rules are guaranteed to ground their head.
    #[must_use]
    pub fn is_range_restricted(&self) -> bool {
        self.head.vars().all(|var| {
            self.body.iter().any(|atom| atom.vars().any(|v| v == var))
                || self.externals.iter().any(|external| external.target == var)
        })
    }

    /// Check the rule against the relations of `state`.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownRelation`], [`EngineError::ArityMismatch`],
    /// [`EngineError::KindMismatch`] for a constant in a column of another
    /// kind, [`EngineError::UndeclaredVariable`] for a handle from another
    /// scope and [`EngineError::VariableKindConflict`].
    pub fn check(&self, state: &State) -> Result<()> {
        let mut kinds: Vec<Option<ValueKind>> = vec![None; self.vars.len()];

        for atom in std::iter::once(&self.head).chain(&self.body) {
            let schema = state
                .relation(&atom.relation)
                .ok_or_else(|| EngineError::UnknownRelation(atom.relation.clone()))?
                .schema();
            schema.check_arity(atom.terms.len())?;

            for (column, term) in atom.terms.iter().enumerate() {
                match term {
                    Term::Value(value) => schema.check_kind(column, value.kind())?,
                    Term::Var(var) => {
                        self.check_declared(*var)?;
                        let kind = schema.columns()[column];
                        match kinds[var.index()] {
                            None => kinds[var.index()] = Some(kind),
                            Some(first) if first != kind => {
                                return Err(EngineError::VariableKindConflict {
                                    variable: self.vars.display(*var),
                                    first,
                                    second: kind,
                                });
                            }
                            Some(_) => {}
                        }
                    }
                }
            }
        }

        for external in &self.externals {
            self.check_declared(external.target)?;
        }
        Ok(())
    }

    fn check_declared(&self, var: Var) -> Result<()> {
        if self.vars.contains(var) {
            Ok(())
        } else {
            Err(EngineError::UndeclaredVariable {
                index: var.index(),
                relation: self.head.relation.clone(),
            })
        }
    }

    /// Every variable handle must come from the rule's own scope.
    fn check_scope(&self) -> Result<()> {
        std::iter::once(&self.head)
            .chain(&self.body)
            .flat_map(Atom::vars)
            .chain(self.externals.iter().map(External::target))
            .try_for_each(|var| self.check_declared(var))
    }

    fn unbind_externals(&self, bindings: &mut Bindings) {
        for external in &self.externals {
            bindings.unbind(external.target);
        }
    }

    /// Run the externals in order; stops at the first inconsistent result.
    fn bind_externals(&self, bindings: &mut Bindings) -> bool {
        for external in &self.externals {
            let value = (external.compute)(bindings);
            if !bind(&Term::Var(external.target), &value, bindings) {
                return false;
            }
        }
        true
    }
}

/// The rules of a program, applied together every round in this order.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// An empty rule set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule.
    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// The rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Check every rule against `state`.
    ///
    /// # Errors
    ///
    /// The first error of [`Rule::check`].
    pub fn check(&self, state: &State) -> Result<()> {
        self.rules.iter().try_for_each(|rule| rule.check(state))
    }
}

impl FromIterator<Rule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

/// Apply `rule` once to `state` for `round`.
///
/// Returns the head facts of every combination that holds a fact new in this
/// round and unifies with the body and the externals. `delta` is the growth
/// of each relation in the previous round. Facts already in the state are
/// returned too; merging deduplicates them.
///
/// # Errors
///
/// [`EngineError::UnboundVariable`] if a matched rule cannot ground its head,
/// [`EngineError::UnknownRelation`] if the rule names a relation the state
/// lacks, [`EngineError::UndeclaredVariable`] for a variable handle from
/// another scope.
pub fn apply_rule(
    rule: &Rule,
    state: &State,
    round: usize,
    delta: &SizeDelta,
) -> Result<IndexSet<Fact>> {
    rule.check_scope()?;
    let mut derived = IndexSet::new();

    let body_relations = rule
        .body
        .iter()
        .map(|atom| state.index_of(&atom.relation))
        .collect::<Result<SmallVec<[usize; 4]>>>()?;

    if !may_derive_unseen(&body_relations, delta, round) {
        trace!(
            "round {round}: skipping rule for `{}`, no body relation grew",
            rule.head.relation
        );
        return Ok(derived);
    }

    let relations = body_relations
        .iter()
        .map(|&index| state.relation_at(index))
        .collect::<Option<SmallVec<[&Relation; 4]>>>()
        .ok_or_else(|| EngineError::UnknownRelation(rule.head.relation.clone()))?;

    let mut bindings = Bindings::new(rule.vars.len());
    let mut attempts = 0usize;
    for slice in Odometer::new(relations) {
        if !is_unseen(&slice, round) {
            continue;
        }
        attempts += 1;
        rule.unbind_externals(&mut bindings);
        if !bind_slice(&rule.body, &slice, &mut bindings) {
            continue;
        }
        if !rule.bind_externals(&mut bindings) {
            continue;
        }
        derived.insert(ground_atom(&rule.head, &bindings, &rule.vars)?);
    }

    trace!(
        "round {round}: rule for `{}` tried {attempts} combinations, matched {}",
        rule.head.relation,
        derived.len()
    );
    Ok(derived)
}
