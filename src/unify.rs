//! Matching terms and atoms against stored values.
//!
//! Binding is destructive: a successful `bind` leaves the variable bound and
//! a failed [`bind_atom`] leaves every binding made before the failing column
//! in place. Callers unbind the whole attempt (see [`unbind_atoms`]) before
//! trying the next candidate.

use crate::error::Result;
use crate::relation::Fact;
use crate::rule::Atom;
use crate::term::{Bindings, Term, Variables};
use crate::value::Value;

/// Unify one term with `value`.
///
/// A constant matches an equal value. A bound variable matches the value it
/// holds. A free variable is bound to `value` and matches.
pub fn bind(term: &Term, value: &Value, bindings: &mut Bindings) -> bool {
    match term {
        Term::Value(constant) => constant == value,
        Term::Var(var) => match bindings.get(*var) {
            Some(bound) => bound == value,
            None => {
                bindings.bind(*var, value.clone());
                true
            }
        },
    }
}

/// Unify `atom` with `fact` column by column, stopping at the first failure.
///
/// Partial bindings are not undone on failure.
pub fn bind_atom(atom: &Atom, fact: &Fact, bindings: &mut Bindings) -> bool {
    atom.terms.len() == fact.len()
        && atom
            .terms
            .iter()
            .zip(fact.iter())
            .all(|(term, value)| bind(term, value, bindings))
}

/// Unbind every variable of `atom`, left to right.
pub fn unbind_atom(atom: &Atom, bindings: &mut Bindings) {
    for term in &atom.terms {
        term.unbind(bindings);
    }
}

/// Unbind every variable of every atom in `atoms`.
pub fn unbind_atoms(atoms: &[Atom], bindings: &mut Bindings) {
    for atom in atoms {
        unbind_atom(atom, bindings);
    }
}

/// Build the fact `atom` denotes under `bindings`.
///
/// # Errors
///
/// Returns [`EngineError::UnboundVariable`](crate::EngineError::UnboundVariable)
/// if any variable of `atom` is free.
pub fn ground_atom(atom: &Atom, bindings: &Bindings, vars: &Variables) -> Result<Fact> {
    atom.terms
        .iter()
        .map(|term| term.ground(bindings, vars, &atom.relation))
        .collect()
}
