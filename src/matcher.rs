//! Enumeration of candidate fact combinations for a rule body.
//!
//! [`Odometer`] walks the full Cartesian product of the body relations like a
//! mixed-radix counter: the last cursor moves fastest and carries into the
//! one before it when it wraps. The semi-naive checks prune that product:
//! [`may_derive_unseen`] skips a rule outright when none of its body relations
//! grew in the previous round, and [`is_unseen`] skips every combination that
//! holds no fact derived in the previous round, since an earlier round already
//! tried it.

use smallvec::SmallVec;

use crate::relation::{Fact, Relation};
use crate::rule::Atom;
use crate::state::SizeDelta;
use crate::term::Bindings;
use crate::unify::{bind_atom, unbind_atoms};

/// One candidate combination: a tagged fact per body atom, in body order.
pub type Slice<'a> = SmallVec<[(usize, &'a Fact); 4]>;

/// Cartesian product iterator over a list of relations (repeats allowed).
#[derive(Debug)]
pub struct Odometer<'a> {
    relations: SmallVec<[&'a Relation; 4]>,
    cursors: SmallVec<[usize; 4]>,
    finished: bool,
}

impl<'a> Odometer<'a> {
    /// Start at the first combination.
    ///
    /// With no relations there is exactly one, empty, combination. If any
    /// relation is empty there is none.
    pub fn new(relations: impl IntoIterator<Item = &'a Relation>) -> Self {
        let relations: SmallVec<[&'a Relation; 4]> = relations.into_iter().collect();
        let finished = relations.iter().any(|relation| relation.is_empty());
        let cursors = SmallVec::from_elem(0, relations.len());
        Self {
            relations,
            cursors,
            finished,
        }
    }

    /// Returns whether another combination is available.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.finished
    }

    fn pick(&self) -> Slice<'a> {
        self.relations
            .iter()
            .zip(&self.cursors)
            .filter_map(|(relation, cursor)| relation.get_index(*cursor))
            .collect()
    }

    fn advance(&mut self) {
        for position in (0..self.cursors.len()).rev() {
            self.cursors[position] += 1;
            if self.cursors[position] < self.relations[position].len() {
                return;
            }
            self.cursors[position] = 0;
        }
        // carried past the first cursor
        self.finished = true;
    }

    fn remaining(&self) -> Option<usize> {
        if self.finished {
            return Some(0);
        }
        let mut total: usize = 1;
        let mut consumed: usize = 0;
        for (relation, cursor) in self.relations.iter().zip(&self.cursors).rev() {
            consumed = consumed.checked_add(cursor.checked_mul(total)?)?;
            total = total.checked_mul(relation.len())?;
        }
        Some(total - consumed)
    }
}

impl<'a> Iterator for Odometer<'a> {
    type Item = Slice<'a>;

    fn next(&mut self) -> Option<Slice<'a>> {
        if self.finished {
            return None;
        }
        let slice = self.pick();
        self.advance();
        Some(slice)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self.remaining() {
            Some(n) => (n, Some(n)),
            None => (usize::MAX, None),
        }
    }
}

/// Relation-level check: can a rule over `body_relations` produce anything
/// new in `round`?
///
/// `body_relations` are positions in the state, `delta` is the growth of the
/// previous round. A body-less rule only fires in round 0.
#[must_use]
pub fn may_derive_unseen(body_relations: &[usize], delta: &SizeDelta, round: usize) -> bool {
    if body_relations.is_empty() {
        return round == 0;
    }
    body_relations
        .iter()
        .any(|&relation| delta.grew(relation))
}

/// Combination-level check: does `slice` hold at least one fact tagged with
/// `round`, i.e. derived by the previous round (or input, in round 0)?
#[must_use]
pub fn is_unseen(slice: &Slice<'_>, round: usize) -> bool {
    if slice.is_empty() {
        return round == 0;
    }
    slice.iter().any(|(iteration, _)| *iteration == round)
}

/// Unify a whole body with one combination.
///
/// Unbinds every body variable first, then binds atom `i` to fact `i` in
/// order and stops at the first atom that does not match.
pub fn bind_slice(body: &[Atom], slice: &Slice<'_>, bindings: &mut Bindings) -> bool {
    unbind_atoms(body, bindings);
    body.len() == slice.len()
        && body
            .iter()
            .zip(slice)
            .all(|(atom, (_, fact))| bind_atom(atom, fact, bindings))
}
