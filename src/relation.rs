use std::fmt;
use std::ops::Deref;

use indexmap::IndexMap;
use smallvec::SmallVec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::value::{Value, ValueKind};

/// A named predicate with a fixed list of column kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Schema {
    name: String,
    columns: SmallVec<[ValueKind; 4]>,
}

impl Schema {
    /// Declare relation `name` with the given column kinds.
    pub fn new(name: &str, columns: impl IntoIterator<Item = ValueKind>) -> Self {
        Self {
            name: name.to_string(),
            columns: columns.into_iter().collect(),
        }
    }

    /// Relation name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column kinds in order
    #[must_use]
    pub fn columns(&self) -> &[ValueKind] {
        &self.columns
    }

    /// Number of columns
    #[must_use]
    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    /// Checks that `fact` is well-typed for this schema.
    ///
    /// # Errors
    ///
    /// [`EngineError::ArityMismatch`] or [`EngineError::KindMismatch`].
    pub fn check(&self, fact: &Fact) -> Result<()> {
        self.check_arity(fact.len())?;
        for (column, value) in fact.iter().enumerate() {
            self.check_kind(column, value.kind())?;
        }
        Ok(())
    }

    pub(crate) fn check_arity(&self, found: usize) -> Result<()> {
        if found == self.arity() {
            Ok(())
        } else {
            Err(EngineError::ArityMismatch {
                relation: self.name.clone(),
                expected: self.arity(),
                found,
            })
        }
    }

    pub(crate) fn check_kind(&self, column: usize, found: ValueKind) -> Result<()> {
        let expected = self.columns[column];
        if expected == found {
            Ok(())
        } else {
            Err(EngineError::KindMismatch {
                relation: self.name.clone(),
                column,
                expected,
                found,
            })
        }
    }
}

/// A ground tuple of values.
///
/// Identity is structural: two facts with the same values are the same fact,
/// whatever round derived them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Fact(SmallVec<[Value; 4]>);

impl Fact {
    /// Build a fact from its column values.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self(values.into_iter().collect())
    }

    /// The column values.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl Deref for Fact {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl FromIterator<Value> for Fact {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter)
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

/// Build a [`Fact`] from values convertible into [`Value`].
///
/// ```rust
/// use fixlog::{fact, Value};
///
/// let f = fact!["Tim", 25, Value::symbol("person")];
/// assert_eq!(f.len(), 3);
/// ```
#[macro_export]
macro_rules! fact {
    ($($value:expr),* $(,)?) => {
        $crate::Fact::new(::std::vec![$($crate::Value::from($value)),*])
    };
}

/// The fact set of one relation.
///
/// Each fact carries the iteration that first inserted it: 0 for input facts,
/// `k + 1` for facts derived in round `k`. Re-inserting a known fact keeps
/// the original tag. Enumeration follows insertion order, which is stable
/// for a given program and input.
#[derive(Debug, Clone)]
pub struct Relation {
    schema: Schema,
    facts: IndexMap<Fact, usize>,
}

impl Relation {
    /// An empty relation for `schema`.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            facts: IndexMap::new(),
        }
    }

    /// The relation's schema
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Number of facts
    #[must_use]
    pub fn len(&self) -> usize {
        self.facts.len()
    }

    /// Returns true if the relation holds no facts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    /// Number of facts added since the relation had `snapshot` facts.
    ///
    /// Relations only grow, so a snapshot is just a size.
    #[must_use]
    pub fn delta_since(&self, snapshot: usize) -> usize {
        self.facts.len().saturating_sub(snapshot)
    }

    /// Insert `fact` tagged with `iteration`.
    ///
    /// Returns whether the fact was new. The caller is responsible for the
    /// fact being well-typed (see [`Schema::check`]).
    pub fn insert(&mut self, fact: Fact, iteration: usize) -> bool {
        match self.facts.entry(fact) {
            indexmap::map::Entry::Occupied(_) => false,
            indexmap::map::Entry::Vacant(entry) => {
                entry.insert(iteration);
                true
            }
        }
    }

    /// Returns whether `fact` is present.
    #[must_use]
    pub fn contains(&self, fact: &Fact) -> bool {
        self.facts.contains_key(fact)
    }

    /// The iteration tag of `fact`, if present.
    #[must_use]
    pub fn iteration_of(&self, fact: &Fact) -> Option<usize> {
        self.facts.get(fact).copied()
    }

    /// The `index`-th fact in enumeration order with its tag.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<(usize, &Fact)> {
        self.facts
            .get_index(index)
            .map(|(fact, iteration)| (*iteration, fact))
    }

    /// All facts with their iteration tags, in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Fact)> + '_ {
        self.facts.iter().map(|(fact, iteration)| (*iteration, fact))
    }

    /// All facts sorted by value.
    #[must_use]
    pub fn sorted_facts(&self) -> Vec<Fact> {
        let mut facts: Vec<Fact> = self.facts.keys().cloned().collect();
        facts.sort();
        facts
    }
}
