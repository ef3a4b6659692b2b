use indexmap::IndexMap;

#[cfg(feature = "serde")]
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::relation::{Fact, Relation, Schema};
use crate::rule::Atom;
use crate::term::{Bindings, Variables};
use crate::unify::{bind_atom, unbind_atom};
use crate::value::Value;

/// Every relation of a program with its current fact set.
///
/// The fixpoint driver owns the state while it evaluates and only mutates it
/// between rounds. Facts inserted through the public API are input facts and
/// get iteration tag 0.
#[derive(Debug, Clone, Default)]
pub struct State {
    relations: IndexMap<String, Relation>,
}

impl State {
    /// A state with no relations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an empty relation.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateRelation`] if the name is taken.
    pub fn declare(&mut self, schema: Schema) -> Result<()> {
        if self.relations.contains_key(schema.name()) {
            return Err(EngineError::DuplicateRelation(schema.name().to_string()));
        }
        self.relations
            .insert(schema.name().to_string(), Relation::new(schema));
        Ok(())
    }

    /// Declare `schema` and fill it with `facts`.
    ///
    /// # Errors
    ///
    /// See [`State::declare`] and [`State::insert`].
    pub fn with_relation(
        mut self,
        schema: Schema,
        facts: impl IntoIterator<Item = Fact>,
    ) -> Result<Self> {
        let name = schema.name().to_string();
        self.declare(schema)?;
        self.extend(&name, facts)?;
        Ok(self)
    }

    /// Insert an input fact into `relation`.
    ///
    /// Returns whether the fact was new.
    ///
    /// # Errors
    ///
    /// [`EngineError::UnknownRelation`], or a schema error if the fact is not
    /// well-typed.
    pub fn insert(&mut self, relation: &str, fact: Fact) -> Result<bool> {
        let relation = self
            .relations
            .get_mut(relation)
            .ok_or_else(|| EngineError::UnknownRelation(relation.to_string()))?;
        relation.schema().check(&fact)?;
        Ok(relation.insert(fact, 0))
    }

    /// Insert many input facts; returns how many were new.
    ///
    /// # Errors
    ///
    /// See [`State::insert`]. Facts before the failing one stay inserted.
    pub fn extend(
        &mut self,
        relation: &str,
        facts: impl IntoIterator<Item = Fact>,
    ) -> Result<usize> {
        let mut added = 0;
        for fact in facts {
            if self.insert(relation, fact)? {
                added += 1;
            }
        }
        Ok(added)
    }

    pub(crate) fn insert_derived(
        &mut self,
        index: usize,
        fact: Fact,
        iteration: usize,
    ) -> Result<bool> {
        let (_, relation) = self
            .relations
            .get_index_mut(index)
            .ok_or_else(|| EngineError::UnknownRelation(format!("#{index}")))?;
        relation.schema().check(&fact)?;
        Ok(relation.insert(fact, iteration))
    }

    /// The relation called `name`.
    #[must_use]
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub(crate) fn relation_at(&self, index: usize) -> Option<&Relation> {
        self.relations.get_index(index).map(|(_, relation)| relation)
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<usize> {
        self.relations
            .get_index_of(name)
            .ok_or_else(|| EngineError::UnknownRelation(name.to_string()))
    }

    /// All relations in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> + '_ {
        self.relations.values()
    }

    /// The tuples of `relation` sorted by value; empty if it is unknown.
    #[must_use]
    pub fn facts(&self, relation: &str) -> Vec<Fact> {
        self.relations
            .get(relation)
            .map(Relation::sorted_facts)
            .unwrap_or_default()
    }

    /// Total number of facts across relations.
    #[must_use]
    pub fn total_facts(&self) -> usize {
        self.relations.values().map(Relation::len).sum()
    }

    /// Current size of every relation.
    #[must_use]
    pub fn sizes(&self) -> Sizes {
        Sizes(self.relations.values().map(Relation::len).collect())
    }

    /// Every binding of the query's variables that matches a fact.
    ///
    /// Anonymous variables are left out of the results. Unknown relations
    /// have no answers.
    #[must_use]
    pub fn query(&self, query: &Query) -> Vec<QueryResult> {
        let Some(relation) = self.relations.get(&query.atom.relation) else {
            return Vec::new();
        };

        let mut bindings = Bindings::new(query.arena_len());
        relation
            .iter()
            .filter_map(|(_, fact)| {
                unbind_atom(&query.atom, &mut bindings);
                bind_atom(&query.atom, fact, &mut bindings).then(|| query.result(&bindings))
            })
            .collect()
    }

    /// Returns whether the query has at least one answer.
    #[must_use]
    pub fn ask(&self, query: &Query) -> bool {
        let Some(relation) = self.relations.get(&query.atom.relation) else {
            return false;
        };
        let mut bindings = Bindings::new(query.arena_len());
        relation.iter().any(|(_, fact)| {
            unbind_atom(&query.atom, &mut bindings);
            bind_atom(&query.atom, fact, &mut bindings)
        })
    }

    /// Serialize every relation, with iteration tags, as pretty JSON.
    ///
    /// # Errors
    ///
    /// [`EngineError::Serialization`] if `serde_json` fails.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        let snapshot: Vec<RelationSnapshot<'_>> = self
            .relations
            .values()
            .map(|relation| RelationSnapshot {
                schema: relation.schema(),
                facts: relation
                    .iter()
                    .map(|(iteration, fact)| TaggedFact { iteration, fact })
                    .collect(),
            })
            .collect();
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }
}

#[cfg(feature = "serde")]
#[derive(Serialize)]
struct RelationSnapshot<'a> {
    schema: &'a Schema,
    facts: Vec<TaggedFact<'a>>,
}

#[cfg(feature = "serde")]
#[derive(Serialize)]
struct TaggedFact<'a> {
    iteration: usize,
    fact: &'a Fact,
}

/// Relation sizes at one point in time, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sizes(Vec<usize>);

impl Sizes {
    /// Growth per relation since `before`.
    #[must_use]
    pub fn delta_since(&self, before: &Sizes) -> SizeDelta {
        SizeDelta(
            self.0
                .iter()
                .zip(before.0.iter().chain(std::iter::repeat(&0)))
                .map(|(now, then)| now.saturating_sub(*then))
                .collect(),
        )
    }

    /// Size of the relation at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> usize {
        self.0.get(index).copied().unwrap_or(0)
    }
}

/// How many facts each relation gained in one round.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SizeDelta(Vec<usize>);

impl SizeDelta {
    /// Delta from explicit per-relation counts.
    #[must_use]
    pub fn from_counts(counts: Vec<usize>) -> Self {
        Self(counts)
    }

    /// The delta before the first round: every fact is new.
    #[must_use]
    pub fn initial(state: &State) -> Self {
        Self(state.sizes().0)
    }

    /// Returns whether the relation at `index` grew.
    #[must_use]
    pub fn grew(&self, index: usize) -> bool {
        self.get(index) > 0
    }

    /// Growth of the relation at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> usize {
        self.0.get(index).copied().unwrap_or(0)
    }

    /// Growth summed over all relations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.0.iter().sum()
    }
}

/// A pattern to look up in a [`State`], with its own variable scope.
#[derive(Debug, Clone)]
pub struct Query {
    vars: Variables,
    /// The pattern matched against the relation's facts
    pub atom: Atom,
}

impl Query {
    /// A query for `atom`, whose variables come from `vars`.
    #[must_use]
    pub fn new(vars: Variables, atom: Atom) -> Self {
        Self { vars, atom }
    }

    /// Arena size covering every handle in the pattern, including handles
    /// from other scopes, which then match like unnamed variables.
    fn arena_len(&self) -> usize {
        self.atom
            .vars()
            .map(|var| var.index() + 1)
            .fold(self.vars.len(), usize::max)
    }

    fn result(&self, bindings: &Bindings) -> QueryResult {
        let bindings = self
            .atom
            .terms
            .iter()
            .filter_map(|term| term.as_var())
            .filter(|&var| !self.vars.is_anonymous(var))
            .filter_map(|var| {
                let name = self.vars.name(var)?;
                Some((name.to_string(), bindings.get(var)?.clone()))
            })
            .collect();
        QueryResult { bindings }
    }
}

/// One answer to a [`Query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Variable name to value
    pub bindings: IndexMap<String, Value>,
}
