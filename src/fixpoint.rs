//! The round loop.
//!
//! Each round applies every rule to the state as it was when the round
//! began, then merges all derived facts at once, tagging newcomers with
//! `round + 1`. The loop stops after the first round in which no relation
//! grows.
//!
//! Termination is only guaranteed for range-restricted rules over a finite
//! domain. Rules whose externals keep inventing values never converge; set
//! [`FixpointConfig::max_rounds`] to bound such programs.

use indexmap::IndexSet;
use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::relation::Fact;
use crate::rule::{apply_rule, RuleSet};
use crate::state::{SizeDelta, State};

/// Tuning for an [`Evaluation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FixpointConfig {
    /// Give up with [`EngineError::RoundLimitExceeded`] instead of starting
    /// round number `max_rounds`. `None` never gives up.
    pub max_rounds: Option<usize>,
}

impl FixpointConfig {
    /// A config capping evaluation at `rounds` rounds.
    #[must_use]
    pub fn with_max_rounds(rounds: usize) -> Self {
        Self {
            max_rounds: Some(rounds),
        }
    }
}

/// Outcome of one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// The state gained this many facts; another round is needed
    Grew(usize),
    /// Nothing new was derived
    Converged,
}

/// Counters of a finished (or ongoing) evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationStats {
    /// Rounds run, including the final empty one
    pub rounds: usize,
    /// Facts added to the state
    pub derived: usize,
}

/// A fixpoint computation of one rule set, driven round by round.
#[derive(Debug)]
pub struct Evaluation<'r> {
    rules: &'r RuleSet,
    config: FixpointConfig,
    heads: Vec<usize>,
    layout: Vec<String>,
    round: usize,
    delta: SizeDelta,
    stats: EvaluationStats,
    converged: bool,
}

impl<'r> Evaluation<'r> {
    /// Prepare to evaluate `rules` over `state`.
    ///
    /// Every fact already in `state` counts as new for the first round.
    ///
    /// # Errors
    ///
    /// Any error of [`RuleSet::check`].
    pub fn new(rules: &'r RuleSet, state: &State, config: FixpointConfig) -> Result<Self> {
        rules.check(state)?;
        for rule in rules.rules() {
            if !rule.is_range_restricted() {
                warn!(
                    "rule deriving `{}` is not range-restricted; grounding its head may fail",
                    rule.head().relation
                );
            }
        }

        let heads = rules
            .rules()
            .iter()
            .map(|rule| state.index_of(&rule.head().relation))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            config,
            heads,
            layout: state
                .relations()
                .map(|relation| relation.schema().name().to_string())
                .collect(),
            round: 0,
            delta: SizeDelta::initial(state),
            stats: EvaluationStats::default(),
            converged: false,
        })
    }

    /// The round the next [`step`](Self::step) runs.
    #[must_use]
    pub fn round(&self) -> usize {
        self.round
    }

    /// Returns whether the fixpoint was reached.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.converged
    }

    /// Counters so far.
    #[must_use]
    pub fn stats(&self) -> EvaluationStats {
        self.stats
    }

    /// Run one round against `state`.
    ///
    /// `state` must be the state this evaluation was created for, advanced
    /// only by previous steps. Once converged, further steps do nothing. A
    /// failed step leaves `state` as it was before the round.
    ///
    /// # Errors
    ///
    /// [`EngineError::StateMismatch`] if `state` declares other relations
    /// than the one given to [`Evaluation::new`],
    /// [`EngineError::RoundLimitExceeded`] when the configured cap is hit,
    /// [`EngineError::UnboundVariable`] from grounding, and schema errors if a
    /// derived fact is ill-typed.
    pub fn step(&mut self, state: &mut State) -> Result<Progress> {
        if self.converged {
            return Ok(Progress::Converged);
        }
        if let Some(max_rounds) = self.config.max_rounds {
            if self.round >= max_rounds {
                return Err(EngineError::RoundLimitExceeded { rounds: self.round });
            }
        }

        self.check_layout(state)?;

        let round = self.round;
        let before = state.sizes();

        let derived = self
            .rules
            .rules()
            .iter()
            .map(|rule| apply_rule(rule, state, round, &self.delta))
            .collect::<Result<Vec<IndexSet<Fact>>>>()?;

        for (&head, facts) in self.heads.iter().zip(&derived) {
            let schema = state
                .relation_at(head)
                .ok_or_else(|| EngineError::StateMismatch(format!("#{head}")))?
                .schema();
            facts.iter().try_for_each(|fact| schema.check(fact))?;
        }
        for (&head, facts) in self.heads.iter().zip(derived) {
            for fact in facts {
                state.insert_derived(head, fact, round + 1)?;
            }
        }

        let delta = state.sizes().delta_since(&before);
        let grown = delta.total();
        self.stats.rounds += 1;
        self.stats.derived += grown;
        debug!("round {round}: derived {grown} new facts");
        for (index, relation) in state.relations().enumerate() {
            if delta.grew(index) {
                debug!(
                    "  {} grew by {} to {}",
                    relation.schema().name(),
                    delta.get(index),
                    relation.len()
                );
            }
        }

        if grown == 0 {
            self.converged = true;
            info!("fix point in {} rounds", self.stats.rounds);
            return Ok(Progress::Converged);
        }

        self.delta = delta;
        self.round += 1;
        Ok(Progress::Grew(grown))
    }

    fn check_layout(&self, state: &State) -> Result<()> {
        let mut names = state.relations().map(|relation| relation.schema().name());
        for expected in &self.layout {
            if names.next() != Some(expected.as_str()) {
                return Err(EngineError::StateMismatch(expected.clone()));
            }
        }
        match names.next() {
            Some(extra) => Err(EngineError::StateMismatch(extra.to_string())),
            None => Ok(()),
        }
    }

    /// Step until convergence and hand back the final state.
    ///
    /// # Errors
    ///
    /// See [`Evaluation::step`].
    pub fn run(mut self, mut state: State) -> Result<(State, EvaluationStats)> {
        while self.step(&mut state)? != Progress::Converged {}
        Ok((state, self.stats))
    }
}

/// Compute the least fixpoint of `rules` over `state`.
///
/// # Errors
///
/// See [`Evaluation::new`] and [`Evaluation::step`].
pub fn fix_point(rules: &RuleSet, state: State) -> Result<State> {
    let (state, _) = Evaluation::new(rules, &state, FixpointConfig::default())?.run(state)?;
    Ok(state)
}

/// [`fix_point`] with a config.
///
/// # Errors
///
/// See [`Evaluation::new`] and [`Evaluation::step`].
pub fn fix_point_with(
    rules: &RuleSet,
    state: State,
    config: FixpointConfig,
) -> Result<(State, EvaluationStats)> {
    Evaluation::new(rules, &state, config)?.run(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::Schema;
    use crate::rule::Rule;
    use crate::term::Variables;
    use crate::value::{Value, ValueKind};
    use crate::{atom, fact};
    use proptest::prelude::*;
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::rc::Rc;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn graph(edges: &[(i64, i64)]) -> State {
        State::new()
            .with_relation(
                Schema::new("edge", [ValueKind::Int, ValueKind::Int]),
                edges.iter().map(|(a, b)| fact![*a, *b]),
            )
            .unwrap()
            .with_relation(Schema::new("path", [ValueKind::Int, ValueKind::Int]), [])
            .unwrap()
    }

    fn base_rule() -> Rule {
        let mut vars = Variables::new();
        let x = vars.var("x");
        let y = vars.var("y");
        Rule::new(vars, atom!(path(x, y)), vec![atom!(edge(x, y))])
    }

    fn step_rule() -> Rule {
        let mut vars = Variables::new();
        let x = vars.var("x");
        let y = vars.var("y");
        let z = vars.var("z");
        Rule::new(vars, atom!(path(x, z)), vec![atom!(path(x, y)), atom!(edge(y, z))])
    }

    fn closure_rules() -> RuleSet {
        [base_rule(), step_rule()].into_iter().collect()
    }

    fn naive_closure(edges: &[(i64, i64)]) -> BTreeSet<(i64, i64)> {
        let mut closure: BTreeSet<(i64, i64)> = edges.iter().copied().collect();
        loop {
            let extra: Vec<(i64, i64)> = closure
                .iter()
                .flat_map(|&(a, b)| {
                    edges
                        .iter()
                        .filter(move |&&(c, _)| c == b)
                        .map(move |&(_, d)| (a, d))
                })
                .filter(|pair| !closure.contains(pair))
                .collect();
            if extra.is_empty() {
                return closure;
            }
            closure.extend(extra);
        }
    }

    fn pairs(state: &State, relation: &str) -> BTreeSet<(i64, i64)> {
        state
            .facts(relation)
            .iter()
            .map(|f| (f[0].as_int().unwrap(), f[1].as_int().unwrap()))
            .collect()
    }

    #[test]
    fn test_longer_chain() {
        init_logger();
        let edges = [(1, 2), (2, 3), (3, 4), (4, 5)];
        let state = fix_point(&closure_rules(), graph(&edges)).unwrap();
        assert_eq!(state.facts("path").len(), 10);
        assert_eq!(pairs(&state, "path"), naive_closure(&edges));
    }

    #[test]
    fn test_cycle_terminates() {
        init_logger();
        let edges = [(1, 2), (2, 3), (3, 1)];
        let state = fix_point(&closure_rules(), graph(&edges)).unwrap();
        assert_eq!(state.facts("path").len(), 9);
    }

    #[test]
    fn test_derived_facts_are_tagged_with_their_round() {
        init_logger();
        let state = fix_point(&closure_rules(), graph(&[(1, 2), (2, 3), (3, 4)])).unwrap();
        let path = state.relation("path").unwrap();
        assert_eq!(path.iteration_of(&fact![1, 2]), Some(1));
        assert_eq!(path.iteration_of(&fact![1, 3]), Some(2));
        assert_eq!(path.iteration_of(&fact![1, 4]), Some(3));
        let edge = state.relation("edge").unwrap();
        assert!(edge.iter().all(|(iteration, _)| iteration == 0));
    }

    #[test]
    fn test_step_is_monotone_and_stats_add_up() {
        init_logger();
        let rules = closure_rules();
        let mut state = graph(&[(1, 2), (2, 3), (3, 4), (4, 5), (5, 6)]);
        let mut evaluation = Evaluation::new(&rules, &state, FixpointConfig::default()).unwrap();

        let initial = state.total_facts();
        let mut previous = state.sizes();
        let mut grown = 0;
        loop {
            let progress = evaluation.step(&mut state).unwrap();
            let now = state.sizes();
            for index in 0..2 {
                assert!(now.get(index) >= previous.get(index));
            }
            previous = now;
            match progress {
                Progress::Grew(n) => grown += n,
                Progress::Converged => break,
            }
        }

        assert!(evaluation.is_converged());
        assert_eq!(evaluation.step(&mut state).unwrap(), Progress::Converged);
        let stats = evaluation.stats();
        assert_eq!(stats.derived, grown);
        assert_eq!(state.total_facts(), initial + grown);
        // one round per chain length, plus the empty one
        assert_eq!(stats.rounds, 6);
    }

    #[test]
    fn test_rerun_on_converged_state_is_idempotent() {
        init_logger();
        let rules = closure_rules();
        let state = fix_point(&rules, graph(&[(1, 2), (2, 3)])).unwrap();
        let before = state.facts("path");

        let (again, stats) = fix_point_with(&rules, state, FixpointConfig::default()).unwrap();
        assert_eq!(stats, EvaluationStats { rounds: 1, derived: 0 });
        assert_eq!(again.facts("path"), before);
    }

    #[test]
    fn test_warm_restart_matches_fresh_evaluation() {
        init_logger();
        let rules = closure_rules();
        let mut state = fix_point(&rules, graph(&[(1, 2), (2, 3)])).unwrap();
        state.insert("edge", fact![3, 4]).unwrap();
        state.insert("edge", fact![0, 1]).unwrap();
        let warm = fix_point(&rules, state).unwrap();

        let edges = [(1, 2), (2, 3), (3, 4), (0, 1)];
        let fresh = fix_point(&rules, graph(&edges)).unwrap();
        assert_eq!(warm.facts("path"), fresh.facts("path"));
        assert_eq!(pairs(&warm, "path"), naive_closure(&edges));
    }

    #[test]
    fn test_round_limit() {
        init_logger();
        let rules = closure_rules();
        let err = fix_point_with(
            &rules,
            graph(&[(1, 2), (2, 3), (3, 4), (4, 5)]),
            FixpointConfig::with_max_rounds(2),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::RoundLimitExceeded { rounds: 2 }));
    }

    #[test]
    fn test_unbounded_external_needs_round_limit() {
        init_logger();
        let state = State::new()
            .with_relation(Schema::new("n", [ValueKind::Int]), [fact![0]])
            .unwrap();
        let mut vars = Variables::new();
        let x = vars.var("x");
        let next = vars.var("next");
        let rules: RuleSet = [Rule::new(vars, atom!(n(next)), vec![atom!(n(x))])
            .with_external(next, move |b| {
                Value::from(b.get(x).and_then(Value::as_int).unwrap_or_default() + 1)
            })]
        .into_iter()
        .collect();

        let err = fix_point_with(&rules, state, FixpointConfig::with_max_rounds(50)).unwrap_err();
        assert!(matches!(err, EngineError::RoundLimitExceeded { rounds: 50 }));
    }

    #[test]
    fn test_external_of_wrong_kind_is_rejected_at_merge() {
        init_logger();
        let state = State::new()
            .with_relation(Schema::new("a", [ValueKind::Int]), [fact![1]])
            .unwrap()
            .with_relation(Schema::new("b", [ValueKind::Int]), [])
            .unwrap();
        let mut vars = Variables::new();
        let x = vars.var("x");
        let y = vars.var("y");
        let rules: RuleSet = [Rule::new(vars, atom!(b(y)), vec![atom!(a(x))])
            .with_external(y, |_| Value::from("not a number"))]
        .into_iter()
        .collect();

        assert!(matches!(
            fix_point(&rules, state),
            Err(EngineError::KindMismatch { .. })
        ));
    }

    #[test]
    fn test_each_matching_combination_is_tried_once() {
        init_logger();
        let calls = Rc::new(Cell::new(0usize));
        let counter = Rc::clone(&calls);

        // the recursive rule, with its head column produced by an external
        let mut vars = Variables::new();
        let x = vars.var("x");
        let y = vars.var("y");
        let z = vars.var("z");
        let target = vars.var("target");
        let counted = Rule::new(
            vars,
            atom!(path(x, target)),
            vec![atom!(path(x, y)), atom!(edge(y, z))],
        )
        .with_external(target, move |b| {
            counter.set(counter.get() + 1);
            b.get(z).cloned().unwrap_or(Value::from(0))
        });
        let rules: RuleSet = [base_rule(), counted].into_iter().collect();

        let edges = [(1, 2), (2, 3), (3, 4), (4, 5)];
        let state = fix_point(&rules, graph(&edges)).unwrap();
        let paths = pairs(&state, "path");
        assert_eq!(paths, naive_closure(&edges));

        let matching = paths
            .iter()
            .flat_map(|&(_, end)| edges.iter().filter(move |&&(from, _)| from == end))
            .count();
        assert_eq!(matching, 6);
        assert_eq!(calls.get(), matching);
    }

    #[test]
    fn test_failed_round_leaves_state_untouched() {
        init_logger();
        let mut vars = Variables::new();
        let x = vars.var("x");
        let y = vars.var("y");
        let z = vars.var("z");
        let ill_typed = Rule::new(vars, atom!(path(x, y)), vec![atom!(edge(x, z))])
            .with_external(y, |_| Value::from("nowhere"));
        let rules: RuleSet = [base_rule(), ill_typed].into_iter().collect();

        let mut state = graph(&[(1, 2), (2, 3)]);
        let mut evaluation = Evaluation::new(&rules, &state, FixpointConfig::default()).unwrap();
        assert!(matches!(
            evaluation.step(&mut state),
            Err(EngineError::KindMismatch { column: 1, .. })
        ));
        assert!(state.facts("path").is_empty());
        assert_eq!(state.total_facts(), 2);
        assert_eq!(evaluation.round(), 0);
    }

    #[test]
    fn test_step_rejects_a_different_state() {
        init_logger();
        let rules = closure_rules();
        let state = graph(&[(1, 2)]);
        let mut evaluation = Evaluation::new(&rules, &state, FixpointConfig::default()).unwrap();

        let mut swapped = State::new()
            .with_relation(Schema::new("path", [ValueKind::Int, ValueKind::Int]), [])
            .unwrap()
            .with_relation(Schema::new("edge", [ValueKind::Int, ValueKind::Int]), [fact![1, 2]])
            .unwrap();
        assert!(matches!(
            evaluation.step(&mut swapped),
            Err(EngineError::StateMismatch(name)) if name == "edge"
        ));
        assert!(swapped.facts("path").is_empty());

        let mut extended = graph(&[(1, 2)])
            .with_relation(Schema::new("extra", [ValueKind::Int]), [])
            .unwrap();
        assert!(matches!(
            evaluation.step(&mut extended),
            Err(EngineError::StateMismatch(name)) if name == "extra"
        ));

        let mut same = state;
        assert_eq!(evaluation.step(&mut same).unwrap(), Progress::Grew(1));
    }

    #[test]
    fn test_invalid_rule_is_rejected_before_evaluation() {
        let rules: RuleSet = [Rule::fact(atom!(missing(1)))].into_iter().collect();
        assert!(matches!(
            fix_point(&rules, graph(&[])),
            Err(EngineError::UnknownRelation(name)) if name == "missing"
        ));
    }

    #[test]
    fn test_no_rules_converges_immediately() {
        let (state, stats) =
            fix_point_with(&RuleSet::new(), graph(&[(1, 2)]), FixpointConfig::default()).unwrap();
        assert_eq!(stats.rounds, 1);
        assert_eq!(state.total_facts(), 1);
    }

    fn arb_edges() -> impl Strategy<Value = Vec<(i64, i64)>> {
        prop::collection::vec((0i64..6, 0i64..6), 0..12)
    }

    proptest! {
        #[test]
        fn closure_matches_naive_evaluation(edges in arb_edges()) {
            let state = fix_point(&closure_rules(), graph(&edges)).unwrap();
            prop_assert_eq!(pairs(&state, "path"), naive_closure(&edges));
        }

        #[test]
        fn rule_order_does_not_change_fixpoint(edges in arb_edges()) {
            let forward = fix_point(&closure_rules(), graph(&edges)).unwrap();
            let reversed: RuleSet = [step_rule(), base_rule()].into_iter().collect();
            let backward = fix_point(&reversed, graph(&edges)).unwrap();
            prop_assert_eq!(forward.facts("path"), backward.facts("path"));
        }

        #[test]
        fn relations_hold_no_duplicates(edges in arb_edges()) {
            let state = fix_point(&closure_rules(), graph(&edges)).unwrap();
            for relation in state.relations() {
                let distinct: BTreeSet<Fact> = relation.iter().map(|(_, f)| f.clone()).collect();
                prop_assert_eq!(distinct.len(), relation.len());
            }
        }
    }
}
