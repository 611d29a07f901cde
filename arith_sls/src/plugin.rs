use std::{
    collections::HashMap,
    fmt::{Debug, Display},
    hash::Hash,
};

use log::{debug, info};
use rand::Rng;
use utility::{SparseMap, SparseSet};

use crate::{
    config::Config,
    error::{ArithError, ArithResult},
    ineq::Ineq,
    lookahead::Lookahead,
    moves::SearchState,
    numeral::Numeral,
    policy::{RestartSchedule, Ucb},
    stats::{Stats, StatisticsSink},
    term::{Context, Sort},
    types::{BoolVar, Literal},
    vars::{Definition, VarId, VarStore},
};

/// Arithmetic plugin of a Boolean local-search driver. Owns the variable,
/// definition and inequality stores and all search state; the driver is
/// passed in explicitly on every call that needs it.
pub struct ArithPlugin<N, T, R> {
    pub(crate) config: Config,
    pub(crate) rng: R,
    pub(crate) store: VarStore<N, T>,
    pub(crate) term_to_var: HashMap<T, VarId>,
    pub(crate) ineqs: SparseMap<Ineq<N>>,
    pub(crate) distincts: SparseMap<Vec<VarId>>,
    /// Boolean variables of all registered arithmetic atoms, in registration order.
    pub(crate) atoms: Vec<BoolVar>,
    pub(crate) units: SparseSet,
    pub(crate) fixed_atoms: SparseSet,
    /// Values requested through `set_value` for defined variables.
    pub(crate) pending: SparseMap<N>,
    pub(crate) search: SearchState<N>,
    pub(crate) ucb: Ucb,
    pub(crate) restart: RestartSchedule,
    pub(crate) lookahead: Lookahead<N, T>,
    pub(crate) stats: Stats,
    pub(crate) initialized: bool,
}

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    pub fn new(mut config: Config, rng: R) -> Self {
        let search = SearchState::new(config.pool_capacity());
        let ucb = Ucb::new(config.ucb_init);
        config.restart_next = config.restart_init;
        let restart = RestartSchedule::new(config.restart_init as u64);
        let lookahead = Lookahead::new(config.max_moves_base);
        Self {
            config,
            rng,
            store: VarStore::default(),
            term_to_var: HashMap::new(),
            ineqs: SparseMap::default(),
            distincts: SparseMap::default(),
            atoms: Vec::new(),
            units: SparseSet::default(),
            fixed_atoms: SparseSet::default(),
            pending: SparseMap::default(),
            search,
            ucb,
            restart,
            lookahead,
            stats: Stats::default(),
            initialized: false,
        }
    }

    pub fn config(&self) -> &Config {
        return &self.config;
    }

    pub fn stats(&self) -> &Stats {
        return &self.stats;
    }

    pub fn num_vars(&self) -> usize {
        return self.store.len();
    }

    pub fn var_of(&self, term: T) -> Option<VarId> {
        return self.term_to_var.get(&term).copied();
    }

    pub fn ineq(&self, atom: BoolVar) -> Option<&Ineq<N>> {
        return self.ineqs.get(atom);
    }

    pub fn value(&self, v: VarId) -> &N {
        return self.store.value(v);
    }

    pub fn best_value(&self, v: VarId) -> &N {
        return self.store.vars[v].best_value();
    }

    fn numeric_var<C: Context<Term = T>>(&self, ctx: &C, term: T) -> ArithResult<VarId> {
        if !matches!(ctx.sort(term), Sort::Int | Sort::Real) {
            return Err(ArithError::NotNumeric(format!("{:?}", term)));
        }
        self.var_of(term)
            .ok_or_else(|| ArithError::Unregistered(format!("{:?}", term)))
    }

    /// External override of a numeric term. A free variable is moved at once;
    /// a defined one keeps the value as a target for [`ArithPlugin::repair_down`].
    pub fn set_value<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        term: T,
        value: N,
    ) -> ArithResult<()> {
        let v = self.numeric_var(ctx, term)?;
        if self.store.vars[v].is_int() && !value.is_integral() {
            return Err(ArithError::NotRepresentable(value.to_string()));
        }
        if self.store.is_defined(v) {
            if value == *self.store.value(v) {
                self.pending.remove(v);
            } else {
                self.pending.insert(v, value);
            }
            return Ok(());
        }
        if value == *self.store.value(v) {
            return Ok(());
        }
        self.update(ctx, v, value)
    }

    pub fn get_value(&self, term: T) -> ArithResult<N> {
        let v = self
            .var_of(term)
            .ok_or_else(|| ArithError::Unregistered(format!("{:?}", term)))?;
        Ok(self.store.value(v).clone())
    }

    /// Value of `term` if no move can change it.
    pub fn is_fixed(&self, term: T) -> Option<N> {
        let v = self.var_of(term)?;
        let info = &self.store.vars[v];
        if info.is_fixed() && !info.conflicting {
            return Some(info.value().clone());
        }
        None
    }

    /// Builds bounds from unit literals and input assertions, moves initial
    /// values into bounds and aligns the Boolean value of every non-unit atom
    /// with its arithmetic value.
    pub fn initialize<C: Context<Term = T>>(&mut self, ctx: &mut C) -> ArithResult<()> {
        for literal in ctx.unit_literals() {
            self.initialize_unit(literal)?;
        }
        for root in ctx.input_assertions() {
            self.initialize_input_assertion(ctx, root)?;
        }
        for v in 0..self.store.len() {
            if self.store.is_defined(v) {
                let value = self.store.eval_definition(v)?;
                self.store.vars[v].set_value(value);
                continue;
            }
            if let Some(value) = self.store.vars[v].nearest_in_bounds()? {
                self.store.vars[v].set_value(value);
            }
        }
        for &atom in self.atoms.iter() {
            if let Some(ineq) = self.ineqs.get_mut(atom) {
                ineq.args_value = ineq.term.eval(&self.store)?;
            }
        }
        for position in 0..self.atoms.len() {
            let atom = self.atoms[position];
            if self.units.contains(atom) {
                continue;
            }
            let Some(truth) = self.atom_truth(atom) else {
                continue;
            };
            if ctx.is_true(Literal::positive(atom)) != truth {
                ctx.flip(atom);
            }
        }
        self.save_best_values();
        self.search.best_unsat = ctx.unsat_clauses().len();
        let (ineqs, distincts) = (&self.ineqs, &self.distincts);
        self.lookahead.build(ctx, self.config.paws_init, |atom| {
            ineqs.contains_key(atom) || distincts.contains_key(atom)
        });
        self.initialized = true;
        info!(
            "arith initialized: {} vars, {} atoms, {} units",
            self.store.len(),
            self.atoms.len(),
            self.units.len()
        );
        Ok(())
    }

    /// Clears per-round state before the driver propagates a new assignment.
    pub fn start_propagation(&mut self) {
        self.search.last_move = None;
        self.search.pool.clear();
    }

    /// Repairs the arithmetic of `literal` if it disagrees with the Boolean value.
    pub fn propagate_literal<C: Context<Term = T>>(&mut self, ctx: &mut C, literal: Literal) {
        self.stats.propagations += 1;
        if !ctx.is_true(literal) || self.is_consistent(literal) {
            return;
        }
        if let Err(err) = self.repair_literal(ctx, literal) {
            debug!("propagate {}: {}", literal, err);
        }
    }

    /// Runs the enabled lookahead searches and reports whether atoms became
    /// fixed since the last call.
    pub fn propagate<C: Context<Term = T>>(&mut self, ctx: &mut C) -> bool {
        if !self.initialized {
            return false;
        }
        if self.config.use_lookahead {
            if let Err(err) = self.global_search(ctx) {
                debug!("global search: {}", err);
            }
        }
        if self.config.use_clausal_lookahead {
            if let Err(err) = self.clausal_search(ctx) {
                debug!("clausal search: {}", err);
            }
        }
        let mut fixed = false;
        for position in 0..self.atoms.len() {
            let atom = self.atoms[position];
            if self.fixed_atoms.contains(atom) || !self.atom_is_fixed(atom) {
                continue;
            }
            self.fixed_atoms.insert(atom);
            fixed = true;
        }
        fixed
    }

    fn atom_is_fixed(&self, atom: BoolVar) -> bool {
        if let Some(ineq) = self.ineqs.get(atom) {
            return ineq.term.args.iter().all(|&(_, v)| self.var_is_fixed(v));
        }
        self.distincts
            .get(atom)
            .is_some_and(|args| args.iter().all(|&v| self.var_is_fixed(v)))
    }

    /// Fixed after following definitions down to their free operands.
    pub(crate) fn var_is_fixed(&self, v: VarId) -> bool {
        if self.store.is_defined(v) {
            return self.store.operands(v).all(|w| self.var_is_fixed(w));
        }
        self.store.vars[v].is_fixed()
    }

    /// Re-evaluates `term` from its operands, dropping any pending target. For
    /// an atom, aligns its Boolean value with the arithmetic.
    pub fn repair_up<C: Context<Term = T>>(&mut self, ctx: &mut C, term: T) {
        if let Some(v) = self.var_of(term) {
            self.pending.remove(v);
            let result = self
                .store
                .eval_definition(v)
                .and_then(|value| self.update(ctx, v, value));
            if let Err(err) = result {
                debug!("repair up v{}: {}", v, err);
            }
            return;
        }
        let Some(atom) = ctx.bool_var(term) else {
            return;
        };
        if self.units.contains(atom) {
            return;
        }
        if let Some(truth) = self.atom_truth(atom)
            && ctx.is_true(Literal::positive(atom)) != truth
        {
            ctx.flip(atom);
        }
    }

    /// Moves the operands of `term` so that it reaches its pending target, or,
    /// for an atom, repairs the arithmetic towards its Boolean value.
    pub fn repair_down<C: Context<Term = T>>(&mut self, ctx: &mut C, term: T) -> bool {
        if let Some(v) = self.var_of(term) {
            let Some(target) = self.pending.remove(v) else {
                return true;
            };
            return match self.apply_target(ctx, v, target.clone()) {
                Ok(()) => *self.store.value(v) == target,
                Err(err) => {
                    debug!("repair down v{} to {}: {}", v, target, err);
                    self.stats.failed_repairs += 1;
                    false
                }
            };
        }
        let Some(atom) = ctx.bool_var(term) else {
            return false;
        };
        let literal = Literal::new(atom, !ctx.is_true(Literal::positive(atom)));
        self.repair_literal(ctx, literal).is_ok()
    }

    /// One flat repair step for a literal the driver wants to hold. Fails with
    /// [`ArithError::NoMove`] if no candidate update exists.
    pub fn repair_literal<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        literal: Literal,
    ) -> ArithResult<()> {
        if !self.initialized {
            return Err(ArithError::NotInitialized);
        }
        if self.atom_truth(literal.var()).is_none() || self.is_consistent(literal) {
            return Ok(());
        }
        self.stats.steps += 1;
        self.stats.repairs += 1;
        self.check_restart(ctx);
        self.search.target = Some(literal);
        self.search.pool.clear();
        let result = self.find_moves(ctx, literal).and_then(|()| self.apply_update(ctx));
        self.search.target = None;
        if let Err(err) = &result {
            self.stats.failed_repairs += 1;
            debug!("repair {} failed: {}", literal, err);
        }
        #[cfg(debug_assertions)]
        self.check_invariants();
        result
    }

    /// Whether every arithmetic atom agrees with its Boolean value.
    pub fn is_sat<C: Context<Term = T>>(&self, ctx: &C) -> bool {
        self.atoms.iter().all(|&atom| {
            self.atom_truth(atom)
                .is_none_or(|truth| truth == ctx.is_true(Literal::positive(atom)))
        })
    }

    pub fn on_rescale(&mut self) {
        self.lookahead.reset_weights(self.config.paws_init);
    }

    pub fn on_restart(&mut self) {
        for info in self.store.vars.iter_mut() {
            info.reset_tabu();
        }
        self.search.last_move = None;
        self.search.no_improve = 0;
        self.pending.clear();
        self.lookahead.clear_tabu();
        self.ucb.reset(self.config.ucb_init);
    }

    pub fn collect_statistics(&self, sink: &mut impl StatisticsSink) {
        self.stats.collect(sink);
    }

    /// Zeroes the counters. The step count restarts at zero, so does the
    /// restart schedule.
    pub fn reset_statistics(&mut self) {
        self.stats = Stats::default();
        self.restart = RestartSchedule::new(self.config.restart_init as u64);
        self.config.restart_next = self.config.restart_init;
    }

    /// Arithmetic truth of an atom, `None` for atoms owned by other theories.
    pub(crate) fn atom_truth(&self, atom: BoolVar) -> Option<bool> {
        if let Some(ineq) = self.ineqs.get(atom) {
            return Some(ineq.is_true());
        }
        self.distincts.get(atom).map(|args| self.eval_distinct(args))
    }

    pub(crate) fn is_consistent(&self, literal: Literal) -> bool {
        self.atom_truth(literal.var())
            .is_none_or(|truth| truth != literal.sign())
    }

    pub(crate) fn eval_distinct(&self, args: &[VarId]) -> bool {
        self.eval_distinct_by(args, |v| self.store.value(v))
    }

    pub(crate) fn eval_distinct_by<'a>(
        &self,
        args: &[VarId],
        value: impl Fn(VarId) -> &'a N,
    ) -> bool
    where
        N: 'a,
    {
        let mut seen = std::collections::HashSet::with_capacity(args.len());
        args.iter().all(|&v| seen.insert(value(v)))
    }

    /// Checks cached values against a full re-evaluation.
    pub fn check_invariants(&self) {
        for v in 0..self.store.len() {
            let info = &self.store.vars[v];
            debug_assert!(self.store.operands(v).all(|w| w < v));
            if info.definition.is_some() {
                debug_assert_eq!(
                    self.store.eval_definition(v).ok().as_ref(),
                    Some(info.value()),
                    "stale definition of v{}",
                    v
                );
            }
        }
        for (atom, ineq) in self.ineqs.iter() {
            debug_assert_eq!(
                ineq.term.eval(&self.store).ok().as_ref(),
                Some(&ineq.args_value),
                "stale left-hand side of atom b{}",
                atom
            );
        }
    }
}

impl<N, T, R> Display for ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (v, info) in self.store.vars.iter().enumerate() {
            write!(f, "v{} {:?} := {}", v, info.term, info.value())?;
            if let Some(lo) = &info.lo {
                write!(f, " {}{}", if lo.is_strict { "(" } else { "[" }, lo.value)?;
            } else {
                write!(f, " (-oo")?;
            }
            if let Some(hi) = &info.hi {
                write!(f, ", {}{}", hi.value, if hi.is_strict { ")" } else { "]" })?;
            } else {
                write!(f, ", +oo)")?;
            }
            match info.definition {
                None => {}
                Some(Definition::Mul(index)) => {
                    write!(f, " =")?;
                    for &(w, p) in self.store.muls[index].monomial.iter() {
                        write!(f, " v{}^{}", w, p)?;
                    }
                }
                Some(Definition::Add(index)) => {
                    let ad = &self.store.adds[index];
                    write!(f, " = {}", ad.term.constant)?;
                    for (c, w) in ad.term.args.iter() {
                        write!(f, " + {} * v{}", c, w)?;
                    }
                }
                Some(Definition::Op(index)) => {
                    let od = &self.store.ops[index];
                    write!(f, " = {} v{}", od.kind, od.arg1)?;
                    if let Some(arg2) = od.arg2 {
                        write!(f, " v{}", arg2)?;
                    }
                }
            }
            writeln!(f)?;
        }
        for (atom, ineq) in self.ineqs.iter() {
            writeln!(f, "b{}: {}", atom, ineq)?;
        }
        for (atom, args) in self.distincts.iter() {
            writeln!(f, "b{}: distinct {:?}", atom, args)?;
        }
        Ok(())
    }
}
