//! Candidate moves for violated literals, their scores, and committing a move
//! through the definitions and inequalities that depend on it.

use std::{cmp::Ordering, fmt::Debug, hash::Hash};

use log::{debug, info, trace};
use rand::Rng;
use utility::{BoundedPool, PriorityQueue, SparseMap, SparseSet};

use crate::{
    error::{ArithError, ArithResult},
    ineq::{Ineq, IneqKind},
    numeral::Numeral,
    plugin::ArithPlugin,
    policy::{MoveType, tabu_tenure},
    term::Context,
    types::{BoolVar, Literal},
    vars::VarId,
};

#[derive(Clone, Debug, PartialEq)]
pub struct VarChange<N> {
    pub var: VarId,
    pub delta: N,
}

/// New values of everything a single variable update reaches.
pub(crate) struct Effect<N> {
    pub vars: SparseMap<N>,
    /// New left-hand sides, by atom.
    pub args: SparseMap<N>,
    /// New truth of distinct atoms, by atom.
    pub distinct: SparseMap<bool>,
}

impl<N> Default for Effect<N> {
    fn default() -> Self {
        Self {
            vars: SparseMap::default(),
            args: SparseMap::default(),
            distinct: SparseMap::default(),
        }
    }
}

impl<N> Effect<N> {
    fn clear(&mut self) {
        self.vars.clear();
        self.args.clear();
        self.distinct.clear();
    }
}

type VarQueue = PriorityQueue<VarId, fn(&VarId, &VarId) -> Ordering>;

/// Buffers reused by every simulation, so that a call only touches the
/// entries it fills.
pub(crate) struct Scratch<N> {
    pub effect: Effect<N>,
    queue: VarQueue,
    queued: SparseSet,
    distinct_atoms: SparseSet,
}

impl<N> Default for Scratch<N> {
    fn default() -> Self {
        Self {
            effect: Effect::default(),
            queue: PriorityQueue::new(VarId::cmp as fn(&VarId, &VarId) -> Ordering),
            queued: SparseSet::default(),
            distinct_atoms: SparseSet::default(),
        }
    }
}

impl<N> Scratch<N> {
    fn clear(&mut self) {
        self.effect.clear();
        self.queue.clear();
        self.queued.clear();
        self.distinct_atoms.clear();
    }
}

pub(crate) struct SearchState<N> {
    pub pool: BoundedPool<VarChange<N>>,
    /// Literal being repaired; scoring rewards moves that make it hold.
    pub target: Option<Literal>,
    pub last_move: Option<(VarId, N)>,
    pub use_tabu: bool,
    /// Set during lookahead: atoms are not flipped but collected in `touched_atoms`.
    pub in_lookahead: bool,
    pub touched_atoms: SparseSet,
    /// Score clauses with the clausal search weights instead of the driver's.
    pub clausal_weights: bool,
    pub best_unsat: usize,
    pub no_improve: u64,
    pub scratch: Scratch<N>,
}

impl<N> SearchState<N> {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: BoundedPool::new(capacity),
            target: None,
            last_move: None,
            use_tabu: true,
            in_lookahead: false,
            touched_atoms: SparseSet::default(),
            clausal_weights: false,
            best_unsat: usize::MAX,
            no_improve: 0,
            scratch: Scratch::default(),
        }
    }
}

/// `c * d <= r` with the smallest change, rounded into the feasible side for integers.
fn solve_le<N: Numeral>(c: &N, r: &N, is_int: bool) -> ArithResult<N> {
    if !is_int {
        return r.try_div(c);
    }
    if c.is_positive() { r.floor_div(c) } else { r.ceil_div(c) }
}

fn solve_ge<N: Numeral>(c: &N, r: &N, is_int: bool) -> ArithResult<N> {
    solve_le(&c.try_neg()?, &r.try_neg()?, is_int)
}

/// Deltas of a variable with coefficient `coeff` in `ineq` after which the
/// literal (`sign` for negated) holds.
fn linear_deltas<N: Numeral>(ineq: &Ineq<N>, sign: bool, coeff: &N, is_int: bool) -> ArithResult<Vec<N>> {
    if coeff.is_zero() {
        return Ok(Vec::new());
    }
    let one = N::one();
    let r = ineq.bound.try_sub(&ineq.args_value)?;
    let delta = match (ineq.kind, sign) {
        (IneqKind::Le, false) => solve_le(coeff, &r, is_int)?,
        (IneqKind::Lt, false) => solve_le(coeff, &r.try_sub(&one)?, is_int)?,
        (IneqKind::Le, true) => solve_ge(coeff, &r.try_add(&one)?, is_int)?,
        (IneqKind::Lt, true) => solve_ge(coeff, &r, is_int)?,
        (IneqKind::Eq, false) => {
            let delta = r.try_div(coeff).map_err(|_| ArithError::NoMove)?;
            if is_int && !delta.is_integral() {
                return Err(ArithError::NoMove);
            }
            delta
        }
        (IneqKind::Eq, true) => return Ok(vec![one.clone(), one.try_neg()?]),
    };
    Ok(vec![delta])
}

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    /// Evaluates the consequences of `x := new_value` into `scratch.effect`
    /// without changing anything. Defined variables are recomputed in
    /// ascending order, which is a dependency order.
    pub(crate) fn simulate(
        &self,
        x: VarId,
        new_value: N,
        scratch: &mut Scratch<N>,
    ) -> ArithResult<()> {
        scratch.clear();
        let Scratch {
            effect,
            queue,
            queued,
            distinct_atoms,
        } = scratch;
        effect.vars.insert(x, new_value);
        for w in self.store.consumers(x) {
            if queued.insert(w) {
                queue.push(w);
            }
        }
        while let Some(v) = queue.pop() {
            let value = self.store.eval_definition_by(v, |w| {
                effect.vars.get(w).unwrap_or_else(|| self.store.value(w))
            })?;
            if value == *self.store.value(v) {
                continue;
            }
            effect.vars.insert(v, value);
            for w in self.store.consumers(v) {
                if queued.insert(w) {
                    queue.push(w);
                }
            }
        }
        for (v, value) in effect.vars.iter() {
            let info = &self.store.vars[v];
            let diff = value.try_sub(info.value())?;
            for (coeff, atom) in info.linear_occurs.iter() {
                let delta = coeff.try_mul(&diff)?;
                match effect.args.get_mut(*atom) {
                    Some(args) => *args = args.try_add(&delta)?,
                    None => {
                        let Some(ineq) = self.ineqs.get(*atom) else {
                            continue;
                        };
                        effect.args.insert(*atom, ineq.args_value.try_add(&delta)?);
                    }
                }
            }
            distinct_atoms.extend(info.distinct_of.iter().copied());
        }
        for atom in distinct_atoms.iter() {
            if let Some(args) = self.distincts.get(atom) {
                let holds = self.eval_distinct_by(args, |w| {
                    effect.vars.get(w).unwrap_or_else(|| self.store.value(w))
                });
                effect.distinct.insert(atom, holds);
            }
        }
        Ok(())
    }

    /// Sets `x` and propagates to dependent definitions and inequalities. Atoms
    /// whose arithmetic value changes are flipped if they agreed before.
    pub(crate) fn update<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        x: VarId,
        new_value: N,
    ) -> ArithResult<()> {
        if *self.store.value(x) == new_value {
            return Ok(());
        }
        let mut scratch = std::mem::take(&mut self.search.scratch);
        let result = self.simulate(x, new_value, &mut scratch);
        if result.is_ok() {
            self.commit(ctx, &scratch.effect);
        }
        self.search.scratch = scratch;
        result
    }

    fn commit<C: Context<Term = T>>(&mut self, ctx: &mut C, effect: &Effect<N>) {
        let distinct: Vec<(BoolVar, bool, bool)> = effect
            .distinct
            .iter()
            .filter_map(|(atom, &holds)| {
                let args = self.distincts.get(atom)?;
                Some((atom, self.eval_distinct(args), holds))
            })
            .collect();
        for (v, value) in effect.vars.iter() {
            let info = &mut self.store.vars[v];
            info.set_value(value.clone());
            ctx.new_value_eh(info.term);
        }
        for (atom, args) in effect.args.iter() {
            let Some(ineq) = self.ineqs.get_mut(atom) else {
                continue;
            };
            let old = ineq.is_true();
            ineq.args_value = args.clone();
            let new = ineq.is_true();
            self.atom_changed(ctx, atom, old, new);
        }
        for (atom, old, new) in distinct {
            self.atom_changed(ctx, atom, old, new);
        }
    }

    fn atom_changed<C: Context<Term = T>>(&mut self, ctx: &mut C, atom: BoolVar, old: bool, new: bool) {
        if self.search.in_lookahead {
            self.search.touched_atoms.insert(atom);
            return;
        }
        if old == new || self.units.contains(atom) {
            return;
        }
        if ctx.is_true(Literal::positive(atom)) == old {
            ctx.flip(atom);
        }
    }

    /// The delta actually applied for a proposed move of `x`, or `None` if the
    /// move is not allowed. Deltas leaving the bounds are cut back to the bound.
    pub(crate) fn is_permitted_update(&mut self, x: VarId, delta: &N) -> Option<N> {
        if delta.is_zero() || !self.store.is_movable(x) {
            return None;
        }
        let info = &self.store.vars[x];
        if info.is_int() && !delta.is_integral() {
            return None;
        }
        if self.search.use_tabu && info.is_tabu(self.stats.steps, delta) {
            return None;
        }
        if let Some((last, last_delta)) = &self.search.last_move
            && *last == x
            && last_delta.try_neg().ok().as_ref() == Some(delta)
        {
            return None;
        }
        let old = info.value();
        let mut delta = delta.clone();
        let mut new = old.try_add(&delta).ok()?;
        if !info.in_bounds(&new) && info.in_bounds(old) {
            let clamped = match (&info.lo, &info.hi) {
                (Some(lo), _) if new <= lo.value => (!lo.is_strict).then(|| lo.value.clone())?,
                (_, Some(hi)) if new >= hi.value => (!hi.is_strict).then(|| hi.value.clone())?,
                _ => return None,
            };
            let clamped_delta = clamped.try_sub(old).ok()?;
            if clamped_delta.is_zero() || clamped_delta.is_positive() != delta.is_positive() {
                return None;
            }
            new = clamped;
            delta = clamped_delta;
        }
        if !self.store.vars[x].in_range(&new) {
            return None;
        }
        Some(delta)
    }

    /// Scores and pools a candidate move.
    pub(crate) fn add_update<C: Context<Term = T>>(&mut self, ctx: &C, x: VarId, delta: N) {
        let Some(delta) = self.is_permitted_update(x, &delta) else {
            return;
        };
        if self
            .search
            .pool
            .iter()
            .any(|(_, change)| change.var == x && change.delta == delta)
        {
            return;
        }
        match self.compute_score(ctx, x, &delta) {
            Ok(score) => {
                trace!("candidate v{} += {}: {:.4}", x, delta, score);
                self.search.pool.push(score, VarChange { var: x, delta });
            }
            Err(err) => trace!("candidate v{} += {}: {}", x, delta, err),
        }
    }

    fn clause_weight<C: Context<Term = T>>(&self, ctx: &C, clause: usize) -> f64 {
        if self.search.clausal_weights {
            self.lookahead.clause_weight(clause, self.config.paws_init) as f64
        } else {
            ctx.clause_weight(clause)
        }
    }

    /// Gain of an atom moving from arithmetic truth `old` to `new`.
    fn atom_gain<C: Context<Term = T>>(&self, ctx: &C, atom: BoolVar, old: bool, new: bool) -> f64 {
        if let Some(target) = self.search.target
            && target.var() == atom
        {
            let want = !target.sign();
            return match (old == want, new == want) {
                (false, true) => 1.0,
                (true, false) => -1.0,
                _ => 0.0,
            };
        }
        if old == new {
            return 0.0;
        }
        let value = ctx.is_true(Literal::positive(atom));
        if value != old {
            return 1.0;
        }
        if self.units.contains(atom) {
            return -1.0;
        }
        // the literal that is true now becomes false
        let was_true = Literal::new(atom, !value);
        let mut gain = 0.0;
        for &clause in ctx.clauses_of(was_true) {
            if ctx.num_true(clause) == 1 {
                gain -= self.clause_weight(ctx, clause);
            }
        }
        for &clause in ctx.clauses_of(!was_true) {
            if ctx.num_true(clause) == 0 {
                gain += self.clause_weight(ctx, clause);
            }
        }
        gain
    }

    /// Clause-level gain of `x += delta`, with a small bonus for moving the
    /// target literal closer to true.
    pub(crate) fn compute_score<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        x: VarId,
        delta: &N,
    ) -> ArithResult<f64> {
        let new_value = self.store.value(x).try_add(delta)?;
        let mut scratch = std::mem::take(&mut self.search.scratch);
        let score = self
            .simulate(x, new_value, &mut scratch)
            .and_then(|()| self.effect_score(ctx, &scratch.effect));
        self.search.scratch = scratch;
        score
    }

    fn effect_score<C: Context<Term = T>>(&self, ctx: &C, effect: &Effect<N>) -> ArithResult<f64> {
        let mut score = 0.0;
        for (atom, args) in effect.args.iter() {
            let Some(ineq) = self.ineqs.get(atom) else {
                continue;
            };
            score += self.atom_gain(ctx, atom, ineq.is_true(), ineq.holds_for(args));
            if let Some(target) = self.search.target
                && target.var() == atom
            {
                let old = ineq.dtt(target.sign())?.to_f64();
                let new = ineq.dtt_args(target.sign(), args)?.to_f64();
                if old > 0.0 {
                    score += (0.001 * (old - new) / old).max(-0.001);
                }
            }
        }
        for (atom, &holds) in effect.distinct.iter() {
            if let Some(args) = self.distincts.get(atom) {
                score += self.atom_gain(ctx, atom, self.eval_distinct(args), holds);
            }
        }
        Ok(score)
    }

    pub(crate) fn find_linear_moves(
        &self,
        ineq: &Ineq<N>,
        sign: bool,
        x: VarId,
        coeff: &N,
        out: &mut Vec<(VarId, N)>,
    ) {
        match linear_deltas(ineq, sign, coeff, self.store.vars[x].is_int()) {
            Ok(deltas) => out.extend(deltas.into_iter().map(|delta| (x, delta))),
            Err(err) => trace!("no linear move for v{}: {}", x, err),
        }
    }

    /// Moves of `x` towards the roots of `a * x^2 + b * x + sum = bound`.
    pub(crate) fn find_quadratic_moves(
        &self,
        ineq: &Ineq<N>,
        x: VarId,
        a: &N,
        b: &N,
        sum: &N,
        out: &mut Vec<(VarId, N)>,
    ) -> ArithResult<()> {
        let four = N::from_i64(4);
        let c = sum.try_sub(&ineq.bound)?;
        let discriminant = b.try_mul(b)?.try_sub(&four.try_mul(a)?.try_mul(&c)?)?;
        if discriminant.is_negative() {
            return Ok(());
        }
        let root = discriminant.root_approx(2);
        let two_a = a.try_add(a)?;
        let old = self.store.value(x);
        let is_int = self.store.vars[x].is_int();
        let one = N::one();
        for numerator in [root.try_sub(b)?, root.try_neg()?.try_sub(b)?] {
            let mut values = Vec::with_capacity(4);
            if is_int {
                let floor = numerator.floor_div(&two_a)?;
                let ceil = numerator.ceil_div(&two_a)?;
                values.push(floor.try_sub(&one)?);
                values.push(ceil.try_add(&one)?);
                values.push(floor);
                values.push(ceil);
            } else {
                values.push(numerator.try_div(&two_a)?);
            }
            for value in values {
                let delta = value.try_sub(old)?;
                if !delta.is_zero() {
                    out.push((x, delta));
                }
            }
        }
        Ok(())
    }

    /// Coefficients `(a, b)` of `x^2` and `x` in the left-hand side, `None` if
    /// `x` occurs with a higher power.
    fn polynomial_of(&self, ineq: &Ineq<N>, x: VarId) -> ArithResult<Option<(N, N)>> {
        let (mut a, mut b) = (N::zero(), N::zero());
        for nc in ineq.nonlinear_of(x).unwrap_or_default() {
            let term = nc.coeff.try_mul(&self.store.mul_value_without(nc.var, x)?)?;
            match nc.power {
                1 => b = b.try_add(&term)?,
                2 => a = a.try_add(&term)?,
                _ => return Ok(None),
            }
        }
        Ok(Some((a, b)))
    }

    /// Left-hand side without its `a * x^2 + b * x` part.
    fn quadratic_rest(&self, ineq: &Ineq<N>, x: VarId, a: &N, b: &N) -> ArithResult<N> {
        let old = self.store.value(x);
        let square = a.try_mul(&old.try_mul(old)?)?;
        ineq.args_value.try_sub(&square)?.try_sub(&b.try_mul(old)?)
    }

    pub(crate) fn nonlinear_moves(&self, ineq: &Ineq<N>, sign: bool, out: &mut Vec<(VarId, N)>) {
        for (x, _) in ineq.nonlinear.iter() {
            let x = *x;
            if !self.store.is_movable(x) {
                continue;
            }
            let (a, b) = match self.polynomial_of(ineq, x) {
                Ok(Some(coeffs)) => coeffs,
                Ok(None) => continue,
                Err(err) => {
                    trace!("v{} in {}: {}", x, ineq, err);
                    continue;
                }
            };
            if a.is_zero() {
                self.find_linear_moves(ineq, sign, x, &b, out);
                continue;
            }
            let result = self
                .quadratic_rest(ineq, x, &a, &b)
                .and_then(|sum| self.find_quadratic_moves(ineq, x, &a, &b, &sum, out));
            if let Err(err) = result {
                trace!("no quadratic move for v{}: {}", x, err);
            }
        }
    }

    /// Moves for a distinct atom: separate two equal arguments, or merge two.
    pub(crate) fn distinct_moves(&mut self, args: &[VarId], sign: bool) -> Vec<(VarId, N)> {
        let mut targets = Vec::new();
        for i in 0..args.len() {
            for j in i + 1..args.len() {
                let (u, w) = (args[i], args[j]);
                let equal = self.store.value(u) == self.store.value(w);
                if !sign && equal {
                    for v in [u, w] {
                        let value = self.store.value(v);
                        for step in [N::one(), -N::one()] {
                            if let Ok(target) = value.try_add(&step) {
                                targets.push((v, target));
                            }
                        }
                    }
                } else if sign && !equal {
                    targets.push((u, self.store.value(w).clone()));
                    targets.push((w, self.store.value(u).clone()));
                }
            }
        }
        let mut moves = Vec::with_capacity(targets.len());
        for (v, target) in targets {
            if let Ok((x, value)) = self.resolve_target(v, target)
                && let Ok(delta) = value.try_sub(self.store.value(x))
            {
                moves.push((x, delta));
            }
        }
        moves
    }

    /// Moves of the base variables of the literal's inequality, including
    /// quadratic ones.
    pub(crate) fn find_nl_moves<C: Context<Term = T>>(&mut self, ctx: &C, literal: Literal) -> bool {
        let mut moves = Vec::new();
        if let Some(args) = self.distincts.get(literal.var()).cloned() {
            moves = self.distinct_moves(&args, literal.sign());
        } else if let Some(ineq) = self.ineqs.get(literal.var()) {
            self.nonlinear_moves(ineq, literal.sign(), &mut moves);
        }
        for (x, delta) in moves {
            self.add_update(ctx, x, delta);
        }
        !self.search.pool.is_empty()
    }

    /// Linear moves of the direct arguments; defined arguments are moved
    /// through their operands.
    pub(crate) fn find_lin_moves<C: Context<Term = T>>(&mut self, ctx: &C, literal: Literal) -> bool {
        let Some(ineq) = self.ineqs.get(literal.var()).cloned() else {
            return false;
        };
        let mut moves = Vec::new();
        for (coeff, v) in ineq.term.args.iter() {
            if self.store.is_movable(*v) {
                self.find_linear_moves(&ineq, literal.sign(), *v, coeff, &mut moves);
            }
        }
        self.defined_arg_moves(&ineq, literal.sign(), &mut moves);
        for (x, delta) in moves {
            self.add_update(ctx, x, delta);
        }
        !self.search.pool.is_empty()
    }

    /// Linear moves of defined arguments, pushed down to one of their operands.
    pub(crate) fn defined_arg_moves(&mut self, ineq: &Ineq<N>, sign: bool, out: &mut Vec<(VarId, N)>) {
        for (coeff, v) in ineq.term.args.iter() {
            let v = *v;
            if !self.store.is_defined(v) || self.var_is_fixed(v) {
                continue;
            }
            let mut deltas = Vec::new();
            self.find_linear_moves(ineq, sign, v, coeff, &mut deltas);
            for (_, delta) in deltas {
                let Ok(target) = self.store.value(v).try_add(&delta) else {
                    continue;
                };
                if let Ok((x, value)) = self.resolve_target(v, target)
                    && let Ok(delta) = value.try_sub(self.store.value(x))
                {
                    out.push((x, delta));
                }
            }
        }
    }

    /// Base variables of an atom that can take a new value.
    pub(crate) fn atom_vars(&self, atom: BoolVar) -> Vec<VarId> {
        let mut vars: Vec<VarId> = match (self.ineqs.get(atom), self.distincts.get(atom)) {
            (Some(ineq), _) => ineq.nonlinear.iter().map(|(v, _)| *v).collect(),
            (None, Some(args)) => args.clone(),
            (None, None) => Vec::new(),
        };
        vars.retain(|&v| self.store.is_movable(v));
        vars
    }

    /// Moves back to the best values seen so far.
    pub(crate) fn find_reset_moves<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        literal: Literal,
    ) -> bool {
        for x in self.atom_vars(literal.var()) {
            self.add_reset_update(ctx, x);
        }
        !self.search.pool.is_empty()
    }

    fn add_reset_update<C: Context<Term = T>>(&mut self, ctx: &C, x: VarId) {
        let info = &self.store.vars[x];
        let delta = if info.best_value() != info.value() {
            info.best_value().try_sub(info.value())
        } else if !info.value().is_zero() {
            info.value().try_neg()
        } else if self.rng.gen_bool(0.5) {
            Ok(N::one())
        } else {
            Ok(-N::one())
        };
        if let Ok(delta) = delta {
            self.add_update(ctx, x, delta);
        }
    }

    pub(crate) fn find_moves<C: Context<Term = T>>(&mut self, ctx: &C, literal: Literal) -> ArithResult<()> {
        if self.find_nl_moves(ctx, literal) {
            return Ok(());
        }
        self.search.use_tabu = false;
        let found = self.find_lin_moves(ctx, literal);
        self.search.use_tabu = true;
        if found || self.find_reset_moves(ctx, literal) {
            return Ok(());
        }
        Err(ArithError::NoMove)
    }

    pub(crate) fn select_move_type(&mut self) -> MoveType {
        if self.config.ucb {
            return self.ucb.select(&self.config, &mut self.rng);
        }
        if self.rng.gen_range(0..2048) < self.config.wp {
            return MoveType::RandomIncDec;
        }
        MoveType::Hillclimb
    }

    /// Position of a pooled candidate for `move_type`, `None` if the type does
    /// not apply to the pool.
    fn pick_candidate(&mut self, move_type: MoveType) -> Option<usize> {
        let pool = &self.search.pool;
        if pool.is_empty() {
            return None;
        }
        if self.rng.gen_bool(self.config.sp.clamp(0.0, 1.0)) {
            return Some(self.rng.gen_range(0..pool.len()));
        }
        let best = pool.iter().map(|(score, _)| score).fold(f64::NEG_INFINITY, f64::max);
        let improving = best > 0.0;
        let flat = best == 0.0 && self.config.allow_plateau;
        match move_type {
            MoveType::Hillclimb if improving => {}
            MoveType::HillclimbPlateau if improving || flat => {}
            MoveType::Hillclimb | MoveType::HillclimbPlateau => return None,
            MoveType::RandomUpdate | MoveType::RandomIncDec => {
                let weights: Vec<f64> = pool
                    .iter()
                    .map(|(score, _)| self.config.cb.powf(score - best))
                    .collect();
                let total: f64 = weights.iter().sum();
                let mut r = self.rng.gen_range(0.0..total.max(f64::MIN_POSITIVE));
                for (position, weight) in weights.iter().enumerate() {
                    if r < *weight {
                        return Some(position);
                    }
                    r -= weight;
                }
                return Some(weights.len() - 1);
            }
        }
        let ties: Vec<usize> = pool
            .iter()
            .enumerate()
            .filter(|(_, (score, _))| *score == best)
            .map(|(position, _)| position)
            .collect();
        Some(ties[self.rng.gen_range(0..ties.len())])
    }

    /// Takes a candidate out of the pool. A move type that does not apply to
    /// the pool falls back to score-weighted sampling.
    pub(crate) fn choose_candidate(&mut self) -> ArithResult<(MoveType, f64, VarChange<N>)> {
        if self.search.pool.is_empty() {
            return Err(ArithError::NoMove);
        }
        let move_type = self.select_move_type();
        if move_type == MoveType::RandomIncDec
            && let Some(change) = self.random_inc_dec()
        {
            return Ok((move_type, 0.0, change));
        }
        let (move_type, position) = match self.pick_candidate(move_type) {
            Some(position) => (move_type, position),
            None => {
                let position = self
                    .pick_candidate(MoveType::RandomUpdate)
                    .ok_or(ArithError::NoMove)?;
                (MoveType::RandomUpdate, position)
            }
        };
        let (score, change) = self.search.pool.swap_remove(position);
        Ok((move_type, score, change))
    }

    /// Commits one pooled candidate, chosen by the move-type policy.
    pub(crate) fn apply_update<C: Context<Term = T>>(&mut self, ctx: &mut C) -> ArithResult<()> {
        let (move_type, score, change) = self.choose_candidate()?;
        self.search.pool.clear();
        self.commit_change(ctx, move_type, score, change)?;
        self.check_best(ctx);
        Ok(())
    }

    /// Unit step of a random pooled variable.
    fn random_inc_dec(&mut self) -> Option<VarChange<N>> {
        let pool = &self.search.pool;
        let (_, change) = pool.iter().nth(self.rng.gen_range(0..pool.len()))?;
        let x = change.var;
        let step = if self.rng.gen_bool(0.5) { N::one() } else { -N::one() };
        let delta = self.is_permitted_update(x, &step)?;
        Some(VarChange { var: x, delta })
    }

    pub(crate) fn commit_change<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        move_type: MoveType,
        score: f64,
        change: VarChange<N>,
    ) -> ArithResult<()> {
        let VarChange { var: x, delta } = change;
        let new_value = self.store.value(x).try_add(&delta)?;
        debug!("{} v{} := {} ({:.4})", move_type, x, new_value, score);
        self.update(ctx, x, new_value)?;
        let steps = self.stats.steps;
        let tenure = tabu_tenure(&self.config, &mut self.rng);
        self.store.vars[x].set_step(steps, steps + tenure, &delta);
        self.search.last_move = Some((x, delta));
        if self.config.ucb {
            let reward = if score > 0.0 { 1.0 } else { 0.0 };
            self.ucb.update(move_type, reward, self.config.ucb_forget);
        }
        Ok(())
    }

    /// Records the current values as best if fewer clauses are unsatisfied.
    pub(crate) fn check_best<C: Context<Term = T>>(&mut self, ctx: &C) {
        let unsat = ctx.unsat_clauses().len();
        if unsat < self.search.best_unsat {
            self.search.best_unsat = unsat;
            self.search.no_improve = 0;
            self.save_best_values();
        } else {
            self.search.no_improve += 1;
        }
    }

    pub(crate) fn save_best_values(&mut self) {
        for info in self.store.vars.iter_mut() {
            info.save_best_value();
        }
    }

    /// Restarts from the best values when the schedule is due or the search
    /// stagnates; periodically decays the lookahead statistics.
    pub(crate) fn check_restart<C: Context<Term = T>>(&mut self, ctx: &mut C) {
        let steps = self.stats.steps;
        let base = self.config.restart_base as u64;
        if base > 0 && steps % base == 0 {
            self.lookahead.forget_touched(self.config.ucb_forget);
            self.rescore(ctx);
        }
        let stagnated = self.search.no_improve > self.config.max_no_improve as u64;
        if !self.restart.is_due(steps) && !stagnated {
            return;
        }
        self.restart.advance(steps, base);
        self.config.restart_next = u32::try_from(self.restart.next()).unwrap_or(u32::MAX);
        self.stats.restarts += 1;
        self.search.no_improve = 0;
        info!(
            "restart {} at step {}, next at {}",
            self.restart.count(),
            steps,
            self.restart.next()
        );
        for x in 0..self.store.len() {
            if !self.store.is_movable(x) {
                continue;
            }
            let best = self.store.vars[x].best_value().clone();
            if let Err(err) = self.update(ctx, x, best) {
                debug!("restart v{}: {}", x, err);
            }
        }
        for info in self.store.vars.iter_mut() {
            info.reset_tabu();
        }
        self.search.last_move = None;
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::SmallRng};
    use test_log::test;

    use super::{Scratch, VarChange, linear_deltas, solve_le};
    use crate::{
        config::Config,
        ineq::{Ineq, IneqKind, LinearTerm},
        plugin::ArithPlugin,
        policy::MoveType,
        vars::VarSort,
    };

    type Plugin = ArithPlugin<i64, usize, SmallRng>;

    fn plugin(config: Config) -> Plugin {
        ArithPlugin::new(config, SmallRng::seed_from_u64(3))
    }

    fn var(plugin: &mut Plugin, sort: VarSort, value: i64) -> usize {
        let v = plugin.store.len();
        plugin.store.add_var(v, sort);
        plugin.store.vars[v].set_value(value);
        v
    }

    fn ineq(kind: IneqKind, bound: i64, args_value: i64) -> Ineq<i64> {
        let mut ineq = Ineq::new(kind, bound);
        ineq.args_value = args_value;
        ineq
    }

    #[test]
    fn test_solve_le_rounds_into_feasible_side() {
        assert_eq!(solve_le(&2i64, &-3, true), Ok(-2));
        assert_eq!(solve_le(&-2i64, &-3, true), Ok(2));
        assert_eq!(solve_le(&2i64, &3, true), Ok(1));
    }

    #[test]
    fn test_linear_deltas() {
        // x + 2y <= 10 at 14
        let le = ineq(IneqKind::Le, 10, 14);
        assert_eq!(linear_deltas(&le, false, &1, true), Ok(vec![-4]));
        assert_eq!(linear_deltas(&le, false, &2, true), Ok(vec![-2]));
        // not (lhs <= 10) at 7 needs lhs >= 11
        let le = ineq(IneqKind::Le, 10, 7);
        assert_eq!(linear_deltas(&le, true, &3, true), Ok(vec![2]));
        let lt = ineq(IneqKind::Lt, 10, 10);
        assert_eq!(linear_deltas(&lt, false, &1, true), Ok(vec![-1]));
        let eq = ineq(IneqKind::Eq, 10, 4);
        assert_eq!(linear_deltas(&eq, false, &3, true), Ok(vec![2]));
        assert!(linear_deltas(&eq, false, &4, true).is_err());
        let eq = ineq(IneqKind::Eq, 10, 10);
        assert_eq!(linear_deltas(&eq, true, &4, true), Ok(vec![1, -1]));
    }

    #[test]
    fn test_simulation_reuses_scratch() {
        let mut plugin = plugin(Config::default());
        let x = var(&mut plugin, VarSort::Int, 1);
        let y = var(&mut plugin, VarSort::Int, 2);
        let s = var(&mut plugin, VarSort::Int, 3);
        plugin.store.add_add(
            s,
            LinearTerm {
                args: vec![(1, x), (1, y)],
                constant: 0,
            },
        );
        // b0: x + y <= 10, b1: y <= 0
        let mut b0 = Ineq::new(IneqKind::Le, 10);
        b0.term.add_arg(1, s).unwrap();
        plugin.init_ineq(0, b0).unwrap();
        let mut b1 = Ineq::new(IneqKind::Le, 0);
        b1.term.add_arg(1, y).unwrap();
        plugin.init_ineq(1, b1).unwrap();

        let mut scratch = Scratch::default();
        plugin.simulate(x, 20, &mut scratch).unwrap();
        let vars: Vec<(usize, i64)> = scratch.effect.vars.iter().map(|(v, n)| (v, *n)).collect();
        assert_eq!(vars, vec![(x, 20), (s, 22)]);
        assert_eq!(scratch.effect.args.get(0), Some(&22));
        assert_eq!(scratch.effect.args.get(1), None);

        // nothing of the first simulation survives into the second
        plugin.simulate(y, 5, &mut scratch).unwrap();
        let vars: Vec<(usize, i64)> = scratch.effect.vars.iter().map(|(v, n)| (v, *n)).collect();
        assert_eq!(vars, vec![(y, 5), (s, 6)]);
        assert_eq!(scratch.effect.args.get(0), Some(&6));
        assert_eq!(scratch.effect.args.get(1), Some(&5));
        assert_eq!(scratch.effect.args.len(), 2);

        assert_eq!(plugin.value(x), &1);
        assert_eq!(plugin.value(s), &3);
        assert_eq!(plugin.ineq(0).unwrap().args_value, 3);
    }

    #[test]
    fn test_permitted_update_clamps_to_bound() {
        let mut plugin = plugin(Config::default());
        let x = var(&mut plugin, VarSort::Int, 0);
        plugin.add_le(x, 10);
        assert_eq!(plugin.is_permitted_update(x, &15), Some(10));
        assert_eq!(plugin.is_permitted_update(x, &-3), Some(-3));
        assert_eq!(plugin.is_permitted_update(x, &0), None);

        // already at the bound: nothing left in that direction
        plugin.store.vars[x].set_value(10);
        assert_eq!(plugin.is_permitted_update(x, &5), None);
        assert_eq!(plugin.is_permitted_update(x, &-5), Some(-5));

        // a strict bound has no value to clamp to
        let r = var(&mut plugin, VarSort::Real, 0);
        plugin.add_lt(r, 10);
        assert_eq!(plugin.is_permitted_update(r, &15), None);
        assert_eq!(plugin.is_permitted_update(r, &9), Some(9));
    }

    #[test]
    fn test_plateau_moves_need_allow_plateau() {
        for allow_plateau in [false, true] {
            let config = Config {
                sp: 0.0,
                allow_plateau,
                ..Config::default()
            };
            let mut plugin = plugin(config);
            plugin.search.pool.push(0.0, VarChange { var: 0, delta: 1 });
            plugin.search.pool.push(-1.0, VarChange { var: 0, delta: -1 });
            let flat = plugin
                .search
                .pool
                .iter()
                .position(|(score, _)| score == 0.0);
            assert_eq!(plugin.pick_candidate(MoveType::Hillclimb), None);
            assert_eq!(
                plugin.pick_candidate(MoveType::HillclimbPlateau),
                if allow_plateau { flat } else { None }
            );
        }
    }

    #[test]
    fn test_improving_move_is_picked_by_hillclimb() {
        let mut plugin = plugin(Config {
            sp: 0.0,
            ..Config::default()
        });
        plugin.search.pool.push(-1.0, VarChange { var: 0, delta: -1 });
        plugin.search.pool.push(2.0, VarChange { var: 1, delta: 4 });
        let position = plugin.pick_candidate(MoveType::Hillclimb).unwrap();
        let (score, change) = plugin.search.pool.swap_remove(position);
        assert_eq!(score, 2.0);
        assert_eq!(change, VarChange { var: 1, delta: 4 });
    }
}
