//! Distance to true of arithmetic literals and distance to satisfy of clauses.
//! `sign == true` asks for the negation of the inequality.

use std::{fmt::Debug, hash::Hash};

use rand::Rng;

use crate::{
    error::ArithResult,
    ineq::{Ineq, IneqKind},
    numeral::Numeral,
    plugin::ArithPlugin,
    term::Context,
    types::Literal,
    vars::{VarId, VarStore},
};

impl<N: Numeral> Ineq<N> {
    /// Zero iff the literal holds when the left-hand side evaluates to `args`,
    /// otherwise the gap to the nearest satisfying value. Strict comparisons
    /// count the unit step needed to clear the boundary.
    pub fn dtt_args(&self, sign: bool, args: &N) -> ArithResult<N> {
        let zero = N::zero();
        let one = N::one();
        Ok(match (self.kind, sign) {
            (IneqKind::Le, false) if *args > self.bound => args.try_sub(&self.bound)?,
            (IneqKind::Le, true) if *args <= self.bound => self.bound.try_sub(args)?.try_add(&one)?,
            (IneqKind::Lt, false) if *args >= self.bound => args.try_sub(&self.bound)?.try_add(&one)?,
            (IneqKind::Lt, true) if *args < self.bound => self.bound.try_sub(args)?,
            (IneqKind::Eq, false) => args.try_sub(&self.bound)?.try_abs()?,
            (IneqKind::Eq, true) if *args == self.bound => one,
            _ => zero,
        })
    }

    pub fn dtt(&self, sign: bool) -> ArithResult<N> {
        self.dtt_args(sign, &self.args_value)
    }

    /// Left-hand side after `x` takes `new_value`, following the direct and
    /// product occurrences of `x`.
    pub fn args_after_update<T>(
        &self,
        store: &VarStore<N, T>,
        x: VarId,
        new_value: &N,
    ) -> ArithResult<N> {
        let Some(coeffs) = self.nonlinear_of(x) else {
            return Ok(self.args_value.clone());
        };
        let old_value = store.value(x);
        let mut args = self.args_value.clone();
        for nc in coeffs.iter() {
            let other = store.mul_value_without(nc.var, x)?;
            let diff = new_value.try_pow(nc.power)?.try_sub(&old_value.try_pow(nc.power)?)?;
            args = args.try_add(&nc.coeff.try_mul(&other)?.try_mul(&diff)?)?;
        }
        Ok(args)
    }

    pub fn dtt_update<T>(
        &self,
        sign: bool,
        store: &VarStore<N, T>,
        x: VarId,
        new_value: &N,
    ) -> ArithResult<N> {
        self.dtt_args(sign, &self.args_after_update(store, x, new_value)?)
    }

    /// Distance to true after a linear argument with coefficient `coeff` moves by `delta`.
    pub fn dtt_delta(&self, sign: bool, coeff: &N, delta: &N) -> ArithResult<N> {
        self.dtt_args(sign, &self.args_value.try_add(&coeff.try_mul(delta)?)?)
    }
}

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    fn literal_dtt<C: Context<Term = T>>(
        &self,
        ctx: &C,
        literal: Literal,
        update: Option<(VarId, &N)>,
    ) -> ArithResult<N> {
        if let Some(ineq) = self.ineqs.get(literal.var()) {
            return match update {
                Some((x, value)) => ineq.dtt_update(literal.sign(), &self.store, x, value),
                None => ineq.dtt(literal.sign()),
            };
        }
        let holds = match self.distincts.get(literal.var()) {
            Some(args) => self.eval_distinct(args) != literal.sign(),
            None => ctx.is_true(literal),
        };
        Ok(if holds { N::zero() } else { N::one() })
    }

    /// Smallest distance to true over the literals of `clause`.
    pub fn dts<C: Context<Term = T>>(&self, ctx: &C, clause: usize) -> ArithResult<N> {
        self.dts_by(ctx, clause, None)
    }

    /// [`ArithPlugin::dts`] with `x` set to `new_value`.
    pub fn dts_update<C: Context<Term = T>>(
        &self,
        ctx: &C,
        clause: usize,
        x: VarId,
        new_value: &N,
    ) -> ArithResult<N> {
        self.dts_by(ctx, clause, Some((x, new_value)))
    }

    fn dts_by<C: Context<Term = T>>(
        &self,
        ctx: &C,
        clause: usize,
        update: Option<(VarId, &N)>,
    ) -> ArithResult<N> {
        let mut best: Option<N> = None;
        for &literal in ctx.clause(clause) {
            let d = self.literal_dtt(ctx, literal, update)?;
            if d.is_zero() {
                return Ok(d);
            }
            if best.as_ref().is_none_or(|b| d < *b) {
                best = Some(d);
            }
        }
        Ok(best.unwrap_or_else(N::one))
    }
}
