//! Translation of driver terms into variables, definitions and inequalities,
//! and bounds derived from unit literals.

use std::{fmt::Debug, hash::Hash};

use log::{debug, warn};
use num::BigRational;
use rand::Rng;

use crate::{
    error::ArithResult,
    ineq::{Ineq, IneqKind, LinearTerm, NonlinearCoeff},
    numeral::Numeral,
    plugin::ArithPlugin,
    term::{Context, Sort, TermKind},
    types::{BoolVar, Literal},
    vars::{Bound, Definition, MAX_EXPONENT, OpKind, VarId, VarSort, small_exponent},
};

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    /// Registers `term` and its subterms. Registering a term twice is a no-op.
    pub fn register_term<C: Context<Term = T>>(&mut self, ctx: &C, term: T) -> ArithResult<()> {
        match ctx.sort(term) {
            Sort::Int | Sort::Real => {
                self.mk_term(ctx, term)?;
            }
            Sort::Bool => {
                if let Some(atom) = ctx.bool_var(term) {
                    self.init_bool_var(ctx, atom, term)?;
                }
            }
            Sort::Other => {}
        }
        Ok(())
    }

    fn num_of(&self, value: &BigRational) -> ArithResult<N> {
        N::from_rational(value)
    }

    fn var_sort<C: Context<Term = T>>(ctx: &C, term: T) -> VarSort {
        match ctx.sort(term) {
            Sort::Int => VarSort::Int,
            _ => VarSort::Real,
        }
    }

    fn mk_var<C: Context<Term = T>>(&mut self, ctx: &C, term: T) -> VarId {
        let v = self.store.add_var(term, Self::var_sort(ctx, term));
        self.term_to_var.insert(term, v);
        v
    }

    pub(crate) fn mk_term<C: Context<Term = T>>(&mut self, ctx: &C, term: T) -> ArithResult<VarId> {
        if let Some(v) = self.var_of(term) {
            return Ok(v);
        }
        match ctx.kind(term) {
            TermKind::Numeral(value) => {
                let value = self.num_of(&value)?;
                let v = self.mk_var(ctx, term);
                self.store.vars[v].set_value(value.clone());
                self.add_ge(v, value.clone());
                self.add_le(v, value);
                Ok(v)
            }
            TermKind::Add(_) | TermKind::Sub(_) | TermKind::Uminus(_) => {
                let mut linear = LinearTerm::default();
                self.add_args(ctx, &mut linear, term, &N::one())?;
                self.mk_add(ctx, term, linear)
            }
            TermKind::Mul(args) => self.mk_mul(ctx, term, &args),
            TermKind::Power(base, exponent) => {
                if let TermKind::Numeral(k) = ctx.kind(exponent)
                    && let Some(k) = small_exponent(&self.num_of(&k)?)
                    && (1..=MAX_EXPONENT).contains(&k)
                {
                    let x = self.mk_term(ctx, base)?;
                    let v = self.mk_var(ctx, term);
                    self.store.add_mul(v, vec![(x, k)]);
                    let value = self.store.eval_definition(v)?;
                    self.store.vars[v].set_value(value);
                    return Ok(v);
                }
                self.mk_op(ctx, term, OpKind::Power, base, Some(exponent))
            }
            TermKind::Div(x, y) => self.mk_op(ctx, term, OpKind::Div, x, Some(y)),
            TermKind::IDiv(x, y) => self.mk_op(ctx, term, OpKind::IDiv, x, Some(y)),
            TermKind::Mod(x, y) => self.mk_op(ctx, term, OpKind::Mod, x, Some(y)),
            TermKind::Rem(x, y) => self.mk_op(ctx, term, OpKind::Rem, x, Some(y)),
            TermKind::Abs(x) => self.mk_op(ctx, term, OpKind::Abs, x, None),
            TermKind::ToInt(x) => self.mk_op(ctx, term, OpKind::ToInt, x, None),
            TermKind::ToReal(x) => self.mk_op(ctx, term, OpKind::ToReal, x, None),
            _ => Ok(self.mk_var(ctx, term)),
        }
    }

    fn mk_add<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        term: T,
        linear: LinearTerm<N>,
    ) -> ArithResult<VarId> {
        let v = self.mk_var(ctx, term);
        let value = linear.eval(&self.store)?;
        self.store.vars[v].set_value(value);
        self.store.add_add(v, linear);
        Ok(v)
    }

    /// Numeral factors fold into a coefficient, repeated factors into powers.
    fn monomial_of<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        args: &[T],
    ) -> ArithResult<(N, Vec<(VarId, u32)>)> {
        let mut coeff = N::one();
        let mut monomial: Vec<(VarId, u32)> = Vec::new();
        for &arg in args.iter() {
            if let TermKind::Numeral(value) = ctx.kind(arg) {
                coeff = coeff.try_mul(&self.num_of(&value)?)?;
                continue;
            }
            let w = self.mk_term(ctx, arg)?;
            match monomial.iter_mut().find(|(u, _)| *u == w) {
                Some((_, p)) => *p += 1,
                None => monomial.push((w, 1)),
            }
        }
        Ok((coeff, monomial))
    }

    fn mk_mul<C: Context<Term = T>>(&mut self, ctx: &C, term: T, args: &[T]) -> ArithResult<VarId> {
        let (coeff, monomial) = self.monomial_of(ctx, args)?;
        if coeff.is_one() && !matches!(monomial.as_slice(), [(_, 1)]) {
            let v = self.mk_var(ctx, term);
            self.store.add_mul(v, monomial);
            let value = self.store.eval_definition(v)?;
            self.store.vars[v].set_value(value);
            return Ok(v);
        }
        let mut linear = LinearTerm::default();
        if monomial.is_empty() {
            linear.constant = coeff;
        } else {
            let m = self.mk_monomial(ctx, term, monomial)?;
            linear.add_arg(coeff, m)?;
        }
        self.mk_add(ctx, term, linear)
    }

    /// Product variable for a monomial that has no term of its own.
    fn mk_monomial<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        term: T,
        monomial: Vec<(VarId, u32)>,
    ) -> ArithResult<VarId> {
        if let [(w, 1)] = monomial.as_slice() {
            return Ok(*w);
        }
        let v = self.store.add_var(term, Self::var_sort(ctx, term));
        self.store.add_mul(v, monomial);
        let value = self.store.eval_definition(v)?;
        self.store.vars[v].set_value(value);
        Ok(v)
    }

    fn mk_op<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        term: T,
        kind: OpKind,
        x: T,
        y: Option<T>,
    ) -> ArithResult<VarId> {
        let arg1 = self.mk_term(ctx, x)?;
        let arg2 = match y {
            Some(y) => Some(self.mk_term(ctx, y)?),
            None => None,
        };
        let v = self.mk_var(ctx, term);
        self.store.add_op(v, kind, arg1, arg2);
        let value = self.store.eval_definition(v)?;
        self.store.vars[v].set_value(value);
        debug!("v{} := {} v{} {:?}", v, kind, arg1, arg2);
        Ok(v)
    }

    /// Adds `sign * term` to `linear`, flattening sums, negations and numeral
    /// coefficients.
    pub(crate) fn add_args<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        linear: &mut LinearTerm<N>,
        term: T,
        sign: &N,
    ) -> ArithResult<()> {
        match ctx.kind(term) {
            TermKind::Numeral(value) => {
                let value = self.num_of(&value)?;
                linear.constant = linear.constant.try_add(&sign.try_mul(&value)?)?;
            }
            TermKind::Add(args) => {
                for arg in args {
                    self.add_args(ctx, linear, arg, sign)?;
                }
            }
            TermKind::Sub(args) => {
                let negated = sign.try_neg()?;
                for (position, arg) in args.into_iter().enumerate() {
                    self.add_args(ctx, linear, arg, if position == 0 { sign } else { &negated })?;
                }
            }
            TermKind::Uminus(arg) => {
                self.add_args(ctx, linear, arg, &sign.try_neg()?)?;
            }
            TermKind::Mul(args)
                if self.var_of(term).is_none()
                    && args.iter().any(|&a| matches!(ctx.kind(a), TermKind::Numeral(_))) =>
            {
                let (coeff, monomial) = self.monomial_of(ctx, &args)?;
                let coeff = coeff.try_mul(sign)?;
                if monomial.is_empty() {
                    linear.constant = linear.constant.try_add(&coeff)?;
                } else {
                    let m = self.mk_monomial(ctx, term, monomial)?;
                    linear.add_arg(coeff, m)?;
                }
            }
            _ => {
                let v = self.mk_term(ctx, term)?;
                linear.add_arg(sign.clone(), v)?;
            }
        }
        Ok(())
    }

    /// Creates the inequality or distinct constraint of an arithmetic atom.
    fn init_bool_var<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        atom: BoolVar,
        term: T,
    ) -> ArithResult<()> {
        if self.ineqs.contains_key(atom) || self.distincts.contains_key(atom) {
            return Ok(());
        }
        let is_numeric = |t: T| matches!(ctx.sort(t), Sort::Int | Sort::Real);
        let (kind, lhs, rhs) = match ctx.kind(term) {
            TermKind::Le(a, b) => (IneqKind::Le, a, b),
            TermKind::Ge(a, b) => (IneqKind::Le, b, a),
            TermKind::Lt(a, b) => (IneqKind::Lt, a, b),
            TermKind::Gt(a, b) => (IneqKind::Lt, b, a),
            TermKind::Eq(a, b) if is_numeric(a) => (IneqKind::Eq, a, b),
            TermKind::Distinct(args) if args.iter().all(|&a| is_numeric(a)) => {
                let mut vars = Vec::with_capacity(args.len());
                for arg in args {
                    vars.push(self.mk_term(ctx, arg)?);
                }
                for &v in vars.iter() {
                    self.store.vars[v].distinct_of.push(atom);
                }
                self.distincts.insert(atom, vars);
                self.atoms.push(atom);
                return Ok(());
            }
            _ => return Ok(()),
        };
        let mut linear = LinearTerm::default();
        self.add_args(ctx, &mut linear, lhs, &N::one())?;
        self.add_args(ctx, &mut linear, rhs, &N::one().try_neg()?)?;
        let mut ineq = Ineq::new(kind, linear.constant.try_neg()?);
        linear.constant = N::zero();
        ineq.term = linear;
        self.init_ineq(atom, ineq)
    }

    /// Normalizes an inequality, records occurrences and caches its value.
    pub(crate) fn init_ineq(&mut self, atom: BoolVar, mut ineq: Ineq<N>) -> ArithResult<()> {
        let all_int = ineq
            .term
            .args
            .iter()
            .all(|(c, v)| c.is_integral() && self.store.vars[*v].is_int());
        if all_int && ineq.kind == IneqKind::Lt && ineq.bound.is_integral() {
            ineq.kind = IneqKind::Le;
            ineq.bound = ineq.bound.try_sub(&N::one())?;
        }
        for (coeff, v) in ineq.term.args.clone() {
            Self::add_nonlinear(&mut ineq, v, NonlinearCoeff { var: v, coeff: coeff.clone(), power: 1 });
            self.store.vars[v].linear_occurs.push((coeff.clone(), atom));
            if let Some(Definition::Mul(index)) = self.store.vars[v].definition {
                ineq.is_linear = false;
                ineq.monomials.push(index);
                for &(w, p) in self.store.muls[index].monomial.iter() {
                    Self::add_nonlinear(
                        &mut ineq,
                        w,
                        NonlinearCoeff { var: v, coeff: coeff.clone(), power: p },
                    );
                }
            }
        }
        for (x, _) in ineq.nonlinear.iter() {
            let bool_vars = &mut self.store.vars[*x].bool_vars_of;
            if !bool_vars.contains(&atom) {
                bool_vars.push(atom);
            }
        }
        ineq.args_value = ineq.term.eval(&self.store)?;
        debug!("b{}: {}", atom, ineq);
        self.ineqs.insert(atom, ineq);
        self.atoms.push(atom);
        Ok(())
    }

    fn add_nonlinear(ineq: &mut Ineq<N>, x: VarId, nc: NonlinearCoeff<N>) {
        match ineq.nonlinear.iter_mut().find(|(v, _)| *v == x) {
            Some((_, coeffs)) => coeffs.push(nc),
            None => ineq.nonlinear.push((x, vec![nc])),
        }
    }

    pub fn add_le(&mut self, v: VarId, n: N) {
        self.add_hi(v, Bound { is_strict: false, value: n });
    }

    pub fn add_lt(&mut self, v: VarId, n: N) {
        self.add_hi(v, Bound { is_strict: true, value: n });
    }

    pub fn add_ge(&mut self, v: VarId, n: N) {
        self.add_lo(v, Bound { is_strict: false, value: n });
    }

    pub fn add_gt(&mut self, v: VarId, n: N) {
        self.add_lo(v, Bound { is_strict: true, value: n });
    }

    /// Integer bounds are kept non-strict.
    fn normalize_bound(&self, v: VarId, bound: Bound<N>, upper: bool) -> Bound<N> {
        if !self.store.vars[v].is_int() {
            return bound;
        }
        let value = match (upper, bound.is_strict) {
            (true, false) => bound.value.floor(),
            (true, true) => bound.value.ceil().try_sub(&N::one()).unwrap_or(bound.value.floor()),
            (false, false) => bound.value.ceil(),
            (false, true) => bound.value.floor().try_add(&N::one()).unwrap_or(bound.value.ceil()),
        };
        Bound { is_strict: false, value }
    }

    fn add_hi(&mut self, v: VarId, bound: Bound<N>) {
        let bound = self.normalize_bound(v, bound, true);
        let info = &mut self.store.vars[v];
        let tighter = match &info.hi {
            None => true,
            Some(hi) => bound.value < hi.value || (bound.value == hi.value && bound.is_strict),
        };
        if tighter {
            info.hi = Some(bound);
        }
        self.check_bounds(v);
    }

    fn add_lo(&mut self, v: VarId, bound: Bound<N>) {
        let bound = self.normalize_bound(v, bound, false);
        let info = &mut self.store.vars[v];
        let tighter = match &info.lo {
            None => true,
            Some(lo) => bound.value > lo.value || (bound.value == lo.value && bound.is_strict),
        };
        if tighter {
            info.lo = Some(bound);
        }
        self.check_bounds(v);
    }

    fn check_bounds(&mut self, v: VarId) {
        let info = &mut self.store.vars[v];
        if let (Some(lo), Some(hi)) = (&info.lo, &info.hi)
            && (lo.value > hi.value || (lo.value == hi.value && (lo.is_strict || hi.is_strict)))
            && !info.conflicting
        {
            warn!("v{}: contradictory bounds {} > {}", v, lo.value, hi.value);
            info.conflicting = true;
        }
    }

    /// Turns a unit literal over a single-variable inequality into a bound.
    pub(crate) fn initialize_unit(&mut self, literal: Literal) -> ArithResult<()> {
        let atom = literal.var();
        if self.atom_truth(atom).is_none() {
            return Ok(());
        }
        self.units.insert(atom);
        let Some(ineq) = self.ineqs.get(atom) else {
            return Ok(());
        };
        let [(coeff, v)] = ineq.term.args.as_slice() else {
            return Ok(());
        };
        let (coeff, v) = (coeff.clone(), *v);
        let (kind, bound) = (ineq.kind, ineq.bound.clone());
        // c * v op b, or its negation, as a bound on v
        let (floor, ceil) = if self.store.vars[v].is_int() {
            (bound.floor_div(&coeff)?, bound.ceil_div(&coeff)?)
        } else {
            let quotient = bound.try_div(&coeff)?;
            (quotient.clone(), quotient)
        };
        let flips = coeff.is_negative();
        let (upper, strict) = match (kind, literal.sign()) {
            (IneqKind::Le, false) => (!flips, false),
            (IneqKind::Lt, false) => (!flips, true),
            (IneqKind::Le, true) => (flips, true),
            (IneqKind::Lt, true) => (flips, false),
            (IneqKind::Eq, false) => {
                self.add_le(v, floor);
                self.add_ge(v, ceil);
                return Ok(());
            }
            (IneqKind::Eq, true) => return Ok(()),
        };
        let exact = floor == ceil;
        match (upper, strict && exact) {
            (true, false) => self.add_le(v, floor),
            (true, true) => self.add_lt(v, floor),
            (false, false) => self.add_ge(v, ceil),
            (false, true) => self.add_gt(v, ceil),
        }
        Ok(())
    }

    pub(crate) fn initialize_input_assertion<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        root: T,
    ) -> ArithResult<()> {
        let (term, sign) = match ctx.kind(root) {
            TermKind::Not(arg) => (arg, true),
            _ => (root, false),
        };
        let Some(atom) = ctx.bool_var(term) else {
            return Ok(());
        };
        self.initialize_unit(Literal::new(atom, sign))
    }
}
