//! Variable and definition store. Variables are appended and never removed;
//! a definition only refers to variables created before the defined one, so
//! the definition graph is acyclic by construction and ascending index order is
//! a valid evaluation order.

use std::fmt::Display;

use either::Either;
use log::debug;

use crate::{
    error::{ArithError, ArithResult},
    ineq::LinearTerm,
    numeral::Numeral,
    types::BoolVar,
};

pub type VarId = usize;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VarSort {
    Int,
    Real,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Bound<N> {
    pub is_strict: bool,
    pub value: N,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpKind {
    Mod,
    IDiv,
    Div,
    Rem,
    Power,
    Abs,
    ToInt,
    ToReal,
}

/// Which definition table a derived variable lives in.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Definition {
    Mul(usize),
    Add(usize),
    Op(usize),
}

#[derive(Clone, Debug)]
pub struct MulDef {
    pub var: VarId,
    /// (factor, power) pairs, factors are distinct.
    pub monomial: Vec<(VarId, u32)>,
}

#[derive(Clone, Debug)]
pub struct AddDef<N> {
    pub var: VarId,
    pub term: LinearTerm<N>,
}

#[derive(Clone, Debug)]
pub struct OpDef {
    pub var: VarId,
    pub kind: OpKind,
    pub arg1: VarId,
    pub arg2: Option<VarId>,
}

const INITIAL_RANGE: i64 = 100_000_000;

pub struct VarInfo<N, T> {
    pub term: T,
    pub sort: VarSort,
    pub definition: Option<Definition>,
    value: N,
    best_value: N,
    range: N,
    num_out_of_range: u32,
    num_in_range: u32,
    pub lo: Option<Bound<N>>,
    pub hi: Option<Bound<N>>,
    /// Contradictory bounds were seen; the variable accepts no moves.
    pub conflicting: bool,
    /// Inequalities in which this variable is a direct argument.
    pub linear_occurs: Vec<(N, BoolVar)>,
    /// Inequalities mentioning this variable directly or through a product.
    pub bool_vars_of: Vec<BoolVar>,
    pub distinct_of: Vec<BoolVar>,
    pub muls: Vec<usize>,
    pub adds: Vec<usize>,
    pub ops: Vec<usize>,
    tabu_pos: u64,
    tabu_neg: u64,
    last_pos: u64,
    last_neg: u64,
}

impl<N: Numeral, T> VarInfo<N, T> {
    pub fn new(term: T, sort: VarSort) -> Self {
        Self {
            term,
            sort,
            definition: None,
            value: N::zero(),
            best_value: N::zero(),
            range: N::from_i64(INITIAL_RANGE),
            num_out_of_range: 0,
            num_in_range: 0,
            lo: None,
            hi: None,
            conflicting: false,
            linear_occurs: Vec::new(),
            bool_vars_of: Vec::new(),
            distinct_of: Vec::new(),
            muls: Vec::new(),
            adds: Vec::new(),
            ops: Vec::new(),
            tabu_pos: 0,
            tabu_neg: 0,
            last_pos: 0,
            last_neg: 0,
        }
    }

    #[inline(always)]
    pub fn value(&self) -> &N {
        &self.value
    }

    #[inline(always)]
    pub(crate) fn set_value(&mut self, value: N) {
        self.value = value;
    }

    #[inline(always)]
    pub fn best_value(&self) -> &N {
        &self.best_value
    }

    pub(crate) fn save_best_value(&mut self) {
        self.best_value = self.value.clone();
    }

    pub fn is_int(&self) -> bool {
        self.sort == VarSort::Int
    }

    pub fn range(&self) -> &N {
        &self.range
    }

    fn near(n: &N, center: &N, range: &N) -> bool {
        match (center.try_sub(range), center.try_add(range)) {
            (Ok(lo), Ok(hi)) => lo < *n && *n < hi,
            _ => true,
        }
    }

    /// Whether a move to `n` keeps the search local: inside the symmetric
    /// clipping window, or close to a finite bound. Repeated rejections widen
    /// the window.
    pub fn in_range(&mut self, n: &N) -> bool {
        let zero = N::zero();
        let accepted = Self::near(n, &zero, &self.range)
            || self.lo.as_ref().is_some_and(|lo| Self::near(n, &lo.value, &self.range))
            || self.hi.as_ref().is_some_and(|hi| Self::near(n, &hi.value, &self.range));
        if accepted {
            self.num_in_range = self.num_in_range.saturating_add(1);
        } else {
            self.out_of_range();
        }
        accepted
    }

    fn out_of_range(&mut self) {
        self.num_out_of_range += 1;
        if self.num_out_of_range <= 1000u32.saturating_mul(1 + self.num_in_range) {
            return;
        }
        let Ok(widened) = self.range.try_add(&self.range) else {
            return;
        };
        debug!("increase range {} -> {}", self.range, widened);
        self.range = widened;
        self.num_out_of_range = 0;
        self.num_in_range = 0;
    }

    pub fn in_bounds(&self, n: &N) -> bool {
        if let Some(lo) = &self.lo {
            if *n < lo.value || (lo.is_strict && *n == lo.value) {
                return false;
            }
        }
        if let Some(hi) = &self.hi {
            if *n > hi.value || (hi.is_strict && *n == hi.value) {
                return false;
            }
        }
        true
    }

    /// Closest value within bounds when the current one is outside them.
    pub fn nearest_in_bounds(&self) -> ArithResult<Option<N>> {
        if self.conflicting || self.in_bounds(&self.value) {
            return Ok(None);
        }
        if let Some(lo) = &self.lo
            && self.value <= lo.value
        {
            return Ok(Some(if lo.is_strict {
                lo.value.try_add(&N::one())?
            } else {
                lo.value.clone()
            }));
        }
        if let Some(hi) = &self.hi {
            return Ok(Some(if hi.is_strict {
                hi.value.try_sub(&N::one())?
            } else {
                hi.value.clone()
            }));
        }
        Ok(None)
    }

    pub fn is_fixed(&self) -> bool {
        if self.conflicting {
            return true;
        }
        match (&self.lo, &self.hi) {
            (Some(lo), Some(hi)) => !lo.is_strict && !hi.is_strict && lo.value == hi.value,
            _ => false,
        }
    }

    pub fn is_tabu(&self, step: u64, delta: &N) -> bool {
        step < if delta.is_positive() {
            self.tabu_pos
        } else {
            self.tabu_neg
        }
    }

    pub fn set_step(&mut self, step: u64, tabu_step: u64, delta: &N) {
        if delta.is_positive() {
            self.tabu_pos = tabu_step;
            self.last_pos = step;
        } else {
            self.tabu_neg = tabu_step;
            self.last_neg = step;
        }
    }

    pub fn last_step(&self, delta: &N) -> u64 {
        if delta.is_positive() {
            self.last_pos
        } else {
            self.last_neg
        }
    }

    pub fn reset_tabu(&mut self) {
        self.tabu_pos = 0;
        self.tabu_neg = 0;
        self.last_pos = 0;
        self.last_neg = 0;
    }
}

pub struct VarStore<N, T> {
    pub vars: Vec<VarInfo<N, T>>,
    pub muls: Vec<MulDef>,
    pub adds: Vec<AddDef<N>>,
    pub ops: Vec<OpDef>,
}

impl<N, T> Default for VarStore<N, T> {
    fn default() -> Self {
        Self {
            vars: Vec::new(),
            muls: Vec::new(),
            adds: Vec::new(),
            ops: Vec::new(),
        }
    }
}

impl<N: Numeral, T> VarStore<N, T> {
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[inline(always)]
    pub fn value(&self, v: VarId) -> &N {
        self.vars[v].value()
    }

    pub fn add_var(&mut self, term: T, sort: VarSort) -> VarId {
        let v = self.vars.len();
        self.vars.push(VarInfo::new(term, sort));
        v
    }

    pub fn is_defined(&self, v: VarId) -> bool {
        self.vars[v].definition.is_some()
    }

    /// Free input variable that can take a new value directly.
    pub fn is_movable(&self, v: VarId) -> bool {
        !self.is_defined(v) && !self.vars[v].is_fixed()
    }

    pub fn add_mul(&mut self, var: VarId, monomial: Vec<(VarId, u32)>) {
        debug_assert!(monomial.iter().all(|&(w, _)| w < var));
        let index = self.muls.len();
        for &(w, _) in monomial.iter() {
            self.vars[w].muls.push(index);
        }
        self.vars[var].definition = Some(Definition::Mul(index));
        self.muls.push(MulDef { var, monomial });
    }

    pub fn add_add(&mut self, var: VarId, term: LinearTerm<N>) {
        debug_assert!(term.args.iter().all(|&(_, w)| w < var));
        let index = self.adds.len();
        for &(_, w) in term.args.iter() {
            self.vars[w].adds.push(index);
        }
        self.vars[var].definition = Some(Definition::Add(index));
        self.adds.push(AddDef { var, term });
    }

    pub fn add_op(&mut self, var: VarId, kind: OpKind, arg1: VarId, arg2: Option<VarId>) {
        debug_assert!(arg1 < var && arg2.is_none_or(|a| a < var));
        let index = self.ops.len();
        self.vars[arg1].ops.push(index);
        if let Some(arg2) = arg2
            && arg2 != arg1
        {
            self.vars[arg2].ops.push(index);
        }
        self.vars[var].definition = Some(Definition::Op(index));
        self.ops.push(OpDef {
            var,
            kind,
            arg1,
            arg2,
        });
    }

    /// Operands of the definition of `v`.
    pub fn operands(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        match self.vars[v].definition {
            None => Either::Left(Either::Left(std::iter::empty())),
            Some(Definition::Mul(index)) => Either::Left(Either::Right(
                self.muls[index].monomial.iter().map(|&(w, _)| w),
            )),
            Some(Definition::Add(index)) => Either::Right(Either::Left(
                self.adds[index].term.args.iter().map(|&(_, w)| w),
            )),
            Some(Definition::Op(index)) => {
                let od = &self.ops[index];
                Either::Right(Either::Right(std::iter::once(od.arg1).chain(od.arg2)))
            }
        }
    }

    /// Defined variables that take `v` as an operand.
    pub fn consumers(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        let info = &self.vars[v];
        info.muls
            .iter()
            .map(|&i| self.muls[i].var)
            .chain(info.adds.iter().map(|&i| self.adds[i].var))
            .chain(info.ops.iter().map(|&i| self.ops[i].var))
    }

    /// Product of the factors of multiplication variable `m` other than `x`;
    /// one when `m` is `x` itself or not a product.
    pub fn mul_value_without(&self, m: VarId, x: VarId) -> ArithResult<N> {
        if m == x {
            return Ok(N::one());
        }
        let Some(Definition::Mul(index)) = self.vars[m].definition else {
            return Ok(N::one());
        };
        let mut product = N::one();
        for &(w, p) in self.muls[index].monomial.iter() {
            if w != x {
                product = product.try_mul(&self.value(w).try_pow(p)?)?;
            }
        }
        Ok(product)
    }

    /// Value the definition of `v` assigns under the current operand values.
    pub fn eval_definition(&self, v: VarId) -> ArithResult<N> {
        self.eval_definition_by(v, |w| self.value(w))
    }

    /// Same as [`VarStore::eval_definition`], reading operand values through `value`.
    pub fn eval_definition_by<'a>(
        &'a self,
        v: VarId,
        value: impl Fn(VarId) -> &'a N,
    ) -> ArithResult<N> {
        match self.vars[v].definition {
            None => Ok(value(v).clone()),
            Some(Definition::Mul(index)) => {
                let mut product = N::one();
                for &(w, p) in self.muls[index].monomial.iter() {
                    product = product.try_mul(&value(w).try_pow(p)?)?;
                }
                Ok(product)
            }
            Some(Definition::Add(index)) => self.adds[index].term.eval_by(value),
            Some(Definition::Op(index)) => {
                let od = &self.ops[index];
                eval_op(od.kind, value(od.arg1), od.arg2.map(&value))
            }
        }
    }
}

/// Total semantics for the partial operators: division by zero evaluates to
/// zero; a power with an exponent that is not a small non-negative integer
/// evaluates to one.
pub fn eval_op<N: Numeral>(kind: OpKind, x: &N, y: Option<&N>) -> ArithResult<N> {
    let divisor = || -> ArithResult<&N> { y.ok_or(ArithError::NoMove) };
    match kind {
        OpKind::Mod | OpKind::IDiv | OpKind::Div | OpKind::Rem => {
            let y = divisor()?;
            if y.is_zero() {
                return Ok(N::zero());
            }
            match kind {
                OpKind::Mod => x.try_mod(y),
                OpKind::IDiv => x.try_idiv(y),
                OpKind::Rem => x.try_rem(y),
                _ => x.try_div(y),
            }
        }
        OpKind::Power => {
            let y = divisor()?;
            match small_exponent(y) {
                Some(k) => x.try_pow(k),
                None => Ok(N::one()),
            }
        }
        OpKind::Abs => x.try_abs(),
        OpKind::ToInt => Ok(x.floor()),
        OpKind::ToReal => Ok(x.clone()),
    }
}

pub const MAX_EXPONENT: u32 = 64;

pub fn small_exponent<N: Numeral>(y: &N) -> Option<u32> {
    if !y.is_integral() || y.is_negative() {
        return None;
    }
    let mut k = 0;
    let mut candidate = N::zero();
    while candidate < *y {
        if k == MAX_EXPONENT {
            return None;
        }
        k += 1;
        candidate = candidate.try_add(&N::one()).ok()?;
    }
    Some(k)
}

impl Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OpKind::Mod => "mod",
            OpKind::IDiv => "div",
            OpKind::Div => "/",
            OpKind::Rem => "rem",
            OpKind::Power => "^",
            OpKind::Abs => "abs",
            OpKind::ToInt => "to_int",
            OpKind::ToReal => "to_real",
        })
    }
}

#[cfg(test)]
mod test {
    use super::{Bound, OpKind, VarInfo, VarSort, VarStore, eval_op};
    use crate::ineq::LinearTerm;

    #[test]
    fn test_eval_ops() {
        assert_eq!(eval_op(OpKind::Mod, &-7i64, Some(&3)), Ok(2));
        assert_eq!(eval_op(OpKind::IDiv, &7i64, Some(&0)), Ok(0));
        assert_eq!(eval_op(OpKind::Power, &3i64, Some(&4)), Ok(81));
        assert_eq!(eval_op(OpKind::Power, &3i64, Some(&-1)), Ok(1));
        assert_eq!(eval_op(OpKind::Abs, &-3i64, None), Ok(3));
    }

    #[test]
    fn test_definitions_evaluate_in_order() {
        let mut store = VarStore::<i64, &str>::default();
        let x = store.add_var("x", VarSort::Int);
        let y = store.add_var("y", VarSort::Int);
        let xy = store.add_var("x*y", VarSort::Int);
        store.add_mul(xy, vec![(x, 1), (y, 1)]);
        let s = store.add_var("x*y+2x+1", VarSort::Int);
        store.add_add(
            s,
            LinearTerm {
                args: vec![(1, xy), (2, x)],
                constant: 1,
            },
        );
        store.vars[x].set_value(3);
        store.vars[y].set_value(4);
        let value = store.eval_definition(xy).unwrap();
        store.vars[xy].set_value(value);
        assert_eq!(store.eval_definition(s), Ok(19));
        assert_eq!(store.mul_value_without(xy, x), Ok(4));
        assert_eq!(store.consumers(x).collect::<Vec<_>>(), vec![xy, s]);
        assert_eq!(store.operands(s).collect::<Vec<_>>(), vec![xy, x]);
    }

    #[test]
    fn test_range_widens_monotonically() {
        let mut info = VarInfo::<i64, ()>::new((), VarSort::Int);
        let initial = *info.range();
        assert!(info.in_range(&5));
        let far = 3 * initial;
        // one in-range hit raises the threshold to 2000 rejections
        for _ in 0..2000 {
            assert!(!info.in_range(&far));
            assert_eq!(*info.range(), initial);
        }
        assert!(!info.in_range(&far));
        assert_eq!(*info.range(), 2 * initial);
        assert!(info.in_range(&(far / 2)));
        assert!(*info.range() >= 2 * initial);
    }

    #[test]
    fn test_near_bound_is_tolerated() {
        let mut info = VarInfo::<i64, ()>::new((), VarSort::Int);
        let range = *info.range();
        info.lo = Some(Bound {
            is_strict: false,
            value: 2 * range,
        });
        assert!(info.in_range(&(2 * range + 10)));
        assert!(!info.in_range(&(4 * range)));
    }

    #[test]
    fn test_tabu_by_direction() {
        let mut info = VarInfo::<i64, ()>::new((), VarSort::Int);
        info.set_step(10, 30, &1);
        assert!(info.is_tabu(29, &5));
        assert!(!info.is_tabu(30, &5));
        assert!(!info.is_tabu(12, &-5));
        assert_eq!(info.last_step(&1), 10);
    }
}
