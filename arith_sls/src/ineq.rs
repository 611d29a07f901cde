use std::fmt::Display;

use crate::{
    error::ArithResult,
    numeral::Numeral,
    vars::{VarId, VarStore},
};

/// `sum(coeff * var) + constant`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearTerm<N> {
    pub args: Vec<(N, VarId)>,
    pub constant: N,
}

impl<N: Numeral> Default for LinearTerm<N> {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            constant: N::zero(),
        }
    }
}

impl<N: Numeral> LinearTerm<N> {
    /// Adds `coeff * var`, merging with an existing occurrence of `var`.
    pub fn add_arg(&mut self, coeff: N, var: VarId) -> ArithResult<()> {
        if coeff.is_zero() {
            return Ok(());
        }
        if let Some(position) = self.args.iter().position(|(_, v)| *v == var) {
            let merged = self.args[position].0.try_add(&coeff)?;
            if merged.is_zero() {
                self.args.swap_remove(position);
            } else {
                self.args[position].0 = merged;
            }
        } else {
            self.args.push((coeff, var));
        }
        Ok(())
    }

    pub fn eval<T>(&self, store: &VarStore<N, T>) -> ArithResult<N> {
        self.eval_by(|v| store.value(v))
    }

    pub fn eval_by<'a>(&self, value: impl Fn(VarId) -> &'a N) -> ArithResult<N>
    where
        N: 'a,
    {
        let mut sum = self.constant.clone();
        for (coeff, var) in self.args.iter() {
            sum = sum.try_add(&coeff.try_mul(value(*var))?)?;
        }
        Ok(sum)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IneqKind {
    Le,
    Lt,
    Eq,
}

impl Display for IneqKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            IneqKind::Le => "<=",
            IneqKind::Lt => "<",
            IneqKind::Eq => "=",
        })
    }
}

/// Occurrence of a base variable inside an inequality: either the variable
/// itself (`power == 1`, `var` is the base) or a product containing it.
#[derive(Clone, Debug, PartialEq)]
pub struct NonlinearCoeff<N> {
    pub var: VarId,
    pub coeff: N,
    pub power: u32,
}

/// `args op bound`, bound to one Boolean atom. `args_value` caches the value of
/// the left-hand side under the current assignment.
#[derive(Clone, Debug)]
pub struct Ineq<N> {
    pub term: LinearTerm<N>,
    pub kind: IneqKind,
    pub bound: N,
    pub nonlinear: Vec<(VarId, Vec<NonlinearCoeff<N>>)>,
    /// Indices of the multiplication definitions referenced by `term`.
    pub monomials: Vec<usize>,
    pub args_value: N,
    pub is_linear: bool,
}

impl<N: Numeral> Ineq<N> {
    pub fn new(kind: IneqKind, bound: N) -> Self {
        Self {
            term: LinearTerm::default(),
            kind,
            bound,
            nonlinear: Vec::new(),
            monomials: Vec::new(),
            args_value: N::zero(),
            is_linear: true,
        }
    }

    pub fn holds_for(&self, args_value: &N) -> bool {
        match self.kind {
            IneqKind::Le => *args_value <= self.bound,
            IneqKind::Lt => *args_value < self.bound,
            IneqKind::Eq => *args_value == self.bound,
        }
    }

    pub fn is_true(&self) -> bool {
        self.holds_for(&self.args_value)
    }

    pub fn nonlinear_of(&self, x: VarId) -> Option<&[NonlinearCoeff<N>]> {
        self.nonlinear
            .iter()
            .find(|(v, _)| *v == x)
            .map(|(_, coeffs)| coeffs.as_slice())
    }

    pub fn coeff_of(&self, x: VarId) -> Option<&N> {
        self.term
            .args
            .iter()
            .find(|(_, v)| *v == x)
            .map(|(coeff, _)| coeff)
    }
}

impl<N: Numeral> Display for Ineq<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (coeff, var) in self.term.args.iter() {
            if !first {
                write!(f, " + ")?;
            }
            first = false;
            if coeff.is_one() {
                write!(f, "v{}", var)?;
            } else {
                write!(f, "{} * v{}", coeff, var)?;
            }
        }
        if first {
            write!(f, "0")?;
        }
        write!(f, " {} {} ({})", self.kind, self.bound, self.args_value)
    }
}

#[cfg(test)]
mod test {
    use super::{Ineq, IneqKind, LinearTerm};

    #[test]
    fn test_add_arg_merges() {
        let mut term = LinearTerm::<i64>::default();
        term.add_arg(2, 0).unwrap();
        term.add_arg(3, 1).unwrap();
        term.add_arg(-2, 0).unwrap();
        term.add_arg(0, 4).unwrap();
        assert_eq!(term.args, vec![(3, 1)]);
    }

    #[test]
    fn test_strict_inequality() {
        let mut ineq = Ineq::<i64>::new(IneqKind::Lt, 10);
        ineq.args_value = 10;
        assert!(!ineq.is_true());
        ineq.args_value = 9;
        assert!(ineq.is_true());
    }
}
