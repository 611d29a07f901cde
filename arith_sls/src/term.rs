//! Interface to the enclosing local-search driver. The engine reads terms
//! through [`Context`] and never mutates the term graph; it only keeps side
//! tables keyed by the opaque term handles.

use std::{fmt::Debug, hash::Hash};

use num::BigRational;

use crate::types::{BoolVar, Literal};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Sort {
    Int,
    Real,
    Bool,
    Other,
}

/// Shape of a term node as far as arithmetic local search is concerned.
#[derive(Clone, PartialEq, Debug)]
pub enum TermKind<T> {
    Numeral(BigRational),
    /// Uninterpreted arithmetic constant, or any arithmetic term the engine
    /// treats as opaque.
    Constant,
    Add(Vec<T>),
    Sub(Vec<T>),
    Uminus(T),
    Mul(Vec<T>),
    Div(T, T),
    IDiv(T, T),
    Mod(T, T),
    Rem(T, T),
    Power(T, T),
    Abs(T),
    ToInt(T),
    ToReal(T),
    Le(T, T),
    Lt(T, T),
    Ge(T, T),
    Gt(T, T),
    Eq(T, T),
    Distinct(Vec<T>),
    Not(T),
    And(Vec<T>),
    Or(Vec<T>),
    Implies(T, T),
    /// Boolean leaf owned by another theory or by the Boolean layer.
    BoolConstant,
    Other,
}

/// Services of the driver that owns the step loop, the Boolean assignment and
/// the clause database.
pub trait Context {
    type Term: Copy + Eq + Hash + Debug;

    fn kind(&self, term: Self::Term) -> TermKind<Self::Term>;

    fn sort(&self, term: Self::Term) -> Sort;

    fn bool_var(&self, atom: Self::Term) -> Option<BoolVar>;

    fn atom(&self, var: BoolVar) -> Option<Self::Term>;

    fn num_bool_vars(&self) -> usize;

    fn is_true(&self, literal: Literal) -> bool;

    /// Flips the Boolean value of `var`, keeping clause bookkeeping current.
    fn flip(&mut self, var: BoolVar);

    fn clauses_of(&self, literal: Literal) -> &[usize];

    fn clause(&self, clause: usize) -> &[Literal];

    fn num_true(&self, clause: usize) -> usize;

    fn clause_weight(&self, clause: usize) -> f64;

    fn unsat_clauses(&self) -> Vec<usize>;

    fn num_clauses(&self) -> usize;

    /// Top-level assertions; the roots of the global lookahead submode.
    fn input_assertions(&self) -> Vec<Self::Term>;

    /// Literals fixed at the top level.
    fn unit_literals(&self) -> Vec<Literal>;

    /// Called after the value of an arithmetic term changed.
    fn new_value_eh(&mut self, _term: Self::Term) {}
}
