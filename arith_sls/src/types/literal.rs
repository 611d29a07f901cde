use std::ops::Not;

/// Boolean variable of the enclosing driver.
pub type BoolVar = usize;

/// A Boolean variable together with a sign; `sign == true` means negated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Literal {
    bits: usize,
}

impl Literal {
    #[inline(always)]
    pub fn new(var: BoolVar, sign: bool) -> Self {
        debug_assert!(((var << 1) >> 1) == var);
        Self {
            bits: (var << 1) | sign as usize,
        }
    }

    #[inline(always)]
    pub fn positive(var: BoolVar) -> Self {
        Self::new(var, false)
    }

    #[inline(always)]
    pub fn negative(var: BoolVar) -> Self {
        Self::new(var, true)
    }

    #[inline(always)]
    pub fn var(&self) -> BoolVar {
        self.bits >> 1
    }

    #[inline(always)]
    pub fn sign(&self) -> bool {
        self.bits & 1 == 1
    }

    /// Dense index over both polarities, usable as a key into per-literal tables.
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.bits
    }
}

impl Not for Literal {
    type Output = Literal;
    #[inline(always)]
    fn not(self) -> Self::Output {
        Literal {
            bits: self.bits ^ 1,
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}b{}", if self.sign() { "-" } else { "" }, self.var())
    }
}

impl std::fmt::Debug for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}
