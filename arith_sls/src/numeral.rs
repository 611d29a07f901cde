//! Exact numeric backends. The engine is generic over [`Numeral`]; every
//! operation that can leave the representable range returns an [`ArithError`]
//! instead of wrapping.

use std::{
    fmt::{Debug, Display},
    hash::Hash,
};

use num::{
    BigInt, BigRational, CheckedAdd, CheckedDiv, CheckedMul, CheckedSub, Integer, One, Signed,
    ToPrimitive, Zero, integer::Roots,
};

use crate::error::{ArithError, ArithResult};

pub trait Numeral: Clone + Ord + Hash + Debug + Display + Zero + One + Signed {
    fn from_i64(value: i64) -> Self;

    fn from_rational(value: &BigRational) -> ArithResult<Self>;

    fn to_rational(&self) -> BigRational;

    fn to_f64(&self) -> f64;

    fn try_add(&self, rhs: &Self) -> ArithResult<Self>;

    fn try_sub(&self, rhs: &Self) -> ArithResult<Self>;

    fn try_mul(&self, rhs: &Self) -> ArithResult<Self>;

    /// Exact quotient. The integer backend rejects non-integral results.
    fn try_div(&self, rhs: &Self) -> ArithResult<Self>;

    fn floor(&self) -> Self;

    fn ceil(&self) -> Self;

    fn is_integral(&self) -> bool;

    /// Approximation of the non-negative `n`-th root; the floor for integral values.
    fn root_approx(&self, n: u32) -> Self;

    fn try_neg(&self) -> ArithResult<Self> {
        Self::zero().try_sub(self)
    }

    fn try_abs(&self) -> ArithResult<Self> {
        if self.is_negative() {
            self.try_neg()
        } else {
            Ok(self.clone())
        }
    }

    fn floor_div(&self, rhs: &Self) -> ArithResult<Self> {
        if rhs.is_zero() {
            return Err(ArithError::DivisionByZero);
        }
        // a/b for rationals is always representable, for integers go through the
        // remainder so the integer backend does not reject the quotient
        let r = self.try_mod(rhs)?;
        let q = self.try_sub(&r)?.try_div(rhs)?;
        if rhs.is_negative() && !r.is_zero() {
            // mod is taken against |b|, so the quotient above rounds the other way
            return q.try_sub(&Self::one());
        }
        Ok(q)
    }

    fn ceil_div(&self, rhs: &Self) -> ArithResult<Self> {
        self.try_neg()?.floor_div(rhs)?.try_neg()
    }

    /// Euclidean modulus: `0 <= a mod b < |b|`.
    fn try_mod(&self, rhs: &Self) -> ArithResult<Self> {
        if rhs.is_zero() {
            return Err(ArithError::DivisionByZero);
        }
        let b = rhs.try_abs()?;
        let q = self.try_div_floor_exact(&b)?;
        self.try_sub(&b.try_mul(&q)?)
    }

    /// Integer division matching [`Numeral::try_mod`]: `a = b * (a div b) + a mod b`.
    fn try_idiv(&self, rhs: &Self) -> ArithResult<Self> {
        let r = self.try_mod(rhs)?;
        self.try_sub(&r)?.try_div(rhs)
    }

    /// Remainder whose sign follows the divisor.
    fn try_rem(&self, rhs: &Self) -> ArithResult<Self> {
        let r = self.try_mod(rhs)?;
        if rhs.is_negative() { r.try_neg() } else { Ok(r) }
    }

    fn try_pow(&self, k: u32) -> ArithResult<Self> {
        let mut result = Self::one();
        let mut base = self.clone();
        let mut k = k;
        while k > 0 {
            if k & 1 == 1 {
                result = result.try_mul(&base)?;
            }
            k >>= 1;
            if k > 0 {
                base = base.try_mul(&base)?;
            }
        }
        Ok(result)
    }

    #[doc(hidden)]
    fn try_div_floor_exact(&self, positive: &Self) -> ArithResult<Self>;
}

impl Numeral for i64 {
    fn from_i64(value: i64) -> Self {
        value
    }

    fn from_rational(value: &BigRational) -> ArithResult<Self> {
        if !value.is_integer() {
            return Err(ArithError::NotRepresentable(value.to_string()));
        }
        value
            .to_integer()
            .to_i64()
            .ok_or_else(|| ArithError::NotRepresentable(value.to_string()))
    }

    fn to_rational(&self) -> BigRational {
        BigRational::from_integer(BigInt::from(*self))
    }

    fn to_f64(&self) -> f64 {
        *self as f64
    }

    fn try_add(&self, rhs: &Self) -> ArithResult<Self> {
        CheckedAdd::checked_add(self, rhs).ok_or(ArithError::Overflow)
    }

    fn try_sub(&self, rhs: &Self) -> ArithResult<Self> {
        CheckedSub::checked_sub(self, rhs).ok_or(ArithError::Overflow)
    }

    fn try_mul(&self, rhs: &Self) -> ArithResult<Self> {
        CheckedMul::checked_mul(self, rhs).ok_or(ArithError::Overflow)
    }

    fn try_div(&self, rhs: &Self) -> ArithResult<Self> {
        if *rhs == 0 {
            return Err(ArithError::DivisionByZero);
        }
        match self.checked_rem(*rhs) {
            None => Err(ArithError::Overflow),
            Some(0) => CheckedDiv::checked_div(self, rhs).ok_or(ArithError::Overflow),
            Some(_) => Err(ArithError::NotRepresentable(format!("{}/{}", self, rhs))),
        }
    }

    fn floor(&self) -> Self {
        *self
    }

    fn ceil(&self) -> Self {
        *self
    }

    fn is_integral(&self) -> bool {
        true
    }

    fn root_approx(&self, n: u32) -> Self {
        debug_assert!(*self >= 0);
        Roots::nth_root(self, n)
    }

    fn try_div_floor_exact(&self, positive: &Self) -> ArithResult<Self> {
        debug_assert!(*positive > 0);
        Ok(Integer::div_floor(self, positive))
    }
}

impl Numeral for BigRational {
    fn from_i64(value: i64) -> Self {
        BigRational::from_integer(BigInt::from(value))
    }

    fn from_rational(value: &BigRational) -> ArithResult<Self> {
        Ok(value.clone())
    }

    fn to_rational(&self) -> BigRational {
        self.clone()
    }

    fn to_f64(&self) -> f64 {
        ToPrimitive::to_f64(self).unwrap_or(if self.is_negative() {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        })
    }

    fn try_add(&self, rhs: &Self) -> ArithResult<Self> {
        Ok(self + rhs)
    }

    fn try_sub(&self, rhs: &Self) -> ArithResult<Self> {
        Ok(self - rhs)
    }

    fn try_mul(&self, rhs: &Self) -> ArithResult<Self> {
        Ok(self * rhs)
    }

    fn try_div(&self, rhs: &Self) -> ArithResult<Self> {
        if rhs.is_zero() {
            return Err(ArithError::DivisionByZero);
        }
        Ok(self / rhs)
    }

    fn floor(&self) -> Self {
        BigRational::floor(self)
    }

    fn ceil(&self) -> Self {
        BigRational::ceil(self)
    }

    fn is_integral(&self) -> bool {
        self.is_integer()
    }

    fn root_approx(&self, n: u32) -> Self {
        debug_assert!(!self.is_negative());
        if self.is_integer() {
            return BigRational::from_integer(self.numer().nth_root(n));
        }
        BigRational::new(self.numer().nth_root(n), self.denom().nth_root(n))
    }

    fn try_div_floor_exact(&self, positive: &Self) -> ArithResult<Self> {
        debug_assert!(positive.is_positive());
        Ok((self / positive).floor())
    }
}

/// Exact `n`-th root of `a`, if one exists. Odd roots of negative numbers are allowed.
pub fn root_of<N: Numeral>(n: u32, a: &N) -> Option<N> {
    if n == 0 {
        return None;
    }
    if n == 1 {
        return Some(a.clone());
    }
    if a.is_negative() {
        if n % 2 == 0 {
            return None;
        }
        let r = root_of(n, &a.try_neg().ok()?)?;
        return r.try_neg().ok();
    }
    let r = a.root_approx(n);
    if r.try_pow(n).ok()? == *a {
        return Some(r);
    }
    None
}

pub fn power_of<N: Numeral>(a: &N, k: u32) -> ArithResult<N> {
    a.try_pow(k)
}

/// Prime factors of the integral part of `|n|` by trial division, giving up on
/// divisors past `10_000`; the unfactored rest is returned as the last element.
pub fn factor<N: Numeral>(n: &N) -> Vec<N> {
    let mut factors = Vec::new();
    let Ok(mut rest) = n.floor().try_abs() else {
        return factors;
    };
    if rest <= N::one() {
        return factors;
    }
    let mut divisor = N::from_i64(2);
    for _ in 0..10_000 {
        let Ok(square) = divisor.try_mul(&divisor) else {
            break;
        };
        if square > rest {
            break;
        }
        while rest.try_mod(&divisor).map(|r| r.is_zero()).unwrap_or(false) {
            factors.push(divisor.clone());
            match rest.try_div(&divisor) {
                Ok(quotient) => rest = quotient,
                Err(_) => return factors,
            }
        }
        match divisor.try_add(&N::one()) {
            Ok(next) => divisor = next,
            Err(_) => break,
        }
    }
    if rest > N::one() {
        factors.push(rest);
    }
    factors
}

#[cfg(test)]
mod test {
    use num::{BigInt, BigRational};

    use super::{Numeral, factor, root_of};
    use crate::error::ArithError;

    fn q(n: i64, d: i64) -> BigRational {
        BigRational::new(BigInt::from(n), BigInt::from(d))
    }

    #[test]
    fn test_checked_integer_overflow() {
        assert_eq!(i64::MAX.try_add(&1), Err(ArithError::Overflow));
        assert_eq!(i64::MIN.try_neg(), Err(ArithError::Overflow));
        assert_eq!((1i64 << 40).try_mul(&(1i64 << 40)), Err(ArithError::Overflow));
        assert_eq!(7i64.try_div(&2), Err(ArithError::NotRepresentable("7/2".into())));
        assert_eq!(8i64.try_div(&0), Err(ArithError::DivisionByZero));
    }

    #[test]
    fn test_mod_div_rem() {
        assert_eq!(7i64.try_mod(&3), Ok(1));
        assert_eq!((-7i64).try_mod(&3), Ok(2));
        assert_eq!((-7i64).try_mod(&-3), Ok(2));
        assert_eq!((-7i64).try_idiv(&3), Ok(-3));
        assert_eq!((-7i64).try_idiv(&-3), Ok(3));
        assert_eq!(7i64.try_rem(&-3), Ok(-1));
        assert_eq!((-7i64).floor_div(&2), Ok(-4));
        assert_eq!((-7i64).ceil_div(&2), Ok(-3));
        assert_eq!(7i64.floor_div(&-2), Ok(-4));
        assert_eq!(q(-7, 1).try_mod(&q(3, 1)), Ok(q(2, 1)));
        assert_eq!(q(7, 2).floor_div(&q(1, 1)), Ok(q(3, 1)));
    }

    #[test]
    fn test_roots() {
        assert_eq!(root_of(2, &49i64), Some(7));
        assert_eq!(root_of(2, &50i64), None);
        assert_eq!(root_of(3, &-27i64), Some(-3));
        assert_eq!(root_of(2, &-4i64), None);
        assert_eq!(root_of(2, &q(9, 4)), Some(q(3, 2)));
        assert_eq!(root_of(2, &q(2, 1)), None);
    }

    #[test]
    fn test_factor() {
        assert_eq!(factor(&60i64), vec![2, 2, 3, 5]);
        assert_eq!(factor(&-13i64), vec![13]);
        assert!(factor(&1i64).is_empty());
        assert_eq!(factor(&q(12, 1)), vec![q(2, 1), q(2, 1), q(3, 1)]);
    }
}
