//! Inversion of definitions: which operand values make a defined variable
//! evaluate to a requested target.

use std::{fmt::Debug, hash::Hash};

use log::trace;
use rand::Rng;

use crate::{
    error::{ArithError, ArithResult},
    numeral::{Numeral, factor, root_of},
    plugin::ArithPlugin,
    term::Context,
    vars::{Definition, OpDef, OpKind, VarId, small_exponent},
};

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    /// Operand updates under which the definition of `v` evaluates to `target`.
    /// An empty result means the definition already has that value whatever
    /// the operands are moved to.
    pub(crate) fn repair_definition(&mut self, v: VarId, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let updates = match self.store.vars[v].definition {
            None => Ok(vec![(v, target.clone())]),
            Some(Definition::Add(index)) => self.repair_add(index, target),
            Some(Definition::Mul(index)) => self.repair_mul(index, target),
            Some(Definition::Op(index)) => {
                let od = self.store.ops[index].clone();
                match od.kind {
                    OpKind::Mod => self.repair_mod(&od, target),
                    OpKind::IDiv => self.repair_idiv(&od, target),
                    OpKind::Div => self.repair_div(&od, target),
                    OpKind::Rem => self.repair_rem(&od, target),
                    OpKind::Power => self.repair_power(&od, target),
                    OpKind::Abs => self.repair_abs(&od, target),
                    OpKind::ToInt => self.repair_to_int(&od, target),
                    OpKind::ToReal => self.repair_to_real(&od, target),
                }
            }
        }?;
        for (w, value) in updates.iter() {
            if self.store.vars[*w].is_int() && !value.is_integral() {
                return Err(ArithError::NoMove);
            }
        }
        trace!("repair v{} to {}: {:?}", v, target, updates);
        Ok(updates)
    }

    /// Solves for one argument, starting from a random position.
    fn repair_add(&mut self, index: usize, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let ad = &self.store.adds[index];
        let len = ad.term.args.len();
        if len == 0 {
            return Err(ArithError::NoMove);
        }
        let sum = ad.term.eval(&self.store)?;
        let start = self.rng.gen_range(0..len);
        for k in 0..len {
            let (coeff, x) = &self.store.adds[index].term.args[(start + k) % len];
            if self.var_is_fixed(*x) {
                continue;
            }
            let others = sum.try_sub(&coeff.try_mul(self.store.value(*x))?)?;
            let Ok(value) = target.try_sub(&others)?.try_div(coeff) else {
                continue;
            };
            if self.store.vars[*x].is_int() && !value.is_integral() {
                continue;
            }
            return Ok(vec![(*x, value)]);
        }
        Err(ArithError::NoMove)
    }

    /// Solves for a single factor when the others divide the target, otherwise
    /// spreads the prime factors of the target over the free factors.
    fn repair_mul(&mut self, index: usize, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let m = self.store.muls[index].var;
        let monomial = self.store.muls[index].monomial.clone();
        if monomial.is_empty() {
            return Err(ArithError::NoMove);
        }
        let start = self.rng.gen_range(0..monomial.len());
        for k in 0..monomial.len() {
            let (x, p) = monomial[(start + k) % monomial.len()];
            if self.var_is_fixed(x) {
                continue;
            }
            let other = self.store.mul_value_without(m, x)?;
            if other.is_zero() {
                continue;
            }
            let Ok(quotient) = target.try_div(&other) else {
                continue;
            };
            let Some(mut root) = root_of(p, &quotient) else {
                continue;
            };
            if self.store.vars[x].is_int() && !root.is_integral() {
                continue;
            }
            if p % 2 == 0 && self.rng.gen_bool(0.5) {
                root = root.try_neg()?;
            }
            return Ok(vec![(x, root)]);
        }
        self.repair_mul_factors(&monomial, target)
    }

    fn repair_mul_factors(
        &mut self,
        monomial: &[(VarId, u32)],
        target: &N,
    ) -> ArithResult<Vec<(VarId, N)>> {
        let free: Vec<VarId> = monomial
            .iter()
            .filter(|&&(x, p)| p == 1 && !self.var_is_fixed(x))
            .map(|&(x, _)| x)
            .collect();
        if free.is_empty() {
            return Err(ArithError::NoMove);
        }
        if target.is_zero() {
            let x = free[self.rng.gen_range(0..free.len())];
            return Ok(vec![(x, N::zero())]);
        }
        let mut rest = N::one();
        for &(x, p) in monomial.iter() {
            if !free.contains(&x) {
                rest = rest.try_mul(&self.store.value(x).try_pow(p)?)?;
            }
        }
        if rest.is_zero() {
            return Err(ArithError::NoMove);
        }
        let quotient = target.try_div(&rest).map_err(|_| ArithError::NoMove)?;
        let mut values = vec![N::one(); free.len()];
        if free.iter().all(|&x| self.store.vars[x].is_int()) {
            if !quotient.is_integral() {
                return Err(ArithError::NoMove);
            }
            for prime in factor(&quotient) {
                let position = self.rng.gen_range(0..values.len());
                values[position] = values[position].try_mul(&prime)?;
            }
        } else {
            let position = self.rng.gen_range(0..values.len());
            values[position] = quotient.try_abs()?;
        }
        if quotient.is_negative() {
            let position = self.rng.gen_range(0..values.len());
            values[position] = values[position].try_neg()?;
        }
        Ok(free.into_iter().zip(values).collect())
    }

    fn op_values(&self, od: &OpDef) -> ArithResult<(N, N)> {
        let y = od.arg2.ok_or(ArithError::NoMove)?;
        Ok((self.store.value(od.arg1).clone(), self.store.value(y).clone()))
    }

    fn movable_arg1(&self, od: &OpDef) -> ArithResult<()> {
        if self.var_is_fixed(od.arg1) {
            return Err(ArithError::NoMove);
        }
        Ok(())
    }

    /// Keeps the quotient of `x` and moves its remainder to `target`.
    fn repair_mod(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let (x, y) = self.op_values(od)?;
        self.mod_to(od, &x, &y, target)
    }

    fn mod_to(&self, od: &OpDef, x: &N, y: &N, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        if y.is_zero() {
            return if target.is_zero() { Ok(Vec::new()) } else { Err(ArithError::NoMove) };
        }
        if target.is_negative() || *target >= y.try_abs()? {
            return Err(ArithError::NoMove);
        }
        self.movable_arg1(od)?;
        let value = x.try_sub(&x.try_mod(y)?)?.try_add(target)?;
        Ok(vec![(od.arg1, value)])
    }

    /// Keeps the remainder of `x` and moves its quotient to `target`.
    fn repair_idiv(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let (x, y) = self.op_values(od)?;
        if y.is_zero() {
            return if target.is_zero() { Ok(Vec::new()) } else { Err(ArithError::NoMove) };
        }
        self.movable_arg1(od)?;
        let value = y.try_mul(target)?.try_add(&x.try_mod(&y)?)?;
        Ok(vec![(od.arg1, value)])
    }

    fn repair_div(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let (_, y) = self.op_values(od)?;
        if y.is_zero() {
            return if target.is_zero() { Ok(Vec::new()) } else { Err(ArithError::NoMove) };
        }
        self.movable_arg1(od)?;
        Ok(vec![(od.arg1, target.try_mul(&y)?)])
    }

    /// The remainder carries the sign of the divisor.
    fn repair_rem(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let (x, y) = self.op_values(od)?;
        let modulus = if y.is_negative() { target.try_neg()? } else { target.clone() };
        self.mod_to(od, &x, &y, &modulus)
    }

    fn repair_power(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        let (_, y) = self.op_values(od)?;
        match small_exponent(&y) {
            Some(k) if k > 0 => {
                self.movable_arg1(od)?;
                let root = root_of(k, target).ok_or(ArithError::NoMove)?;
                Ok(vec![(od.arg1, root)])
            }
            _ if target.is_one() => Ok(Vec::new()),
            _ => Err(ArithError::NoMove),
        }
    }

    fn repair_abs(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        if target.is_negative() {
            return Err(ArithError::NoMove);
        }
        self.movable_arg1(od)?;
        let value = if self.store.value(od.arg1).is_negative() {
            target.try_neg()?
        } else {
            target.clone()
        };
        Ok(vec![(od.arg1, value)])
    }

    /// Keeps the fractional part of the operand.
    fn repair_to_int(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        if !target.is_integral() {
            return Err(ArithError::NoMove);
        }
        self.movable_arg1(od)?;
        let x = self.store.value(od.arg1);
        let value = x.try_sub(&x.floor())?.try_add(target)?;
        Ok(vec![(od.arg1, value)])
    }

    fn repair_to_real(&mut self, od: &OpDef, target: &N) -> ArithResult<Vec<(VarId, N)>> {
        if self.store.vars[od.arg1].is_int() && !target.is_integral() {
            return Err(ArithError::NoMove);
        }
        self.movable_arg1(od)?;
        Ok(vec![(od.arg1, target.clone())])
    }

    /// Follows single-operand repairs from `v` down to a free variable.
    pub(crate) fn resolve_target(&mut self, v: VarId, target: N) -> ArithResult<(VarId, N)> {
        let (mut v, mut target) = (v, target);
        while self.store.is_defined(v) {
            let updates = self.repair_definition(v, &target)?;
            let [(w, value)] = updates.as_slice() else {
                return Err(ArithError::NoMove);
            };
            (v, target) = (*w, value.clone());
        }
        if self.store.vars[v].is_int() && !target.is_integral() {
            return Err(ArithError::NoMove);
        }
        Ok((v, target))
    }

    /// Moves `v` to `target`, recursing into the operands of definitions.
    pub(crate) fn apply_target<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        v: VarId,
        target: N,
    ) -> ArithResult<()> {
        if *self.store.value(v) == target {
            return Ok(());
        }
        if !self.store.is_defined(v) {
            if self.store.vars[v].is_fixed() {
                return Err(ArithError::NoMove);
            }
            return self.update(ctx, v, target);
        }
        let updates = self.repair_definition(v, &target)?;
        if updates.is_empty() {
            return Err(ArithError::NoMove);
        }
        for (w, value) in updates {
            self.apply_target(ctx, w, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::SmallRng};
    use test_log::test;

    use crate::{
        config::Config,
        error::ArithError,
        ineq::{Ineq, IneqKind, LinearTerm},
        plugin::ArithPlugin,
        vars::{OpKind, VarSort},
    };

    type Plugin = ArithPlugin<i64, usize, SmallRng>;

    fn plugin() -> Plugin {
        ArithPlugin::new(Config::default(), SmallRng::seed_from_u64(42))
    }

    fn var(plugin: &mut Plugin, value: i64) -> usize {
        let v = plugin.store.len();
        plugin.store.add_var(v, VarSort::Int);
        plugin.store.vars[v].set_value(value);
        v
    }

    fn fixed(plugin: &mut Plugin, value: i64) -> usize {
        let v = var(plugin, value);
        plugin.add_ge(v, value);
        plugin.add_le(v, value);
        v
    }

    #[test]
    fn test_repair_add() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 0);
        let s = var(&mut plugin, 5);
        plugin.store.add_add(
            s,
            LinearTerm {
                args: vec![(3, x)],
                constant: 5,
            },
        );
        assert_eq!(plugin.repair_definition(s, &14), Ok(vec![(x, 3)]));
        assert_eq!(plugin.repair_definition(s, &15), Err(ArithError::NoMove));

        // 3 * x + 5 = 14
        let mut ineq = Ineq::new(IneqKind::Eq, 9);
        ineq.term.add_arg(3, x).unwrap();
        plugin.init_ineq(0, ineq).unwrap();
        let ineq = plugin.ineq(0).unwrap();
        assert!(ineq.dtt(false).unwrap() > 0);
        assert_eq!(ineq.dtt_update(false, &plugin.store, x, &3), Ok(0));
    }

    #[test]
    fn test_repair_mul() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 1);
        let y = fixed(&mut plugin, 4);
        let m = var(&mut plugin, 4);
        plugin.store.add_mul(m, vec![(x, 1), (y, 1)]);
        assert_eq!(plugin.repair_definition(m, &20), Ok(vec![(x, 5)]));

        let mut plugin = self::plugin();
        let x = var(&mut plugin, 1);
        let y = fixed(&mut plugin, 0);
        let m = var(&mut plugin, 0);
        plugin.store.add_mul(m, vec![(x, 1), (y, 1)]);
        assert_eq!(plugin.repair_definition(m, &20), Err(ArithError::NoMove));
    }

    #[test]
    fn test_repair_mul_spreads_factors() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 0);
        let y = var(&mut plugin, 0);
        let m = var(&mut plugin, 0);
        plugin.store.add_mul(m, vec![(x, 1), (y, 1)]);
        let updates = plugin.repair_definition(m, &-12).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].1 * updates[1].1, -12);
    }

    #[test]
    fn test_repair_operators() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 7);
        let y = fixed(&mut plugin, 3);
        let z = fixed(&mut plugin, -3);
        let cases = [
            (OpKind::Mod, Some(y), 2, Ok(vec![(x, 8)])),
            (OpKind::Mod, Some(y), 3, Err(ArithError::NoMove)),
            (OpKind::IDiv, Some(y), 5, Ok(vec![(x, 16)])),
            (OpKind::Rem, Some(z), -2, Ok(vec![(x, 8)])),
            (OpKind::Div, Some(y), 4, Ok(vec![(x, 12)])),
            (OpKind::Abs, None, 6, Ok(vec![(x, 6)])),
            (OpKind::Abs, None, -1, Err(ArithError::NoMove)),
            (OpKind::ToInt, None, 5, Ok(vec![(x, 5)])),
            (OpKind::ToReal, None, 4, Ok(vec![(x, 4)])),
        ];
        for (kind, arg2, target, expected) in cases {
            let v = var(&mut plugin, 0);
            plugin.store.add_op(v, kind, x, arg2);
            assert_eq!(plugin.repair_definition(v, &target), expected, "{}", kind);
        }
    }

    #[test]
    fn test_repair_power() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 3);
        let two = fixed(&mut plugin, 2);
        let p = var(&mut plugin, 9);
        plugin.store.add_op(p, OpKind::Power, x, Some(two));
        assert_eq!(plugin.repair_definition(p, &49), Ok(vec![(x, 7)]));
        assert_eq!(plugin.repair_definition(p, &50), Err(ArithError::NoMove));
        let zero = fixed(&mut plugin, 0);
        let q = var(&mut plugin, 1);
        plugin.store.add_op(q, OpKind::Power, x, Some(zero));
        assert_eq!(plugin.repair_definition(q, &1), Ok(vec![]));
    }

    #[test]
    fn test_resolve_through_definitions() {
        let mut plugin = plugin();
        let x = var(&mut plugin, 1);
        let a = var(&mut plugin, 1);
        plugin.store.add_op(a, OpKind::Abs, x, None);
        let s = var(&mut plugin, 3);
        plugin.store.add_add(
            s,
            LinearTerm {
                args: vec![(2, a)],
                constant: 1,
            },
        );
        assert_eq!(plugin.resolve_target(s, 9), Ok((x, 4)));
    }
}
