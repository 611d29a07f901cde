use std::collections::BTreeMap;

use num::{BigInt, BigRational};
use test_log::test;

use super::context::{MockContext, new_plugin, test_config};
use crate::{
    config::Config,
    error::ArithError,
    term::{Context, Sort, TermKind},
    types::Literal,
};

fn q(numer: i64, denom: i64) -> BigRational {
    BigRational::new(BigInt::from(numer), BigInt::from(denom))
}

#[test]
fn test_repair_linear_literal() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let two = ctx.num(2);
    let two_y = ctx.mul(vec![two, y]);
    let lhs = ctx.add(vec![x, two_y]);
    let ten = ctx.num(10);
    let b = ctx.le(lhs, ten);
    ctx.add_clause(vec![Literal::positive(b)]);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, 8).unwrap();
    plugin.set_value(&mut ctx, y, 3).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    assert!(!ctx.is_true(Literal::positive(b)));
    assert_eq!(plugin.ineq(b).unwrap().args_value, 14);

    ctx.flip(b);
    plugin.propagate_literal(&mut ctx, Literal::positive(b));
    let x = plugin.get_value(x).unwrap();
    let y = plugin.get_value(y).unwrap();
    assert!(x + 2 * y <= 10);
    assert!(plugin.ineq(b).unwrap().is_true());
    assert!(plugin.is_sat(&ctx));
    assert_eq!(plugin.stats().repairs, 1);
    assert_eq!(plugin.stats().failed_repairs, 0);
}

#[test]
fn test_cached_values_follow_updates() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let z = ctx.int();
    let xy = ctx.mul(vec![x, y]);
    let lhs = ctx.add(vec![xy, z]);
    let five = ctx.num(5);
    let b = ctx.le(lhs, five);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, 2).unwrap();
    plugin.set_value(&mut ctx, y, 3).unwrap();
    plugin.set_value(&mut ctx, z, 1).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    assert_eq!(plugin.get_value(xy), Ok(6));
    assert_eq!(plugin.get_value(lhs), Ok(7));
    assert_eq!(plugin.ineq(b).unwrap().args_value, 7);
    assert!(!ctx.is_true(Literal::positive(b)));

    ctx.changed.clear();
    plugin.set_value(&mut ctx, y, -1).unwrap();
    assert_eq!(plugin.get_value(xy), Ok(-2));
    assert_eq!(plugin.get_value(lhs), Ok(-1));
    assert_eq!(plugin.ineq(b).unwrap().args_value, -1);
    assert!(ctx.changed.contains(&xy));
    // consistent before, so the atom follows its new arithmetic value
    assert!(ctx.is_true(Literal::positive(b)));
    assert!(plugin.is_sat(&ctx));
    plugin.check_invariants();
}

#[test]
fn test_set_value_of_defined_term() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let sum = ctx.add(vec![x, y]);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    plugin.set_value(&mut ctx, sum, 10).unwrap();
    assert_eq!(plugin.get_value(sum), Ok(0));

    assert!(plugin.repair_down(&mut ctx, sum));
    assert_eq!(plugin.get_value(sum), Ok(10));
    let x = plugin.get_value(x).unwrap();
    let y = plugin.get_value(y).unwrap();
    assert_eq!(x + y, 10);

    plugin.set_value(&mut ctx, sum, 3).unwrap();
    plugin.repair_up(&mut ctx, sum);
    assert!(plugin.repair_down(&mut ctx, sum));
    assert_eq!(plugin.get_value(sum), Ok(10));
}

#[test]
fn test_value_errors() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let r = ctx.real();
    let one = ctx.num(1);
    let b = ctx.le(x, one);
    let unregistered = ctx.int();

    let mut plugin = new_plugin::<BigRational>(test_config());
    plugin.register_term(&ctx, x).unwrap();
    plugin.register_term(&ctx, r).unwrap();
    let b_term = ctx.term_of(b);
    plugin.register_term(&ctx, b_term).unwrap();
    assert!(matches!(
        plugin.set_value(&mut ctx, x, q(1, 2)),
        Err(ArithError::NotRepresentable(_))
    ));
    assert!(matches!(
        plugin.set_value(&mut ctx, b_term, q(1, 1)),
        Err(ArithError::NotNumeric(_))
    ));
    assert!(matches!(
        plugin.set_value(&mut ctx, unregistered, q(1, 1)),
        Err(ArithError::Unregistered(_))
    ));
    plugin.set_value(&mut ctx, r, q(1, 2)).unwrap();
    assert_eq!(plugin.get_value(r), Ok(q(1, 2)));
    assert_eq!(
        plugin.repair_literal(&mut ctx, Literal::positive(b)),
        Err(ArithError::NotInitialized)
    );
}

#[test]
fn test_units_become_bounds() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let three = ctx.num(3);
    let x_le = ctx.le(x, three);
    let y_le = ctx.le(y, three);
    let y_ge = ctx.ge(y, three);
    ctx.unit(Literal::positive(x_le));
    ctx.unit(Literal::positive(y_le));
    ctx.unit(Literal::positive(y_ge));

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, 7).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    assert_eq!(plugin.get_value(x), Ok(3));
    assert_eq!(plugin.is_fixed(x), None);
    assert_eq!(plugin.is_fixed(y), Some(3));
    assert_eq!(plugin.is_fixed(three), Some(3));
    assert!(plugin.is_sat(&ctx));
}

#[test]
fn test_fixed_variable_has_no_move() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let zero = ctx.num(0);
    let one = ctx.num(1);
    let upper = ctx.le(x, zero);
    let lower = ctx.ge(x, zero);
    let b = ctx.ge(x, one);
    ctx.unit(Literal::positive(upper));
    ctx.unit(Literal::positive(lower));

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    ctx.flip(b);
    assert_eq!(
        plugin.repair_literal(&mut ctx, Literal::positive(b)),
        Err(ArithError::NoMove)
    );
    assert_eq!(plugin.stats().failed_repairs, 1);
    assert!(plugin.propagate(&mut ctx));
    assert!(!plugin.propagate(&mut ctx));
}

#[test]
fn test_repair_quadratic() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let xx = ctx.mul(vec![x, x]);
    let nine = ctx.num(9);
    let b = ctx.eq(xx, nine);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    ctx.flip(b);
    plugin.repair_literal(&mut ctx, Literal::positive(b)).unwrap();
    let x = plugin.get_value(x).unwrap();
    assert_eq!(x * x, 9);
    assert!(plugin.is_sat(&ctx));
}

#[test]
fn test_repair_through_modulus() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let three = ctx.num(3);
    let m = ctx.op(TermKind::Mod(x, three), Sort::Int);
    let two = ctx.num(2);
    let b = ctx.eq(m, two);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    ctx.flip(b);
    plugin.repair_literal(&mut ctx, Literal::positive(b)).unwrap();
    assert_eq!(plugin.get_value(m), Ok(2));
    assert_eq!(plugin.get_value(x).unwrap().rem_euclid(3), 2);
}

#[test]
fn test_repair_distinct() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let d = ctx.distinct(vec![x, y]);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, 1).unwrap();
    plugin.set_value(&mut ctx, y, 1).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    assert!(!ctx.is_true(Literal::positive(d)));
    ctx.flip(d);
    plugin.repair_literal(&mut ctx, Literal::positive(d)).unwrap();
    assert_ne!(plugin.get_value(x), plugin.get_value(y));
}

#[test]
fn test_repair_real_literal() {
    let mut ctx = MockContext::default();
    let x = ctx.real();
    let y = ctx.real();
    let sum = ctx.add(vec![x, y]);
    let half = ctx.rat(1, 2);
    let b = ctx.le(sum, half);

    let mut plugin = new_plugin::<BigRational>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, q(3, 1)).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    ctx.flip(b);
    plugin.repair_literal(&mut ctx, Literal::positive(b)).unwrap();
    let total = plugin.get_value(x).unwrap() + plugin.get_value(y).unwrap();
    assert!(total <= q(1, 2));
}

#[test]
fn test_restart_and_statistics() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let ten = ctx.num(10);
    let b = ctx.le(x, ten);

    let config = Config {
        restart_init: 1,
        ..test_config()
    };
    let mut plugin = new_plugin::<i64>(config);
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, x, 20).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    ctx.flip(b);
    plugin.repair_literal(&mut ctx, Literal::positive(b)).unwrap();
    assert!(plugin.get_value(x).unwrap() <= 10);
    assert_eq!(plugin.stats().restarts, 1);

    let mut counters = BTreeMap::new();
    plugin.collect_statistics(&mut counters);
    assert_eq!(counters.get("sls-arith-steps"), Some(&1));
    assert_eq!(counters.get("sls-arith-restarts"), Some(&1));
    plugin.reset_statistics();
    assert_eq!(plugin.stats().steps, 0);
}

#[test]
fn test_first_restart_at_restart_init() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let ten = ctx.num(10);
    let b = ctx.le(x, ten);

    let config = Config {
        restart_init: 3,
        restart_base: 3,
        ..test_config()
    };
    let mut plugin = new_plugin::<i64>(config);
    assert_eq!(plugin.config().restart_next, 3);
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    for round in 1..=4u64 {
        plugin.set_value(&mut ctx, x, 20 + round as i64).unwrap();
        assert!(!ctx.is_true(Literal::positive(b)));
        ctx.flip(b);
        plugin.repair_literal(&mut ctx, Literal::positive(b)).unwrap();
        assert_eq!(plugin.stats().steps, round);
        assert_eq!(plugin.stats().restarts, u64::from(round >= 3));
    }
    assert_eq!(plugin.config().restart_next, 6);

    plugin.reset_statistics();
    assert_eq!(plugin.config().restart_next, 3);
}

#[test]
fn test_reset_moves_head_for_best_values() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let sum = ctx.add(vec![x, y]);
    let ten = ctx.num(10);
    let b = ctx.le(sum, ten);

    let mut plugin = new_plugin::<i64>(test_config());
    ctx.register_all(&mut plugin);
    plugin.set_value(&mut ctx, y, 4).unwrap();
    plugin.initialize(&mut ctx).unwrap();
    plugin.set_value(&mut ctx, x, 20).unwrap();
    let (vx, vy) = (plugin.var_of(x).unwrap(), plugin.var_of(y).unwrap());
    assert_eq!(*plugin.best_value(vx), 0);
    assert_eq!(*plugin.best_value(vy), 4);

    plugin.search.pool.clear();
    assert!(plugin.find_reset_moves(&ctx, Literal::positive(b)));
    let moves: Vec<(usize, i64)> = plugin
        .search
        .pool
        .iter()
        .map(|(_, change)| (change.var, change.delta))
        .collect();
    // x returns to its best value; y already is at its best and heads for zero.
    assert!(moves.contains(&(vx, -20)));
    assert!(moves.contains(&(vy, -4)));
}

#[test]
fn test_global_search_satisfies_assertion() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let sum = ctx.add(vec![x, y]);
    let ten = ctx.num(10);
    let b = ctx.ge(sum, ten);
    ctx.assert_atom(b);

    let config = Config {
        use_lookahead: true,
        ..test_config()
    };
    let mut plugin = new_plugin::<i64>(config);
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    assert!(!plugin.ineq(b).unwrap().is_true());

    plugin.propagate(&mut ctx);
    assert!(plugin.ineq(b).unwrap().is_true());
    let (vx, vy) = (plugin.var_of(x).unwrap(), plugin.var_of(y).unwrap());
    let tabu = &plugin.lookahead.tabu;
    assert!(tabu.contains(&(vx, 0)) || tabu.contains(&(vy, 0)));
    let x = plugin.get_value(x).unwrap();
    let y = plugin.get_value(y).unwrap();
    assert!(x + y >= 10);
    assert!(plugin.is_sat(&ctx));
    assert_eq!(plugin.stats().global_searches, 1);
}

#[test]
fn test_clausal_search_satisfies_clause() {
    let mut ctx = MockContext::default();
    let x = ctx.int();
    let y = ctx.int();
    let five = ctx.num(5);
    let minus_five = ctx.num(-5);
    let b0 = ctx.ge(x, five);
    let b1 = ctx.le(y, minus_five);
    ctx.add_clause(vec![Literal::positive(b0), Literal::positive(b1)]);

    let config = Config {
        use_clausal_lookahead: true,
        ..test_config()
    };
    let mut plugin = new_plugin::<i64>(config);
    ctx.register_all(&mut plugin);
    plugin.initialize(&mut ctx).unwrap();
    assert_eq!(ctx.unsat_clauses(), vec![0]);

    plugin.propagate(&mut ctx);
    assert!(ctx.unsat_clauses().is_empty());
    assert!(plugin.is_sat(&ctx));
}
