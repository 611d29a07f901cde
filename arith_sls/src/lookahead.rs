//! Lookahead search. The global variant scores the Boolean structure of the
//! input assertions directly and evaluates every candidate by a tentative
//! update; the clausal variant works on unsatisfied clauses with its own
//! PAWS weights.

use std::{
    collections::{HashMap, HashSet},
    fmt::Debug,
    hash::Hash,
};

use log::{debug, trace};
use rand::Rng;
use utility::{SparseMap, SparseSet};

use crate::{
    error::ArithResult,
    moves::VarChange,
    numeral::Numeral,
    plugin::ArithPlugin,
    policy::paws_update,
    term::{Context, TermKind},
    types::{BoolVar, Literal},
    vars::VarId,
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum NodeKind {
    Atom(BoolVar),
    Not,
    And,
    Or,
    Implies,
    /// Boolean leaf without an atom; always counts as satisfied.
    Constant,
}

#[derive(Clone, Debug)]
pub(crate) struct BoolNode {
    pub kind: NodeKind,
    pub args: Vec<usize>,
    pub parents: Vec<usize>,
    /// Cached scores for wanting the node false and true.
    pub score: [f64; 2],
    /// Cached truth, i.e. whether the score for wanting it true is one.
    pub truth: bool,
}

impl BoolNode {
    #[inline(always)]
    pub fn score(&self, want: bool) -> f64 {
        self.score[want as usize]
    }
}

#[derive(Clone, Debug)]
pub(crate) struct RootInfo {
    pub node: usize,
    pub weight: u32,
    /// Committed score in `[0, 1]`, one iff the root holds.
    pub score: f64,
    /// Decayed count of how often the root was selected.
    pub touched: f64,
    /// Arithmetic literals under the root, each with the polarity that moves
    /// the root towards true.
    pub literals: Vec<Literal>,
}

pub struct Lookahead<N, T> {
    pub(crate) nodes: Vec<BoolNode>,
    node_of: HashMap<T, usize>,
    nodes_of_atom: SparseMap<Vec<usize>>,
    pub(crate) roots: Vec<RootInfo>,
    roots_of_node: SparseMap<Vec<usize>>,
    /// Visited `(var, value)` pairs of the current search.
    pub(crate) tabu: HashSet<(VarId, N)>,
    pub(crate) touched_total: f64,
    /// Weighted sum of root scores.
    pub(crate) top_score: f64,
    /// Best unweighted sum of root scores.
    pub(crate) best_score: f64,
    budget: u64,
    pub(crate) clause_weights: Vec<u32>,
    affected: SparseSet,
    stack: Vec<usize>,
    /// Nodes above the last touched atoms, children before parents.
    order: Vec<usize>,
}

impl<N, T> Lookahead<N, T>
where
    N: Hash + Eq,
    T: Copy + Eq + Hash + Debug,
{
    pub fn new(max_moves_base: u32) -> Self {
        Self {
            nodes: Vec::new(),
            node_of: HashMap::new(),
            nodes_of_atom: SparseMap::default(),
            roots: Vec::new(),
            roots_of_node: SparseMap::default(),
            tabu: HashSet::new(),
            touched_total: 0.0,
            top_score: 0.0,
            best_score: 0.0,
            budget: max_moves_base as u64,
            clause_weights: Vec::new(),
            affected: SparseSet::default(),
            stack: Vec::new(),
            order: Vec::new(),
        }
    }

    /// Builds the Boolean structure of the input assertions. Roots without an
    /// atom satisfying `is_arith` are left out.
    pub fn build<C: Context<Term = T>>(
        &mut self,
        ctx: &C,
        paws_init: u32,
        is_arith: impl Fn(BoolVar) -> bool,
    ) {
        for term in ctx.input_assertions() {
            let node = self.mk_node(ctx, term);
            let mut literals = self.literals_of(node);
            literals.retain(|literal| is_arith(literal.var()));
            if literals.is_empty() {
                continue;
            }
            let root = self.roots.len();
            self.roots.push(RootInfo {
                node,
                weight: paws_init,
                score: 0.0,
                touched: 0.0,
                literals,
            });
            self.roots_of_node.get_or_insert_with(node, Vec::new).push(root);
        }
        self.clause_weights = vec![paws_init; ctx.num_clauses()];
        debug!(
            "lookahead: {} nodes, {} roots",
            self.nodes.len(),
            self.roots.len()
        );
    }

    /// Nodes get higher indices than their arguments.
    fn mk_node<C: Context<Term = T>>(&mut self, ctx: &C, term: T) -> usize {
        if let Some(&node) = self.node_of.get(&term) {
            return node;
        }
        let (kind, args) = match ctx.kind(term) {
            TermKind::Not(arg) => (NodeKind::Not, vec![self.mk_node(ctx, arg)]),
            TermKind::And(args) => (NodeKind::And, self.mk_nodes(ctx, args)),
            TermKind::Or(args) => (NodeKind::Or, self.mk_nodes(ctx, args)),
            TermKind::Implies(a, b) => (NodeKind::Implies, self.mk_nodes(ctx, vec![a, b])),
            _ => match ctx.bool_var(term) {
                Some(atom) => (NodeKind::Atom(atom), Vec::new()),
                None => (NodeKind::Constant, Vec::new()),
            },
        };
        let node = self.nodes.len();
        for &arg in args.iter() {
            self.nodes[arg].parents.push(node);
        }
        if let NodeKind::Atom(atom) = kind {
            self.nodes_of_atom.get_or_insert_with(atom, Vec::new).push(node);
        }
        self.nodes.push(BoolNode {
            kind,
            args,
            parents: Vec::new(),
            score: [1.0; 2],
            truth: true,
        });
        self.node_of.insert(term, node);
        node
    }

    fn mk_nodes<C: Context<Term = T>>(&mut self, ctx: &C, terms: Vec<T>) -> Vec<usize> {
        terms.into_iter().map(|term| self.mk_node(ctx, term)).collect()
    }

    /// Atom literals under `node` whose truth helps `node` become true.
    fn literals_of(&self, node: usize) -> Vec<Literal> {
        let mut literals = Vec::new();
        let mut seen = SparseSet::default();
        let mut stack = vec![(node, true)];
        while let Some((node, want)) = stack.pop() {
            if !seen.insert(2 * node + want as usize) {
                continue;
            }
            let BoolNode { kind, args, .. } = &self.nodes[node];
            match *kind {
                NodeKind::Atom(atom) => {
                    let literal = Literal::new(atom, !want);
                    if !literals.contains(&literal) {
                        literals.push(literal);
                    }
                }
                NodeKind::Constant => {}
                NodeKind::Not => stack.push((args[0], !want)),
                NodeKind::And | NodeKind::Or => stack.extend(args.iter().map(|&arg| (arg, want))),
                NodeKind::Implies => {
                    stack.push((args[0], !want));
                    stack.push((args[1], want));
                }
            }
        }
        literals
    }

    /// Collects the nodes above `atoms` into `order`, children before parents.
    fn collect_affected(&mut self, atoms: &SparseSet) {
        self.affected.clear();
        self.stack.clear();
        self.order.clear();
        for atom in atoms.iter() {
            if let Some(nodes) = self.nodes_of_atom.get(atom) {
                self.stack.extend(nodes.iter().copied());
            }
        }
        while let Some(node) = self.stack.pop() {
            if self.affected.insert(node) {
                self.stack.extend(self.nodes[node].parents.iter().copied());
            }
        }
        self.order.extend(self.affected.iter());
        self.order.sort_unstable();
    }

    /// Weighted change of the collected roots against their committed scores.
    fn affected_gain(&self) -> f64 {
        let mut gain = 0.0;
        for &node in self.order.iter() {
            let Some(roots) = self.roots_of_node.get(node) else {
                continue;
            };
            for &r in roots.iter() {
                let root = &self.roots[r];
                gain += root.weight as f64 * (self.nodes[node].score(true) - root.score);
            }
        }
        gain
    }

    /// Takes the cached scores of the collected roots as committed.
    fn commit_affected(&mut self) {
        for &node in self.order.iter() {
            let Some(roots) = self.roots_of_node.get(node) else {
                continue;
            };
            let score = self.nodes[node].score(true);
            for &r in roots.iter() {
                let root = &mut self.roots[r];
                self.top_score += root.weight as f64 * (score - root.score);
                root.score = score;
            }
        }
    }

    pub fn reset_weights(&mut self, paws_init: u32) {
        for root in self.roots.iter_mut() {
            root.weight = paws_init;
        }
        self.clause_weights.fill(paws_init);
    }

    pub fn clear_tabu(&mut self) {
        self.tabu.clear();
    }

    pub fn forget_touched(&mut self, forget: f64) {
        let keep = (1.0 - forget).clamp(0.0, 1.0);
        for root in self.roots.iter_mut() {
            root.touched *= keep;
        }
        self.touched_total *= keep;
    }

    pub fn num_roots(&self) -> usize {
        return self.roots.len();
    }

    pub fn clause_weight(&self, clause: usize, paws_init: u32) -> u32 {
        return self.clause_weights.get(clause).copied().unwrap_or(paws_init);
    }

    /// Move budget of the next search; grows with every call.
    fn next_budget(&mut self) -> u64 {
        let budget = self.budget;
        self.budget += 100;
        budget
    }

    fn all_roots_sat(&self) -> bool {
        self.roots.iter().all(|root| self.nodes[root.node].truth)
    }

    fn unweighted_score(&self) -> f64 {
        self.roots.iter().map(|root| root.score).sum()
    }
}

/// Average or maximum of child scores. An empty average counts as satisfied.
fn combine(scores: impl Iterator<Item = f64>, average: bool) -> f64 {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut max: f64 = 0.0;
    for score in scores {
        count += 1;
        sum += score;
        max = max.max(score);
    }
    match (average, count) {
        (true, 0) => 1.0,
        (true, _) => sum / count as f64,
        (false, _) => max,
    }
}

impl<N, T, R> ArithPlugin<N, T, R>
where
    N: Numeral,
    T: Copy + Eq + Hash + Debug,
    R: Rng,
{
    fn atom_score<C: Context<Term = T>>(&self, ctx: &C, atom: BoolVar, want: bool) -> f64 {
        if let Some(ineq) = self.ineqs.get(atom) {
            if ineq.is_true() == want {
                return 1.0;
            }
            return match ineq.dtt(!want) {
                Ok(distance) => 1.0 / (1.0 + distance.to_f64()),
                Err(_) => 0.0,
            };
        }
        let truth = match self.distincts.get(atom) {
            Some(args) => self.eval_distinct(args),
            None => ctx.is_true(Literal::positive(atom)),
        };
        if truth == want { 1.0 } else { 0.0 }
    }

    /// Scores of `node` for wanting it false and true, from the cached
    /// scores of its arguments.
    fn eval_node<C: Context<Term = T>>(&self, ctx: &C, node: usize) -> [f64; 2] {
        let nodes = &self.lookahead.nodes;
        let BoolNode { kind, args, .. } = &nodes[node];
        match *kind {
            NodeKind::Atom(atom) => [
                self.atom_score(ctx, atom, false),
                self.atom_score(ctx, atom, true),
            ],
            NodeKind::Constant => [1.0, 1.0],
            NodeKind::Not => {
                let arg = &nodes[args[0]];
                [arg.score(true), arg.score(false)]
            }
            NodeKind::And | NodeKind::Or => {
                let is_and = *kind == NodeKind::And;
                let score = |want: bool| {
                    combine(args.iter().map(|&arg| nodes[arg].score(want)), is_and == want)
                };
                [score(false), score(true)]
            }
            NodeKind::Implies => {
                let (a, b) = (&nodes[args[0]], &nodes[args[1]]);
                let score =
                    |want: bool| combine([a.score(!want), b.score(want)].into_iter(), !want);
                [score(false), score(true)]
            }
        }
    }

    fn refresh_node<C: Context<Term = T>>(&mut self, ctx: &C, node: usize) {
        let score = self.eval_node(ctx, node);
        let info = &mut self.lookahead.nodes[node];
        info.score = score;
        info.truth = score[1] >= 1.0;
    }

    /// Recomputes every node and root score.
    pub(crate) fn rescore<C: Context<Term = T>>(&mut self, ctx: &C) {
        for node in 0..self.lookahead.nodes.len() {
            self.refresh_node(ctx, node);
        }
        let lookahead = &mut self.lookahead;
        let mut top = 0.0;
        for root in lookahead.roots.iter_mut() {
            root.score = lookahead.nodes[root.node].score(true);
            top += root.weight as f64 * root.score;
        }
        lookahead.top_score = top;
    }

    /// Refreshes the cached scores of the nodes above the touched atoms, as
    /// collected by the last `collect_affected`.
    fn update_scores<C: Context<Term = T>>(&mut self, ctx: &C) {
        let order = std::mem::take(&mut self.lookahead.order);
        for &node in order.iter() {
            self.refresh_node(ctx, node);
        }
        self.lookahead.order = order;
    }

    fn rescore_touched<C: Context<Term = T>>(&mut self, ctx: &C) {
        self.lookahead.collect_affected(&self.search.touched_atoms);
        self.update_scores(ctx);
        self.lookahead.commit_affected();
        self.search.touched_atoms.clear();
    }

    /// Gain of `x := new_value`, measured by applying the update, refreshing
    /// the scores above the touched atoms, and undoing both.
    fn lookahead_num<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        x: VarId,
        new_value: N,
    ) -> ArithResult<f64> {
        let old_value = self.store.value(x).clone();
        self.search.touched_atoms.clear();
        self.update(ctx, x, new_value)?;
        self.lookahead.collect_affected(&self.search.touched_atoms);
        self.update_scores(ctx);
        let gain = self.lookahead.affected_gain();
        let restored = self.update(ctx, x, old_value);
        self.update_scores(ctx);
        self.search.touched_atoms.clear();
        restored.map(|()| gain)
    }

    pub(crate) fn add_lookahead_update<C: Context<Term = T>>(
        &mut self,
        ctx: &mut C,
        x: VarId,
        delta: N,
    ) {
        let Some(delta) = self.is_permitted_update(x, &delta) else {
            return;
        };
        let Ok(new_value) = self.store.value(x).try_add(&delta) else {
            return;
        };
        if self.lookahead.tabu.contains(&(x, new_value.clone())) {
            return;
        }
        if self
            .search
            .pool
            .iter()
            .any(|(_, change)| change.var == x && change.delta == delta)
        {
            return;
        }
        match self.lookahead_num(ctx, x, new_value) {
            Ok(gain) => {
                trace!("lookahead v{} += {}: {:.4}", x, delta, gain);
                self.search.pool.push(gain, VarChange { var: x, delta });
            }
            Err(err) => trace!("lookahead v{} += {}: {}", x, delta, err),
        }
    }

    /// Candidate moves that make `literal` hold.
    fn literal_moves(&mut self, literal: Literal) -> Vec<(VarId, N)> {
        if let Some(args) = self.distincts.get(literal.var()).cloned() {
            return self.distinct_moves(&args, literal.sign());
        }
        let Some(ineq) = self.ineqs.get(literal.var()).cloned() else {
            return Vec::new();
        };
        let mut moves = Vec::new();
        self.nonlinear_moves(&ineq, literal.sign(), &mut moves);
        self.defined_arg_moves(&ineq, literal.sign(), &mut moves);
        moves
    }

    /// Unsatisfied root, by UCB over how often roots were picked.
    fn select_root(&mut self) -> Option<usize> {
        let total = self.lookahead.touched_total;
        let mut best = None;
        let mut best_value = f64::NEG_INFINITY;
        for (r, root) in self.lookahead.roots.iter().enumerate() {
            if root.score >= 1.0 {
                continue;
            }
            let value = (1.0 - root.score)
                + self.config.ucb_constant * ((total + 1.0).ln() / (root.touched + 1.0)).sqrt()
                + self.config.ucb_noise * self.rng.gen_range(0.0..1.0);
            if value > best_value {
                best = Some(r);
                best_value = value;
            }
        }
        let r = best?;
        self.lookahead.roots[r].touched += 1.0;
        self.lookahead.touched_total += 1.0;
        Some(r)
    }

    pub(crate) fn recalibrate_weights(&mut self) {
        if !self.config.paws {
            return;
        }
        let mut top = 0.0;
        for root in self.lookahead.roots.iter_mut() {
            paws_update(&mut root.weight, root.score >= 1.0, &self.config, &mut self.rng);
            top += root.weight as f64 * root.score;
        }
        self.lookahead.top_score = top;
    }

    /// One move of the global search; `false` if nothing was committed.
    fn lookahead_step<C: Context<Term = T>>(&mut self, ctx: &mut C) -> bool {
        self.stats.steps += 1;
        let Some(r) = self.select_root() else {
            return false;
        };
        let literals: Vec<Literal> = self.lookahead.roots[r]
            .literals
            .iter()
            .copied()
            .filter(|literal| self.atom_truth(literal.var()) == Some(literal.sign()))
            .collect();
        self.search.pool.clear();
        for literal in literals {
            for (x, delta) in self.literal_moves(literal) {
                self.add_lookahead_update(ctx, x, delta);
            }
        }
        let best = self
            .search
            .pool
            .iter()
            .map(|(score, _)| score)
            .fold(f64::NEG_INFINITY, f64::max);
        if best <= 0.0 {
            self.recalibrate_weights();
        }
        let (move_type, score, change) = match self.choose_candidate() {
            Ok(chosen) => chosen,
            Err(_) => return false,
        };
        self.search.pool.clear();
        let x = change.var;
        let old_value = self.store.value(x).clone();
        self.search.touched_atoms.clear();
        if let Err(err) = self.commit_change(ctx, move_type, score, change) {
            debug!("lookahead move of v{}: {}", x, err);
            return false;
        }
        self.lookahead.tabu.insert((x, old_value));
        self.rescore_touched(ctx);
        let score = self.lookahead.unweighted_score();
        if score > self.lookahead.best_score {
            self.lookahead.best_score = score;
            self.save_best_values();
        }
        true
    }

    /// Search over the input assertions; ends on the best assignment found,
    /// with the Boolean values of arithmetic atoms brought in line.
    pub(crate) fn global_search<C: Context<Term = T>>(&mut self, ctx: &mut C) -> ArithResult<()> {
        if self.lookahead.roots.is_empty() {
            return Ok(());
        }
        self.stats.global_searches += 1;
        self.search.in_lookahead = true;
        self.search.touched_atoms.clear();
        self.lookahead.clear_tabu();
        self.rescore(ctx);
        self.lookahead.best_score = self.lookahead.unweighted_score();
        self.save_best_values();
        let budget = self.lookahead.next_budget();
        let mut moves = 0;
        while moves < budget && !self.lookahead.all_roots_sat() {
            moves += 1;
            self.lookahead_step(ctx);
        }
        for x in 0..self.store.len() {
            if !self.store.is_movable(x) {
                continue;
            }
            let best = self.store.vars[x].best_value().clone();
            if let Err(err) = self.update(ctx, x, best) {
                debug!("restore v{}: {}", x, err);
            }
        }
        self.search.in_lookahead = false;
        self.search.touched_atoms.clear();
        self.rescore(ctx);
        debug!(
            "global search: {} moves, score {:.3} of {}",
            moves,
            self.lookahead.best_score,
            self.lookahead.roots.len()
        );
        self.finalize(ctx);
        Ok(())
    }

    /// Flips every non-unit atom whose Boolean value disagrees with its arithmetic.
    fn finalize<C: Context<Term = T>>(&mut self, ctx: &mut C) {
        for position in 0..self.atoms.len() {
            let atom = self.atoms[position];
            if self.units.contains(atom) {
                continue;
            }
            if let Some(truth) = self.atom_truth(atom)
                && ctx.is_true(Literal::positive(atom)) != truth
            {
                ctx.flip(atom);
            }
        }
        self.check_best(ctx);
    }

    /// Unsatisfied clause closest to satisfied among a few random samples.
    fn select_unsat_clause<C: Context<Term = T>>(&mut self, ctx: &C) -> Option<usize> {
        let unsat = ctx.unsat_clauses();
        if unsat.is_empty() {
            return None;
        }
        let mut best = None;
        let mut best_distance = f64::INFINITY;
        for _ in 0..3 {
            let clause = unsat[self.rng.gen_range(0..unsat.len())];
            let distance = self
                .dts(ctx, clause)
                .map(|d| d.to_f64())
                .unwrap_or(f64::INFINITY);
            if best.is_none() || distance < best_distance {
                best = Some(clause);
                best_distance = distance;
            }
        }
        best
    }

    pub(crate) fn recalibrate_clause_weights<C: Context<Term = T>>(&mut self, ctx: &C) {
        if !self.config.paws {
            return;
        }
        for (clause, weight) in self.lookahead.clause_weights.iter_mut().enumerate() {
            paws_update(weight, ctx.num_true(clause) > 0, &self.config, &mut self.rng);
        }
    }

    /// Repairs unsatisfied clauses through their arithmetic literals, scoring
    /// with clause weights kept by this search.
    pub(crate) fn clausal_search<C: Context<Term = T>>(&mut self, ctx: &mut C) -> ArithResult<()> {
        let num_clauses = ctx.num_clauses();
        if num_clauses == 0 {
            return Ok(());
        }
        if self.lookahead.clause_weights.len() < num_clauses {
            self.lookahead.clause_weights.resize(num_clauses, self.config.paws_init);
        }
        self.stats.global_searches += 1;
        self.search.clausal_weights = true;
        let budget = self.lookahead.next_budget();
        let mut moves = 0;
        while moves < budget {
            let Some(clause) = self.select_unsat_clause(ctx) else {
                break;
            };
            moves += 1;
            self.stats.steps += 1;
            self.search.pool.clear();
            let literals = ctx.clause(clause).to_vec();
            for literal in literals {
                if self.atom_truth(literal.var()).is_none() {
                    continue;
                }
                self.find_nl_moves(ctx, literal);
                self.find_lin_moves(ctx, literal);
            }
            let best = self
                .search
                .pool
                .iter()
                .map(|(score, _)| score)
                .fold(f64::NEG_INFINITY, f64::max);
            if best <= 0.0 {
                self.recalibrate_clause_weights(ctx);
            }
            if self.search.pool.is_empty() {
                continue;
            }
            if let Err(err) = self.apply_update(ctx) {
                debug!("clausal move: {}", err);
            }
        }
        self.search.clausal_weights = false;
        if ctx.unsat_clauses().len() > self.search.best_unsat {
            for x in 0..self.store.len() {
                if !self.store.is_movable(x) {
                    continue;
                }
                let best = self.store.vars[x].best_value().clone();
                if let Err(err) = self.update(ctx, x, best) {
                    debug!("restore v{}: {}", x, err);
                }
            }
        }
        debug!("clausal search: {} moves, {} unsat", moves, ctx.unsat_clauses().len());
        Ok(())
    }
}
