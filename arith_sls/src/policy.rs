//! Move-type selection, clause weighting, tabu tenure and the restart schedule.

use std::fmt::Display;

use rand::Rng;

use crate::config::Config;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MoveType {
    /// Strictly improving moves only.
    Hillclimb,
    /// Improving or score-neutral moves.
    HillclimbPlateau,
    /// Any candidate, sampled by score.
    RandomUpdate,
    /// Unit step of a random variable in a random direction.
    RandomIncDec,
}

impl MoveType {
    pub const ALL: [MoveType; 4] = [
        MoveType::Hillclimb,
        MoveType::HillclimbPlateau,
        MoveType::RandomUpdate,
        MoveType::RandomIncDec,
    ];

    #[inline(always)]
    fn index(self) -> usize {
        self as usize
    }
}

impl Display for MoveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            MoveType::Hillclimb => "hillclimb",
            MoveType::HillclimbPlateau => "hillclimb-plateau",
            MoveType::RandomUpdate => "random-update",
            MoveType::RandomIncDec => "random-inc-dec",
        })
    }
}

/// Discounted UCB1 over [`MoveType`]s.
#[derive(Clone, Debug)]
pub struct Ucb {
    rewards: [f64; 4],
    visits: [f64; 4],
}

impl Ucb {
    /// With `init`, every arm starts with one visit of reward one.
    pub fn new(init: bool) -> Self {
        let start = if init { 1.0 } else { 0.0 };
        Self {
            rewards: [start; 4],
            visits: [start; 4],
        }
    }

    pub fn reset(&mut self, init: bool) {
        *self = Self::new(init);
    }

    pub fn select(&self, config: &Config, rng: &mut impl Rng) -> MoveType {
        if let Some(position) = self.visits.iter().position(|&n| n <= 0.0) {
            return MoveType::ALL[position];
        }
        let total: f64 = self.visits.iter().sum();
        let exploration = total.ln().max(0.0);
        let mut best = MoveType::Hillclimb;
        let mut best_score = f64::NEG_INFINITY;
        for move_type in MoveType::ALL {
            let i = move_type.index();
            let score = self.rewards[i] / self.visits[i]
                + config.ucb_constant * (exploration / self.visits[i]).sqrt()
                + config.ucb_noise * rng.gen_range(0.0..1.0);
            if score > best_score {
                best = move_type;
                best_score = score;
            }
        }
        best
    }

    /// Decays all arms by `forget`, then credits `move_type`.
    pub fn update(&mut self, move_type: MoveType, reward: f64, forget: f64) {
        let keep = (1.0 - forget).clamp(0.0, 1.0);
        for i in 0..4 {
            self.rewards[i] *= keep;
            self.visits[i] *= keep;
        }
        let i = move_type.index();
        self.rewards[i] += reward;
        self.visits[i] += 1.0;
    }

    pub fn average(&self, move_type: MoveType) -> Option<f64> {
        let i = move_type.index();
        (self.visits[i] > 0.0).then(|| self.rewards[i] / self.visits[i])
    }
}

/// One PAWS step for a single weight: unsatisfied weights grow, satisfied ones
/// decay towards `paws_init` with probability `paws_sp / 1000`.
pub fn paws_update(weight: &mut u32, is_sat: bool, config: &Config, rng: &mut impl Rng) {
    if !is_sat {
        *weight = weight.saturating_add(1);
    } else if *weight > config.paws_init && rng.gen_range(0..1000) < config.paws_sp {
        *weight -= 1;
    }
}

pub fn tabu_tenure(config: &Config, rng: &mut impl Rng) -> u64 {
    let extra = if config.t > 0 {
        rng.gen_range(0..config.t)
    } else {
        0
    };
    (config.L + extra) as u64
}

/// Step thresholds for restarts. After the r-th restart the interval grows by
/// `base` for odd r and by `2 * (r / 2) * base` for even r.
#[derive(Clone, Debug)]
pub struct RestartSchedule {
    next: u64,
    count: u64,
}

impl RestartSchedule {
    pub fn new(first: u64) -> Self {
        Self {
            next: first,
            count: 0,
        }
    }

    #[inline(always)]
    pub fn is_due(&self, steps: u64) -> bool {
        steps >= self.next
    }

    pub fn next(&self) -> u64 {
        self.next
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn advance(&mut self, steps: u64, base: u64) {
        self.count += 1;
        self.next = self.next.max(steps);
        self.next += if self.count % 2 == 1 {
            base
        } else {
            2 * (self.count / 2) * base
        };
    }
}

#[cfg(test)]
mod test {
    use rand::{SeedableRng, rngs::SmallRng};

    use super::{MoveType, RestartSchedule, Ucb, paws_update, tabu_tenure};
    use crate::config::Config;

    #[test]
    fn test_restart_schedule() {
        let mut schedule = RestartSchedule::new(1000);
        assert!(!schedule.is_due(999));
        let mut restarts = Vec::new();
        for step in 0..10_000 {
            if schedule.is_due(step) {
                restarts.push(step);
                schedule.advance(step, 1000);
            }
        }
        assert_eq!(restarts, vec![1000, 2000, 4000, 5000, 9000]);
        assert_eq!(schedule.count(), 5);
    }

    #[test]
    fn test_ucb_visits_every_arm_first() {
        let config = Config::default();
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ucb = Ucb::new(false);
        let mut seen = Vec::new();
        for _ in 0..4 {
            let move_type = ucb.select(&config, &mut rng);
            seen.push(move_type);
            ucb.update(move_type, 0.0, 0.0);
        }
        assert_eq!(seen, MoveType::ALL.to_vec());
    }

    #[test]
    fn test_ucb_prefers_rewarded_arm() {
        let config = Config {
            ucb_noise: 0.0,
            ..Config::default()
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let mut ucb = Ucb::new(true);
        for _ in 0..50 {
            ucb.update(MoveType::RandomUpdate, 1.0, config.ucb_forget);
            for move_type in [MoveType::Hillclimb, MoveType::HillclimbPlateau, MoveType::RandomIncDec] {
                ucb.update(move_type, 0.0, config.ucb_forget);
            }
        }
        assert_eq!(ucb.select(&config, &mut rng), MoveType::RandomUpdate);
        assert!(ucb.average(MoveType::RandomUpdate).unwrap() > 0.9);
    }

    #[test]
    fn test_paws_weights() {
        let config = Config {
            paws_sp: 1000,
            ..Config::default()
        };
        let mut rng = SmallRng::seed_from_u64(1);
        let mut weight = config.paws_init;
        paws_update(&mut weight, false, &config, &mut rng);
        paws_update(&mut weight, false, &config, &mut rng);
        assert_eq!(weight, config.paws_init + 2);
        for _ in 0..5 {
            paws_update(&mut weight, true, &config, &mut rng);
        }
        assert_eq!(weight, config.paws_init);
    }

    #[test]
    fn test_tenure() {
        let mut rng = SmallRng::seed_from_u64(1);
        let config = Config::default();
        for _ in 0..100 {
            let tenure = tabu_tenure(&config, &mut rng);
            assert!((20..65).contains(&tenure));
        }
        let config = Config {
            t: 0,
            ..Config::default()
        };
        assert_eq!(tabu_tenure(&config, &mut rng), 20);
    }
}
