use std::str::FromStr;

use crate::error::ConfigError;

/// Search parameters. Field names follow the option names accepted by [`Config::set`].
#[allow(non_snake_case)]
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    /// Base of the exponential weighting used when sampling candidates.
    pub cb: f64,
    /// Minimum tabu tenure in steps.
    pub L: u32,
    /// Random extra tenure, drawn from `0..t`.
    pub t: u32,
    pub max_no_improve: u32,
    /// Probability of picking a uniformly random candidate in flat repair.
    pub sp: f64,
    pub paws_init: u32,
    /// Out of 1000: chance that a satisfied root decays its weight.
    pub paws_sp: u32,
    pub paws: bool,
    pub max_moves: u32,
    pub max_moves_base: u32,
    /// Out of 2048: chance of a random inc/dec step in lookahead search.
    pub wp: u32,
    pub ucb: bool,
    pub ucb_constant: f64,
    pub ucb_forget: f64,
    pub ucb_init: bool,
    pub ucb_noise: f64,
    pub restart_base: u32,
    /// Step of the next restart. Seeded from `restart_init` and advanced by the engine.
    pub restart_next: u32,
    /// Step of the first restart.
    pub restart_init: u32,
    pub use_lookahead: bool,
    pub use_clausal_lookahead: bool,
    pub allow_plateau: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cb: 2.85,
            L: 20,
            t: 45,
            max_no_improve: 500_000,
            sp: 0.0003,
            paws_init: 40,
            paws_sp: 52,
            paws: true,
            max_moves: 500,
            max_moves_base: 500,
            wp: 100,
            ucb: true,
            ucb_constant: 1.0,
            ucb_forget: 0.1,
            ucb_init: false,
            ucb_noise: 0.1,
            restart_base: 1000,
            restart_next: 1000,
            restart_init: 1000,
            use_lookahead: false,
            use_clausal_lookahead: false,
            allow_plateau: false,
        }
    }
}

fn parse<T: FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Real-valued options must be finite.
fn parse_finite(name: &str, value: &str) -> Result<f64, ConfigError> {
    let parsed: f64 = parse(name, value)?;
    if !parsed.is_finite() {
        return Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

impl Config {
    /// Sets one option from its textual value. Names may carry an `arith.` prefix.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let key = name.strip_prefix("arith.").unwrap_or(name);
        match key {
            "cb" => self.cb = parse_finite(name, value)?,
            "L" => self.L = parse(name, value)?,
            "t" => self.t = parse(name, value)?,
            "max_no_improve" => self.max_no_improve = parse(name, value)?,
            "sp" => self.sp = parse_finite(name, value)?,
            "paws_init" => self.paws_init = parse(name, value)?,
            "paws_sp" => self.paws_sp = parse(name, value)?,
            "paws" => self.paws = parse(name, value)?,
            "max_moves" => self.max_moves = parse(name, value)?,
            "max_moves_base" => self.max_moves_base = parse(name, value)?,
            "wp" => self.wp = parse(name, value)?,
            "ucb" => self.ucb = parse(name, value)?,
            "ucb_constant" => self.ucb_constant = parse_finite(name, value)?,
            "ucb_forget" => self.ucb_forget = parse_finite(name, value)?,
            "ucb_init" => self.ucb_init = parse(name, value)?,
            "ucb_noise" => self.ucb_noise = parse_finite(name, value)?,
            "restart_base" => self.restart_base = parse(name, value)?,
            "restart_next" => self.restart_next = parse(name, value)?,
            "restart_init" => self.restart_init = parse(name, value)?,
            "use_lookahead" => self.use_lookahead = parse(name, value)?,
            "use_clausal_lookahead" => self.use_clausal_lookahead = parse(name, value)?,
            "allow_plateau" => self.allow_plateau = parse(name, value)?,
            _ => return Err(ConfigError::UnknownOption(name.to_string())),
        }
        Ok(())
    }

    pub fn update<'a>(
        &mut self,
        options: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<(), ConfigError> {
        for (name, value) in options {
            self.set(name, value)?;
        }
        Ok(())
    }

    pub fn pool_capacity(&self) -> usize {
        self.max_moves.min(self.max_moves_base).max(1) as usize
    }
}

#[cfg(test)]
mod test {
    use super::Config;
    use crate::error::ConfigError;

    #[test]
    fn test_set_options() {
        let mut config = Config::default();
        config
            .update([("arith.ucb", "false"), ("L", "7"), ("cb", "1.5"), ("max_moves", "10")])
            .unwrap();
        assert!(!config.ucb);
        assert_eq!(config.L, 7);
        assert_eq!(config.cb, 1.5);
        assert_eq!(config.pool_capacity(), 10);
    }

    #[test]
    fn test_rejects_bad_options() {
        let mut config = Config::default();
        assert_eq!(
            config.set("no_such_option", "1"),
            Err(ConfigError::UnknownOption("no_such_option".into()))
        );
        assert!(matches!(
            config.set("paws", "maybe"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_rejects_non_finite_reals() {
        let mut config = Config::default();
        for (name, value) in [("sp", "NaN"), ("cb", "inf"), ("ucb_noise", "-inf")] {
            assert!(matches!(
                config.set(name, value),
                Err(ConfigError::InvalidValue { .. })
            ));
        }
        assert_eq!(config, Config::default());
        config.set("sp", "0.25").unwrap();
        assert_eq!(config.sp, 0.25);
    }
}
