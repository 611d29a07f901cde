//! Arithmetic plugin for Boolean local search over linear and nonlinear
//! integer and real arithmetic.

mod config;
mod dtt;
mod error;
mod ineq;
mod lookahead;
mod moves;
mod numeral;
mod plugin;
mod policy;
mod register;
mod repair;
mod stats;
mod term;
mod types;
mod vars;

#[cfg(test)]
mod tests;

pub use config::Config;
pub use error::{ArithError, ArithResult, ConfigError};
pub use ineq::{Ineq, IneqKind, LinearTerm, NonlinearCoeff};
pub use lookahead::Lookahead;
pub use moves::VarChange;
pub use numeral::Numeral;
pub use plugin::ArithPlugin;
pub use policy::{MoveType, RestartSchedule, Ucb};
pub use stats::{StatisticsSink, Stats};
pub use term::{Context, Sort, TermKind};
pub use types::{BoolVar, Literal};
pub use vars::{Bound, OpKind, VarId, VarSort, VarStore};
