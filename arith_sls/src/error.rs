use thiserror::Error;

/// Failures of numeric evaluation, inversion and repair.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ArithError {
    #[error("arithmetic overflow")]
    Overflow,

    #[error("division by zero")]
    DivisionByZero,

    #[error("value {0} is not representable in the numeric backend")]
    NotRepresentable(String),

    #[error("no candidate move")]
    NoMove,

    #[error("term {0} is not numeric")]
    NotNumeric(String),

    #[error("term {0} is not registered")]
    Unregistered(String),

    #[error("engine is not initialized")]
    NotInitialized,
}

pub type ArithResult<T> = Result<T, ArithError>;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown option {0}")]
    UnknownOption(String),

    #[error("invalid value {value:?} for option {name}")]
    InvalidValue { name: String, value: String },
}
