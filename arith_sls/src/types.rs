mod literal;

pub use literal::{BoolVar, Literal};
