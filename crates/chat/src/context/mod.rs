//! Context construction: token estimation and the history window builder.

pub mod token;
pub mod window;
