mod locations;
mod symbols;

pub use locations::*;
pub use symbols::*;
