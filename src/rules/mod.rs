mod compiler;
mod dns;
mod item;
mod ruleset;

pub use dns::*;
pub use item::*;
pub use ruleset::*;
