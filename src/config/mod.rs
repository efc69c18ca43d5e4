mod builder;
mod chain;
mod hop;
mod manager;
mod merge;
mod resolver;
mod user_rules;

pub use builder::*;
pub use hop::*;
pub use manager::*;
pub use merge::*;
pub use resolver::*;
