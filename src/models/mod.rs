mod bean;
mod config;
mod group;
pub mod options;
mod profile;
mod result;
mod rule;

pub use bean::*;
pub use config::*;
pub use group::*;
pub use profile::*;
pub use result::*;
pub use rule::*;
