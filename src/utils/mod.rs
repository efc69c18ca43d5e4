mod net;
mod paths;
mod ports;

pub use net::*;
pub use paths::*;
pub use ports::*;
