mod feeds;
mod fetch;
mod links;
mod parser;
mod singbox;
mod updater;
mod wireguard;

pub use feeds::*;
pub use fetch::*;
pub use links::{decode_base64, link_scheme, parse_link, parse_links};
pub use parser::*;
pub use singbox::{parse_config, parse_outbound, parse_wireguard};
pub use updater::*;
pub use wireguard::*;
