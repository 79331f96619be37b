pub mod ingest;
pub mod stats;
pub mod system;

use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// Reduces a client IP to a non-reversible bucketing key for rate limiting.
/// Client IPs are never logged; this is the only use an IP is put to. Not
/// cryptographic — the goal is to avoid persisting or emitting the IP
/// itself, not to resist targeted reversal of a single key.
pub fn client_key(ip: IpAddr) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    ip.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
