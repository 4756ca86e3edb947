//! Deterministic IPv4 address allocation for client provisioning.
//!
//! The allocator is a pure function over the set of addresses already
//! handed out; the caller owns making the read-then-claim sequence
//! atomic (see [`crate::store::ClientStore::reserve`]).

use std::collections::HashSet;
use std::net::Ipv4Addr;
use thiserror::Error;

/// First host octet handed out to clients. 0 and 1 are reserved for the
/// network address and the server's own tunnel address.
pub const FIRST_HOST_OCTET: u8 = 2;

/// Last host octet handed out to clients. 254 and 255 are left for
/// gateway and broadcast conventions.
pub const LAST_HOST_OCTET: u8 = 253;

/// Errors surfaced by address allocation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressPoolError {
    /// Every host address in the pool is already assigned
    #[error("no free host addresses left in {network}/24")]
    Exhausted { network: Ipv4Addr },
}

/// Return the lowest free host address in the /24 spanned by `network`.
///
/// Only the first three octets of `network` are significant. Host octets
/// are scanned from [`FIRST_HOST_OCTET`] through [`LAST_HOST_OCTET`]
/// inclusive, so the result is independent of the iteration order of
/// `assigned`. Subnets other than /24 are outside this function's
/// contract.
pub fn next_available_address(
    network: Ipv4Addr,
    assigned: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr, AddressPoolError> {
    let [a, b, c, _] = network.octets();

    for host in FIRST_HOST_OCTET..=LAST_HOST_OCTET {
        let candidate = Ipv4Addr::new(a, b, c, host);
        if !assigned.contains(&candidate) {
            return Ok(candidate);
        }
    }

    Err(AddressPoolError::Exhausted {
        network: Ipv4Addr::new(a, b, c, 0),
    })
}
