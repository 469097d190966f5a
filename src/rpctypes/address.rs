//! Socket addresses in neutral form and the two converters every
//! address-taking wrapper goes through.

use crate::rpctypes::socket::{addr_family_h2rpc, addr_family_rpc2h, RpcAddrFamily};
use libc::{sockaddr, sockaddr_storage, socklen_t};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Bytes of a `sockaddr` following the family field.
pub const SA_DATA_MAX: usize = size_of::<sockaddr_storage>() - FAMILY_LEN;

const FAMILY_LEN: usize = size_of::<libc::sa_family_t>();

/// A socket address as it crosses the wire: the family in neutral
/// encoding plus the raw bytes that follow `sa_family` in the native
/// layout. An empty `raw` stands for a null `sockaddr*`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcSockaddr {
    pub family: RpcAddrFamily,
    pub raw: Vec<u8>,
}

impl RpcSockaddr {
    pub fn null() -> RpcSockaddr {
        RpcSockaddr {
            family: RpcAddrFamily::AfUnspec,
            raw: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.raw.is_empty()
    }

    /// Pre-sized record for an out-only address argument.
    pub fn zeroed(len: usize) -> RpcSockaddr {
        RpcSockaddr {
            family: RpcAddrFamily::AfUnspec,
            raw: vec![0; len.min(SA_DATA_MAX)],
        }
    }
}

/// Writes the neutral address into caller-provided storage and returns
/// the pointer/length pair for the native call. A null neutral address
/// yields a null pointer with length zero.
pub fn sockaddr_rpc2h(
    addr: &RpcSockaddr,
    storage: &mut sockaddr_storage,
) -> (*mut sockaddr, socklen_t) {
    if addr.is_null() {
        return (std::ptr::null_mut(), 0);
    }
    *storage = unsafe { std::mem::zeroed() };
    storage.ss_family = addr_family_rpc2h(addr.family) as libc::sa_family_t;
    let n = addr.raw.len().min(SA_DATA_MAX);
    unsafe {
        let data = (storage as *mut sockaddr_storage as *mut u8).add(FAMILY_LEN);
        std::ptr::copy_nonoverlapping(addr.raw.as_ptr(), data, n);
    }
    (
        storage as *mut sockaddr_storage as *mut sockaddr,
        (FAMILY_LEN + n) as socklen_t,
    )
}

/// Reads a native address back into neutral form. Null pointer or zero
/// length yields the null neutral address.
pub fn sockaddr_h2rpc(addr: *const sockaddr, len: socklen_t) -> RpcSockaddr {
    if addr.is_null() || (len as usize) < FAMILY_LEN {
        return RpcSockaddr::null();
    }
    let family = unsafe { (*addr).sa_family };
    let n = (len as usize - FAMILY_LEN).min(SA_DATA_MAX);
    let mut raw = vec![0u8; n];
    unsafe {
        let data = (addr as *const u8).add(FAMILY_LEN);
        std::ptr::copy_nonoverlapping(data, raw.as_mut_ptr(), n);
    }
    RpcSockaddr {
        family: addr_family_h2rpc(family as libc::c_int),
        raw,
    }
}

/// Builds the neutral form of an IPv4 address, mostly for tests and
/// for wrappers that synthesize addresses (gethostbyname).
pub fn sockaddr_in_rpc(ip_be: u32, port: u16) -> RpcSockaddr {
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = port.to_be();
    sin.sin_addr.s_addr = ip_be;
    sockaddr_h2rpc(
        &sin as *const libc::sockaddr_in as *const sockaddr,
        size_of::<libc::sockaddr_in>() as socklen_t,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_neutral_gives_null_native() {
        let mut storage: sockaddr_storage = unsafe { std::mem::zeroed() };
        let (p, len) = sockaddr_rpc2h(&RpcSockaddr::null(), &mut storage);
        assert!(p.is_null());
        assert_eq!(len, 0);
    }

    #[test]
    fn ipv4_round_trip() {
        let rpc = sockaddr_in_rpc(u32::from_be_bytes([127, 0, 0, 1]).to_be(), 8080);
        assert_eq!(rpc.family, RpcAddrFamily::AfInet);

        let mut storage: sockaddr_storage = unsafe { std::mem::zeroed() };
        let (p, len) = sockaddr_rpc2h(&rpc, &mut storage);
        assert!(!p.is_null());
        assert!(len as usize >= size_of::<libc::sockaddr_in>());

        let sin = unsafe { &*(p as *const libc::sockaddr_in) };
        assert_eq!(sin.sin_family, libc::AF_INET as libc::sa_family_t);
        assert_eq!(u16::from_be(sin.sin_port), 8080);
    }

    #[test]
    fn short_native_address_is_null() {
        let sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let rpc = sockaddr_h2rpc(&sin as *const _ as *const sockaddr, 1);
        assert!(rpc.is_null());
    }

    #[test]
    fn oversized_raw_is_clamped() {
        let rpc = RpcSockaddr {
            family: RpcAddrFamily::AfInet,
            raw: vec![0xab; 4096],
        };
        let mut storage: sockaddr_storage = unsafe { std::mem::zeroed() };
        let (_, len) = sockaddr_rpc2h(&rpc, &mut storage);
        assert_eq!(len as usize, size_of::<sockaddr_storage>());
    }
}
