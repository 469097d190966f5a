//! `getaddrinfo` flags and error codes, plus the `h_errno` codes of
//! the legacy `gethostby*` family.

use libc::c_int;
use serde::{Deserialize, Serialize};

bitflags! {
    /// `ai_flags` of the `addrinfo` hints record.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcAiFlags: u32 {
        const AI_PASSIVE = 0x1;
        const AI_CANONNAME = 0x2;
        const AI_NUMERICHOST = 0x4;
        const AI_V4MAPPED = 0x8;
        const AI_ALL = 0x10;
        const AI_ADDRCONFIG = 0x20;
        const AI_NUMERICSERV = 0x40;
        const AI_UNKNOWN = 0x8000;
    }
}

const AI_PAIRS: &[(RpcAiFlags, c_int)] = &[
    (RpcAiFlags::AI_PASSIVE, libc::AI_PASSIVE),
    (RpcAiFlags::AI_CANONNAME, libc::AI_CANONNAME),
    (RpcAiFlags::AI_NUMERICHOST, libc::AI_NUMERICHOST),
    (RpcAiFlags::AI_V4MAPPED, libc::AI_V4MAPPED),
    (RpcAiFlags::AI_ALL, libc::AI_ALL),
    (RpcAiFlags::AI_ADDRCONFIG, libc::AI_ADDRCONFIG),
    (RpcAiFlags::AI_NUMERICSERV, libc::AI_NUMERICSERV),
];

pub fn ai_flags_rpc2h(flags: RpcAiFlags) -> c_int {
    let mut out = 0;
    for &(rpc, native) in AI_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    out
}

pub fn ai_flags_h2rpc(flags: c_int) -> RpcAiFlags {
    let mut out = RpcAiFlags::empty();
    let mut mapped = 0;
    for &(rpc, native) in AI_PAIRS {
        if flags & native != 0 {
            out |= rpc;
        }
        mapped |= native;
    }
    if flags & !mapped != 0 {
        out |= RpcAiFlags::AI_UNKNOWN;
    }
    out
}

rpc_const_enum! {
    /// `getaddrinfo` return codes. Zero is success.
    pub enum RpcAiError / ai_error_rpc2h / ai_error_h2rpc {
        AiOk = 0 => "0",
        EaiBadflags = libc::EAI_BADFLAGS => "EAI_BADFLAGS",
        EaiNoname = libc::EAI_NONAME => "EAI_NONAME",
        EaiAgain = libc::EAI_AGAIN => "EAI_AGAIN",
        EaiFail = libc::EAI_FAIL => "EAI_FAIL",
        EaiFamily = libc::EAI_FAMILY => "EAI_FAMILY",
        EaiSocktype = libc::EAI_SOCKTYPE => "EAI_SOCKTYPE",
        EaiService = libc::EAI_SERVICE => "EAI_SERVICE",
        EaiMemory = libc::EAI_MEMORY => "EAI_MEMORY",
        EaiSystem = libc::EAI_SYSTEM => "EAI_SYSTEM",
        EaiOverflow = libc::EAI_OVERFLOW => "EAI_OVERFLOW",
        @unknown EaiUnknown => -1,
    }
}

// netdb.h h_errno values; libc does not export them.
const HOST_NOT_FOUND: c_int = 1;
const TRY_AGAIN: c_int = 2;
const NO_RECOVERY: c_int = 3;
const NO_DATA: c_int = 4;

rpc_const_enum! {
    /// `h_errno` after a failed `gethostbyname`/`gethostbyaddr`.
    pub enum RpcHErrno / h_errno_rpc2h / h_errno_h2rpc {
        NetdbSuccess = 0 => "NETDB_SUCCESS",
        HostNotFound = HOST_NOT_FOUND => "HOST_NOT_FOUND",
        TryAgain = TRY_AGAIN => "TRY_AGAIN",
        NoRecovery = NO_RECOVERY => "NO_RECOVERY",
        NoData = NO_DATA => "NO_DATA",
        @unknown HErrnoUnknown => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ai_flags_round_trip() {
        let rpc = RpcAiFlags::AI_PASSIVE | RpcAiFlags::AI_NUMERICHOST;
        assert_eq!(ai_flags_h2rpc(ai_flags_rpc2h(rpc)), rpc);
    }

    #[test]
    fn ai_error_maps() {
        assert_eq!(ai_error_h2rpc(libc::EAI_NONAME), RpcAiError::EaiNoname);
        assert_eq!(ai_error_h2rpc(0), RpcAiError::AiOk);
    }

    #[test]
    fn h_errno_maps() {
        assert_eq!(h_errno_h2rpc(1), RpcHErrno::HostNotFound);
        assert_eq!(h_errno_h2rpc(77), RpcHErrno::HErrnoUnknown);
    }
}
