//! Winsock error map. Nothing here touches the host; it is a pure
//! wire-level table so one test suite can drive Unix and Windows
//! agents with identical neutral records.

use crate::errors::RpcErrno;

const WSA_PAIRS: &[(RpcErrno, u32)] = &[
    (RpcErrno::Eintr, 10004),
    (RpcErrno::Ebadf, 10009),
    (RpcErrno::Eacces, 10013),
    (RpcErrno::Efault, 10014),
    (RpcErrno::Einval, 10022),
    (RpcErrno::Emfile, 10024),
    (RpcErrno::Eagain, 10035),
    (RpcErrno::Einprogress, 10036),
    (RpcErrno::Ealready, 10037),
    (RpcErrno::Enotsock, 10038),
    (RpcErrno::Edestaddrreq, 10039),
    (RpcErrno::Emsgsize, 10040),
    (RpcErrno::Eprototype, 10041),
    (RpcErrno::Enoprotoopt, 10042),
    (RpcErrno::Eprotonosupport, 10043),
    (RpcErrno::Esocktnosupport, 10044),
    (RpcErrno::Eopnotsupp, 10045),
    (RpcErrno::Epfnosupport, 10046),
    (RpcErrno::Eafnosupport, 10047),
    (RpcErrno::Eaddrinuse, 10048),
    (RpcErrno::Eaddrnotavail, 10049),
    (RpcErrno::Enetdown, 10050),
    (RpcErrno::Enetunreach, 10051),
    (RpcErrno::Enetreset, 10052),
    (RpcErrno::Econnaborted, 10053),
    (RpcErrno::Econnreset, 10054),
    (RpcErrno::Enobufs, 10055),
    (RpcErrno::Eisconn, 10056),
    (RpcErrno::Enotconn, 10057),
    (RpcErrno::Eshutdown, 10058),
    (RpcErrno::Etimedout, 10060),
    (RpcErrno::Econnrefused, 10061),
    (RpcErrno::Ehostdown, 10064),
    (RpcErrno::Ehostunreach, 10065),
];

/// Neutral errno of a Winsock error code; `Unknown` when unmapped.
pub fn wsa_error_h2rpc(code: u32) -> RpcErrno {
    if code == 0 {
        return RpcErrno::Ok;
    }
    for &(rpc, wsa) in WSA_PAIRS {
        if wsa == code {
            return rpc;
        }
    }
    RpcErrno::Unknown
}

/// Winsock encoding of a neutral errno; zero when unmapped.
pub fn wsa_error_rpc2h(e: RpcErrno) -> u32 {
    for &(rpc, wsa) in WSA_PAIRS {
        if rpc == e {
            return wsa;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wsa_codes_both_ways() {
        assert_eq!(wsa_error_h2rpc(10054), RpcErrno::Econnreset);
        assert_eq!(wsa_error_rpc2h(RpcErrno::Eagain), 10035);
        assert_eq!(wsa_error_h2rpc(0), RpcErrno::Ok);
        assert_eq!(wsa_error_h2rpc(99999), RpcErrno::Unknown);
    }
}
