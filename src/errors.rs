use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Display;

pub type TarpcResult<T> = Result<T, TarpcError>;

/// Error kinds reported through the common output prefix of every RPC.
/// The native errno of the call under test travels separately as `RpcErrno`;
/// these kinds cover failures of the agent machinery itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TarpcError {
    /// Symbol or handle unknown
    NotFound(String),
    /// Dynamic library override conflict
    AlreadyExists(String),
    /// Unknown variant tag, out-of-range bitmap, too-large vector
    InvalidArgument(String),
    OutOfMemory,
    /// A checked-argument tail was modified after the call
    Corrupted(String),
    /// Requested operating mode or feature not built into this agent
    Unsupported(String),
    /// The native call failed; carries the neutral errno
    Os(RpcErrno),
    /// A bounded I/O loop ran past its drain deadline
    Timeout,
}

impl TarpcError {
    /// The neutral errno placed in the output record for this error.
    pub fn neutral(&self) -> RpcErrno {
        match self {
            TarpcError::NotFound(_) => RpcErrno::Enoent,
            TarpcError::AlreadyExists(_) => RpcErrno::Eexist,
            TarpcError::InvalidArgument(_) => RpcErrno::Einval,
            TarpcError::OutOfMemory => RpcErrno::Enomem,
            TarpcError::Corrupted(_) => RpcErrno::TeCorrupted,
            TarpcError::Unsupported(_) => RpcErrno::TeRpcNotSupp,
            TarpcError::Os(e) => *e,
            TarpcError::Timeout => RpcErrno::Etimedout,
        }
    }
}

impl Display for TarpcError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TarpcError::NotFound(what) => write!(f, "not found: {}", what),
            TarpcError::AlreadyExists(what) => write!(f, "already exists: {}", what),
            TarpcError::InvalidArgument(what) => write!(f, "invalid argument: {}", what),
            TarpcError::OutOfMemory => write!(f, "out of memory"),
            TarpcError::Corrupted(arg) => write!(f, "argument {} corrupted by the call", arg),
            TarpcError::Unsupported(what) => write!(f, "unsupported: {}", what),
            TarpcError::Os(e) => write!(f, "OS error {}", e.as_str()),
            TarpcError::Timeout => write!(f, "timed out"),
        }
    }
}

macro_rules! rpc_errno_enum {
    ($(($variant:ident, $native:ident)),+ $(,)?) => {
        /// Platform-neutral errno encoding. `Ok` is zero on the wire;
        /// the `Te*` codes have no native counterpart and are produced by
        /// the agent machinery (corruption detection, unsupported RPCs).
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
        pub enum RpcErrno {
            Ok,
            $($variant,)+
            /// Checked argument was modified beyond its visible length
            TeCorrupted,
            /// The RPC is not supported by this agent build
            TeRpcNotSupp,
            Unknown,
        }

        /// Native errno to neutral encoding. Total; never fails.
        pub fn errno_h2rpc(err: i32) -> RpcErrno {
            match err {
                0 => RpcErrno::Ok,
                $(libc::$native => RpcErrno::$variant,)+
                _ => RpcErrno::Unknown,
            }
        }

        /// Neutral errno back to the native constant. The sentinel values
        /// map to 0 since no native call ever produces them.
        pub fn errno_rpc2h(err: RpcErrno) -> i32 {
            match err {
                RpcErrno::Ok => 0,
                $(RpcErrno::$variant => libc::$native,)+
                RpcErrno::TeCorrupted | RpcErrno::TeRpcNotSupp | RpcErrno::Unknown => 0,
            }
        }

        impl RpcErrno {
            pub fn as_str(self) -> &'static str {
                match self {
                    RpcErrno::Ok => "0",
                    $(RpcErrno::$variant => stringify!($native),)+
                    RpcErrno::TeCorrupted => "TE_ECORRUPTED",
                    RpcErrno::TeRpcNotSupp => "TE_ERPCNOTSUPP",
                    RpcErrno::Unknown => "EUNKNOWN",
                }
            }
        }
    };
}

rpc_errno_enum! {
    (Eperm, EPERM),
    (Enoent, ENOENT),
    (Esrch, ESRCH),
    (Eintr, EINTR),
    (Eio, EIO),
    (Enxio, ENXIO),
    (E2big, E2BIG),
    (Enoexec, ENOEXEC),
    (Ebadf, EBADF),
    (Echild, ECHILD),
    (Eagain, EAGAIN),
    (Enomem, ENOMEM),
    (Eacces, EACCES),
    (Efault, EFAULT),
    (Ebusy, EBUSY),
    (Eexist, EEXIST),
    (Exdev, EXDEV),
    (Enodev, ENODEV),
    (Enotdir, ENOTDIR),
    (Eisdir, EISDIR),
    (Einval, EINVAL),
    (Enfile, ENFILE),
    (Emfile, EMFILE),
    (Enotty, ENOTTY),
    (Efbig, EFBIG),
    (Enospc, ENOSPC),
    (Espipe, ESPIPE),
    (Erofs, EROFS),
    (Emlink, EMLINK),
    (Epipe, EPIPE),
    (Enametoolong, ENAMETOOLONG),
    (Enosys, ENOSYS),
    (Enotempty, ENOTEMPTY),
    (Eloop, ELOOP),
    (Enomsg, ENOMSG),
    (Eproto, EPROTO),
    (Eoverflow, EOVERFLOW),
    (Ecanceled, ECANCELED),
    (Enotsock, ENOTSOCK),
    (Edestaddrreq, EDESTADDRREQ),
    (Emsgsize, EMSGSIZE),
    (Eprototype, EPROTOTYPE),
    (Enoprotoopt, ENOPROTOOPT),
    (Eprotonosupport, EPROTONOSUPPORT),
    (Esocktnosupport, ESOCKTNOSUPPORT),
    (Eopnotsupp, EOPNOTSUPP),
    (Epfnosupport, EPFNOSUPPORT),
    (Eafnosupport, EAFNOSUPPORT),
    (Eaddrinuse, EADDRINUSE),
    (Eaddrnotavail, EADDRNOTAVAIL),
    (Enetdown, ENETDOWN),
    (Enetunreach, ENETUNREACH),
    (Enetreset, ENETRESET),
    (Econnaborted, ECONNABORTED),
    (Econnreset, ECONNRESET),
    (Enobufs, ENOBUFS),
    (Eisconn, EISCONN),
    (Enotconn, ENOTCONN),
    (Eshutdown, ESHUTDOWN),
    (Etoomanyrefs, ETOOMANYREFS),
    (Etimedout, ETIMEDOUT),
    (Econnrefused, ECONNREFUSED),
    (Ehostdown, EHOSTDOWN),
    (Ehostunreach, EHOSTUNREACH),
    (Ealready, EALREADY),
    (Einprogress, EINPROGRESS),
    (Estale, ESTALE),
    (Edquot, EDQUOT),
}

impl Default for RpcErrno {
    fn default() -> Self {
        RpcErrno::Ok
    }
}

impl Display for RpcErrno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        for e in &[
            RpcErrno::Ok,
            RpcErrno::Enoent,
            RpcErrno::Eagain,
            RpcErrno::Econnreset,
            RpcErrno::Etimedout,
        ] {
            assert_eq!(errno_h2rpc(errno_rpc2h(*e)), *e);
        }
    }

    #[test]
    fn sentinel_is_fixed_point() {
        assert_eq!(errno_h2rpc(errno_rpc2h(RpcErrno::Unknown)), RpcErrno::Ok);
        assert_eq!(errno_h2rpc(-12345), RpcErrno::Unknown);
    }

    #[test]
    fn kinds_map_to_neutral_codes() {
        assert_eq!(
            TarpcError::NotFound("socket".into()).neutral(),
            RpcErrno::Enoent
        );
        assert_eq!(
            TarpcError::AlreadyExists("lib".into()).neutral(),
            RpcErrno::Eexist
        );
        assert_eq!(
            TarpcError::Corrupted("buf".into()).neutral(),
            RpcErrno::TeCorrupted
        );
    }
}
