//! `fcntl()` commands and the `open`-style flag mask shared by
//! F_GETFL/F_SETFL.

use libc::c_int;
use serde::{Deserialize, Serialize};

// Not exported by libc.
const F_SETSIG: c_int = 10;
const F_GETSIG: c_int = 11;

rpc_const_enum! {
    pub enum RpcFcntlCmd / fcntl_rpc2h / fcntl_h2rpc {
        FDupfd = libc::F_DUPFD => "F_DUPFD",
        FGetfd = libc::F_GETFD => "F_GETFD",
        FSetfd = libc::F_SETFD => "F_SETFD",
        FGetfl = libc::F_GETFL => "F_GETFL",
        FSetfl = libc::F_SETFL => "F_SETFL",
        FGetown = libc::F_GETOWN => "F_GETOWN",
        FSetown = libc::F_SETOWN => "F_SETOWN",
        FGetlease = libc::F_GETLEASE => "F_GETLEASE",
        FSetlease = libc::F_SETLEASE => "F_SETLEASE",
        FGetsig = F_GETSIG => "F_GETSIG",
        FSetsig = F_SETSIG => "F_SETSIG",
        @unknown FUnknown => -1,
    }
}

rpc_const_enum! {
    pub enum RpcLseekWhence / lseek_whence_rpc2h / lseek_whence_h2rpc {
        SeekSet = libc::SEEK_SET => "SEEK_SET",
        SeekCur = libc::SEEK_CUR => "SEEK_CUR",
        SeekEnd = libc::SEEK_END => "SEEK_END",
        @unknown SeekUnknown => -1,
    }
}

bitflags! {
    /// File status/creation flags. O_RDONLY is zero natively, so the
    /// access mode gets explicit neutral bits and rpc2h composes it.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcOpenFlags: u32 {
        const O_RDONLY = 0x1;
        const O_WRONLY = 0x2;
        const O_RDWR = 0x4;
        const O_NONBLOCK = 0x8;
        const O_APPEND = 0x10;
        const O_ASYNC = 0x20;
        const O_CREAT = 0x40;
        const O_TRUNC = 0x80;
        const O_EXCL = 0x100;
        const O_CLOEXEC = 0x200;
        const O_DIRECT = 0x400;
        const O_UNKNOWN = 0x8000;
    }
}

const OPEN_FLAG_PAIRS: &[(RpcOpenFlags, c_int)] = &[
    (RpcOpenFlags::O_WRONLY, libc::O_WRONLY),
    (RpcOpenFlags::O_RDWR, libc::O_RDWR),
    (RpcOpenFlags::O_NONBLOCK, libc::O_NONBLOCK),
    (RpcOpenFlags::O_APPEND, libc::O_APPEND),
    (RpcOpenFlags::O_ASYNC, libc::O_ASYNC),
    (RpcOpenFlags::O_CREAT, libc::O_CREAT),
    (RpcOpenFlags::O_TRUNC, libc::O_TRUNC),
    (RpcOpenFlags::O_EXCL, libc::O_EXCL),
    (RpcOpenFlags::O_CLOEXEC, libc::O_CLOEXEC),
    (RpcOpenFlags::O_DIRECT, libc::O_DIRECT),
];

pub fn open_flags_rpc2h(flags: RpcOpenFlags) -> c_int {
    // O_RDONLY contributes nothing; it exists so an explicit read-only
    // request is distinguishable from an empty mask on the wire.
    let mut out = 0;
    for &(rpc, native) in OPEN_FLAG_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    out
}

pub fn open_flags_h2rpc(flags: c_int) -> RpcOpenFlags {
    let mut out = match flags & libc::O_ACCMODE {
        libc::O_WRONLY => RpcOpenFlags::O_WRONLY,
        libc::O_RDWR => RpcOpenFlags::O_RDWR,
        _ => RpcOpenFlags::O_RDONLY,
    };
    let mut mapped = libc::O_ACCMODE;
    for &(rpc, native) in &OPEN_FLAG_PAIRS[2..] {
        if flags & native != 0 {
            out |= rpc;
        }
        mapped |= native;
    }
    if flags & !mapped != 0 {
        out |= RpcOpenFlags::O_UNKNOWN;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setfl_mask_round_trip() {
        let rpc = RpcOpenFlags::O_RDWR | RpcOpenFlags::O_NONBLOCK | RpcOpenFlags::O_ASYNC;
        let native = open_flags_rpc2h(rpc);
        assert_eq!(native, libc::O_RDWR | libc::O_NONBLOCK | libc::O_ASYNC);
        assert_eq!(open_flags_h2rpc(native), rpc);
    }

    #[test]
    fn rdonly_is_explicit_on_return() {
        assert!(open_flags_h2rpc(0).contains(RpcOpenFlags::O_RDONLY));
    }

    #[test]
    fn commands_map() {
        assert_eq!(fcntl_rpc2h(RpcFcntlCmd::FGetfl), libc::F_GETFL);
        assert_eq!(fcntl_h2rpc(libc::F_SETFL), RpcFcntlCmd::FSetfl);
    }
}
