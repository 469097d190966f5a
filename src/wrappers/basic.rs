//! Plain-call wrappers: one conversion pass in, one native call, one
//! result out.

use crate::dispatch::CallCtx;
use crate::rpctypes::address::{sockaddr_h2rpc, sockaddr_rpc2h};
use crate::rpctypes::fcntls::{
    fcntl_rpc2h, lseek_whence_rpc2h, open_flags_h2rpc, open_flags_rpc2h, RpcFcntlCmd,
};
use crate::rpctypes::signals::{signum_rpc2h, wait_options_rpc2h};
use crate::rpctypes::socket::{
    domain_rpc2h, proto_rpc2h, shut_how_rpc2h, socktype_rpc2h,
};
use crate::tarpc::*;
use libc::{c_int, c_void, sockaddr, socklen_t};

pub fn socket(ctx: &mut CallCtx, a: &SocketIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "socket",
        out,
        unsafe extern "C" fn(c_int, c_int, c_int) -> c_int
    );
    out.retval = unsafe {
        f(
            domain_rpc2h(a.domain),
            socktype_rpc2h(a.sock_type),
            proto_rpc2h(a.proto),
        )
    };
    out
}

pub fn bind(ctx: &mut CallCtx, a: &AddrCallIn) -> IntRetOut {
    addr_call(ctx, "bind", a)
}

pub fn connect(ctx: &mut CallCtx, a: &AddrCallIn) -> IntRetOut {
    addr_call(ctx, "connect", a)
}

fn addr_call(ctx: &mut CallCtx, name: &str, a: &AddrCallIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        name,
        out,
        unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int
    );
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let (p, len) = sockaddr_rpc2h(&a.addr, &mut storage);
    out.retval = unsafe { f(a.fd, p, len) };
    out
}

pub fn listen(ctx: &mut CallCtx, a: &ListenIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "listen",
        out,
        unsafe extern "C" fn(c_int, c_int) -> c_int
    );
    out.retval = unsafe { f(a.fd, a.backlog) };
    out
}

pub fn accept(ctx: &mut CallCtx, a: &AddrLenIn) -> AddrOut {
    addr_len_call(ctx, "accept", a)
}

pub fn getsockname(ctx: &mut CallCtx, a: &AddrLenIn) -> AddrOut {
    addr_len_call(ctx, "getsockname", a)
}

pub fn getpeername(ctx: &mut CallCtx, a: &AddrLenIn) -> AddrOut {
    addr_len_call(ctx, "getpeername", a)
}

/// accept/getsockname/getpeername: the peer declares `addrlen` visible
/// bytes of an `addr_buflen`-byte allocation; the tail is a guard band
/// that catches the host writing past the declared length.
fn addr_len_call(ctx: &mut CallCtx, name: &str, a: &AddrLenIn) -> AddrOut {
    let mut out = AddrOut::default();
    let f = resolve_fn!(
        ctx,
        name,
        out,
        unsafe extern "C" fn(c_int, *mut sockaddr, *mut socklen_t) -> c_int
    );

    let buflen = a.addr_buflen as usize;
    let mut buf = vec![0u8; buflen];
    let mut len: socklen_t = a.addrlen;
    unsafe {
        ctx.checked
            .register(buf.as_ptr(), buflen, a.addrlen as usize, "addr");
    }

    let (addr_p, len_p) = if buflen == 0 {
        (std::ptr::null_mut(), std::ptr::null_mut())
    } else {
        (buf.as_mut_ptr() as *mut sockaddr, &mut len as *mut socklen_t)
    };
    out.retval = unsafe { f(a.fd, addr_p, len_p) };

    if out.retval >= 0 && !addr_p.is_null() {
        let stored = (len as usize).min(a.addrlen as usize);
        out.addr = sockaddr_h2rpc(buf.as_ptr() as *const sockaddr, stored as socklen_t);
        out.addrlen = len;
    }
    ctx.verify_guards();
    out
}

pub fn close(ctx: &mut CallCtx, a: &FdIn) -> IntRetOut {
    fd_call(ctx, "close", a)
}

pub fn dup(ctx: &mut CallCtx, a: &FdIn) -> IntRetOut {
    fd_call(ctx, "dup", a)
}

fn fd_call(ctx: &mut CallCtx, name: &str, a: &FdIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(ctx, name, out, unsafe extern "C" fn(c_int) -> c_int);
    out.retval = unsafe { f(a.fd) };
    out
}

pub fn dup2(ctx: &mut CallCtx, a: &Dup2In) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "dup2",
        out,
        unsafe extern "C" fn(c_int, c_int) -> c_int
    );
    out.retval = unsafe { f(a.oldfd, a.newfd) };
    out
}

pub fn shutdown(ctx: &mut CallCtx, a: &ShutdownIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "shutdown",
        out,
        unsafe extern "C" fn(c_int, c_int) -> c_int
    );
    out.retval = unsafe { f(a.fd, shut_how_rpc2h(a.how)) };
    out
}

pub fn open(ctx: &mut CallCtx, a: &OpenIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "open",
        out,
        unsafe extern "C" fn(*const libc::c_char, c_int, libc::mode_t) -> c_int
    );
    let path = match std::ffi::CString::new(a.path.as_str()) {
        Ok(p) => p,
        Err(_) => {
            ctx.fail(crate::errors::TarpcError::InvalidArgument(
                "path contains NUL".to_owned(),
            ));
            return out;
        }
    };
    out.retval = unsafe { f(path.as_ptr(), open_flags_rpc2h(a.flags), a.mode) };
    out
}

pub fn fcntl(ctx: &mut CallCtx, a: &FcntlIn) -> FcntlOut {
    let mut out = FcntlOut::default();
    let f = resolve_fn!(
        ctx,
        "fcntl",
        out,
        unsafe extern "C" fn(c_int, c_int, c_int) -> c_int
    );
    let arg = match a.cmd {
        RpcFcntlCmd::FSetfl => open_flags_rpc2h(a.arg_flags),
        _ => a.arg,
    };
    out.retval = unsafe { f(a.fd, fcntl_rpc2h(a.cmd), arg) };
    if a.cmd == RpcFcntlCmd::FGetfl && out.retval >= 0 {
        out.retval_flags = open_flags_h2rpc(out.retval);
    }
    out
}

pub fn fsync(ctx: &mut CallCtx, a: &FdIn) -> IntRetOut {
    fd_call(ctx, "fsync", a)
}

pub fn lseek(ctx: &mut CallCtx, a: &LseekIn) -> SsizeOut {
    let mut out = SsizeOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "lseek",
        out,
        unsafe extern "C" fn(c_int, libc::off_t, c_int) -> libc::off_t
    );
    out.retval = unsafe { f(a.fd, a.offset as libc::off_t, lseek_whence_rpc2h(a.whence)) } as i64;
    out
}

pub fn waitpid(ctx: &mut CallCtx, a: &WaitpidIn) -> WaitpidOut {
    let mut out = WaitpidOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "waitpid",
        out,
        unsafe extern "C" fn(libc::pid_t, *mut c_int, c_int) -> libc::pid_t
    );
    let mut status: c_int = 0;
    out.retval = unsafe { f(a.pid, &mut status, wait_options_rpc2h(a.options)) };
    if out.retval > 0 {
        if libc::WIFEXITED(status) {
            out.status_flag = RpcWaitStatusFlag::Exited;
            out.status_value = libc::WEXITSTATUS(status);
        } else if libc::WIFSIGNALED(status) {
            out.status_flag = if libc::WCOREDUMP(status) {
                RpcWaitStatusFlag::CoreDumped
            } else {
                RpcWaitStatusFlag::Signaled
            };
            out.status_value = libc::WTERMSIG(status);
        } else if libc::WIFSTOPPED(status) {
            out.status_flag = RpcWaitStatusFlag::Stopped;
            out.status_value = libc::WSTOPSIG(status);
        } else if libc::WIFCONTINUED(status) {
            out.status_flag = RpcWaitStatusFlag::Continued;
        }
    }
    out
}

pub fn kill(ctx: &mut CallCtx, a: &KillIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "kill",
        out,
        unsafe extern "C" fn(libc::pid_t, c_int) -> c_int
    );
    out.retval = unsafe { f(a.pid, signum_rpc2h(a.signum)) };
    out
}

pub fn getpid(ctx: &mut CallCtx, a: &VoidIn) -> IntRetOut {
    let _ = a;
    let mut out = IntRetOut::default();
    let f = resolve_fn!(ctx, "getpid", out, unsafe extern "C" fn() -> libc::pid_t);
    out.retval = unsafe { f() };
    out
}

pub fn gettimeofday(ctx: &mut CallCtx, a: &VoidIn) -> GettimeofdayOut {
    let _ = a;
    let mut out = GettimeofdayOut::default();
    let f = resolve_fn!(
        ctx,
        "gettimeofday",
        out,
        unsafe extern "C" fn(*mut libc::timeval, *mut c_void) -> c_int
    );
    let mut tv: libc::timeval = unsafe { std::mem::zeroed() };
    out.retval = unsafe { f(&mut tv, std::ptr::null_mut()) };
    if out.retval == 0 {
        out.tv = RpcTimeval::from_timeval(tv);
    }
    out
}

pub fn getuid(ctx: &mut CallCtx, a: &VoidIn) -> IntRetOut {
    uid_get(ctx, "getuid", a)
}

pub fn geteuid(ctx: &mut CallCtx, a: &VoidIn) -> IntRetOut {
    uid_get(ctx, "geteuid", a)
}

fn uid_get(ctx: &mut CallCtx, name: &str, _a: &VoidIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(ctx, name, out, unsafe extern "C" fn() -> libc::uid_t);
    out.retval = unsafe { f() } as i32;
    out
}

pub fn setuid(ctx: &mut CallCtx, a: &UidIn) -> IntRetOut {
    uid_set(ctx, "setuid", a)
}

pub fn seteuid(ctx: &mut CallCtx, a: &UidIn) -> IntRetOut {
    uid_set(ctx, "seteuid", a)
}

fn uid_set(ctx: &mut CallCtx, name: &str, a: &UidIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(ctx, name, out, unsafe extern "C" fn(libc::uid_t) -> c_int);
    out.retval = unsafe { f(a.uid) };
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::address::RpcSockaddr;
    use crate::rpctypes::socket::{RpcDomain, RpcProto, RpcSockType};

    fn ctx() -> CallCtx {
        CallCtx::new("")
    }

    #[test]
    fn socket_bind_getsockname() {
        let mut c = ctx();
        let sock = socket(
            &mut c,
            &SocketIn {
                domain: RpcDomain::PfInet,
                sock_type: RpcSockType::SockDgram,
                proto: RpcProto::ProtoDefault,
                ..Default::default()
            },
        );
        assert!(sock.retval >= 0);
        let fd = sock.retval;

        let addr = crate::rpctypes::address::sockaddr_in_rpc(libc::INADDR_LOOPBACK.to_be(), 0);
        let bound = bind(
            &mut c,
            &AddrCallIn {
                fd,
                addr,
                ..Default::default()
            },
        );
        assert_eq!(bound.retval, 0);

        let name = getsockname(
            &mut c,
            &AddrLenIn {
                fd,
                addrlen: std::mem::size_of::<libc::sockaddr_in>() as u32,
                addr_buflen: std::mem::size_of::<libc::sockaddr_storage>() as u32,
                ..Default::default()
            },
        );
        assert_eq!(name.retval, 0);
        assert!(!name.addr.is_null());
        // An ephemeral port was assigned.
        assert_ne!(&name.addr.raw[..2], &[0, 0]);

        close(&mut c, &FdIn { fd, ..Default::default() });
    }

    #[test]
    fn fcntl_getfl_decodes_flags() {
        let mut c = ctx();
        let sock = socket(
            &mut c,
            &SocketIn {
                domain: RpcDomain::PfInet,
                sock_type: RpcSockType::SockDgram,
                proto: RpcProto::ProtoDefault,
                ..Default::default()
            },
        );
        let fd = sock.retval;

        let set = fcntl(
            &mut c,
            &FcntlIn {
                fd,
                cmd: RpcFcntlCmd::FSetfl,
                arg_flags: crate::rpctypes::fcntls::RpcOpenFlags::O_NONBLOCK,
                ..Default::default()
            },
        );
        assert_eq!(set.retval, 0);

        let get = fcntl(
            &mut c,
            &FcntlIn {
                fd,
                cmd: RpcFcntlCmd::FGetfl,
                ..Default::default()
            },
        );
        assert!(get
            .retval_flags
            .contains(crate::rpctypes::fcntls::RpcOpenFlags::O_NONBLOCK));

        close(&mut c, &FdIn { fd, ..Default::default() });
    }

    #[test]
    fn lseek_past_write_reports_the_offset() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        let fd = unsafe {
            libc::open(
                std::ffi::CString::new(tmp.path().to_str().unwrap())
                    .unwrap()
                    .as_ptr(),
                libc::O_RDONLY,
            )
        };
        assert!(fd >= 0);
        let mut c = ctx();
        let got = lseek(
            &mut c,
            &LseekIn {
                fd,
                offset: 4,
                whence: crate::rpctypes::fcntls::RpcLseekWhence::SeekSet,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 4);
        let end = lseek(
            &mut c,
            &LseekIn {
                fd,
                offset: 0,
                whence: crate::rpctypes::fcntls::RpcLseekWhence::SeekEnd,
                ..Default::default()
            },
        );
        assert_eq!(end.retval, 10);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn connect_to_null_address_fails() {
        let mut c = ctx();
        let sock = socket(
            &mut c,
            &SocketIn {
                domain: RpcDomain::PfInet,
                sock_type: RpcSockType::SockStream,
                proto: RpcProto::ProtoDefault,
                ..Default::default()
            },
        );
        let fd = sock.retval;
        let r = connect(
            &mut c,
            &AddrCallIn {
                fd,
                addr: RpcSockaddr::null(),
                ..Default::default()
            },
        );
        assert_eq!(r.retval, -1);
        close(&mut c, &FdIn { fd, ..Default::default() });
    }
}
