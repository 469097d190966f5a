//! Data-path wrappers. Receive-side buffers carry guard bands; send
//! buffers are authoritative as supplied. The msghdr pair packs and
//! unpacks control messages with the host's cmsg macros.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::rpctypes::address::{sockaddr_h2rpc, sockaddr_rpc2h, RpcSockaddr};
use crate::rpctypes::socket::{
    send_recv_flags_h2rpc, send_recv_flags_rpc2h, socklevel_h2rpc, socklevel_rpc2h,
    sockopt_h2rpc, sockopt_rpc2h,
};
use crate::tarpc::*;
use libc::{c_int, c_void, iovec, msghdr, size_t, sockaddr, socklen_t, ssize_t};

pub fn send(ctx: &mut CallCtx, a: &SendIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    let f = resolve_fn!(
        ctx,
        "send",
        out,
        unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t
    );
    let len = (a.len as usize).min(a.buf.len());
    out.retval = unsafe {
        f(
            a.fd,
            a.buf.as_ptr() as *const c_void,
            len,
            send_recv_flags_rpc2h(a.flags),
        )
    } as i64;
    out
}

pub fn recv(ctx: &mut CallCtx, a: &RecvIn) -> RecvOut {
    let mut out = RecvOut::default();
    let f = resolve_fn!(
        ctx,
        "recv",
        out,
        unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t
    );
    let mut buf = vec![0u8; a.buflen as usize];
    ctx.checked.register_slice(&buf, a.len as usize, "buf");
    out.retval = unsafe {
        f(
            a.fd,
            buf.as_mut_ptr() as *mut c_void,
            a.len as usize,
            send_recv_flags_rpc2h(a.flags),
        )
    } as i64;
    ctx.verify_guards();
    buf.truncate(a.len as usize);
    out.buf = buf;
    out
}

pub fn sendto(ctx: &mut CallCtx, a: &SendtoIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    let f = resolve_fn!(
        ctx,
        "sendto",
        out,
        unsafe extern "C" fn(
            c_int,
            *const c_void,
            size_t,
            c_int,
            *const sockaddr,
            socklen_t,
        ) -> ssize_t
    );
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let (p, addrlen) = sockaddr_rpc2h(&a.addr, &mut storage);
    let len = (a.len as usize).min(a.buf.len());
    out.retval = unsafe {
        f(
            a.fd,
            a.buf.as_ptr() as *const c_void,
            len,
            send_recv_flags_rpc2h(a.flags),
            p,
            addrlen,
        )
    } as i64;
    out
}

pub fn recvfrom(ctx: &mut CallCtx, a: &RecvfromIn) -> RecvfromOut {
    let mut out = RecvfromOut::default();
    let f = resolve_fn!(
        ctx,
        "recvfrom",
        out,
        unsafe extern "C" fn(
            c_int,
            *mut c_void,
            size_t,
            c_int,
            *mut sockaddr,
            *mut socklen_t,
        ) -> ssize_t
    );

    let mut buf = vec![0u8; a.buflen as usize];
    ctx.checked.register_slice(&buf, a.len as usize, "buf");

    let mut from = vec![0u8; a.from_buflen as usize];
    let mut fromlen: socklen_t = a.fromlen;
    ctx.checked.register_slice(&from, a.fromlen as usize, "from");

    let (from_p, fromlen_p) = if from.is_empty() {
        (std::ptr::null_mut(), std::ptr::null_mut())
    } else {
        (
            from.as_mut_ptr() as *mut sockaddr,
            &mut fromlen as *mut socklen_t,
        )
    };
    out.retval = unsafe {
        f(
            a.fd,
            buf.as_mut_ptr() as *mut c_void,
            a.len as usize,
            send_recv_flags_rpc2h(a.flags),
            from_p,
            fromlen_p,
        )
    } as i64;
    ctx.verify_guards();

    if out.retval >= 0 && !from_p.is_null() {
        let stored = (fromlen as usize).min(a.fromlen as usize);
        out.from = sockaddr_h2rpc(from.as_ptr() as *const sockaddr, stored as socklen_t);
        out.fromlen = fromlen;
    }
    buf.truncate(a.len as usize);
    out.buf = buf;
    out
}

pub fn read(ctx: &mut CallCtx, a: &ReadIn) -> RecvOut {
    let mut out = RecvOut::default();
    let f = resolve_fn!(
        ctx,
        "read",
        out,
        unsafe extern "C" fn(c_int, *mut c_void, size_t) -> ssize_t
    );
    let mut buf = vec![0u8; a.buflen as usize];
    ctx.checked.register_slice(&buf, a.len as usize, "buf");
    out.retval = unsafe { f(a.fd, buf.as_mut_ptr() as *mut c_void, a.len as usize) } as i64;
    ctx.verify_guards();
    buf.truncate(a.len as usize);
    out.buf = buf;
    out
}

pub fn write(ctx: &mut CallCtx, a: &WriteIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    let f = resolve_fn!(
        ctx,
        "write",
        out,
        unsafe extern "C" fn(c_int, *const c_void, size_t) -> ssize_t
    );
    let len = (a.len as usize).min(a.buf.len());
    out.retval = unsafe { f(a.fd, a.buf.as_ptr() as *const c_void, len) } as i64;
    out
}

fn check_iov_count(ctx: &mut CallCtx, count: usize) -> bool {
    if count > RPC_IOV_MAX {
        ctx.fail(TarpcError::InvalidArgument(format!(
            "{} iovec elements, at most {} supported",
            count, RPC_IOV_MAX
        )));
        return false;
    }
    true
}

pub fn readv(ctx: &mut CallCtx, a: &IovIn) -> IovOut {
    let mut out = IovOut::default();
    if !check_iov_count(ctx, a.iov.len()) {
        return out;
    }
    let f = resolve_fn!(
        ctx,
        "readv",
        out,
        unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t
    );

    // Each element keeps its full allocation; the declared length is
    // what the native call sees, the rest is a guard band.
    let mut bufs: Vec<Vec<u8>> = a.iov.iter().map(|e| vec![0u8; e.base.len()]).collect();
    let mut native: Vec<iovec> = Vec::with_capacity(bufs.len());
    for (i, (buf, e)) in bufs.iter_mut().zip(a.iov.iter()).enumerate() {
        let visible = (e.len as usize).min(buf.len());
        ctx.checked
            .register_slice(buf, visible, &format!("iov.{}", i));
        native.push(iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: visible,
        });
    }

    out.retval = unsafe { f(a.fd, native.as_ptr(), a.count.min(a.iov.len() as u32) as c_int) } as i64;
    ctx.verify_guards();

    out.iov = bufs
        .into_iter()
        .zip(a.iov.iter())
        .map(|(buf, e)| RpcIovec { base: buf, len: e.len })
        .collect();
    out
}

pub fn writev(ctx: &mut CallCtx, a: &IovIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    if !check_iov_count(ctx, a.iov.len()) {
        return out;
    }
    let f = resolve_fn!(
        ctx,
        "writev",
        out,
        unsafe extern "C" fn(c_int, *const iovec, c_int) -> ssize_t
    );
    let native: Vec<iovec> = a
        .iov
        .iter()
        .map(|e| iovec {
            iov_base: e.base.as_ptr() as *mut c_void,
            iov_len: (e.len as usize).min(e.base.len()),
        })
        .collect();
    out.retval = unsafe { f(a.fd, native.as_ptr(), a.count.min(a.iov.len() as u32) as c_int) } as i64;
    out
}

/// Space one packed control chain occupies.
fn cmsg_chain_space(control: &[RpcCmsg]) -> usize {
    control
        .iter()
        .map(|c| unsafe { libc::CMSG_SPACE(c.data.len() as u32) } as usize)
        .sum()
}

pub fn sendmsg(ctx: &mut CallCtx, a: &SendmsgIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    if !check_iov_count(ctx, a.msg.iov.len()) {
        return out;
    }
    let f = resolve_fn!(
        ctx,
        "sendmsg",
        out,
        unsafe extern "C" fn(c_int, *const msghdr, c_int) -> ssize_t
    );

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let (name_p, name_len) = sockaddr_rpc2h(&a.msg.name, &mut storage);

    let native_iov: Vec<iovec> = a
        .msg
        .iov
        .iter()
        .map(|e| iovec {
            iov_base: e.base.as_ptr() as *mut c_void,
            iov_len: (e.len as usize).min(e.base.len()),
        })
        .collect();

    let mut cbuf = vec![0u8; cmsg_chain_space(&a.msg.control)];
    let mut msg: msghdr = unsafe { std::mem::zeroed() };
    msg.msg_name = name_p as *mut c_void;
    msg.msg_namelen = name_len;
    msg.msg_iov = native_iov.as_ptr() as *mut iovec;
    msg.msg_iovlen = native_iov.len();
    if !cbuf.is_empty() {
        msg.msg_control = cbuf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = cbuf.len();
        unsafe {
            let mut cm = libc::CMSG_FIRSTHDR(&msg);
            for c in &a.msg.control {
                if cm.is_null() {
                    ctx.fail(TarpcError::InvalidArgument(
                        "control chain does not fit its buffer".to_owned(),
                    ));
                    return out;
                }
                (*cm).cmsg_level = socklevel_rpc2h(c.level);
                (*cm).cmsg_type = sockopt_rpc2h(c.ty);
                (*cm).cmsg_len = libc::CMSG_LEN(c.data.len() as u32) as size_t;
                std::ptr::copy_nonoverlapping(
                    c.data.as_ptr(),
                    libc::CMSG_DATA(cm),
                    c.data.len(),
                );
                cm = libc::CMSG_NXTHDR(&msg, cm);
            }
        }
    }

    out.retval = unsafe { f(a.fd, &msg, send_recv_flags_rpc2h(a.flags)) } as i64;
    out
}

pub fn recvmsg(ctx: &mut CallCtx, a: &RecvmsgIn) -> RecvmsgOut {
    let mut out = RecvmsgOut::default();
    if !check_iov_count(ctx, a.msg.iov.len()) {
        return out;
    }
    let f = resolve_fn!(
        ctx,
        "recvmsg",
        out,
        unsafe extern "C" fn(c_int, *mut msghdr, c_int) -> ssize_t
    );

    let mut name_buf = vec![0u8; a.msg.name.raw.len()];
    ctx.checked
        .register_slice(&name_buf, a.msg.namelen as usize, "msg_name");

    let mut bufs: Vec<Vec<u8>> = a.msg.iov.iter().map(|e| vec![0u8; e.base.len()]).collect();
    let mut native_iov: Vec<iovec> = Vec::with_capacity(bufs.len());
    for (i, (buf, e)) in bufs.iter_mut().zip(a.msg.iov.iter()).enumerate() {
        let visible = (e.len as usize).min(buf.len());
        ctx.checked
            .register_slice(buf, visible, &format!("msg_iov.{}", i));
        native_iov.push(iovec {
            iov_base: buf.as_mut_ptr() as *mut c_void,
            iov_len: visible,
        });
    }

    // Double the declared control allocation so a host overrun of the
    // chain is caught by the band instead of trampling the heap.
    let mut cbuf = vec![0u8; a.msg.controllen as usize * 2];
    ctx.checked
        .register_slice(&cbuf, a.msg.controllen as usize, "msg_control");

    let mut msg: msghdr = unsafe { std::mem::zeroed() };
    if !name_buf.is_empty() {
        msg.msg_name = name_buf.as_mut_ptr() as *mut c_void;
        msg.msg_namelen = a.msg.namelen;
    }
    msg.msg_iov = native_iov.as_mut_ptr();
    msg.msg_iovlen = native_iov.len();
    if a.msg.controllen > 0 {
        msg.msg_control = cbuf.as_mut_ptr() as *mut c_void;
        msg.msg_controllen = a.msg.controllen as usize;
    }

    out.retval = unsafe { f(a.fd, &mut msg, send_recv_flags_rpc2h(a.flags)) } as i64;
    ctx.verify_guards();

    if out.retval >= 0 {
        out.msg.name = sockaddr_h2rpc(
            msg.msg_name as *const sockaddr,
            msg.msg_namelen.min(a.msg.namelen),
        );
        out.msg.namelen = msg.msg_namelen;
        out.msg.flags = send_recv_flags_h2rpc(msg.msg_flags);
        out.msg.controllen = msg.msg_controllen as u32;
        unsafe {
            let mut cm = libc::CMSG_FIRSTHDR(&msg);
            while !cm.is_null() {
                let total = (*cm).cmsg_len as usize;
                let hdr = libc::CMSG_LEN(0) as usize;
                let data_len = total.saturating_sub(hdr);
                let mut data = vec![0u8; data_len];
                std::ptr::copy_nonoverlapping(
                    libc::CMSG_DATA(cm) as *const u8,
                    data.as_mut_ptr(),
                    data_len,
                );
                out.msg.control.push(RpcCmsg {
                    level: socklevel_h2rpc((*cm).cmsg_level),
                    ty: sockopt_h2rpc((*cm).cmsg_level, (*cm).cmsg_type),
                    data,
                });
                cm = libc::CMSG_NXTHDR(&msg, cm);
            }
        }
    }
    out.msg.iov = bufs
        .into_iter()
        .zip(a.msg.iov.iter())
        .map(|(buf, e)| RpcIovec { base: buf, len: e.len })
        .collect();
    out
}

pub fn sendfile(ctx: &mut CallCtx, a: &SendfileIn) -> SendfileOut {
    let mut out = SendfileOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "sendfile",
        out,
        unsafe extern "C" fn(c_int, c_int, *mut libc::off_t, libc::size_t) -> libc::ssize_t
    );
    let mut off: libc::off_t = a.offset.unwrap_or(0) as libc::off_t;
    let off_ptr = if a.offset.is_some() {
        &mut off as *mut libc::off_t
    } else {
        std::ptr::null_mut()
    };
    out.retval = unsafe { f(a.out_fd, a.in_fd, off_ptr, a.count as libc::size_t) } as i64;
    out.offset = off as i64;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::socket::RpcSendRecvFlags;

    fn dgram_pair() -> (i32, i32) {
        let mut fds = [0; 2];
        let rc = unsafe {
            libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr())
        };
        assert_eq!(rc, 0);
        (fds[0], fds[1])
    }

    #[test]
    fn send_then_recv_with_intact_guard_band() {
        let (a, b) = dgram_pair();
        let mut c = CallCtx::new("");

        let sent = send(
            &mut c,
            &SendIn {
                fd: a,
                buf: b"hello".to_vec(),
                len: 5,
                ..Default::default()
            },
        );
        assert_eq!(sent.retval, 5);

        let got = recv(
            &mut c,
            &RecvIn {
                fd: b,
                len: 16,
                buflen: 64,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 5);
        assert_eq!(&got.buf[..5], b"hello");

        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn short_recv_declared_len_truncates() {
        let (a, b) = dgram_pair();
        let mut c = CallCtx::new("");

        send(
            &mut c,
            &SendIn {
                fd: a,
                buf: vec![7u8; 32],
                len: 32,
                ..Default::default()
            },
        );
        // Declare only 8 visible bytes of a 32-byte allocation; a
        // datagram read stops at the declared length.
        let got = recv(
            &mut c,
            &RecvIn {
                fd: b,
                len: 8,
                buflen: 32,
                flags: RpcSendRecvFlags::MSG_TRUNC,
                ..Default::default()
            },
        );
        assert_eq!(got.buf.len(), 8);
        assert_eq!(&got.buf[..], &[7u8; 8][..]);

        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn writev_readv_round_trip() {
        let (a, b) = dgram_pair();
        let mut c = CallCtx::new("");

        let w = writev(
            &mut c,
            &IovIn {
                fd: a,
                iov: vec![
                    RpcIovec { base: b"ab".to_vec(), len: 2 },
                    RpcIovec { base: b"cdef".to_vec(), len: 4 },
                ],
                count: 2,
                ..Default::default()
            },
        );
        assert_eq!(w.retval, 6);

        let r = readv(
            &mut c,
            &IovIn {
                fd: b,
                iov: vec![
                    RpcIovec { base: vec![0; 3], len: 3 },
                    RpcIovec { base: vec![0; 8], len: 3 },
                ],
                count: 2,
                ..Default::default()
            },
        );
        assert_eq!(r.retval, 6);
        assert_eq!(&r.iov[0].base[..], b"abc");
        assert_eq!(&r.iov[1].base[..3], b"def");

        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn oversized_iov_is_rejected() {
        let mut c = CallCtx::new("");
        let r = writev(
            &mut c,
            &IovIn {
                fd: -1,
                iov: (0..33)
                    .map(|_| RpcIovec { base: vec![0], len: 1 })
                    .collect(),
                count: 33,
                ..Default::default()
            },
        );
        assert_eq!(r.retval, 0);
    }

    #[test]
    fn sendmsg_recvmsg_with_address() {
        let (a, b) = dgram_pair();
        let mut c = CallCtx::new("");

        let sent = sendmsg(
            &mut c,
            &SendmsgIn {
                fd: a,
                msg: RpcMsghdr {
                    iov: vec![RpcIovec { base: b"payload".to_vec(), len: 7 }],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert_eq!(sent.retval, 7);

        let got = recvmsg(
            &mut c,
            &RecvmsgIn {
                fd: b,
                msg: RpcMsghdr {
                    iov: vec![RpcIovec { base: vec![0; 16], len: 16 }],
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 7);
        assert_eq!(&got.msg.iov[0].base[..7], b"payload");
        assert!(got.msg.control.is_empty());

        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }
}
