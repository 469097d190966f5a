//! Socket options. The option value crosses the wire as a
//! discriminated union; `OPTLEN_AUTO` asks this side to use the native
//! size of the discriminant. SO_ERROR and SO_TYPE results are
//! re-encoded to neutral values before they cross back.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::rpctypes::socket::{socklevel_rpc2h, sockopt_rpc2h, sockopt_value_h2rpc, RpcSockOpt};
use crate::tarpc::*;
use libc::{c_int, c_void, socklen_t};
use std::mem::size_of;

/// Linux `struct tcp_info` prefix; the kernel copies at most the
/// length we offer, so trailing growth in newer kernels is harmless.
#[repr(C)]
#[derive(Copy, Clone, Default)]
struct TcpInfoNative {
    state: u8,
    ca_state: u8,
    retransmits: u8,
    probes: u8,
    backoff: u8,
    options: u8,
    /// snd_wscale:4, rcv_wscale:4
    wscale: u8,
    app_limited: u8,
    rto: u32,
    ato: u32,
    snd_mss: u32,
    rcv_mss: u32,
    unacked: u32,
    sacked: u32,
    lost: u32,
    retrans: u32,
    fackets: u32,
    last_data_sent: u32,
    last_ack_sent: u32,
    last_data_recv: u32,
    last_ack_recv: u32,
    pmtu: u32,
    rcv_ssthresh: u32,
    rtt: u32,
    rttvar: u32,
    snd_ssthresh: u32,
    snd_cwnd: u32,
    advmss: u32,
    reordering: u32,
    rcv_rtt: u32,
    rcv_space: u32,
    total_retrans: u32,
}

fn struct_bytes<T: Copy>(v: &T) -> Vec<u8> {
    unsafe {
        std::slice::from_raw_parts(v as *const T as *const u8, size_of::<T>()).to_vec()
    }
}

unsafe fn struct_from_bytes<T: Copy>(bytes: &[u8]) -> T {
    let mut out: T = std::mem::zeroed();
    let n = bytes.len().min(size_of::<T>());
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), &mut out as *mut T as *mut u8, n);
    out
}

/// Native encoding of an option value.
fn optval_native(v: &OptVal) -> Vec<u8> {
    match v {
        OptVal::Int(i) => struct_bytes(&(*i as c_int)),
        OptVal::Linger { onoff, linger } => struct_bytes(&libc::linger {
            l_onoff: *onoff,
            l_linger: *linger,
        }),
        OptVal::Mreq { multiaddr, interface } => struct_bytes(&libc::ip_mreq {
            imr_multiaddr: libc::in_addr { s_addr: *multiaddr },
            imr_interface: libc::in_addr { s_addr: *interface },
        }),
        OptVal::Mreqn { multiaddr, address, ifindex } => struct_bytes(&libc::ip_mreqn {
            imr_multiaddr: libc::in_addr { s_addr: *multiaddr },
            imr_address: libc::in_addr { s_addr: *address },
            imr_ifindex: *ifindex,
        }),
        OptVal::IpAddr(addr) => struct_bytes(&libc::in_addr { s_addr: *addr }),
        OptVal::Timeval(tv) => struct_bytes(&tv.to_timeval()),
        OptVal::Str(s) => {
            let mut bytes = s.as_bytes().to_vec();
            bytes.push(0);
            bytes
        }
        OptVal::TcpInfo(_) => struct_bytes(&TcpInfoNative::default()),
    }
}

/// Same-discriminant decode of what the host stored.
fn optval_harvest(shape: &OptVal, optname: RpcSockOpt, bytes: &[u8]) -> OptVal {
    match shape {
        OptVal::Int(_) => {
            let v: c_int = unsafe { struct_from_bytes(bytes) };
            OptVal::Int(sockopt_value_h2rpc(optname, v))
        }
        OptVal::Linger { .. } => {
            let l: libc::linger = unsafe { struct_from_bytes(bytes) };
            OptVal::Linger { onoff: l.l_onoff, linger: l.l_linger }
        }
        OptVal::Mreq { .. } => {
            let m: libc::ip_mreq = unsafe { struct_from_bytes(bytes) };
            OptVal::Mreq {
                multiaddr: m.imr_multiaddr.s_addr,
                interface: m.imr_interface.s_addr,
            }
        }
        OptVal::Mreqn { .. } => {
            let m: libc::ip_mreqn = unsafe { struct_from_bytes(bytes) };
            OptVal::Mreqn {
                multiaddr: m.imr_multiaddr.s_addr,
                address: m.imr_address.s_addr,
                ifindex: m.imr_ifindex,
            }
        }
        OptVal::IpAddr(_) => {
            let a: libc::in_addr = unsafe { struct_from_bytes(bytes) };
            OptVal::IpAddr(a.s_addr)
        }
        OptVal::Timeval(_) => {
            let tv: libc::timeval = unsafe { struct_from_bytes(bytes) };
            OptVal::Timeval(RpcTimeval::from_timeval(tv))
        }
        OptVal::Str(_) => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            OptVal::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
        }
        OptVal::TcpInfo(_) => {
            let ti: TcpInfoNative = unsafe { struct_from_bytes(bytes) };
            OptVal::TcpInfo(RpcTcpInfo {
                state: ti.state,
                ca_state: ti.ca_state,
                retransmits: ti.retransmits,
                probes: ti.probes,
                backoff: ti.backoff,
                options: ti.options,
                snd_wscale: ti.wscale & 0xf,
                rcv_wscale: ti.wscale >> 4,
                rto: ti.rto,
                ato: ti.ato,
                snd_mss: ti.snd_mss,
                rcv_mss: ti.rcv_mss,
                unacked: ti.unacked,
                lost: ti.lost,
                retrans: ti.retrans,
                rtt: ti.rtt,
                rttvar: ti.rttvar,
                snd_cwnd: ti.snd_cwnd,
                total_retrans: ti.total_retrans,
            })
        }
    }
}

pub fn setsockopt(ctx: &mut CallCtx, a: &SetsockoptIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "setsockopt",
        out,
        unsafe extern "C" fn(c_int, c_int, c_int, *const c_void, socklen_t) -> c_int
    );

    let (ptr, len, _keepalive) = match &a.optval {
        None => (std::ptr::null(), a.optlen.min(4096), Vec::new()),
        Some(v) => {
            let mut bytes = optval_native(v);
            let len = if a.optlen == OPTLEN_AUTO {
                bytes.len() as u32
            } else {
                a.optlen
            };
            // A declared length past the native encoding reads zeros,
            // not whatever follows on our heap.
            if (len as usize) > bytes.len() {
                bytes.resize(len as usize, 0);
            }
            (bytes.as_ptr() as *const c_void, len, bytes)
        }
    };

    out.retval = unsafe {
        f(
            a.fd,
            socklevel_rpc2h(a.level),
            sockopt_rpc2h(a.optname),
            ptr,
            len,
        )
    };
    out
}

pub fn getsockopt(ctx: &mut CallCtx, a: &GetsockoptIn) -> GetsockoptOut {
    let mut out = GetsockoptOut::default();
    let f = resolve_fn!(
        ctx,
        "getsockopt",
        out,
        unsafe extern "C" fn(c_int, c_int, c_int, *mut c_void, *mut socklen_t) -> c_int
    );

    // The union discriminant tells us the shape to decode into; the
    // peer sends a default-valued instance of it.
    let shape = match &a.optval {
        Some(v) => v.clone(),
        None => OptVal::Int(0),
    };
    let native_size = optval_native(&shape).len();
    let declared = if a.optlen == OPTLEN_AUTO {
        native_size as u32
    } else {
        a.optlen
    };
    if declared as usize > 64 * 1024 {
        ctx.fail(TarpcError::InvalidArgument(format!(
            "optlen {} is past any real option",
            declared
        )));
        out.retval = -1;
        return out;
    }

    let mut buf = vec![0u8; (declared as usize).max(native_size)];
    let mut optlen: socklen_t = declared;
    out.retval = unsafe {
        f(
            a.fd,
            socklevel_rpc2h(a.level),
            sockopt_rpc2h(a.optname),
            buf.as_mut_ptr() as *mut c_void,
            &mut optlen,
        )
    };

    if out.retval == 0 {
        out.optval = Some(optval_harvest(&shape, a.optname, &buf));
        out.optlen = optlen;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::socket::{RpcSockLevel, RpcSockOpt, RpcSockType};

    fn tcp_socket() -> i32 {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        fd
    }

    #[test]
    fn so_type_comes_back_neutral() {
        let fd = tcp_socket();
        let mut c = CallCtx::new("");
        let got = getsockopt(
            &mut c,
            &GetsockoptIn {
                fd,
                level: RpcSockLevel::SolSocket,
                optname: RpcSockOpt::SoType,
                optval: Some(OptVal::Int(0)),
                optlen: OPTLEN_AUTO,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        match got.optval {
            Some(OptVal::Int(v)) => {
                assert_eq!(v, RpcSockType::SockStream as i32);
            }
            other => panic!("unexpected value {:?}", other),
        }
        unsafe { libc::close(fd) };
    }

    #[test]
    fn linger_round_trip() {
        let fd = tcp_socket();
        let mut c = CallCtx::new("");
        let set = setsockopt(
            &mut c,
            &SetsockoptIn {
                fd,
                level: RpcSockLevel::SolSocket,
                optname: RpcSockOpt::SoLinger,
                optval: Some(OptVal::Linger { onoff: 1, linger: 7 }),
                optlen: OPTLEN_AUTO,
                ..Default::default()
            },
        );
        assert_eq!(set.retval, 0);

        let got = getsockopt(
            &mut c,
            &GetsockoptIn {
                fd,
                level: RpcSockLevel::SolSocket,
                optname: RpcSockOpt::SoLinger,
                optval: Some(OptVal::Linger { onoff: 0, linger: 0 }),
                optlen: OPTLEN_AUTO,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        match got.optval {
            Some(OptVal::Linger { onoff, linger }) => {
                assert_eq!(onoff, 1);
                assert_eq!(linger, 7);
            }
            other => panic!("unexpected value {:?}", other),
        }
        unsafe { libc::close(fd) };
    }

    #[test]
    fn so_error_of_healthy_socket_is_ok() {
        let fd = tcp_socket();
        let mut c = CallCtx::new("");
        let got = getsockopt(
            &mut c,
            &GetsockoptIn {
                fd,
                level: RpcSockLevel::SolSocket,
                optname: RpcSockOpt::SoError,
                optval: Some(OptVal::Int(-1)),
                optlen: OPTLEN_AUTO,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        assert!(matches!(got.optval, Some(OptVal::Int(0))));
        unsafe { libc::close(fd) };
    }
}
