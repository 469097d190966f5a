//! `ioctl()` with a request-code-discriminated third argument.
//! `struct ifreq` and `struct arpreq` are laid out by hand because the
//! payload union is easier to fill through a raw byte area.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::rpctypes::address::{sockaddr_h2rpc, sockaddr_rpc2h, RpcSockaddr};
use crate::rpctypes::ioctls::{arp_fl_h2rpc, arp_fl_rpc2h, if_fl_h2rpc, if_fl_rpc2h, ioctl_rpc2h, RpcIoctlCode};
use crate::tarpc::*;
use libc::{c_int, c_short, c_ulong, c_void};
use std::mem::size_of;

const IFNAMSIZ: usize = 16;
const IFR_DATA: usize = 24;

#[repr(C)]
#[derive(Copy, Clone)]
struct IfreqNative {
    name: [u8; IFNAMSIZ],
    data: [u8; IFR_DATA],
}

// The raw data area must line up with the kernel's ifreq union.
assert_eq_size!(IfreqNative, libc::ifreq);

impl IfreqNative {
    fn zeroed() -> IfreqNative {
        IfreqNative {
            name: [0; IFNAMSIZ],
            data: [0; IFR_DATA],
        }
    }
}

#[repr(C)]
struct IfconfNative {
    len: c_int,
    buf: *mut u8,
}

#[repr(C)]
#[derive(Copy, Clone)]
struct ArpreqNative {
    pa: libc::sockaddr,
    ha: libc::sockaddr,
    flags: c_int,
    netmask: libc::sockaddr,
    dev: [u8; IFNAMSIZ],
}

fn ifname_native(name: &str) -> Result<[u8; IFNAMSIZ], TarpcError> {
    let bytes = name.as_bytes();
    if bytes.len() >= IFNAMSIZ {
        return Err(TarpcError::InvalidArgument(format!(
            "interface name '{}' does not fit ifr_name",
            name
        )));
    }
    let mut out = [0u8; IFNAMSIZ];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn ifname_rpc(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn sockaddr_into(area: &mut [u8], addr: &RpcSockaddr) -> Result<(), TarpcError> {
    let mut ss: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let (ptr, len) = sockaddr_rpc2h(addr, &mut ss);
    if ptr.is_null() {
        return Ok(());
    }
    if len as usize > area.len() {
        return Err(TarpcError::InvalidArgument(format!(
            "address of {} bytes does not fit the request payload",
            len
        )));
    }
    unsafe {
        std::ptr::copy_nonoverlapping(ptr as *const u8, area.as_mut_ptr(), len as usize);
    }
    Ok(())
}

fn sockaddr_from(area: &[u8]) -> RpcSockaddr {
    sockaddr_h2rpc(
        area.as_ptr() as *const libc::sockaddr,
        size_of::<libc::sockaddr>() as libc::socklen_t,
    )
}

/// Fills the request payload the host call reads.
fn ifreq_native(code: RpcIoctlCode, r: &RpcIfreq) -> Result<IfreqNative, TarpcError> {
    use RpcIoctlCode::*;
    let mut native = IfreqNative::zeroed();
    native.name = ifname_native(&r.name)?;
    match code {
        Siocsifaddr | Siocsifnetmask | Siocsifbrdaddr => {
            sockaddr_into(&mut native.data, &r.addr)?;
        }
        Siocsifflags => {
            let fl = if_fl_rpc2h(r.flags) as c_short;
            native.data[..size_of::<c_short>()].copy_from_slice(&fl.to_ne_bytes());
        }
        Siocsifmtu => {
            native.data[..size_of::<c_int>()].copy_from_slice(&r.mtu.to_ne_bytes());
        }
        _ => {}
    }
    Ok(native)
}

/// Reads back what a get-style request stored.
fn ifreq_harvest(code: RpcIoctlCode, native: &IfreqNative, r: &RpcIfreq) -> RpcIfreq {
    use RpcIoctlCode::*;
    let mut out = r.clone();
    out.name = ifname_rpc(&native.name);
    match code {
        Siocgifaddr | Siocgifnetmask | Siocgifbrdaddr => {
            out.addr = sockaddr_from(&native.data);
        }
        Siocgifflags => {
            let mut fl = [0u8; size_of::<c_short>()];
            fl.copy_from_slice(&native.data[..size_of::<c_short>()]);
            out.flags = if_fl_h2rpc(c_short::from_ne_bytes(fl) as c_int);
        }
        Siocgifmtu => {
            let mut v = [0u8; size_of::<c_int>()];
            v.copy_from_slice(&native.data[..size_of::<c_int>()]);
            out.mtu = c_int::from_ne_bytes(v);
        }
        Siocgifhwaddr => {
            // ifr_hwaddr is a sockaddr whose sa_data holds the MAC.
            let sa = unsafe { &*(native.data.as_ptr() as *const libc::sockaddr) };
            out.hwaddr = sa.sa_data[..6].iter().map(|&b| b as u8).collect();
        }
        Siocgifindex => {
            let mut v = [0u8; size_of::<c_int>()];
            v.copy_from_slice(&native.data[..size_of::<c_int>()]);
            out.ifindex = c_int::from_ne_bytes(v);
        }
        _ => {}
    }
    out
}

fn arpreq_native(a: &RpcArpreq) -> Result<ArpreqNative, TarpcError> {
    let mut native: ArpreqNative = unsafe { std::mem::zeroed() };
    unsafe {
        sockaddr_into(
            std::slice::from_raw_parts_mut(
                &mut native.pa as *mut libc::sockaddr as *mut u8,
                size_of::<libc::sockaddr>(),
            ),
            &a.pa,
        )?;
        sockaddr_into(
            std::slice::from_raw_parts_mut(
                &mut native.ha as *mut libc::sockaddr as *mut u8,
                size_of::<libc::sockaddr>(),
            ),
            &a.ha,
        )?;
    }
    native.flags = arp_fl_rpc2h(a.flags);
    Ok(native)
}

pub fn ioctl(ctx: &mut CallCtx, a: &IoctlIn) -> IoctlOut {
    let mut out = IoctlOut::default();
    let f = resolve_fn!(
        ctx,
        "ioctl",
        out,
        unsafe extern "C" fn(c_int, c_ulong, *mut c_void) -> c_int
    );
    let code = ioctl_rpc2h(a.code);

    match &a.arg {
        None => {
            out.retval = unsafe { f(a.fd, code, std::ptr::null_mut()) };
        }
        Some(IoctlVal::Int(v)) => {
            let mut native: c_int = *v;
            out.retval = unsafe { f(a.fd, code, &mut native as *mut c_int as *mut c_void) };
            out.arg = Some(IoctlVal::Int(native));
        }
        Some(IoctlVal::Timeval(tv)) => {
            let mut native = tv.to_timeval();
            out.retval =
                unsafe { f(a.fd, code, &mut native as *mut libc::timeval as *mut c_void) };
            out.arg = Some(IoctlVal::Timeval(RpcTimeval::from_timeval(native)));
        }
        Some(IoctlVal::Ifreq(r)) => {
            let mut native = match ifreq_native(a.code, r) {
                Ok(n) => n,
                Err(e) => {
                    ctx.fail(e);
                    out.retval = -1;
                    return out;
                }
            };
            out.retval =
                unsafe { f(a.fd, code, &mut native as *mut IfreqNative as *mut c_void) };
            if out.retval == 0 {
                out.arg = Some(IoctlVal::Ifreq(ifreq_harvest(a.code, &native, r)));
            }
        }
        Some(IoctlVal::Ifconf { bufsize, .. }) => {
            let visible = *bufsize as usize;
            let mut buf = vec![0u8; visible * 2];
            unsafe {
                ctx.checked
                    .register(buf.as_ptr(), buf.len(), visible, "ifconf.buf");
            }
            let mut conf = IfconfNative {
                len: visible as c_int,
                buf: buf.as_mut_ptr(),
            };
            out.retval =
                unsafe { f(a.fd, code, &mut conf as *mut IfconfNative as *mut c_void) };
            ctx.verify_guards();
            if out.retval == 0 {
                let used = (conf.len.max(0) as usize).min(visible);
                let reqs = buf[..used]
                    .chunks_exact(size_of::<IfreqNative>())
                    .map(|chunk| {
                        let slot = unsafe { &*(chunk.as_ptr() as *const IfreqNative) };
                        RpcIfreq {
                            name: ifname_rpc(&slot.name),
                            addr: sockaddr_from(&slot.data),
                            ..Default::default()
                        }
                    })
                    .collect();
                out.arg = Some(IoctlVal::Ifconf {
                    bufsize: conf.len.max(0) as u32,
                    reqs,
                });
            }
        }
        Some(IoctlVal::Arpreq(req)) => {
            let mut native = match arpreq_native(req) {
                Ok(n) => n,
                Err(e) => {
                    ctx.fail(e);
                    out.retval = -1;
                    return out;
                }
            };
            out.retval =
                unsafe { f(a.fd, code, &mut native as *mut ArpreqNative as *mut c_void) };
            if out.retval == 0 {
                let ha = unsafe {
                    std::slice::from_raw_parts(
                        &native.ha as *const libc::sockaddr as *const u8,
                        size_of::<libc::sockaddr>(),
                    )
                };
                out.arg = Some(IoctlVal::Arpreq(RpcArpreq {
                    pa: req.pa.clone(),
                    ha: sockaddr_from(ha),
                    flags: arp_fl_h2rpc(native.flags),
                }));
            }
        }
    }
    out
}

#[repr(C)]
struct IfNameindexNative {
    index: libc::c_uint,
    name: *mut libc::c_char,
}

pub fn if_nametoindex(ctx: &mut CallCtx, a: &IfNameIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "if_nametoindex",
        out,
        unsafe extern "C" fn(*const libc::c_char) -> libc::c_uint
    );
    let name = match std::ffi::CString::new(a.name.as_str()) {
        Ok(n) => n,
        Err(_) => {
            ctx.fail(TarpcError::InvalidArgument(
                "interface name contains NUL".to_owned(),
            ));
            return out;
        }
    };
    out.retval = unsafe { f(name.as_ptr()) } as i32;
    out
}

pub fn if_indextoname(ctx: &mut CallCtx, a: &IfIndexIn) -> IfNameOut {
    let mut out = IfNameOut::default();
    let f = resolve_fn!(
        ctx,
        "if_indextoname",
        out,
        unsafe extern "C" fn(libc::c_uint, *mut libc::c_char) -> *mut libc::c_char
    );
    let mut buf = [0u8; IFNAMSIZ];
    let ret = unsafe { f(a.ifindex, buf.as_mut_ptr() as *mut libc::c_char) };
    if !ret.is_null() {
        out.name = ifname_rpc(&buf);
    }
    out
}

/// The native array stays alive under a handle; entries cross as
/// values. The terminator slot is not part of the reply.
pub fn if_nameindex(ctx: &mut CallCtx, a: &VoidIn) -> IfNameindexOut {
    let _ = a;
    let mut out = IfNameindexOut::default();
    let f = resolve_fn!(
        ctx,
        "if_nameindex",
        out,
        unsafe extern "C" fn() -> *mut IfNameindexNative
    );
    let arr = unsafe { f() };
    if arr.is_null() {
        ctx.fail(TarpcError::OutOfMemory);
        return out;
    }
    let mut slot = arr;
    unsafe {
        while (*slot).index != 0 || !(*slot).name.is_null() {
            out.items.push(RpcIfNameindexEntry {
                index: (*slot).index,
                name: std::ffi::CStr::from_ptr((*slot).name)
                    .to_string_lossy()
                    .into_owned(),
            });
            slot = slot.add(1);
        }
    }
    out.mem_ptr = crate::handle_registry::alloc(crate::handle_registry::HandleObj::Ptr(
        arr as usize,
    ));
    out
}

pub fn if_freenameindex(ctx: &mut CallCtx, a: &HandleIn) -> VoidOut {
    let out = VoidOut::default();
    let f = resolve_fn!(
        ctx,
        "if_freenameindex",
        out,
        unsafe extern "C" fn(*mut IfNameindexNative)
    );
    match crate::handle_registry::take(a.handle) {
        Some(crate::handle_registry::HandleObj::Ptr(addr)) => {
            unsafe { f(addr as *mut IfNameindexNative) };
        }
        Some(_) | None => {
            ctx.fail(TarpcError::NotFound(format!(
                "if_nameindex handle {:#x}",
                a.handle
            )));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::ioctls::RpcIfFlags;

    fn udp_socket() -> i32 {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0) };
        assert!(fd >= 0);
        fd
    }

    #[test]
    fn fionbio_switches_nonblocking() {
        let fd = udp_socket();
        let mut c = CallCtx::new("");
        let got = ioctl(
            &mut c,
            &IoctlIn {
                fd,
                code: RpcIoctlCode::Fionbio,
                arg: Some(IoctlVal::Int(1)),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        let fl = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        assert_ne!(fl & libc::O_NONBLOCK, 0);
        unsafe { libc::close(fd) };
    }

    #[test]
    fn fionread_on_empty_socket_is_zero() {
        let fd = udp_socket();
        let mut c = CallCtx::new("");
        let got = ioctl(
            &mut c,
            &IoctlIn {
                fd,
                code: RpcIoctlCode::Fionread,
                arg: Some(IoctlVal::Int(-1)),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        assert!(matches!(got.arg, Some(IoctlVal::Int(0))));
        unsafe { libc::close(fd) };
    }

    #[test]
    fn loopback_flags_include_up_and_loopback() {
        let fd = udp_socket();
        let mut c = CallCtx::new("");
        let got = ioctl(
            &mut c,
            &IoctlIn {
                fd,
                code: RpcIoctlCode::Siocgifflags,
                arg: Some(IoctlVal::Ifreq(RpcIfreq {
                    name: "lo".to_string(),
                    ..Default::default()
                })),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        match got.arg {
            Some(IoctlVal::Ifreq(r)) => {
                assert!(r.flags.contains(RpcIfFlags::IFF_UP | RpcIfFlags::IFF_LOOPBACK));
            }
            other => panic!("unexpected arg {:?}", other),
        }
        unsafe { libc::close(fd) };
    }

    #[test]
    fn ifconf_lists_loopback() {
        let fd = udp_socket();
        let mut c = CallCtx::new("");
        let got = ioctl(
            &mut c,
            &IoctlIn {
                fd,
                code: RpcIoctlCode::Siocgifconf,
                arg: Some(IoctlVal::Ifconf {
                    bufsize: 32 * std::mem::size_of::<IfreqNative>() as u32,
                    reqs: Vec::new(),
                }),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        match got.arg {
            Some(IoctlVal::Ifconf { reqs, .. }) => {
                assert!(reqs.iter().any(|r| r.name == "lo"));
            }
            other => panic!("unexpected arg {:?}", other),
        }
        unsafe { libc::close(fd) };
    }

    #[test]
    fn loopback_has_an_index_and_appears_in_the_list() {
        let mut c = CallCtx::new("");
        let idx = if_nametoindex(
            &mut c,
            &IfNameIn {
                name: "lo".to_string(),
                ..Default::default()
            },
        );
        assert!(idx.retval > 0);

        let back = if_indextoname(
            &mut c,
            &IfIndexIn {
                ifindex: idx.retval as u32,
                ..Default::default()
            },
        );
        assert_eq!(back.name, "lo");

        let list = if_nameindex(&mut c, &VoidIn::default());
        assert!(list.items.iter().any(|e| e.name == "lo"));
        if_freenameindex(
            &mut c,
            &HandleIn {
                handle: list.mem_ptr,
                ..Default::default()
            },
        );
        assert!(c.error().is_none());
    }

    #[test]
    fn oversized_interface_name_is_rejected() {
        let fd = udp_socket();
        let mut c = CallCtx::new("");
        let got = ioctl(
            &mut c,
            &IoctlIn {
                fd,
                code: RpcIoctlCode::Siocgifflags,
                arg: Some(IoctlVal::Ifreq(RpcIfreq {
                    name: "a-name-well-past-ifnamsiz".to_string(),
                    ..Default::default()
                })),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, -1);
        assert!(c.error().is_some());
        unsafe { libc::close(fd) };
    }
}
