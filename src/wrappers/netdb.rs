//! Name resolution. `hostent` and `addrinfo` come back from libc as
//! pointer trees; they are copied into value trees before crossing
//! back, and an `addrinfo` chain stays alive under a handle until the
//! matching `freeaddrinfo`.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::handle_registry::{self, AddrInfoPtr, HandleObj};
use crate::rpctypes::address::sockaddr_h2rpc;
use crate::rpctypes::netdb::{ai_error_h2rpc, ai_flags_h2rpc, ai_flags_rpc2h, h_errno_h2rpc};
use crate::rpctypes::socket::{
    addr_family_h2rpc, addr_family_rpc2h, domain_h2rpc, domain_rpc2h, proto_h2rpc, proto_rpc2h,
    socktype_h2rpc, socktype_rpc2h,
};
use crate::tarpc::*;
use libc::{c_char, c_int, c_void, socklen_t};
use std::ffi::{CStr, CString};

extern "C" {
    fn __h_errno_location() -> *mut c_int;
}

fn native_h_errno() -> c_int {
    unsafe { *__h_errno_location() }
}

fn cstring_arg(ctx: &mut CallCtx, what: &str, s: &str) -> Option<CString> {
    match CString::new(s) {
        Ok(c) => Some(c),
        Err(_) => {
            ctx.fail(TarpcError::InvalidArgument(format!(
                "{} contains an interior NUL",
                what
            )));
            None
        }
    }
}

/// Copies a `hostent` tree into owned values. The source is libc
/// static storage, valid until the next resolver call on this thread.
unsafe fn hostent_harvest(he: *const libc::hostent) -> RpcHostent {
    let he = &*he;
    let mut out = RpcHostent::default();
    if !he.h_name.is_null() {
        out.name = CStr::from_ptr(he.h_name).to_string_lossy().into_owned();
    }
    let mut alias = he.h_aliases;
    while !alias.is_null() && !(*alias).is_null() {
        out.aliases
            .push(CStr::from_ptr(*alias).to_string_lossy().into_owned());
        alias = alias.add(1);
    }
    out.addrtype = addr_family_h2rpc(he.h_addrtype);
    let mut addr = he.h_addr_list;
    while !addr.is_null() && !(*addr).is_null() {
        let bytes =
            std::slice::from_raw_parts(*addr as *const u8, he.h_length.max(0) as usize);
        out.addrs.push(bytes.to_vec());
        addr = addr.add(1);
    }
    out
}

pub fn gethostbyname(ctx: &mut CallCtx, a: &GethostbynameIn) -> HostentOut {
    let mut out = HostentOut::default();
    let f = resolve_fn!(
        ctx,
        "gethostbyname",
        out,
        unsafe extern "C" fn(*const c_char) -> *mut libc::hostent
    );
    let name = match cstring_arg(ctx, "host name", &a.name) {
        Some(n) => n,
        None => return out,
    };
    let he = unsafe { f(name.as_ptr()) };
    if he.is_null() {
        out.h_errno = h_errno_h2rpc(native_h_errno());
    } else {
        out.res = Some(unsafe { hostent_harvest(he) });
    }
    out
}

pub fn gethostbyaddr(ctx: &mut CallCtx, a: &GethostbyaddrIn) -> HostentOut {
    let mut out = HostentOut::default();
    let f = resolve_fn!(
        ctx,
        "gethostbyaddr",
        out,
        unsafe extern "C" fn(*const c_void, socklen_t, c_int) -> *mut libc::hostent
    );
    let he = unsafe {
        f(
            a.addr.as_ptr() as *const c_void,
            a.addr.len() as socklen_t,
            addr_family_rpc2h(a.family),
        )
    };
    if he.is_null() {
        out.h_errno = h_errno_h2rpc(native_h_errno());
    } else {
        out.res = Some(unsafe { hostent_harvest(he) });
    }
    out
}

pub fn getaddrinfo(ctx: &mut CallCtx, a: &GetaddrinfoIn) -> GetaddrinfoOut {
    let mut out = GetaddrinfoOut::default();
    let f = resolve_fn!(
        ctx,
        "getaddrinfo",
        out,
        unsafe extern "C" fn(
            *const c_char,
            *const c_char,
            *const libc::addrinfo,
            *mut *mut libc::addrinfo,
        ) -> c_int
    );

    let node = match cstring_arg(ctx, "node", &a.node) {
        Some(n) => n,
        None => return out,
    };
    let service = match cstring_arg(ctx, "service", &a.service) {
        Some(s) => s,
        None => return out,
    };
    let node_ptr = if a.node.is_empty() {
        std::ptr::null()
    } else {
        node.as_ptr()
    };
    let service_ptr = if a.service.is_empty() {
        std::ptr::null()
    } else {
        service.as_ptr()
    };

    let mut hints: libc::addrinfo = unsafe { std::mem::zeroed() };
    let hints_ptr = match &a.hints {
        None => std::ptr::null(),
        Some(h) => {
            hints.ai_flags = ai_flags_rpc2h(h.flags);
            hints.ai_family = domain_rpc2h(h.family);
            hints.ai_socktype = socktype_rpc2h(h.socktype);
            hints.ai_protocol = proto_rpc2h(h.protocol);
            &hints as *const libc::addrinfo
        }
    };

    let mut list: *mut libc::addrinfo = std::ptr::null_mut();
    let ret = unsafe { f(node_ptr, service_ptr, hints_ptr, &mut list) };
    out.retval = ai_error_h2rpc(ret);
    if ret != 0 {
        return out;
    }

    let mut cur = list as *const libc::addrinfo;
    while !cur.is_null() {
        let ai = unsafe { &*cur };
        out.res.push(RpcAddrinfo {
            flags: ai_flags_h2rpc(ai.ai_flags),
            family: domain_h2rpc(ai.ai_family),
            socktype: socktype_h2rpc(ai.ai_socktype),
            protocol: proto_h2rpc(ai.ai_protocol),
            addr: sockaddr_h2rpc(ai.ai_addr, ai.ai_addrlen),
            canonname: if ai.ai_canonname.is_null() {
                String::new()
            } else {
                unsafe { CStr::from_ptr(ai.ai_canonname).to_string_lossy().into_owned() }
            },
        });
        cur = ai.ai_next;
    }
    out.mem_ptr = handle_registry::alloc(HandleObj::AddrInfo(AddrInfoPtr(list)));
    out
}

/// Dropping the handle runs `freeaddrinfo` on the native chain.
pub fn freeaddrinfo(ctx: &mut CallCtx, a: &HandleIn) -> VoidOut {
    if handle_registry::take(a.handle).is_none() {
        ctx.fail(TarpcError::NotFound(format!(
            "addrinfo handle {:#x}",
            a.handle
        )));
    }
    VoidOut::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::netdb::RpcAiError;
    use crate::rpctypes::socket::{RpcAddrFamily, RpcDomain, RpcSockType};

    #[test]
    fn localhost_resolves_by_name() {
        let mut c = CallCtx::new("");
        let got = gethostbyname(
            &mut c,
            &GethostbynameIn {
                name: "localhost".to_string(),
                ..Default::default()
            },
        );
        let he = got.res.expect("localhost should resolve");
        assert_eq!(he.addrtype, RpcAddrFamily::AfInet);
        assert!(he.addrs.iter().any(|a| a == &[127, 0, 0, 1]));
    }

    #[test]
    fn loopback_resolves_by_addr() {
        let mut c = CallCtx::new("");
        let got = gethostbyaddr(
            &mut c,
            &GethostbyaddrIn {
                addr: vec![127, 0, 0, 1],
                family: RpcAddrFamily::AfInet,
                ..Default::default()
            },
        );
        assert!(got.res.is_some());
    }

    #[test]
    fn getaddrinfo_list_frees_through_the_handle() {
        let mut c = CallCtx::new("");
        let got = getaddrinfo(
            &mut c,
            &GetaddrinfoIn {
                node: "localhost".to_string(),
                service: String::new(),
                hints: Some(RpcAiHints {
                    family: RpcDomain::PfInet,
                    socktype: RpcSockType::SockDgram,
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        assert_eq!(got.retval, RpcAiError::AiOk);
        assert!(!got.res.is_empty());
        assert_ne!(got.mem_ptr, 0);
        assert!(got
            .res
            .iter()
            .all(|ai| ai.family == RpcDomain::PfInet));

        let freed = freeaddrinfo(
            &mut c,
            &HandleIn {
                handle: got.mem_ptr,
                ..Default::default()
            },
        );
        let _ = freed;
        assert!(c.error().is_none());

        // Double free reports the stale handle.
        freeaddrinfo(
            &mut c,
            &HandleIn {
                handle: got.mem_ptr,
                ..Default::default()
            },
        );
        assert!(c.error().is_some());
    }
}
