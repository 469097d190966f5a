//! Agent-control operations: symbol overrides, type introspection, and
//! the server-creation family.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::handle_registry;
use crate::server;
use crate::symbols;
use crate::tarpc::*;

pub fn setlibname(ctx: &mut CallCtx, a: &SetlibnameIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    if let Err(e) = symbols::setlibname(&a.libname) {
        ctx.fail(e);
        out.retval = -1;
    }
    out
}

pub fn rpc_find_func(ctx: &mut CallCtx, a: &FindFuncIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    if ctx.resolve(&a.func_name).is_none() {
        out.retval = -1;
    }
    out
}

/// Native size of a named type, for peers that size buffers against the
/// agent's ABI rather than their own.
pub fn get_sizeof(ctx: &mut CallCtx, a: &GetSizeofIn) -> IntRetOut {
    use std::mem::size_of;

    let mut out = IntRetOut::default();
    let size = match a.typename.as_str() {
        "bool" => size_of::<bool>(),
        "char" => size_of::<libc::c_char>(),
        "short" => size_of::<libc::c_short>(),
        "int" => size_of::<libc::c_int>(),
        "long" => size_of::<libc::c_long>(),
        "long long" => size_of::<libc::c_longlong>(),
        "size_t" => size_of::<libc::size_t>(),
        "socklen_t" => size_of::<libc::socklen_t>(),
        "pid_t" => size_of::<libc::pid_t>(),
        "uid_t" => size_of::<libc::uid_t>(),
        "off_t" => size_of::<libc::off_t>(),
        "struct sockaddr" => size_of::<libc::sockaddr>(),
        "struct sockaddr_in" => size_of::<libc::sockaddr_in>(),
        "struct sockaddr_in6" => size_of::<libc::sockaddr_in6>(),
        "struct sockaddr_un" => size_of::<libc::sockaddr_un>(),
        "struct sockaddr_storage" => size_of::<libc::sockaddr_storage>(),
        "struct in_addr" => size_of::<libc::in_addr>(),
        "struct in6_addr" => size_of::<libc::in6_addr>(),
        "struct ip_mreq" => size_of::<libc::ip_mreq>(),
        "struct ipv6_mreq" => size_of::<libc::ipv6_mreq>(),
        "struct linger" => size_of::<libc::linger>(),
        "struct timeval" => size_of::<libc::timeval>(),
        "struct timespec" => size_of::<libc::timespec>(),
        "struct aiocb" => size_of::<libc::aiocb>(),
        "fd_set" => size_of::<libc::fd_set>(),
        "sigset_t" => size_of::<libc::sigset_t>(),
        other => {
            ctx.fail(TarpcError::InvalidArgument(format!(
                "unknown typename \"{}\"",
                other
            )));
            out.retval = -1;
            return out;
        }
    };
    out.retval = size as i32;
    out
}

pub fn create_process(ctx: &mut CallCtx, a: &CreateProcessIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    match server::spawn_process(&a.name, a.exec) {
        Ok(pid) => out.retval = pid,
        Err(e) => {
            ctx.fail(e);
            out.retval = -1;
        }
    }
    out
}

pub fn thread_create(ctx: &mut CallCtx, a: &ThreadCreateIn) -> ThreadCreateOut {
    let mut out = ThreadCreateOut::default();
    match server::spawn_thread(&a.name) {
        Ok(tid) => out.tid = tid,
        Err(e) => {
            ctx.fail(e);
            out.retval = -1;
        }
    }
    out
}

pub fn thread_cancel(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    if let Err(e) = server::cancel_thread(a.handle) {
        ctx.fail(e);
        out.retval = -1;
    }
    out
}

pub fn thread_join(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    match handle_registry::take_server_thread(a.handle) {
        Some(j) => {
            let _ = j.join();
        }
        None => {
            ctx.fail(TarpcError::NotFound(format!("thread {:#x}", a.handle)));
            out.retval = -1;
        }
    }
    out
}

/// Replaces the serving process image with a fresh copy of the agent.
/// Only reached on failure; on success the answer was already flushed
/// before the exec.
pub fn execve(ctx: &mut CallCtx, a: &ExecveIn) -> VoidOut {
    let out = VoidOut::default();
    if let Err(e) = server::reexec_self(&a.name) {
        ctx.fail(e);
    }
    out
}

pub fn plugin_enable(ctx: &mut CallCtx, a: &PluginEnableIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    if let Err(e) = crate::plugin::enable(&a.install, &a.action, &a.uninstall) {
        ctx.fail(e);
        out.retval = -1;
    }
    out
}

pub fn plugin_disable(ctx: &mut CallCtx, _a: &VoidIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    if let Err(e) = crate::plugin::disable() {
        ctx.fail(e);
        out.retval = -1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallCtx;

    #[test]
    fn sizeof_int_is_native() {
        let mut c = CallCtx::new("");
        let a = GetSizeofIn {
            typename: "int".to_owned(),
            ..Default::default()
        };
        let out = get_sizeof(&mut c, &a);
        assert_eq!(out.retval, std::mem::size_of::<libc::c_int>() as i32);
    }

    #[test]
    fn sizeof_rejects_unknown_typenames() {
        let mut c = CallCtx::new("");
        let a = GetSizeofIn {
            typename: "struct martian".to_owned(),
            ..Default::default()
        };
        let out = get_sizeof(&mut c, &a);
        assert_eq!(out.retval, -1);
        assert!(c.error().is_some());
    }

    #[test]
    fn find_func_sees_libc_symbols() {
        let mut c = CallCtx::new("");
        let a = FindFuncIn {
            func_name: "socket".to_owned(),
            ..Default::default()
        };
        assert_eq!(rpc_find_func(&mut c, &a).retval, 0);
    }

    #[test]
    fn cancel_then_join_reaps_a_thread_server() {
        let mut c = CallCtx::new("");
        let name = format!("ut_cancel_{}", std::process::id());
        let created = thread_create(
            &mut c,
            &ThreadCreateIn {
                name: name.clone(),
                ..Default::default()
            },
        );
        assert_eq!(created.retval, 0);
        assert_ne!(created.tid, 0);

        // Let the listener come up before winding it down.
        let path = crate::server::socket_path(&name);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while !path.exists() {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(std::time::Duration::from_millis(20));
        }

        let tid = HandleIn {
            handle: created.tid,
            ..Default::default()
        };
        assert_eq!(thread_cancel(&mut c, &tid).retval, 0);
        assert_eq!(thread_join(&mut c, &tid).retval, 0);
        assert!(c.error().is_none());
        assert!(!crate::server::list().contains(&name));
    }

    #[test]
    fn find_func_misses_are_reported() {
        let mut c = CallCtx::new("");
        let a = FindFuncIn {
            func_name: "definitely_not_a_symbol_anywhere".to_owned(),
            ..Default::default()
        };
        assert_eq!(rpc_find_func(&mut c, &a).retval, -1);
    }
}
