//! fd_set objects live on the server and cross the wire as handles;
//! the multiplexers dereference those handles in place so a test can
//! build a set once and select on it repeatedly.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::handle_registry::{self, HandleObj};
use crate::rpctypes::polls::{poll_event_h2rpc, poll_event_rpc2h};
use crate::tarpc::*;
use libc::{c_int, fd_set, sigset_t, timespec, timeval};

pub fn fd_set_new(_ctx: &mut CallCtx, _a: &VoidIn) -> HandleOut {
    let mut out = HandleOut::default();
    let set: Box<fd_set> = Box::new(unsafe { std::mem::zeroed() });
    out.handle = handle_registry::alloc(HandleObj::FdSet(set));
    out
}

pub fn fd_set_delete(_ctx: &mut CallCtx, a: &HandleIn) -> VoidOut {
    handle_registry::free(a.handle);
    VoidOut::default()
}

fn with_set(
    ctx: &mut CallCtx,
    id: crate::handle_registry::Handle,
    f: impl FnOnce(*mut fd_set),
) {
    match handle_registry::fd_set_ptr(id) {
        Some(p) => f(p),
        None => ctx.fail(TarpcError::NotFound(format!("fd_set handle {}", id))),
    }
}

pub fn do_fd_set(ctx: &mut CallCtx, a: &FdSetOpIn) -> VoidOut {
    with_set(ctx, a.set, |p| unsafe { libc::FD_SET(a.fd, p) });
    VoidOut::default()
}

pub fn do_fd_clr(ctx: &mut CallCtx, a: &FdSetOpIn) -> VoidOut {
    with_set(ctx, a.set, |p| unsafe { libc::FD_CLR(a.fd, p) });
    VoidOut::default()
}

pub fn do_fd_isset(ctx: &mut CallCtx, a: &FdSetOpIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    with_set(ctx, a.set, |p| {
        out.retval = unsafe { libc::FD_ISSET(a.fd, p) } as i32;
    });
    out
}

pub fn do_fd_zero(ctx: &mut CallCtx, a: &FdSetOpIn) -> VoidOut {
    with_set(ctx, a.set, |p| unsafe { libc::FD_ZERO(p) });
    VoidOut::default()
}

/// Zero handle means a null set pointer, as with the native call.
fn set_or_null(ctx: &mut CallCtx, id: crate::handle_registry::Handle) -> Option<*mut fd_set> {
    if id == 0 {
        return Some(std::ptr::null_mut());
    }
    match handle_registry::fd_set_ptr(id) {
        Some(p) => Some(p),
        None => {
            ctx.fail(TarpcError::NotFound(format!("fd_set handle {}", id)));
            None
        }
    }
}

pub fn select(ctx: &mut CallCtx, a: &SelectIn) -> SelectOut {
    let mut out = SelectOut::default();
    let f = resolve_fn!(
        ctx,
        "select",
        out,
        unsafe extern "C" fn(c_int, *mut fd_set, *mut fd_set, *mut fd_set, *mut timeval) -> c_int
    );
    let (rd, wr, ex) = match (
        set_or_null(ctx, a.readfds),
        set_or_null(ctx, a.writefds),
        set_or_null(ctx, a.exceptfds),
    ) {
        (Some(r), Some(w), Some(e)) => (r, w, e),
        _ => return out,
    };

    let mut tv_storage: timeval;
    let tv_p = match a.timeout {
        Some(t) => {
            tv_storage = t.to_timeval();
            &mut tv_storage as *mut timeval
        }
        None => std::ptr::null_mut(),
    };

    out.retval = unsafe { f(a.n, rd, wr, ex, tv_p) };
    // Linux updates the timeout with the unslept remainder.
    if !tv_p.is_null() {
        out.timeout = Some(RpcTimeval::from_timeval(unsafe { *tv_p }));
    }
    out
}

pub fn pselect(ctx: &mut CallCtx, a: &PselectIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "pselect",
        out,
        unsafe extern "C" fn(
            c_int,
            *mut fd_set,
            *mut fd_set,
            *mut fd_set,
            *const timespec,
            *const sigset_t,
        ) -> c_int
    );
    let (rd, wr, ex) = match (
        set_or_null(ctx, a.readfds),
        set_or_null(ctx, a.writefds),
        set_or_null(ctx, a.exceptfds),
    ) {
        (Some(r), Some(w), Some(e)) => (r, w, e),
        _ => return out,
    };

    let sigmask: *const sigset_t = if a.sigmask == 0 {
        std::ptr::null()
    } else {
        match handle_registry::sigset_ptr(a.sigmask) {
            Some(p) => p,
            None => {
                ctx.fail(TarpcError::NotFound(format!("sigset handle {}", a.sigmask)));
                return out;
            }
        }
    };

    let ts_storage: timespec;
    let ts_p = match a.timeout {
        Some(t) => {
            ts_storage = t.to_timespec();
            &ts_storage as *const timespec
        }
        None => std::ptr::null(),
    };

    out.retval = unsafe { f(a.n, rd, wr, ex, ts_p, sigmask) };
    out
}

pub fn poll(ctx: &mut CallCtx, a: &PollIn) -> PollOut {
    let mut out = PollOut::default();
    let f = resolve_fn!(
        ctx,
        "poll",
        out,
        unsafe extern "C" fn(*mut libc::pollfd, libc::nfds_t, c_int) -> c_int
    );
    let mut native: Vec<libc::pollfd> = a
        .ufds
        .iter()
        .map(|u| libc::pollfd {
            fd: u.fd,
            events: poll_event_rpc2h(u.events),
            revents: 0,
        })
        .collect();
    let nfds = (a.nfds as usize).min(native.len());

    out.retval = unsafe { f(native.as_mut_ptr(), nfds as libc::nfds_t, a.timeout) };

    out.ufds = native
        .iter()
        .zip(a.ufds.iter())
        .map(|(n, u)| RpcPollfd {
            fd: u.fd,
            events: u.events,
            revents: poll_event_h2rpc(n.revents),
        })
        .collect();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::polls::RpcPollEvents;

    fn ctx() -> CallCtx {
        CallCtx::new("")
    }

    #[test]
    fn fd_set_lifecycle() {
        let mut c = ctx();
        let set = fd_set_new(&mut c, &VoidIn::default()).handle;
        assert_ne!(set, 0);

        do_fd_set(&mut c, &FdSetOpIn { set, fd: 3, ..Default::default() });
        let is = do_fd_isset(&mut c, &FdSetOpIn { set, fd: 3, ..Default::default() });
        assert_ne!(is.retval, 0);

        do_fd_clr(&mut c, &FdSetOpIn { set, fd: 3, ..Default::default() });
        let is = do_fd_isset(&mut c, &FdSetOpIn { set, fd: 3, ..Default::default() });
        assert_eq!(is.retval, 0);

        fd_set_delete(&mut c, &HandleIn { handle: set, ..Default::default() });
    }

    #[test]
    fn select_times_out_and_reports_remainder() {
        let mut c = ctx();
        let r = select(
            &mut c,
            &SelectIn {
                n: 0,
                timeout: Some(RpcTimeval { tv_sec: 0, tv_usec: 50_000 }),
                ..Default::default()
            },
        );
        assert_eq!(r.retval, 0);
        let left = r.timeout.unwrap();
        assert_eq!(left.tv_sec, 0);
        assert!(left.tv_usec <= 1_000);
    }

    #[test]
    fn select_sees_readable_fd() {
        let mut c = ctx();
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        unsafe {
            libc::write(fds[0], b"x".as_ptr() as *const libc::c_void, 1);
        }

        let set = fd_set_new(&mut c, &VoidIn::default()).handle;
        do_fd_set(&mut c, &FdSetOpIn { set, fd: fds[1], ..Default::default() });

        let r = select(
            &mut c,
            &SelectIn {
                n: fds[1] + 1,
                readfds: set,
                timeout: Some(RpcTimeval { tv_sec: 5, tv_usec: 0 }),
                ..Default::default()
            },
        );
        assert_eq!(r.retval, 1);
        let is = do_fd_isset(&mut c, &FdSetOpIn { set, fd: fds[1], ..Default::default() });
        assert_ne!(is.retval, 0);

        fd_set_delete(&mut c, &HandleIn { handle: set, ..Default::default() });
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn poll_reports_pollout_on_fresh_socket() {
        let mut c = ctx();
        let mut fds = [0; 2];
        assert_eq!(
            unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) },
            0
        );
        let r = poll(
            &mut c,
            &PollIn {
                ufds: vec![RpcPollfd {
                    fd: fds[0],
                    events: RpcPollEvents::POLLOUT,
                    revents: RpcPollEvents::empty(),
                }],
                nfds: 1,
                timeout: 1000,
                ..Default::default()
            },
        );
        assert_eq!(r.retval, 1);
        assert!(r.ufds[0].revents.contains(RpcPollEvents::POLLOUT));
        unsafe {
            libc::close(fds[0]);
            libc::close(fds[1]);
        }
    }

    #[test]
    fn stale_handle_is_not_found() {
        let mut c = ctx();
        let r = do_fd_isset(
            &mut c,
            &FdSetOpIn { set: 0xdead_0000, fd: 1, ..Default::default() },
        );
        assert_eq!(r.retval, 0);
    }
}
