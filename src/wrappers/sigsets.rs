//! Signal machinery: server-side sigset objects, mask manipulation,
//! handler installation by name, and the registrar that records every
//! signal delivered to the process.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::handle_registry::{self, handler2name, name2handler, HandleObj};
use crate::rpctypes::signals::{
    sigaction_flags_h2rpc, sigaction_flags_rpc2h, sighow_rpc2h, signum_rpc2h,
};
use crate::tarpc::*;
use libc::{c_int, sigset_t};
use std::sync::Once;

/// Process-wide record of signals caught by `signal_registrar`.
/// Mutated from signal context, so only async-signal-safe sigset
/// operations touch it. Initialised before the registrar can be
/// installed, never moved, never freed.
static mut RPCS_RECEIVED_SIGNALS: std::mem::MaybeUninit<sigset_t> =
    std::mem::MaybeUninit::uninit();
static RECEIVED_INIT: Once = Once::new();

fn received_signals_ptr() -> *mut sigset_t {
    unsafe {
        RECEIVED_INIT.call_once(|| {
            libc::sigemptyset(RPCS_RECEIVED_SIGNALS.as_mut_ptr());
        });
        RPCS_RECEIVED_SIGNALS.as_mut_ptr()
    }
}

/// The handler tests install by name to observe signal delivery.
/// sigaddset on a static set is async-signal-safe.
pub extern "C" fn signal_registrar(signum: c_int) {
    unsafe {
        libc::sigaddset(RPCS_RECEIVED_SIGNALS.as_mut_ptr(), signum);
    }
}

pub fn sigset_new(_ctx: &mut CallCtx, _a: &VoidIn) -> HandleOut {
    let mut out = HandleOut::default();
    let mut set: Box<sigset_t> = Box::new(unsafe { std::mem::zeroed() });
    unsafe {
        libc::sigemptyset(&mut *set);
    }
    out.handle = handle_registry::alloc(HandleObj::SigSet(set));
    out
}

pub fn sigset_delete(_ctx: &mut CallCtx, a: &HandleIn) -> VoidOut {
    handle_registry::free(a.handle);
    VoidOut::default()
}

fn set_ptr(ctx: &mut CallCtx, id: crate::handle_registry::Handle) -> Option<*mut sigset_t> {
    match handle_registry::sigset_ptr(id) {
        Some(p) => Some(p),
        None => {
            ctx.fail(TarpcError::NotFound(format!("sigset handle {}", id)));
            None
        }
    }
}

pub fn sigemptyset(ctx: &mut CallCtx, a: &SigsetOpIn) -> IntRetOut {
    sigset_op(ctx, a, |p, _| unsafe { libc::sigemptyset(p) })
}

pub fn sigfillset(ctx: &mut CallCtx, a: &SigsetOpIn) -> IntRetOut {
    sigset_op(ctx, a, |p, _| unsafe { libc::sigfillset(p) })
}

pub fn sigaddset(ctx: &mut CallCtx, a: &SigsetOpIn) -> IntRetOut {
    sigset_op(ctx, a, |p, s| unsafe { libc::sigaddset(p, s) })
}

pub fn sigdelset(ctx: &mut CallCtx, a: &SigsetOpIn) -> IntRetOut {
    sigset_op(ctx, a, |p, s| unsafe { libc::sigdelset(p, s) })
}

pub fn sigismember(ctx: &mut CallCtx, a: &SigsetOpIn) -> IntRetOut {
    sigset_op(ctx, a, |p, s| unsafe { libc::sigismember(p, s) })
}

fn sigset_op(
    ctx: &mut CallCtx,
    a: &SigsetOpIn,
    f: impl FnOnce(*mut sigset_t, c_int) -> c_int,
) -> IntRetOut {
    let mut out = IntRetOut::default();
    if let Some(p) = set_ptr(ctx, a.set) {
        out.retval = f(p, signum_rpc2h(a.signum));
    } else {
        out.retval = -1;
    }
    out
}

pub fn sigprocmask(ctx: &mut CallCtx, a: &SigprocmaskIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "sigprocmask",
        out,
        unsafe extern "C" fn(c_int, *const sigset_t, *mut sigset_t) -> c_int
    );
    let set: *const sigset_t = if a.set == 0 {
        std::ptr::null()
    } else {
        match set_ptr(ctx, a.set) {
            Some(p) => p,
            None => return out,
        }
    };
    let oldset: *mut sigset_t = if a.oldset == 0 {
        std::ptr::null_mut()
    } else {
        match set_ptr(ctx, a.oldset) {
            Some(p) => p,
            None => return out,
        }
    };
    out.retval = unsafe { f(sighow_rpc2h(a.how), set, oldset) };
    out
}

pub fn sigpending(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "sigpending",
        out,
        unsafe extern "C" fn(*mut sigset_t) -> c_int
    );
    match set_ptr(ctx, a.handle) {
        Some(p) => out.retval = unsafe { f(p) },
        None => out.retval = -1,
    }
    out
}

pub fn sigsuspend(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut::default();
    let f = resolve_fn!(
        ctx,
        "sigsuspend",
        out,
        unsafe extern "C" fn(*const sigset_t) -> c_int
    );
    match set_ptr(ctx, a.handle) {
        Some(p) => out.retval = unsafe { f(p) },
        None => out.retval = -1,
    }
    out
}

/// Handle of the registrar's accumulated set. The same handle comes
/// back on every call; the peer inspects it with sigismember.
pub fn sigreceived(_ctx: &mut CallCtx, _a: &VoidIn) -> HandleOut {
    let mut out = HandleOut::default();
    out.handle = handle_registry::alloc(HandleObj::Ptr(received_signals_ptr() as usize));
    out
}

fn handler_by_name(name: &str) -> Result<usize, TarpcError> {
    match name {
        "SIG_DFL" => Ok(libc::SIG_DFL),
        "SIG_IGN" => Ok(libc::SIG_IGN),
        other => name2handler(other),
    }
}

fn handler_to_name(addr: usize) -> String {
    match addr {
        libc::SIG_DFL => "SIG_DFL".to_owned(),
        libc::SIG_IGN => "SIG_IGN".to_owned(),
        other => handler2name(other),
    }
}

pub fn signal(ctx: &mut CallCtx, a: &SignalIn) -> SignalOut {
    let mut out = SignalOut::default();
    let f = resolve_fn!(
        ctx,
        "signal",
        out,
        unsafe extern "C" fn(c_int, libc::sighandler_t) -> libc::sighandler_t
    );
    let handler = match handler_by_name(&a.handler) {
        Ok(h) => h,
        Err(e) => {
            ctx.fail(e);
            return out;
        }
    };
    // The accumulated set must exist before the handler can fire.
    received_signals_ptr();
    let signum = signum_rpc2h(a.signum);
    let prev = unsafe { f(signum, handler as libc::sighandler_t) };
    if prev == libc::SIG_ERR {
        return out;
    }
    out.handler = handler_to_name(prev as usize);
    registrar_installed_cleanup(handler, signum);
    out
}

/// Installing the registrar starts a fresh observation: any earlier
/// record of this signal is dropped.
fn registrar_installed_cleanup(handler: usize, signum: c_int) {
    if handler == signal_registrar as usize {
        unsafe {
            libc::sigdelset(received_signals_ptr(), signum);
        }
    }
}

pub fn sigaction(ctx: &mut CallCtx, a: &SigactionIn) -> SigactionOut {
    let mut out = SigactionOut::default();
    let f = resolve_fn!(
        ctx,
        "sigaction",
        out,
        unsafe extern "C" fn(c_int, *const libc::sigaction, *mut libc::sigaction) -> c_int
    );

    let mut new_native: libc::sigaction = unsafe { std::mem::zeroed() };
    let new_p: *const libc::sigaction = match &a.action {
        Some(act) => {
            new_native.sa_sigaction = match handler_by_name(&act.handler) {
                Ok(h) => h,
                Err(e) => {
                    ctx.fail(e);
                    out.retval = -1;
                    return out;
                }
            };
            new_native.sa_flags = sigaction_flags_rpc2h(act.flags);
            unsafe {
                libc::sigemptyset(&mut new_native.sa_mask);
            }
            if act.mask != 0 {
                match set_ptr(ctx, act.mask) {
                    Some(p) => new_native.sa_mask = unsafe { *p },
                    None => {
                        out.retval = -1;
                        return out;
                    }
                }
            }
            &new_native
        }
        None => std::ptr::null(),
    };

    let mut old_native: libc::sigaction = unsafe { std::mem::zeroed() };
    let old_p: *mut libc::sigaction = if a.want_old {
        &mut old_native
    } else {
        std::ptr::null_mut()
    };

    received_signals_ptr();
    let signum = signum_rpc2h(a.signum);
    out.retval = unsafe { f(signum, new_p, old_p) };

    if out.retval == 0 {
        if a.want_old {
            let mask_copy: Box<sigset_t> = Box::new(old_native.sa_mask);
            out.oldaction = Some(RpcSigaction {
                handler: handler_to_name(old_native.sa_sigaction),
                mask: handle_registry::alloc(HandleObj::SigSet(mask_copy)),
                flags: sigaction_flags_h2rpc(old_native.sa_flags),
            });
        }
        if let Some(act) = &a.action {
            if let Ok(h) = handler_by_name(&act.handler) {
                registrar_installed_cleanup(h, signum);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpctypes::signals::RpcSignum;
    use crate::symbols;

    fn ctx() -> CallCtx {
        CallCtx::new("")
    }

    fn registrar_registered() {
        symbols::register_static_symbol("signal_registrar", signal_registrar as usize);
    }

    #[test]
    fn sigset_membership() {
        let mut c = ctx();
        let set = sigset_new(&mut c, &VoidIn::default()).handle;

        let add = sigaddset(
            &mut c,
            &SigsetOpIn { set, signum: RpcSignum::Sigusr1, ..Default::default() },
        );
        assert_eq!(add.retval, 0);

        let yes = sigismember(
            &mut c,
            &SigsetOpIn { set, signum: RpcSignum::Sigusr1, ..Default::default() },
        );
        assert_eq!(yes.retval, 1);
        let no = sigismember(
            &mut c,
            &SigsetOpIn { set, signum: RpcSignum::Sigusr2, ..Default::default() },
        );
        assert_eq!(no.retval, 0);

        sigset_delete(&mut c, &HandleIn { handle: set, ..Default::default() });
    }

    #[test]
    fn registrar_records_a_delivered_signal() {
        registrar_registered();
        let mut c = ctx();

        let installed = signal(
            &mut c,
            &SignalIn {
                signum: RpcSignum::Sigusr2,
                handler: "signal_registrar".to_owned(),
                ..Default::default()
            },
        );
        // Installation wipes any stale record of the signal.
        let received = sigreceived(&mut c, &VoidIn::default()).handle;
        let before = sigismember(
            &mut c,
            &SigsetOpIn { set: received, signum: RpcSignum::Sigusr2, ..Default::default() },
        );
        assert_eq!(before.retval, 0);

        unsafe {
            libc::raise(libc::SIGUSR2);
        }

        let after = sigismember(
            &mut c,
            &SigsetOpIn { set: received, signum: RpcSignum::Sigusr2, ..Default::default() },
        );
        assert_eq!(after.retval, 1);

        // Restore and check the previous-handler name round trip.
        let restored = signal(
            &mut c,
            &SignalIn {
                signum: RpcSignum::Sigusr2,
                handler: installed.handler.clone(),
                ..Default::default()
            },
        );
        assert_eq!(restored.handler, "signal_registrar");
    }

    #[test]
    fn sigaction_returns_previous_action() {
        registrar_registered();
        let mut c = ctx();

        let set = sigaction(
            &mut c,
            &SigactionIn {
                signum: RpcSignum::Sigwinch,
                action: Some(RpcSigaction {
                    handler: "signal_registrar".to_owned(),
                    ..Default::default()
                }),
                want_old: false,
                ..Default::default()
            },
        );
        assert_eq!(set.retval, 0);

        let got = sigaction(
            &mut c,
            &SigactionIn {
                signum: RpcSignum::Sigwinch,
                action: None,
                want_old: true,
                ..Default::default()
            },
        );
        assert_eq!(got.retval, 0);
        let old = got.oldaction.unwrap();
        assert_eq!(old.handler, "signal_registrar");
        assert_ne!(old.mask, 0);
        handle_registry::free(old.mask);
    }
}
