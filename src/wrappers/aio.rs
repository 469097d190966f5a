//! POSIX AIO. Control blocks live in the handle registry so their
//! addresses stay stable while the kernel owns them; the data buffer
//! travels inside the same entry.

use crate::dispatch::CallCtx;
use crate::errors::{errno_h2rpc, TarpcError};
use crate::handle_registry::{self, AioCb, Handle, HandleObj};
use crate::rpctypes::signals::signum_rpc2h;
use crate::tarpc::*;
use libc::c_int;

fn lio_opcode_rpc2h(op: RpcLioOpcode) -> c_int {
    match op {
        RpcLioOpcode::Nop => libc::LIO_NOP,
        RpcLioOpcode::Read => libc::LIO_READ,
        RpcLioOpcode::Write => libc::LIO_WRITE,
    }
}

fn lio_mode_rpc2h(mode: RpcLioMode) -> c_int {
    match mode {
        RpcLioMode::Wait => libc::LIO_WAIT,
        RpcLioMode::Nowait => libc::LIO_NOWAIT,
    }
}

fn sigev_notify_rpc2h(notify: RpcSigevNotify) -> c_int {
    match notify {
        RpcSigevNotify::None => libc::SIGEV_NONE,
        RpcSigevNotify::Signal => libc::SIGEV_SIGNAL,
        RpcSigevNotify::Thread => libc::SIGEV_THREAD,
    }
}

// Laid out by hand; the libc crate does not expose the notify union,
// so the thread callback slot has to be reached through this shape.
#[repr(C)]
struct SigeventNative {
    value: usize,
    signo: c_int,
    notify: c_int,
    function: usize,
    attribute: usize,
    _pad: [c_int; 8],
}

assert_eq_size!(SigeventNative, libc::sigevent);

/// Builds a native sigevent. The thread callback travels by symbol
/// name and must already be known to the registry or the symbol table.
fn sigevent_native(ev: &RpcSigevent) -> Result<libc::sigevent, TarpcError> {
    let mut sev = SigeventNative {
        value: ev.value as usize,
        signo: signum_rpc2h(ev.signo),
        notify: sigev_notify_rpc2h(ev.notify),
        function: 0,
        attribute: 0,
        _pad: [0; 8],
    };
    if ev.notify == RpcSigevNotify::Thread {
        sev.function = handle_registry::name2handler(&ev.function)?;
    }
    Ok(unsafe { std::mem::transmute::<SigeventNative, libc::sigevent>(sev) })
}

pub fn create_aiocb(_ctx: &mut CallCtx, _a: &VoidIn) -> HandleOut {
    let cb = AioCb {
        cb: unsafe { std::mem::zeroed() },
        buf: Vec::new(),
    };
    HandleOut {
        handle: handle_registry::alloc(HandleObj::Aiocb(Box::new(cb))),
        ..Default::default()
    }
}

pub fn fill_aiocb(ctx: &mut CallCtx, a: &FillAiocbIn) -> VoidOut {
    let sev = match sigevent_native(&a.sigevent) {
        Ok(s) => s,
        Err(e) => {
            ctx.fail(e);
            return VoidOut::default();
        }
    };
    let found = handle_registry::with_aiocb(a.cb, |c| {
        c.buf = vec![0u8; a.nbytes as usize];
        c.cb.aio_fildes = a.fildes;
        c.cb.aio_lio_opcode = lio_opcode_rpc2h(a.lio_opcode);
        c.cb.aio_reqprio = a.reqprio;
        c.cb.aio_offset = a.offset as libc::off_t;
        c.cb.aio_buf = c.buf.as_mut_ptr() as *mut libc::c_void;
        c.cb.aio_nbytes = a.nbytes as libc::size_t;
        c.cb.aio_sigevent = sev;
    });
    if found.is_none() {
        ctx.fail(TarpcError::NotFound(format!("aiocb handle {:#x}", a.cb)));
    }
    VoidOut::default()
}

pub fn delete_aiocb(ctx: &mut CallCtx, a: &HandleIn) -> VoidOut {
    if handle_registry::take(a.handle).is_none() {
        ctx.fail(TarpcError::NotFound(format!("aiocb handle {:#x}", a.handle)));
    }
    VoidOut::default()
}

fn cb_ptr(ctx: &mut CallCtx, handle: Handle) -> Option<*mut libc::aiocb> {
    match handle_registry::aiocb_ptr(handle) {
        Some(p) => Some(p),
        None => {
            ctx.fail(TarpcError::NotFound(format!("aiocb handle {:#x}", handle)));
            None
        }
    }
}

pub fn aio_read(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_read",
        out,
        unsafe extern "C" fn(*mut libc::aiocb) -> c_int
    );
    if let Some(p) = cb_ptr(ctx, a.handle) {
        out.retval = unsafe { f(p) };
    }
    out
}

pub fn aio_write(ctx: &mut CallCtx, a: &HandleIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_write",
        out,
        unsafe extern "C" fn(*mut libc::aiocb) -> c_int
    );
    if let Some(p) = cb_ptr(ctx, a.handle) {
        out.retval = unsafe { f(p) };
    }
    out
}

/// The raw return is an errno value (0 done, EINPROGRESS pending), so
/// it crosses back in neutral encoding.
pub fn aio_error(ctx: &mut CallCtx, a: &HandleIn) -> AioErrorOut {
    let mut out = AioErrorOut::default();
    let f = resolve_fn!(
        ctx,
        "aio_error",
        out,
        unsafe extern "C" fn(*const libc::aiocb) -> c_int
    );
    if let Some(p) = cb_ptr(ctx, a.handle) {
        out.retval = errno_h2rpc(unsafe { f(p) });
    }
    out
}

pub fn aio_return(ctx: &mut CallCtx, a: &HandleIn) -> SsizeOut {
    let mut out = SsizeOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_return",
        out,
        unsafe extern "C" fn(*mut libc::aiocb) -> libc::ssize_t
    );
    if let Some(p) = cb_ptr(ctx, a.handle) {
        out.retval = unsafe { f(p) } as i64;
    }
    out
}

pub fn aio_cancel(ctx: &mut CallCtx, a: &AioCancelIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_cancel",
        out,
        unsafe extern "C" fn(c_int, *mut libc::aiocb) -> c_int
    );
    // A zero handle cancels everything queued on the descriptor.
    let p = if a.cb == 0 {
        std::ptr::null_mut()
    } else {
        match cb_ptr(ctx, a.cb) {
            Some(p) => p,
            None => return out,
        }
    };
    out.retval = unsafe { f(a.fd, p) };
    out
}

pub fn aio_fsync(ctx: &mut CallCtx, a: &AioFsyncIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_fsync",
        out,
        unsafe extern "C" fn(c_int, *mut libc::aiocb) -> c_int
    );
    let op = match a.op {
        RpcAioFsyncOp::OSync => libc::O_SYNC,
        RpcAioFsyncOp::ODsync => libc::O_DSYNC,
    };
    if let Some(p) = cb_ptr(ctx, a.cb) {
        out.retval = unsafe { f(op, p) };
    }
    out
}

pub fn aio_suspend(ctx: &mut CallCtx, a: &AioSuspendIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "aio_suspend",
        out,
        unsafe extern "C" fn(*const *const libc::aiocb, c_int, *const libc::timespec) -> c_int
    );
    let mut cbs: Vec<*const libc::aiocb> = Vec::with_capacity(a.cbs.len());
    for &h in &a.cbs {
        match cb_ptr(ctx, h) {
            Some(p) => cbs.push(p),
            None => return out,
        }
    }
    let ts = a.timeout.map(|t| t.to_timespec());
    let ts_ptr = match &ts {
        Some(t) => t as *const libc::timespec,
        None => std::ptr::null(),
    };
    out.retval = unsafe { f(cbs.as_ptr(), cbs.len() as c_int, ts_ptr) };
    out
}

pub fn lio_listio(ctx: &mut CallCtx, a: &LioListioIn) -> IntRetOut {
    let mut out = IntRetOut { retval: -1, ..Default::default() };
    let f = resolve_fn!(
        ctx,
        "lio_listio",
        out,
        unsafe extern "C" fn(c_int, *const *mut libc::aiocb, c_int, *mut libc::sigevent) -> c_int
    );
    let mut cbs: Vec<*mut libc::aiocb> = Vec::with_capacity(a.cbs.len());
    for &h in &a.cbs {
        match cb_ptr(ctx, h) {
            Some(p) => cbs.push(p),
            None => return out,
        }
    }
    let mut sev = match &a.sig {
        None => None,
        Some(ev) => match sigevent_native(ev) {
            Ok(s) => Some(s),
            Err(e) => {
                ctx.fail(e);
                return out;
            }
        },
    };
    let sev_ptr = match &mut sev {
        Some(s) => s as *mut libc::sigevent,
        None => std::ptr::null_mut(),
    };
    out.retval = unsafe {
        f(
            lio_mode_rpc2h(a.mode),
            cbs.as_ptr(),
            cbs.len() as c_int,
            sev_ptr,
        )
    };
    out
}
