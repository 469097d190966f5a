//! Per-call driver: runs a wrapper inline (CALL_WAIT), hands it to a
//! detached worker thread (CALL), harvests a worker's result (WAIT) or
//! answers a done-flag probe (IS_DONE).

use crate::checked_args::CheckedArgList;
use crate::errors::{self, RpcErrno, TarpcError};
use crate::handle_registry::{self, HandleObj};
use crate::log::{LogVerb, LogWarn};
use crate::rpctypes::win;
use crate::tarpc::{CallMode, Request, Response};
use crate::util;
use crate::wrappers;
use nix::sys::signal::SigSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Per-call context handed to every wrapper body. Collects guard-band
/// registrations and agent-level failures; the driver folds both into
/// the output record after the body returns.
pub struct CallCtx {
    lib: String,
    pub checked: CheckedArgList,
    error: Option<TarpcError>,
}

impl CallCtx {
    pub fn new(lib: &str) -> CallCtx {
        CallCtx {
            lib: lib.to_owned(),
            checked: CheckedArgList::new(),
            error: None,
        }
    }

    /// Records an agent-level failure. The first one wins; the neutral
    /// errno it maps to overrides whatever the native call left behind.
    pub fn fail(&mut self, e: TarpcError) {
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    pub fn error(&self) -> Option<&TarpcError> {
        self.error.as_ref()
    }

    /// Verifies the guard bands now, while the buffers they watch are
    /// still alive. Wrappers whose registered buffers are local must
    /// call this before returning. An earlier recorded failure stands;
    /// corruption only counts against an otherwise clean call.
    pub fn verify_guards(&mut self) {
        if let Err(e) = self.checked.verify() {
            if self.error.is_none() {
                self.error = Some(e);
            }
        }
    }

    /// Resolves the wrapped function through the override machinery.
    /// On failure the error is recorded and the wrapper returns its
    /// default-valued output.
    pub fn resolve(&mut self, name: &str) -> Option<usize> {
        match crate::symbols::find_func(&self.lib, name) {
            Ok(addr) => Some(addr),
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }
}

/// Entry point of the state machine: one request in, one response out.
pub fn serve_request(req: Request) -> Response {
    if let Request::RpcIsOpDone(_) = req {
        if req.common().op != CallMode::IsDone {
            return error_response(&req, RpcErrno::Einval);
        }
        return is_op_done(&req);
    }
    match req.common().op {
        CallMode::CallWait => execute(&req),
        CallMode::Call => deferred(req),
        CallMode::Wait => wait(&req),
        // IS_DONE is only meaningful for its dedicated operation.
        CallMode::IsDone => error_response(&req, RpcErrno::Einval),
    }
}

fn error_response(req: &Request, errno: RpcErrno) -> Response {
    let mut resp = req.empty_response();
    resp.common_mut().errno = errno;
    resp.common_mut().win_error = win::wsa_error_rpc2h(errno);
    resp
}

/// A trampled guard band only counts against a call that reported
/// success; a failed call keeps its own errno.
fn final_errno(call_errno: RpcErrno, checked: &mut CheckedArgList) -> RpcErrno {
    if call_errno != RpcErrno::Ok {
        return call_errno;
    }
    match checked.verify() {
        Ok(()) => RpcErrno::Ok,
        Err(e) => e.neutral(),
    }
}

/// Runs the wrapper body on the current thread and harvests errno,
/// duration and the guard bands.
fn execute(req: &Request) -> Response {
    let common = req.common();

    if common.start != 0 {
        let now = util::now_us();
        if common.start > now {
            util::usleep(common.start - now);
        } else {
            log!(
                LogWarn,
                "Start time is gone: {} us ago",
                now - common.start
            );
        }
    }

    let saved_errno = nix::errno::errno();
    let mut ctx = CallCtx::new(&common.lib);
    let t0 = util::now_us();
    let mut resp = wrappers::dispatch_call(&mut ctx, req);
    let duration = util::now_us().saturating_sub(t0);
    let native_errno = nix::errno::errno();

    let out = resp.common_mut();
    out.duration = duration;
    out.errno = match ctx.error {
        Some(ref e) => e.neutral(),
        None => errors::errno_h2rpc(native_errno),
    };
    out.errno_changed = native_errno != saved_errno;
    out.errno = final_errno(out.errno, &mut ctx.checked);
    out.win_error = win::wsa_error_rpc2h(out.errno);

    if is_logging!(LogVerb) {
        log!(
            LogVerb,
            "{} finished in {} us, errno {}",
            req.name(),
            duration,
            resp.common().errno
        );
    }
    resp
}

/// CALL: move the request into a worker thread that runs it with the
/// dispatcher's signal mask, and answer immediately with the handles
/// the peer will surrender to WAIT.
fn deferred(req: Request) -> Response {
    let mut reply = req.empty_response();

    let mask = match SigSet::thread_get_mask() {
        Ok(m) => m,
        Err(_) => SigSet::empty(),
    };
    let done = Arc::new(AtomicBool::new(false));
    let done_in_worker = done.clone();

    let spawned = thread::Builder::new()
        .name(req.name().to_owned())
        .spawn(move || {
            if let Err(e) = mask.thread_set_mask() {
                log!(LogWarn, "Cannot install signal mask in worker: {}", e);
            }
            let resp = execute(&req);
            done_in_worker.store(true, Ordering::SeqCst);
            resp
        });

    match spawned {
        Ok(join) => {
            let out = reply.common_mut();
            out.tid = handle_registry::alloc(HandleObj::Worker(join));
            out.done = handle_registry::alloc(HandleObj::DoneFlag(done));
        }
        Err(e) => {
            let errno = errors::errno_h2rpc(e.raw_os_error().unwrap_or(libc::EAGAIN));
            reply.common_mut().errno = errno;
            reply.common_mut().win_error = win::wsa_error_rpc2h(errno);
        }
    }
    reply
}

/// WAIT: both handles are freed whether or not the join succeeds, so a
/// broken peer cannot leak registry slots.
fn wait(req: &Request) -> Response {
    let common = req.common();
    let worker = handle_registry::take(common.tid);
    handle_registry::free(common.done);

    match worker {
        Some(HandleObj::Worker(join)) => match join.join() {
            Ok(mut resp) => {
                resp.common_mut().tid = 0;
                resp.common_mut().done = 0;
                resp
            }
            Err(_) => {
                log!(LogWarn, "Worker thread of {} panicked", req.name());
                error_response(req, RpcErrno::Unknown)
            }
        },
        _ => error_response(req, RpcErrno::Enoent),
    }
}

/// IS_DONE: echo the done-flag handle when the worker has finished,
/// zero otherwise. Never blocks and never frees anything.
fn is_op_done(req: &Request) -> Response {
    let done_h = req.common().done;
    let mut resp = req.empty_response();
    match handle_registry::done_flag(done_h) {
        Some(flag) => {
            resp.common_mut().done = if flag.load(Ordering::SeqCst) {
                done_h
            } else {
                0
            };
        }
        None => {
            let out = resp.common_mut();
            out.errno = RpcErrno::Enoent;
            out.win_error = win::wsa_error_rpc2h(RpcErrno::Enoent);
        }
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarpc::{InCommon, VoidIn};

    #[test]
    fn corruption_flags_only_a_clean_call() {
        let mut buf = vec![0u8; 16];
        let mut checked = CheckedArgList::new();
        checked.register_slice(&buf, 4, "arg");
        buf[8] = 0x5a;
        assert_eq!(
            final_errno(RpcErrno::Ok, &mut checked),
            RpcErrno::TeCorrupted
        );
    }

    #[test]
    fn failed_call_keeps_its_errno_over_corruption() {
        let mut buf = vec![0u8; 16];
        let mut checked = CheckedArgList::new();
        checked.register_slice(&buf, 4, "arg");
        buf[8] = 0x5a;
        assert_eq!(final_errno(RpcErrno::Ebadf, &mut checked), RpcErrno::Ebadf);
    }

    fn getpid_req(op: CallMode, tid: u32, done: u32) -> Request {
        Request::Getpid(VoidIn {
            common: InCommon {
                op,
                tid,
                done,
                ..Default::default()
            },
        })
    }

    #[test]
    fn call_wait_runs_inline() {
        let resp = serve_request(getpid_req(CallMode::CallWait, 0, 0));
        match resp {
            Response::Getpid(out) => {
                assert_eq!(out.retval, unsafe { libc::getpid() });
                assert_eq!(out.common.tid, 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn call_then_wait_round_trip() {
        let first = serve_request(getpid_req(CallMode::Call, 0, 0));
        let (tid, done) = match &first {
            Response::Getpid(out) => {
                // The deferred answer carries no result yet.
                assert_eq!(out.retval, 0);
                assert_eq!(out.common.duration, 0);
                assert_ne!(out.common.tid, 0);
                assert_ne!(out.common.done, 0);
                (out.common.tid, out.common.done)
            }
            _ => panic!("wrong variant"),
        };

        let second = serve_request(getpid_req(CallMode::Wait, tid, done));
        match second {
            Response::Getpid(out) => {
                assert_eq!(out.retval, unsafe { libc::getpid() });
                assert_eq!(out.common.tid, 0);
                assert_eq!(out.common.done, 0);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn wait_without_call_is_enoent() {
        let resp = serve_request(getpid_req(CallMode::Wait, 0, 0));
        assert_eq!(resp.common().errno, RpcErrno::Enoent);
    }

    #[test]
    fn is_done_tracks_the_worker() {
        let first = serve_request(getpid_req(CallMode::Call, 0, 0));
        let (tid, done) = (first.common().tid, first.common().done);

        // Poll until the worker finishes; getpid is quick.
        let probe = Request::RpcIsOpDone(VoidIn {
            common: InCommon {
                op: CallMode::IsDone,
                done,
                ..Default::default()
            },
        });
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let resp = serve_request(probe.clone());
            assert_eq!(resp.common().errno, RpcErrno::Ok);
            if resp.common().done == done {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never finished");
            std::thread::yield_now();
        }

        // Cleanup; WAIT must still succeed after IS_DONE probes.
        let last = serve_request(getpid_req(CallMode::Wait, tid, done));
        assert_eq!(last.common().errno, RpcErrno::Ok);
    }

    #[test]
    fn is_done_requires_its_own_mode() {
        let resp = serve_request(Request::RpcIsOpDone(VoidIn {
            common: InCommon {
                op: CallMode::CallWait,
                ..Default::default()
            },
        }));
        assert_eq!(resp.common().errno, RpcErrno::Einval);
    }

    #[test]
    fn not_before_in_the_future_delays_the_call() {
        let start = util::now_us() + 30_000;
        let req = Request::Getpid(VoidIn {
            common: InCommon {
                start,
                ..Default::default()
            },
        });
        let t0 = util::now_us();
        serve_request(req);
        assert!(util::now_us() - t0 >= 30_000);
    }
}
