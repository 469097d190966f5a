//! Traffic primitives: long-running send/receive loops executed on the
//! server so a peer can drive sustained load with a single RPC. All
//! socket calls go through the resolved symbols, so an override library
//! shapes these loops the same way it shapes single-shot wrappers.

use crate::dispatch::CallCtx;
use crate::errors::{errno_h2rpc, TarpcError};
use crate::log::LogWarn;
use crate::tarpc::*;
use crate::util;
use libc::{c_int, c_void, size_t, ssize_t, timeval};

type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
type RecvFn = unsafe extern "C" fn(c_int, *mut c_void, size_t, c_int) -> ssize_t;

fn last_errno() -> TarpcError {
    TarpcError::Os(errno_h2rpc(unsafe { *libc::__errno_location() }))
}

fn resolve_send(ctx: &mut CallCtx) -> Option<SendFn> {
    ctx.resolve("send")
        .map(|a| unsafe { std::mem::transmute::<usize, SendFn>(a) })
}

fn resolve_recv(ctx: &mut CallCtx) -> Option<RecvFn> {
    ctx.resolve("recv")
        .map(|a| unsafe { std::mem::transmute::<usize, RecvFn>(a) })
}

/// Readiness multiplexer backed by the resolved select/pselect/poll.
struct Iomux {
    kind: RpcIomux,
    select_f: usize,
    poll_f: usize,
}

impl Iomux {
    fn new(ctx: &mut CallCtx, kind: RpcIomux) -> Option<Iomux> {
        let (name, is_poll) = match kind {
            RpcIomux::Select => ("select", false),
            RpcIomux::Pselect => ("pselect", false),
            RpcIomux::Poll => ("poll", true),
        };
        let addr = ctx.resolve(name)?;
        Some(Iomux {
            kind,
            select_f: if is_poll { 0 } else { addr },
            poll_f: if is_poll { addr } else { 0 },
        })
    }

    /// Waits up to `timeout_ms`; returns the subsets of `rd`/`wr` that
    /// are ready, or an OS error.
    fn wait(
        &self,
        rd: &[i32],
        wr: &[i32],
        timeout_ms: i32,
    ) -> Result<(Vec<i32>, Vec<i32>), TarpcError> {
        match self.kind {
            RpcIomux::Poll => self.wait_poll(rd, wr, timeout_ms),
            _ => self.wait_select(rd, wr, timeout_ms),
        }
    }

    fn wait_poll(
        &self,
        rd: &[i32],
        wr: &[i32],
        timeout_ms: i32,
    ) -> Result<(Vec<i32>, Vec<i32>), TarpcError> {
        type PollFn = unsafe extern "C" fn(*mut libc::pollfd, libc::nfds_t, c_int) -> c_int;
        let f: PollFn = unsafe { std::mem::transmute(self.poll_f) };

        let mut fds: Vec<libc::pollfd> = rd
            .iter()
            .map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLIN,
                revents: 0,
            })
            .chain(wr.iter().map(|&fd| libc::pollfd {
                fd,
                events: libc::POLLOUT,
                revents: 0,
            }))
            .collect();
        let rc = unsafe { f(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if rc < 0 {
            return Err(last_errno());
        }
        let rdy_rd = fds[..rd.len()]
            .iter()
            .filter(|p| p.revents & (libc::POLLIN | libc::POLLERR | libc::POLLHUP) != 0)
            .map(|p| p.fd)
            .collect();
        let rdy_wr = fds[rd.len()..]
            .iter()
            .filter(|p| p.revents & (libc::POLLOUT | libc::POLLERR) != 0)
            .map(|p| p.fd)
            .collect();
        Ok((rdy_rd, rdy_wr))
    }

    fn wait_select(
        &self,
        rd: &[i32],
        wr: &[i32],
        timeout_ms: i32,
    ) -> Result<(Vec<i32>, Vec<i32>), TarpcError> {
        let mut rdset = unsafe { std::mem::MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        let mut wrset = unsafe { std::mem::MaybeUninit::<libc::fd_set>::zeroed().assume_init() };
        unsafe {
            libc::FD_ZERO(&mut rdset);
            libc::FD_ZERO(&mut wrset);
        }
        let mut nfds = 0;
        for &fd in rd {
            unsafe { libc::FD_SET(fd, &mut rdset) };
            nfds = nfds.max(fd + 1);
        }
        for &fd in wr {
            unsafe { libc::FD_SET(fd, &mut wrset) };
            nfds = nfds.max(fd + 1);
        }

        let rc = if self.kind == RpcIomux::Pselect {
            type PselectFn = unsafe extern "C" fn(
                c_int,
                *mut libc::fd_set,
                *mut libc::fd_set,
                *mut libc::fd_set,
                *const libc::timespec,
                *const libc::sigset_t,
            ) -> c_int;
            let f: PselectFn = unsafe { std::mem::transmute(self.select_f) };
            let ts = libc::timespec {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_nsec: (timeout_ms % 1000) as libc::c_long * 1_000_000,
            };
            unsafe {
                f(
                    nfds,
                    &mut rdset,
                    &mut wrset,
                    std::ptr::null_mut(),
                    &ts,
                    std::ptr::null(),
                )
            }
        } else {
            type SelectFn = unsafe extern "C" fn(
                c_int,
                *mut libc::fd_set,
                *mut libc::fd_set,
                *mut libc::fd_set,
                *mut timeval,
            ) -> c_int;
            let f: SelectFn = unsafe { std::mem::transmute(self.select_f) };
            let mut tv = timeval {
                tv_sec: (timeout_ms / 1000) as libc::time_t,
                tv_usec: (timeout_ms % 1000) as libc::suseconds_t * 1000,
            };
            unsafe { f(nfds, &mut rdset, &mut wrset, std::ptr::null_mut(), &mut tv) }
        };
        if rc < 0 {
            return Err(last_errno());
        }
        let rdy_rd = rd
            .iter()
            .copied()
            .filter(|&fd| unsafe { libc::FD_ISSET(fd, &rdset) })
            .collect();
        let rdy_wr = wr
            .iter()
            .copied()
            .filter(|&fd| unsafe { libc::FD_ISSET(fd, &wrset) })
            .collect();
        Ok((rdy_rd, rdy_wr))
    }
}

/// Sends random-sized chunks with random inter-send delays for
/// `time2run` seconds.
pub fn simple_sender(ctx: &mut CallCtx, a: &SimpleSenderIn) -> BytesOut {
    let mut out = BytesOut::default();
    let send_f = match resolve_send(ctx) {
        Some(f) => f,
        None => return out,
    };
    if a.size_min > a.size_max || a.delay_min > a.delay_max {
        ctx.fail(TarpcError::InvalidArgument(
            "min above max in sender parameters".to_owned(),
        ));
        out.retval = -1;
        return out;
    }

    let mut buf = vec![0u8; a.size_max.max(1) as usize];
    rand::Rng::fill(&mut rand::thread_rng(), &mut buf[..]);

    let fixed_size = if a.size_rnd_once {
        Some(util::rand_range(a.size_min, a.size_max))
    } else {
        None
    };
    let fixed_delay = if a.delay_rnd_once {
        Some(util::rand_range(a.delay_min, a.delay_max))
    } else {
        None
    };

    let deadline = util::deadline_after(a.time2run);
    loop {
        let left = match util::time_until(deadline) {
            Some(tv) => tv,
            None => break,
        };
        let delay = fixed_delay.unwrap_or_else(|| util::rand_range(a.delay_min, a.delay_max));
        // A delay that overshoots the end of the run is pointless.
        if (delay / 1_000_000) as i64 > left.tv_sec + 1 {
            break;
        }
        util::usleep(delay as u64);

        let size = fixed_size.unwrap_or_else(|| util::rand_range(a.size_min, a.size_max)) as usize;
        let rc = unsafe { send_f(a.sock, buf.as_ptr() as *const c_void, size, 0) };
        if rc < 0 {
            if a.ignore_err {
                continue;
            }
            ctx.fail(last_errno());
            out.retval = -1;
            return out;
        }
        out.bytes += rc as u64;
    }
    out
}

/// Receives and discards until the deadline; with `time2run` zero,
/// until the peer closes.
pub fn simple_receiver(ctx: &mut CallCtx, a: &SimpleReceiverIn) -> BytesOut {
    let mut out = BytesOut::default();
    let recv_f = match resolve_recv(ctx) {
        Some(f) => f,
        None => return out,
    };
    let mux = match Iomux::new(ctx, RpcIomux::Select) {
        Some(m) => m,
        None => return out,
    };

    let deadline = util::deadline_after(a.time2run);
    let mut buf = vec![0u8; 65536];
    loop {
        if a.time2run != 0 && util::time_until(deadline).is_none() {
            break;
        }
        let (rdy, _) = match mux.wait(&[a.sock], &[], 1000) {
            Ok(r) => r,
            Err(e) => {
                ctx.fail(e);
                out.retval = -1;
                return out;
            }
        };
        if rdy.is_empty() {
            continue;
        }
        let rc = unsafe { recv_f(a.sock, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if rc < 0 {
            ctx.fail(last_errno());
            out.retval = -1;
            return out;
        }
        if rc == 0 {
            if a.time2run == 0 && out.bytes == 0 {
                log!(LogWarn, "receiver saw the peer close before any data");
            }
            break;
        }
        out.bytes += rc as u64;
    }
    out
}

/// Saturation load: blast fixed-size chunks at every sender socket and
/// drain every receiver socket, all under one readiness multiplexer.
/// After `time2run` seconds the send side stops; the drain side keeps
/// going until a wait turns up nothing, allowing `time2wait` seconds
/// for in-flight data, and reports a timeout if that allowance runs
/// out first.
pub fn flooder(ctx: &mut CallCtx, a: &FlooderIn) -> FlooderOut {
    let mut out = FlooderOut::default();
    out.tx_stat = vec![0; a.sndrs.len()];
    out.rx_stat = vec![0; a.rcvrs.len()];

    let send_f = match resolve_send(ctx) {
        Some(f) => f,
        None => return out,
    };
    let recv_f = match resolve_recv(ctx) {
        Some(f) => f,
        None => return out,
    };
    let mux = match Iomux::new(ctx, a.iomux) {
        Some(m) => m,
        None => return out,
    };

    if a.rx_nonblock {
        for &fd in &a.rcvrs {
            let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
            if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0
            {
                ctx.fail(last_errno());
                out.retval = -1;
                return out;
            }
        }
    }

    let buf = vec![0u8; a.bulkszs.max(1) as usize];
    let mut rdbuf = vec![0u8; a.bulkszs.max(4096) as usize];
    let send_deadline = util::deadline_after(a.time2run);
    let mut drain_deadline: Option<timeval> = None;
    let mut drain_polled = false;

    loop {
        let sending = util::time_until(send_deadline).is_some();
        if !sending && drain_deadline.is_none() {
            drain_deadline = Some(util::deadline_after(a.time2wait));
        }
        let mut wait_ms = 1000;
        if let Some(dd) = drain_deadline {
            wait_ms = match util::time_until(dd) {
                Some(left) => util::timeval_to_ms(left),
                // The drain side gets at least one look even with a
                // zero allowance.
                None if !drain_polled => 0,
                None => {
                    // In-flight data outlived the drain allowance.
                    ctx.fail(TarpcError::Timeout);
                    out.retval = -1;
                    return out;
                }
            };
            drain_polled = true;
        }

        let wr: &[i32] = if sending { &a.sndrs } else { &[] };
        let (rdy_rd, rdy_wr) = match mux.wait(&a.rcvrs, wr, wait_ms) {
            Ok(r) => r,
            Err(e) => {
                ctx.fail(e);
                out.retval = -1;
                return out;
            }
        };
        if !sending && rdy_rd.is_empty() {
            // Nothing left in flight.
            break;
        }

        for fd in rdy_wr {
            let rc = unsafe {
                send_f(
                    fd,
                    buf.as_ptr() as *const c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if rc < 0 {
                let e = unsafe { *libc::__errno_location() };
                if e == libc::EAGAIN || e == libc::EWOULDBLOCK {
                    continue;
                }
                ctx.fail(TarpcError::Os(errno_h2rpc(e)));
                out.retval = -1;
                return out;
            }
            if let Some(i) = a.sndrs.iter().position(|&s| s == fd) {
                out.tx_stat[i] += rc as u64;
            }
        }

        for fd in rdy_rd {
            let rc = unsafe {
                recv_f(
                    fd,
                    rdbuf.as_mut_ptr() as *mut c_void,
                    rdbuf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if rc < 0 {
                let e = unsafe { *libc::__errno_location() };
                if e == libc::EAGAIN || e == libc::EWOULDBLOCK {
                    continue;
                }
                ctx.fail(TarpcError::Os(errno_h2rpc(e)));
                out.retval = -1;
                return out;
            }
            if let Some(i) = a.rcvrs.iter().position(|&s| s == fd) {
                out.rx_stat[i] += rc as u64;
            }
        }
    }
    out
}

/// Echoes every readable socket back onto itself for `time2run`
/// seconds, then keeps echoing in-flight data until a wait turns up
/// nothing, with `time2wait` seconds of allowance.
pub fn echoer(ctx: &mut CallCtx, a: &EchoerIn) -> FlooderOut {
    let mut out = FlooderOut::default();
    out.tx_stat = vec![0; a.socks.len()];
    out.rx_stat = vec![0; a.socks.len()];

    let send_f = match resolve_send(ctx) {
        Some(f) => f,
        None => return out,
    };
    let recv_f = match resolve_recv(ctx) {
        Some(f) => f,
        None => return out,
    };
    let mux = match Iomux::new(ctx, a.iomux) {
        Some(m) => m,
        None => return out,
    };

    let mut buf = vec![0u8; 65536];
    let deadline = util::deadline_after(a.time2run);
    let mut drain_deadline: Option<timeval> = None;
    let mut drain_polled = false;
    loop {
        let running = util::time_until(deadline).is_some();
        if !running && drain_deadline.is_none() {
            drain_deadline = Some(util::deadline_after(a.time2wait));
        }
        let mut wait_ms = 1000;
        if let Some(dd) = drain_deadline {
            wait_ms = match util::time_until(dd) {
                Some(left) => util::timeval_to_ms(left),
                None if !drain_polled => 0,
                None => {
                    ctx.fail(TarpcError::Timeout);
                    out.retval = -1;
                    return out;
                }
            };
            drain_polled = true;
        }
        let (rdy, _) = match mux.wait(&a.socks, &[], wait_ms) {
            Ok(r) => r,
            Err(e) => {
                ctx.fail(e);
                out.retval = -1;
                return out;
            }
        };
        if !running && rdy.is_empty() {
            break;
        }
        for fd in rdy {
            let rc = unsafe { recv_f(fd, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
            if rc < 0 {
                ctx.fail(last_errno());
                out.retval = -1;
                return out;
            }
            if rc == 0 {
                continue;
            }
            let i = match a.socks.iter().position(|&s| s == fd) {
                Some(i) => i,
                None => continue,
            };
            out.rx_stat[i] += rc as u64;

            let mut off = 0usize;
            while off < rc as usize {
                let wr = unsafe {
                    send_f(
                        fd,
                        buf[off..].as_ptr() as *const c_void,
                        rc as usize - off,
                        0,
                    )
                };
                if wr < 0 {
                    ctx.fail(last_errno());
                    out.retval = -1;
                    return out;
                }
                off += wr as usize;
                out.tx_stat[i] += wr as u64;
            }
        }
    }
    out
}

/// Copies a socket into a file for at most `timeout` seconds. A peer
/// close or a fully silent wait ends the transfer earlier.
pub fn socket_to_file(ctx: &mut CallCtx, a: &SocketToFileIn) -> SsizeOut {
    let mut out = SsizeOut::default();
    let recv_f = match resolve_recv(ctx) {
        Some(f) => f,
        None => return out,
    };
    let mux = match Iomux::new(ctx, RpcIomux::Poll) {
        Some(m) => m,
        None => return out,
    };

    let path = match std::ffi::CString::new(a.path.as_str()) {
        Ok(p) => p,
        Err(_) => {
            ctx.fail(TarpcError::InvalidArgument("path contains NUL".to_owned()));
            out.retval = -1;
            return out;
        }
    };
    let file_fd = unsafe {
        libc::open(
            path.as_ptr(),
            libc::O_CREAT | libc::O_RDWR | libc::O_TRUNC,
            0o777,
        )
    };
    if file_fd < 0 {
        ctx.fail(last_errno());
        out.retval = -1;
        return out;
    }

    let mut buf = vec![0u8; 65536];
    let deadline = util::deadline_after(a.timeout);
    loop {
        let left = match util::time_until(deadline) {
            Some(tv) => tv,
            None => break,
        };
        let (rdy, _) = match mux.wait(&[a.sock], &[], util::timeval_to_ms(left)) {
            Ok(r) => r,
            Err(e) => {
                ctx.fail(e);
                out.retval = -1;
                break;
            }
        };
        if rdy.is_empty() {
            // Silence through the rest of the window ends the transfer.
            break;
        }
        let rc = unsafe { recv_f(a.sock, buf.as_mut_ptr() as *mut c_void, buf.len(), 0) };
        if rc < 0 {
            ctx.fail(last_errno());
            out.retval = -1;
            break;
        }
        if rc == 0 {
            break;
        }
        let wr = unsafe { libc::write(file_fd, buf.as_ptr() as *const c_void, rc as usize) };
        if wr != rc {
            ctx.fail(if wr < 0 {
                last_errno()
            } else {
                TarpcError::Corrupted(format!("short write to {} ({} of {})", a.path, wr, rc))
            });
            out.retval = -1;
            break;
        }
        out.retval += rc as i64;
    }
    unsafe { libc::close(file_fd) };
    out
}

/// Stuffs the socket's send path until it stays full: zero-filled 4 KiB
/// non-blocking sends, done once three consecutive passes make no
/// progress.
pub fn overfill_buffers(ctx: &mut CallCtx, a: &FdIn) -> BytesOut {
    let mut out = BytesOut::default();
    let send_f = match resolve_send(ctx) {
        Some(f) => f,
        None => return out,
    };

    let buf = [0u8; 4096];
    let mut idle_cycles = 0;
    while idle_cycles < 3 {
        let mut progressed = false;
        loop {
            let rc = unsafe {
                send_f(
                    a.fd,
                    buf.as_ptr() as *const c_void,
                    buf.len(),
                    libc::MSG_DONTWAIT,
                )
            };
            if rc < 0 {
                let e = unsafe { *libc::__errno_location() };
                if e == libc::EAGAIN || e == libc::EWOULDBLOCK {
                    break;
                }
                ctx.fail(TarpcError::Os(errno_h2rpc(e)));
                out.retval = -1;
                return out;
            }
            out.bytes += rc as u64;
            progressed = true;
        }
        if progressed {
            idle_cycles = 0;
        } else {
            idle_cycles += 1;
        }
        util::usleep(100_000);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CallCtx;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    fn pair() -> (UnixStream, UnixStream) {
        UnixStream::pair().unwrap()
    }

    #[test]
    fn sender_and_receiver_agree_on_byte_counts() {
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();
        let b_fd = b.as_raw_fd();

        let recv_thread = std::thread::spawn(move || {
            let mut c = CallCtx::new("");
            let arg = SimpleReceiverIn {
                sock: b_fd,
                time2run: 0,
                ..Default::default()
            };
            let out = simple_receiver(&mut c, &arg);
            drop(b);
            out
        });

        let mut c = CallCtx::new("");
        let arg = SimpleSenderIn {
            sock: a_fd,
            size_min: 16,
            size_max: 256,
            delay_min: 0,
            delay_max: 1000,
            time2run: 1,
            ..Default::default()
        };
        let sent = simple_sender(&mut c, &arg);
        assert_eq!(sent.retval, 0);
        assert!(sent.bytes > 0);
        drop(a);

        let rcvd = recv_thread.join().unwrap();
        assert_eq!(rcvd.retval, 0);
        assert_eq!(rcvd.bytes, sent.bytes);
    }

    #[test]
    fn echoer_bounces_what_it_reads() {
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();
        let b_fd = b.as_raw_fd();

        let echo_thread = std::thread::spawn(move || {
            let mut c = CallCtx::new("");
            let arg = EchoerIn {
                socks: vec![b_fd],
                time2run: 1,
                iomux: RpcIomux::Poll,
                ..Default::default()
            };
            let out = echoer(&mut c, &arg);
            drop(b);
            out
        });

        let msg = b"ping over the echo loop";
        let rc = unsafe { libc::send(a_fd, msg.as_ptr() as *const c_void, msg.len(), 0) };
        assert_eq!(rc, msg.len() as isize);
        let mut back = [0u8; 64];
        let rc = unsafe { libc::recv(a_fd, back.as_mut_ptr() as *mut c_void, back.len(), 0) };
        assert_eq!(rc, msg.len() as isize);
        assert_eq!(&back[..msg.len()], &msg[..]);

        let out = echo_thread.join().unwrap();
        assert_eq!(out.retval, 0);
        assert_eq!(out.rx_stat[0], msg.len() as u64);
        assert_eq!(out.tx_stat[0], msg.len() as u64);
    }

    #[test]
    fn overfill_fills_a_socketpair_buffer() {
        let (a, b) = pair();
        let mut c = CallCtx::new("");
        let arg = FdIn {
            fd: a.as_raw_fd(),
            ..Default::default()
        };
        let out = overfill_buffers(&mut c, &arg);
        assert_eq!(out.retval, 0);
        assert!(out.bytes > 0);
        drop(b);
    }

    #[test]
    fn socket_to_file_copies_until_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();

        let payload = vec![0xa5u8; 1500];
        let rc = unsafe { libc::send(a_fd, payload.as_ptr() as *const c_void, payload.len(), 0) };
        assert_eq!(rc, payload.len() as isize);
        drop(a);

        let mut c = CallCtx::new("");
        let arg = SocketToFileIn {
            sock: b.as_raw_fd(),
            path: path.to_string_lossy().into_owned(),
            timeout: 1,
            ..Default::default()
        };
        let out = socket_to_file(&mut c, &arg);
        assert_eq!(out.retval, payload.len() as i64);
        assert_eq!(std::fs::read(&path).unwrap(), payload);
    }

    #[test]
    fn socket_to_file_stops_at_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capped.bin");
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();

        // Streams well past the one second window.
        let writer = std::thread::spawn(move || {
            let chunk = [0x3cu8; 256];
            for _ in 0..40 {
                unsafe { libc::send(a_fd, chunk.as_ptr() as *const c_void, chunk.len(), 0) };
                std::thread::sleep(std::time::Duration::from_millis(50));
            }
            drop(a);
        });

        let started = std::time::Instant::now();
        let mut c = CallCtx::new("");
        let arg = SocketToFileIn {
            sock: b.as_raw_fd(),
            path: path.to_string_lossy().into_owned(),
            timeout: 1,
            ..Default::default()
        };
        let out = socket_to_file(&mut c, &arg);
        assert!(c.error().is_none());
        assert!(out.retval > 0);
        assert!(started.elapsed() < std::time::Duration::from_millis(1800));
        writer.join().unwrap();
    }

    #[test]
    fn flooder_drain_collects_late_bytes() {
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();

        // Data lands after the send window is already over.
        let feeder = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(300));
            let msg = [0x5au8; 512];
            let rc = unsafe { libc::send(a_fd, msg.as_ptr() as *const c_void, msg.len(), 0) };
            assert_eq!(rc, msg.len() as isize);
            a
        });

        let mut c = CallCtx::new("");
        let arg = FlooderIn {
            rcvrs: vec![b.as_raw_fd()],
            sndrs: Vec::new(),
            time2run: 0,
            time2wait: 2,
            iomux: RpcIomux::Poll,
            ..Default::default()
        };
        let out = flooder(&mut c, &arg);
        assert!(c.error().is_none());
        assert_eq!(out.retval, 0);
        assert_eq!(out.rx_stat[0], 512);
        let _a = feeder.join().unwrap();
    }

    #[test]
    fn echoer_drain_echoes_late_bytes() {
        let (a, b) = pair();
        let a_fd = a.as_raw_fd();
        let b_fd = b.as_raw_fd();

        let echo_thread = std::thread::spawn(move || {
            let mut c = CallCtx::new("");
            let arg = EchoerIn {
                socks: vec![b_fd],
                time2run: 1,
                time2wait: 2,
                iomux: RpcIomux::Poll,
                ..Default::default()
            };
            let out = echoer(&mut c, &arg);
            assert!(c.error().is_none());
            drop(b);
            out
        });

        // Arrives once the run window has closed; only the drain side
        // can still bounce it back.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let msg = b"late but still echoed";
        let rc = unsafe { libc::send(a_fd, msg.as_ptr() as *const c_void, msg.len(), 0) };
        assert_eq!(rc, msg.len() as isize);
        let mut back = [0u8; 64];
        let rc = unsafe { libc::recv(a_fd, back.as_mut_ptr() as *mut c_void, back.len(), 0) };
        assert_eq!(rc, msg.len() as isize);
        assert_eq!(&back[..msg.len()], &msg[..]);

        let out = echo_thread.join().unwrap();
        assert_eq!(out.retval, 0);
        assert_eq!(out.rx_stat[0], msg.len() as u64);
        assert_eq!(out.tx_stat[0], msg.len() as u64);
    }

    #[test]
    fn flooder_moves_bytes_both_ways() {
        let (a, b) = pair();
        let mut c = CallCtx::new("");
        let arg = FlooderIn {
            rcvrs: vec![b.as_raw_fd()],
            sndrs: vec![a.as_raw_fd()],
            bulkszs: 1024,
            time2run: 1,
            time2wait: 1,
            iomux: RpcIomux::Poll,
            rx_nonblock: true,
            ..Default::default()
        };
        let out = flooder(&mut c, &arg);
        assert_eq!(out.retval, 0);
        assert!(out.tx_stat[0] > 0);
        assert_eq!(out.rx_stat[0], out.tx_stat[0]);
    }
}
