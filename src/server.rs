//! RPC server lifecycle: the dispatch loop plus the three ways a peer
//! spawns a sibling server (thread, fork, fork+execve) and the
//! process-wide table the configuration plane lists.

use crate::dispatch;
use crate::errors::{errno_h2rpc, TarpcError, TarpcResult};
use crate::handle_registry::{self, Handle, HandleObj};
use crate::log::{LogError, LogRing, LogWarn};
use crate::symbols;
use crate::transport::{JsonTransport, RpcTransport};
use std::collections::HashMap;
use std::ffi::CString;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub enum ServerKind {
    /// Thread id handle in the registry.
    Thread(Handle),
    Process { pid: libc::pid_t },
}

lazy_static! {
    static ref SERVERS: Mutex<HashMap<String, ServerKind>> = Mutex::new(HashMap::new());
    /// Per-name wind-down flags of the threaded listeners.
    static ref STOPS: Mutex<HashMap<String, Arc<AtomicBool>>> = Mutex::new(HashMap::new());
}

fn stop_flag(name: &str) -> Arc<AtomicBool> {
    STOPS
        .lock()
        .unwrap()
        .entry(name.to_owned())
        .or_default()
        .clone()
}

/// Asks the listener serving `name` to wind down. The empty connection
/// unblocks its accept so the flag is seen right away.
fn request_stop(name: &str) {
    stop_flag(name).store(true, Ordering::SeqCst);
    let _ = UnixStream::connect(socket_path(name));
}

/// Rendezvous path of a named server's listener.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("tarpcs_{}.sock", name))
}

/// Serves one connection until the peer hangs up. Transport failures
/// end the session; a failed RPC only ends the request.
pub fn run(name: &str, transport: &mut dyn RpcTransport) -> TarpcResult<()> {
    log!(LogRing, "me {} (pid {})", name, std::process::id());
    loop {
        let req = match transport.recv_request() {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(()),
            Err(e) => {
                log!(LogError, "transport receive failed on {}: {}", name, e);
                return Err(e);
            }
        };
        let resp = dispatch::serve_request(req);
        transport.send_response(&resp)?;
        crate::plugin::maybe_action();
    }
}

/// Binds the listener for `name` and serves connections one at a time.
/// Returns once the wind-down flag is raised or the listener dies.
pub fn serve_listener(name: &str) -> TarpcResult<()> {
    let path = socket_path(name);
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path).map_err(|e| {
        log!(LogError, "cannot bind {}: {}", path.display(), e);
        TarpcError::Os(errno_h2rpc(e.raw_os_error().unwrap_or(libc::EIO)))
    })?;
    crate::log::logfork_register_user(name);
    // The flag may already be raised when the wind-down request raced
    // the bind, so it is checked again before every accept.
    let stop = stop_flag(name);
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                if stop.load(Ordering::SeqCst) {
                    break;
                }
                let mut t = JsonTransport::new(stream);
                if let Err(e) = run(name, &mut t) {
                    log!(LogWarn, "session on {} ended with {}", name, e);
                }
            }
            Err(e) => {
                log!(LogError, "accept failed on {}: {}", name, e);
                break;
            }
        }
    }
    STOPS.lock().unwrap().remove(name);
    let _ = std::fs::remove_file(&path);
    Ok(())
}

/// thread_create: a sibling server in this process.
pub fn spawn_thread(name: &str) -> TarpcResult<Handle> {
    {
        let servers = SERVERS.lock().unwrap();
        if servers.contains_key(name) {
            return Err(TarpcError::AlreadyExists(name.to_owned()));
        }
    }
    let thread_name = name.to_owned();
    let join = std::thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            if let Err(e) = serve_listener(&thread_name) {
                log!(LogError, "server thread {} failed: {}", thread_name, e);
            }
        })
        .map_err(|e| TarpcError::Os(errno_h2rpc(e.raw_os_error().unwrap_or(libc::EAGAIN))))?;
    let tid = handle_registry::alloc(HandleObj::ServerThread(join));
    SERVERS
        .lock()
        .unwrap()
        .insert(name.to_owned(), ServerKind::Thread(tid));
    Ok(tid)
}

/// Arguments of the re-exec image: the override library travels as a
/// literal "(NULL)" when none is set.
fn reexec_argv(name: &str) -> TarpcResult<Vec<CString>> {
    let exe = std::env::current_exe()
        .map_err(|e| TarpcError::Os(errno_h2rpc(e.raw_os_error().unwrap_or(libc::ENOENT))))?;
    let lib = symbols::override_name().filter(|n| !n.is_empty());
    let logfd = crate::log::logfork_fd().unwrap_or(-1);
    let argv = vec![
        exe.to_string_lossy().into_owned(),
        "rpcserver".to_owned(),
        name.to_owned(),
        format!("{}", logfd),
        lib.unwrap_or_else(|| "(NULL)".to_owned()),
    ];
    argv.into_iter()
        .map(|a| CString::new(a).map_err(|_| TarpcError::InvalidArgument("argv NUL".to_owned())))
        .collect()
}

/// create_process: fork, optionally re-exec. The parent gets the pid.
pub fn spawn_process(name: &str, exec: bool) -> TarpcResult<libc::pid_t> {
    let argv = reexec_argv(name)?;
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(TarpcError::Os(errno_h2rpc(unsafe {
            *libc::__errno_location()
        })));
    }
    if pid == 0 {
        if exec {
            exec_image(&argv);
        } else if serve_listener(name).is_err() {
            std::process::exit(1);
        }
        std::process::exit(0);
    }
    SERVERS
        .lock()
        .unwrap()
        .insert(name.to_owned(), ServerKind::Process { pid });
    Ok(pid)
}

fn exec_image(argv: &[CString]) -> ! {
    let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|a| a.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    unsafe {
        libc::execv(ptrs[0], ptrs.as_ptr());
    }
    // Only reached when execv failed.
    std::process::exit(1);
}

/// execve RPC: replace this whole process with a fresh image serving
/// under `name`. The delay leaves the transport time to flush the
/// answer of the CALL that initiated this.
pub fn reexec_self(name: &str) -> TarpcResult<()> {
    let argv = reexec_argv(name)?;
    std::thread::sleep(std::time::Duration::from_secs(1));
    exec_image(&argv);
}

/// Entry point of the `rpcserver` argv form.
pub fn reexec_entry(name: &str, logfd: i32, libname: &str) -> TarpcResult<()> {
    if logfd >= 0 {
        crate::log::logfork_attach_fd(logfd);
    }
    if libname != "(NULL)" && !libname.is_empty() {
        symbols::setlibname(libname)?;
    }
    serve_listener(name)
}

pub fn list() -> Vec<String> {
    let servers = SERVERS.lock().unwrap();
    let mut names: Vec<String> = servers.keys().cloned().collect();
    names.sort();
    names
}

/// thread_cancel: winds down the threaded server owning `tid`. The
/// registry entry stays behind so a later join can reap the thread.
pub fn cancel_thread(tid: Handle) -> TarpcResult<()> {
    let name = {
        let mut servers = SERVERS.lock().unwrap();
        let name = servers.iter().find_map(|(n, k)| match k {
            ServerKind::Thread(t) if *t == tid => Some(n.clone()),
            _ => None,
        });
        match name {
            Some(n) => {
                servers.remove(&n);
                n
            }
            None => {
                return Err(TarpcError::NotFound(format!("thread handle {:#x}", tid)));
            }
        }
    };
    request_stop(&name);
    Ok(())
}

/// Destroy a named server: kill the process or wind down and reap the
/// thread. The listener path is unlinked either way.
pub fn destroy(name: &str) -> TarpcResult<()> {
    let kind = SERVERS
        .lock()
        .unwrap()
        .remove(name)
        .ok_or_else(|| TarpcError::NotFound(name.to_owned()))?;
    match kind {
        ServerKind::Process { pid } => unsafe {
            libc::kill(pid, libc::SIGTERM);
            libc::waitpid(pid, std::ptr::null_mut(), 0);
        },
        ServerKind::Thread(tid) => {
            request_stop(name);
            match handle_registry::take_server_thread(tid) {
                Some(join) => {
                    let _ = join.join();
                }
                None => handle_registry::free(tid),
            }
        }
    }
    let _ = std::fs::remove_file(socket_path(name));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tarpc::{Request, Response, VoidIn};

    #[test]
    fn dispatch_loop_answers_until_hangup() {
        let (mut server, mut peer) = crate::transport::loopback().unwrap();
        let worker = std::thread::spawn(move || run("test_loop", &mut server));

        for _ in 0..3 {
            match peer.call(&Request::Getpid(VoidIn::default())).unwrap() {
                Response::Getpid(out) => assert_eq!(out.retval, std::process::id() as i32),
                other => panic!("unexpected {:?}", other),
            }
        }
        drop(peer);
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn named_listener_round_trip() {
        let name = format!("ut_{}", std::process::id());
        let tid = spawn_thread(&name).unwrap();
        assert_ne!(tid, 0);
        assert!(list().contains(&name));

        // The listener needs a moment to bind.
        let path = socket_path(&name);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        let stream = loop {
            match std::os::unix::net::UnixStream::connect(&path) {
                Ok(s) => break s,
                Err(_) if std::time::Instant::now() < deadline => {
                    std::thread::sleep(std::time::Duration::from_millis(20))
                }
                Err(e) => panic!("cannot reach {}: {}", path.display(), e),
            }
        };
        let mut peer = JsonTransport::new(stream);
        match peer.call(&Request::Getpid(VoidIn::default())).unwrap() {
            Response::Getpid(out) => assert_eq!(out.retval, std::process::id() as i32),
            other => panic!("unexpected {:?}", other),
        }
        drop(peer);
        destroy(&name).unwrap();
        assert!(!list().contains(&name));
    }
}
