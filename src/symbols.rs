use crate::errors::{TarpcError, TarpcResult};
use crate::log::{LogError, LogRing, LogWarn};
use std::collections::HashMap;
use std::env;
use std::ffi::{CStr, CString};
use std::sync::Mutex;

/// Environment variable carrying the override-library name across execve.
pub const TARPC_DL_NAME: &str = "TARPC_DL_NAME";

/// Symbol the coverage profiler exports from an instrumented library.
const TCE_INITIALIZER: &str = "__bb_init_connection";

struct OverrideLib {
    name: String,
    /// dlopen handle; null when setlibname("") ran on a static build.
    handle: usize,
}

struct TceState {
    conn: Option<String>,
    peer_pid: i32,
}

lazy_static! {
    static ref OVERRIDE: Mutex<Option<OverrideLib>> = Mutex::new(None);
    static ref STATIC_SYMBOLS: Mutex<HashMap<String, usize>> = Mutex::new(HashMap::new());
    static ref TCE: Mutex<TceState> = Mutex::new(TceState {
        conn: None,
        peer_pid: 0,
    });
}

/// Register a statically linked test hook so that it is resolvable by
/// name even without dlsym.
pub fn register_static_symbol(name: &str, addr: usize) {
    let mut t = STATIC_SYMBOLS.lock().unwrap();
    t.insert(name.to_owned(), addr);
}

pub fn static_symbol_addr(name: &str) -> Option<usize> {
    let t = STATIC_SYMBOLS.lock().unwrap();
    t.get(name).copied()
}

pub fn static_symbol_name(addr: usize) -> Option<String> {
    let t = STATIC_SYMBOLS.lock().unwrap();
    t.iter()
        .find(|(_, a)| **a == addr)
        .map(|(n, _)| n.to_owned())
}

/// Record the coverage-collector connection used when an instrumented
/// override library is set later.
pub fn tce_init_connect(conn: &str, peer_pid: i32) {
    let mut t = TCE.lock().unwrap();
    t.conn = Some(conn.to_owned());
    t.peer_pid = peer_pid;
}

fn dlopen_lazy(name: Option<&str>) -> usize {
    let cname = name.map(|n| CString::new(n).unwrap());
    let ptr = cname
        .as_ref()
        .map(|c| c.as_ptr())
        .unwrap_or(std::ptr::null());
    unsafe { libc::dlopen(ptr, libc::RTLD_LAZY) as usize }
}

fn dlsym_in(handle: usize, name: &str) -> usize {
    let cname = CString::new(name).unwrap();
    unsafe { libc::dlsym(handle as *mut libc::c_void, cname.as_ptr()) as usize }
}

fn dlerror_string() -> String {
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        "unknown dlopen failure".to_owned()
    } else {
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// Default-object handle (dlopen(NULL)), opened lazily and cached.
/// Zero once the open has failed; the static table is the fallback then.
fn default_object() -> usize {
    lazy_static! {
        static ref DEFAULT_OBJ: usize = dlopen_lazy(None);
    }
    *DEFAULT_OBJ
}

/// Set the dynamic library whose symbols shadow libc for resolution.
/// Re-setting with the same name succeeds silently; a different name
/// fails. An empty name marks the override "applied" without a library
/// (the static-build case).
pub fn setlibname(libname: &str) -> TarpcResult<()> {
    let mut ovr = OVERRIDE.lock().unwrap();

    if let Some(cur) = ovr.as_ref() {
        if cur.name == libname {
            return Ok(());
        }
        log!(
            LogError,
            "Dynamic library has already been set to '{}'",
            cur.name
        );
        return Err(TarpcError::AlreadyExists(cur.name.clone()));
    }

    let handle = dlopen_lazy(if libname.is_empty() { None } else { Some(libname) });
    if handle == 0 {
        if libname.is_empty() {
            *ovr = Some(OverrideLib {
                name: String::new(),
                handle: 0,
            });
            return Ok(());
        }
        log!(
            LogError,
            "Cannot load shared library '{}': {}",
            libname,
            dlerror_string()
        );
        return Err(TarpcError::NotFound(libname.to_owned()));
    }

    // Mirror the name so an execve-spawned server re-applies the override.
    env::set_var(TARPC_DL_NAME, libname);
    *ovr = Some(OverrideLib {
        name: libname.to_owned(),
        handle,
    });
    log!(LogRing, "Dynamic library is set to '{}'", libname);

    // Hand the library over to the coverage profiler when instrumented.
    let tce_init = dlsym_in(handle, TCE_INITIALIZER);
    if tce_init != 0 {
        let t = TCE.lock().unwrap();
        match &t.conn {
            None => log!(LogWarn, "tce_init_connect() has not been called"),
            Some(conn) => {
                let cconn = CString::new(conn.as_str()).unwrap();
                let f: unsafe extern "C" fn(*const libc::c_char, libc::c_int) =
                    unsafe { std::mem::transmute(tce_init) };
                unsafe { f(cconn.as_ptr(), t.peer_pid) };
                log!(LogRing, "TCE initialized for dynamic library '{}'", libname);
            }
        }
    }

    Ok(())
}

/// Whether setlibname() has been applied (possibly with an empty name).
pub fn dynamic_library_loaded() -> bool {
    OVERRIDE.lock().unwrap().is_some()
}

fn override_handle() -> Option<usize> {
    OVERRIDE.lock().unwrap().as_ref().map(|o| o.handle)
}

pub fn override_name() -> Option<String> {
    OVERRIDE.lock().unwrap().as_ref().map(|o| o.name.clone())
}

/// Locate a named call for a wrapper. The hint selects libc, an
/// explicitly named library (opened and closed around the lookup), or
/// the registered override; the static table is the last resort.
pub fn find_func(lib_hint: &str, name: &str) -> TarpcResult<usize> {
    // The dispatcher logs through getpid on every request.
    if name == "getpid" {
        return Ok(libc::getpid as usize);
    }

    // First resolution applies the override recorded across execve.
    if !dynamic_library_loaded() {
        let env_name = env::var(TARPC_DL_NAME).unwrap_or_default();
        setlibname(&env_name)?;
    }

    let mut addr = 0usize;

    if lib_hint == "libc" || (lib_hint.is_empty() && override_handle() == Some(0)) {
        let handle = default_object();
        if handle != 0 {
            addr = dlsym_in(handle, name);
        }
    } else if !lib_hint.is_empty() {
        let handle = dlopen_lazy(Some(lib_hint));
        if handle != 0 {
            addr = dlsym_in(handle, name);
            unsafe { libc::dlclose(handle as *mut libc::c_void) };
        }
    } else if let Some(handle) = override_handle() {
        if handle != 0 {
            addr = dlsym_in(handle, name);
        }
    }

    if addr == 0 {
        addr = static_symbol_addr(name).unwrap_or(0);
    }
    if addr == 0 {
        log!(LogError, "Cannot resolve symbol {}", name);
        return Err(TarpcError::NotFound(name.to_owned()));
    }
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_libc_symbols() {
        let close_addr = find_func("libc", "close").unwrap();
        assert_ne!(close_addr, 0);
        // getpid takes the fast path and always resolves.
        assert_eq!(find_func("", "getpid").unwrap(), libc::getpid as usize);
    }

    #[test]
    fn unknown_symbol_is_not_found() {
        match find_func("libc", "tarpcs_no_such_symbol_") {
            Err(TarpcError::NotFound(name)) => assert_eq!(name, "tarpcs_no_such_symbol_"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn static_table_fallback() {
        extern "C" fn hook() {}
        register_static_symbol("tarpcs_test_hook", hook as usize);
        assert_eq!(find_func("", "tarpcs_test_hook").unwrap(), hook as usize);
        assert_eq!(
            static_symbol_name(hook as usize).as_deref(),
            Some("tarpcs_test_hook")
        );
    }

    #[test]
    fn setlibname_lifecycle() {
        // An empty name applies the override without loading anything.
        setlibname("").unwrap();
        assert!(dynamic_library_loaded());
        setlibname("").unwrap();
        match setlibname("./some_other.so") {
            Err(TarpcError::AlreadyExists(prev)) => assert_eq!(prev, ""),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
