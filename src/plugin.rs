//! RPC server plugin: three callbacks resolved by name, driven from
//! the dispatch loop of the thread that enabled them.

use crate::errors::{TarpcError, TarpcResult};
use crate::log::LogError;
use crate::symbols;
use libc::{c_int, c_void};
use std::cell::RefCell;

type InstallFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;
type ActionFn = unsafe extern "C" fn(*mut c_void) -> c_int;
type UninstallFn = unsafe extern "C" fn(*mut *mut c_void) -> c_int;

#[derive(Default)]
struct PluginState {
    enable: bool,
    installed: bool,
    pid: i32,
    context: usize,
    install: usize,
    action: usize,
    uninstall: usize,
}

thread_local! {
    static PLUGIN: RefCell<PluginState> = RefCell::new(PluginState::default());
}

fn resolve_callback(what: &str, name: &str) -> TarpcResult<usize> {
    if name.is_empty() {
        return Ok(0);
    }
    symbols::find_func("", name).map_err(|_| {
        log!(
            LogError,
            "Cannot find the {} callback \"{}\" for plugin",
            what,
            name
        );
        TarpcError::NotFound(name.to_owned())
    })
}

/// Enable the plugin on the calling server thread. Replaces any plugin
/// already enabled there; installation is deferred to the dispatch
/// loop when an install callback exists.
pub fn enable(install: &str, action: &str, uninstall: &str) -> TarpcResult<()> {
    disable()?;

    let install = resolve_callback("install", install)?;
    let action = resolve_callback("action", action)?;
    let uninstall = resolve_callback("uninstall", uninstall)?;
    if install == 0 && action == 0 && uninstall == 0 {
        log!(LogError, "The plugin must have at least one callback");
        return Err(TarpcError::InvalidArgument(
            "plugin without callbacks".to_owned(),
        ));
    }

    PLUGIN.with(|p| {
        let mut p = p.borrow_mut();
        p.enable = true;
        p.installed = install == 0;
        p.pid = unsafe { libc::getpid() };
        p.context = 0;
        p.install = install;
        p.action = action;
        p.uninstall = uninstall;
    });
    Ok(())
}

/// Disable and uninstall. The uninstall callback's status is the
/// result; disabling a disabled plugin succeeds.
pub fn disable() -> TarpcResult<()> {
    PLUGIN.with(|p| {
        let mut p = p.borrow_mut();
        let mut rc = 0;
        if p.enable && p.installed && p.uninstall != 0 {
            let f: UninstallFn = unsafe { std::mem::transmute(p.uninstall) };
            rc = unsafe { f(&mut p.context as *mut usize as *mut *mut c_void) };
        }
        *p = PluginState::default();
        if rc != 0 {
            Err(TarpcError::Os(crate::errors::errno_h2rpc(rc)))
        } else {
            Ok(())
        }
    })
}

/// Called by the dispatch loop between requests. Install on first
/// opportunity, then run the action; a failing callback disables the
/// plugin rather than the server.
pub fn maybe_action() {
    PLUGIN.with(|p| {
        let mut p = p.borrow_mut();
        if !p.enable {
            return;
        }
        let pid = unsafe { libc::getpid() };
        if p.pid != pid {
            // A fork carried the enabled state into a new process.
            log!(
                LogError,
                "RPC server plugin disabled (unexpected pid {}, expected {})",
                pid,
                p.pid
            );
            p.enable = false;
            return;
        }

        if !p.installed {
            let f: InstallFn = unsafe { std::mem::transmute(p.install) };
            let rc = unsafe { f(&mut p.context as *mut usize as *mut *mut c_void) };
            if rc != 0 {
                log!(LogError, "Failed to install RPC server plugin: {}", rc);
                p.enable = false;
                return;
            }
            p.installed = true;
        }

        if p.action == 0 {
            return;
        }
        let f: ActionFn = unsafe { std::mem::transmute(p.action) };
        let rc = unsafe { f(p.context as *mut c_void) };
        if rc != 0 {
            log!(
                LogError,
                "RPC server plugin disabled (action failed with code {})",
                rc
            );
            p.enable = false;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    static INSTALLS: AtomicI32 = AtomicI32::new(0);
    static ACTIONS: AtomicI32 = AtomicI32::new(0);
    static UNINSTALLS: AtomicI32 = AtomicI32::new(0);

    unsafe extern "C" fn test_install(ctx: *mut *mut c_void) -> c_int {
        *ctx = 0x51 as *mut c_void;
        INSTALLS.fetch_add(1, Ordering::SeqCst);
        0
    }

    unsafe extern "C" fn test_action(ctx: *mut c_void) -> c_int {
        assert_eq!(ctx as usize, 0x51);
        ACTIONS.fetch_add(1, Ordering::SeqCst);
        0
    }

    unsafe extern "C" fn test_uninstall(_ctx: *mut *mut c_void) -> c_int {
        UNINSTALLS.fetch_add(1, Ordering::SeqCst);
        0
    }

    #[test]
    fn install_runs_once_then_actions() {
        symbols::register_static_symbol("ut_plugin_install", test_install as usize);
        symbols::register_static_symbol("ut_plugin_action", test_action as usize);
        symbols::register_static_symbol("ut_plugin_uninstall", test_uninstall as usize);

        enable("ut_plugin_install", "ut_plugin_action", "ut_plugin_uninstall").unwrap();
        maybe_action();
        maybe_action();
        assert_eq!(INSTALLS.load(Ordering::SeqCst), 1);
        assert_eq!(ACTIONS.load(Ordering::SeqCst), 2);

        disable().unwrap();
        assert_eq!(UNINSTALLS.load(Ordering::SeqCst), 1);
        // Disabled means idle.
        maybe_action();
        assert_eq!(ACTIONS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unknown_callback_is_rejected() {
        match enable("ut_plugin_no_such", "", "") {
            Err(TarpcError::NotFound(name)) => assert_eq!(name, "ut_plugin_no_such"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn empty_plugin_is_rejected() {
        match enable("", "", "") {
            Err(TarpcError::InvalidArgument(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
