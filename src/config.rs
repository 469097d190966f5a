//! Control-plane collections. Two trees hang off the agent:
//! `/agent/rpcserver` names the live servers and `/agent/rpcserver_plugin`
//! holds per-plugin callback names whose `enable` field is pushed to the
//! servers as dedicated RPCs.

use crate::errors::{TarpcError, TarpcResult};
use crate::log::LogInfo;
use crate::server;
use crate::tarpc::{PluginEnableIn, Request, Response, VoidIn};
use crate::transport::JsonTransport;
use std::collections::HashMap;
use std::os::unix::net::UnixStream;
use std::sync::Mutex;

/// How `/agent/rpcserver` create values map to spawn flavours.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerMode {
    Thread,
    Fork,
    ForkExec,
}

impl ServerMode {
    pub fn parse(value: &str) -> TarpcResult<ServerMode> {
        match value {
            "thread" => Ok(ServerMode::Thread),
            "" | "fork" => Ok(ServerMode::Fork),
            "exec" => Ok(ServerMode::ForkExec),
            other => Err(TarpcError::InvalidArgument(format!(
                "unknown rpcserver mode \"{}\"",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct PluginConf {
    install: String,
    action: String,
    uninstall: String,
    enable: bool,
}

lazy_static! {
    static ref PLUGINS: Mutex<HashMap<String, PluginConf>> = Mutex::new(HashMap::new());
    static ref PARENTS: Mutex<HashMap<String, String>> = Mutex::new(HashMap::new());
}

// /agent/rpcserver

pub fn rpcserver_add(name: &str, value: &str) -> TarpcResult<()> {
    match ServerMode::parse(value)? {
        ServerMode::Thread => {
            server::spawn_thread(name)?;
        }
        ServerMode::Fork => {
            server::spawn_process(name, false)?;
        }
        ServerMode::ForkExec => {
            server::spawn_process(name, true)?;
        }
    }
    log!(LogInfo, "rpcserver {} created ({})", name, value);
    Ok(())
}

pub fn rpcserver_del(name: &str) -> TarpcResult<()> {
    server::destroy(name)?;
    PARENTS.lock().unwrap().remove(name);
    Ok(())
}

pub fn rpcserver_list() -> Vec<String> {
    server::list()
}

/// Parent link of a server, recorded for state inheritance at create
/// time. Both ends must name live servers.
pub fn rpcserver_set_parent(name: &str, parent: &str) -> TarpcResult<()> {
    let live = server::list();
    if !live.iter().any(|s| s == name) {
        return Err(TarpcError::NotFound(name.to_owned()));
    }
    if !parent.is_empty() && !live.iter().any(|s| s == parent) {
        return Err(TarpcError::NotFound(parent.to_owned()));
    }
    let mut t = PARENTS.lock().unwrap();
    if parent.is_empty() {
        t.remove(name);
    } else {
        t.insert(name.to_owned(), parent.to_owned());
    }
    Ok(())
}

pub fn rpcserver_get_parent(name: &str) -> String {
    PARENTS.lock().unwrap().get(name).cloned().unwrap_or_default()
}

// /agent/rpcserver_plugin

pub fn plugin_add(name: &str) -> TarpcResult<()> {
    let mut t = PLUGINS.lock().unwrap();
    if t.contains_key(name) {
        return Err(TarpcError::AlreadyExists(name.to_owned()));
    }
    t.insert(name.to_owned(), PluginConf::default());
    Ok(())
}

pub fn plugin_del(name: &str) -> TarpcResult<()> {
    let conf = {
        let mut t = PLUGINS.lock().unwrap();
        t.remove(name)
            .ok_or_else(|| TarpcError::NotFound(name.to_owned()))?
    };
    if conf.enable {
        broadcast(false, &conf)?;
    }
    Ok(())
}

pub fn plugin_list() -> Vec<String> {
    let t = PLUGINS.lock().unwrap();
    let mut names: Vec<String> = t.keys().cloned().collect();
    names.sort();
    names
}

pub fn plugin_get(name: &str, field: &str) -> TarpcResult<String> {
    let t = PLUGINS.lock().unwrap();
    let conf = t
        .get(name)
        .ok_or_else(|| TarpcError::NotFound(name.to_owned()))?;
    match field {
        "install" => Ok(conf.install.clone()),
        "action" => Ok(conf.action.clone()),
        "uninstall" => Ok(conf.uninstall.clone()),
        "enable" => Ok(if conf.enable { "1" } else { "0" }.to_owned()),
        other => Err(TarpcError::NotFound(format!("field {}", other))),
    }
}

/// Callback fields only take effect at the next enable toggle; the
/// `enable` field pushes the change to every live server right away.
pub fn plugin_set(name: &str, field: &str, value: &str) -> TarpcResult<()> {
    let (toggled, conf) = {
        let mut t = PLUGINS.lock().unwrap();
        let conf = t
            .get_mut(name)
            .ok_or_else(|| TarpcError::NotFound(name.to_owned()))?;
        let mut toggled = None;
        match field {
            "install" => conf.install = value.to_owned(),
            "action" => conf.action = value.to_owned(),
            "uninstall" => conf.uninstall = value.to_owned(),
            "enable" => {
                let want = match value {
                    "1" | "true" => true,
                    "0" | "false" => false,
                    other => {
                        return Err(TarpcError::InvalidArgument(format!(
                            "enable takes 0 or 1, not \"{}\"",
                            other
                        )))
                    }
                };
                if want != conf.enable {
                    conf.enable = want;
                    toggled = Some(want);
                }
            }
            other => return Err(TarpcError::NotFound(format!("field {}", other))),
        }
        (toggled, conf.clone())
    };
    if let Some(on) = toggled {
        broadcast(on, &conf)?;
    }
    Ok(())
}

/// Issues the plugin enable/disable RPC against every live server.
fn broadcast(on: bool, conf: &PluginConf) -> TarpcResult<()> {
    for srv in server::list() {
        let stream = UnixStream::connect(server::socket_path(&srv)).map_err(|e| {
            TarpcError::Os(crate::errors::errno_h2rpc(
                e.raw_os_error().unwrap_or(libc::EIO),
            ))
        })?;
        let mut t = JsonTransport::new(stream);
        let req = if on {
            Request::PluginEnable(PluginEnableIn {
                install: conf.install.clone(),
                action: conf.action.clone(),
                uninstall: conf.uninstall.clone(),
                ..Default::default()
            })
        } else {
            Request::PluginDisable(VoidIn::default())
        };
        match t.call(&req)? {
            Response::PluginEnable(out) if out.retval != 0 => {
                return Err(TarpcError::Os(out.common.errno));
            }
            Response::PluginDisable(out) if out.retval != 0 => {
                return Err(TarpcError::Os(out.common.errno));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_fields_hold_what_was_set() {
        plugin_add("cfg_ut").unwrap();
        plugin_set("cfg_ut", "install", "my_install").unwrap();
        plugin_set("cfg_ut", "action", "my_action").unwrap();
        assert_eq!(plugin_get("cfg_ut", "install").unwrap(), "my_install");
        assert_eq!(plugin_get("cfg_ut", "action").unwrap(), "my_action");
        assert_eq!(plugin_get("cfg_ut", "uninstall").unwrap(), "");
        assert_eq!(plugin_get("cfg_ut", "enable").unwrap(), "0");
        plugin_del("cfg_ut").unwrap();
        assert!(plugin_get("cfg_ut", "install").is_err());
    }

    #[test]
    fn duplicate_plugin_names_are_rejected() {
        plugin_add("cfg_dup").unwrap();
        match plugin_add("cfg_dup") {
            Err(TarpcError::AlreadyExists(n)) => assert_eq!(n, "cfg_dup"),
            other => panic!("unexpected {:?}", other),
        }
        plugin_del("cfg_dup").unwrap();
    }

    #[test]
    fn parent_links_need_live_servers() {
        match rpcserver_set_parent("no_such_server", "") {
            Err(TarpcError::NotFound(n)) => assert_eq!(n, "no_such_server"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(rpcserver_get_parent("no_such_server"), "");
    }

    #[test]
    fn unknown_server_mode_is_rejected() {
        assert!(ServerMode::parse("coroutine").is_err());
        assert_eq!(ServerMode::parse("").unwrap(), ServerMode::Fork);
        assert_eq!(ServerMode::parse("thread").unwrap(), ServerMode::Thread);
    }
}
