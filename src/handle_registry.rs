use crate::symbols;
use crate::tarpc::Response;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Opaque identifier crossing the wire as u32. Zero denotes "none".
pub type Handle = u32;

/// `addrinfo` chains are owned by libc; freeing goes through
/// `freeaddrinfo`, never the Rust allocator.
pub struct AddrInfoPtr(pub *mut libc::addrinfo);
unsafe impl Send for AddrInfoPtr {}

impl Drop for AddrInfoPtr {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

/// An AIO control block together with the buffer it reads into or
/// writes from. Kept boxed so the kernel-visible `aiocb` address stays
/// stable for the lifetime of the registry entry.
pub struct AioCb {
    pub cb: libc::aiocb,
    pub buf: Vec<u8>,
}
unsafe impl Send for AioCb {}

/// Everything a peer may hold an opaque handle to.
pub enum HandleObj {
    FdSet(Box<libc::fd_set>),
    SigSet(Box<libc::sigset_t>),
    Aiocb(Box<AioCb>),
    AddrInfo(AddrInfoPtr),
    /// Resolved function address registered through handler2name()
    Func(usize),
    /// Worker thread of a deferred (CALL-mode) RPC
    Worker(JoinHandle<Response>),
    /// RPC server thread created by thread_create
    ServerThread(JoinHandle<()>),
    /// Completion flag of a deferred RPC
    DoneFlag(Arc<AtomicBool>),
    /// Address of a static object (e.g. the received-signals set)
    Ptr(usize),
}

struct HandleTable {
    next_id: Handle,
    entries: HashMap<Handle, HandleObj>,
}

lazy_static! {
    static ref TABLE: Mutex<HandleTable> = Mutex::new(HandleTable {
        next_id: 1,
        entries: HashMap::new(),
    });
}

impl HandleObj {
    /// The stable address this entry exposes, for reverse lookups.
    fn addr(&self) -> Option<usize> {
        match self {
            HandleObj::FdSet(b) => Some(&**b as *const libc::fd_set as usize),
            HandleObj::SigSet(b) => Some(&**b as *const libc::sigset_t as usize),
            HandleObj::Aiocb(b) => Some(&b.cb as *const libc::aiocb as usize),
            HandleObj::AddrInfo(p) => Some(p.0 as usize),
            HandleObj::Func(a) | HandleObj::Ptr(a) => Some(*a),
            HandleObj::Worker(_) | HandleObj::ServerThread(_) | HandleObj::DoneFlag(_) => None,
        }
    }
}

/// Register an object and return its id. If an entry already exposes
/// the same address, the existing id is returned and `obj` dropped.
pub fn alloc(obj: HandleObj) -> Handle {
    let mut t = TABLE.lock().unwrap();
    if let Some(addr) = obj.addr() {
        if let Some(id) = find_by_addr(&t, addr) {
            return id;
        }
    }
    let id = t.next_id;
    t.next_id += 1;
    t.entries.insert(id, obj);
    id
}

fn find_by_addr(t: &HandleTable, addr: usize) -> Option<Handle> {
    t.entries
        .iter()
        .find(|(_, o)| o.addr() == Some(addr))
        .map(|(id, _)| *id)
}

/// Reverse lookup: id of a registered address, or 0.
pub fn get_id(addr: usize) -> Handle {
    let t = TABLE.lock().unwrap();
    find_by_addr(&t, addr).unwrap_or(0)
}

/// Remove an entry. Freeing an unknown id is a successful no-op.
pub fn free(id: Handle) {
    let mut t = TABLE.lock().unwrap();
    t.entries.remove(&id);
}

/// Remove and return an entry, transferring ownership to the caller.
pub fn take(id: Handle) -> Option<HandleObj> {
    let mut t = TABLE.lock().unwrap();
    t.entries.remove(&id)
}

/// Raw pointer to a registered fd_set. The pointer stays valid until
/// free(id): the set is boxed and the box is never moved.
pub fn fd_set_ptr(id: Handle) -> Option<*mut libc::fd_set> {
    let mut t = TABLE.lock().unwrap();
    match t.entries.get_mut(&id) {
        Some(HandleObj::FdSet(b)) => Some(&mut **b as *mut libc::fd_set),
        _ => None,
    }
}

/// Raw pointer to a registered sigset. Ptr entries are accepted too:
/// the received-signals set is registered by address.
pub fn sigset_ptr(id: Handle) -> Option<*mut libc::sigset_t> {
    let mut t = TABLE.lock().unwrap();
    match t.entries.get_mut(&id) {
        Some(HandleObj::SigSet(b)) => Some(&mut **b as *mut libc::sigset_t),
        Some(HandleObj::Ptr(a)) => Some(*a as *mut libc::sigset_t),
        _ => None,
    }
}

pub fn aiocb_ptr(id: Handle) -> Option<*mut libc::aiocb> {
    let mut t = TABLE.lock().unwrap();
    match t.entries.get_mut(&id) {
        Some(HandleObj::Aiocb(b)) => Some(&mut b.cb as *mut libc::aiocb),
        _ => None,
    }
}

pub fn with_aiocb<R>(id: Handle, f: impl FnOnce(&mut AioCb) -> R) -> Option<R> {
    let mut t = TABLE.lock().unwrap();
    match t.entries.get_mut(&id) {
        Some(HandleObj::Aiocb(b)) => Some(f(b)),
        _ => None,
    }
}

pub fn addrinfo_ptr(id: Handle) -> Option<*mut libc::addrinfo> {
    let t = TABLE.lock().unwrap();
    match t.entries.get(&id) {
        Some(HandleObj::AddrInfo(p)) => Some(p.0),
        _ => None,
    }
}

/// Remove a server thread entry for joining. Entries of other kinds
/// stay put.
pub fn take_server_thread(id: Handle) -> Option<std::thread::JoinHandle<()>> {
    let mut t = TABLE.lock().unwrap();
    match t.entries.get(&id) {
        Some(HandleObj::ServerThread(_)) => match t.entries.remove(&id) {
            Some(HandleObj::ServerThread(j)) => Some(j),
            _ => None,
        },
        _ => None,
    }
}

pub fn done_flag(id: Handle) -> Option<Arc<AtomicBool>> {
    let t = TABLE.lock().unwrap();
    match t.entries.get(&id) {
        Some(HandleObj::DoneFlag(d)) => Some(d.clone()),
        _ => None,
    }
}

/// Address a registered Func or Ptr entry resolves to.
pub fn func_addr(id: Handle) -> Option<usize> {
    let t = TABLE.lock().unwrap();
    match t.entries.get(&id) {
        Some(HandleObj::Func(a)) | Some(HandleObj::Ptr(a)) => Some(*a),
        _ => None,
    }
}

/// Translate a function address to a transportable name: the static
/// symbol table first, a decimal handle id on miss.
pub fn handler2name(addr: usize) -> String {
    if addr == 0 {
        return "0".to_owned();
    }
    if let Some(name) = symbols::static_symbol_name(addr) {
        return name.to_owned();
    }
    let id = {
        let existing = get_id(addr);
        if existing != 0 {
            existing
        } else {
            alloc(HandleObj::Func(addr))
        }
    };
    format!("{}", id)
}

/// Symmetric translation: static symbol, then decimal handle id.
/// Empty input means the null handler.
pub fn name2handler(name: &str) -> Result<usize, crate::errors::TarpcError> {
    if name.is_empty() || name == "0" {
        return Ok(0);
    }
    if let Some(addr) = symbols::static_symbol_addr(name) {
        return Ok(addr);
    }
    let id: Handle = name
        .parse()
        .map_err(|_| crate::errors::TarpcError::NotFound(name.to_owned()))?;
    func_addr(id).ok_or_else(|| crate::errors::TarpcError::NotFound(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_get_free() {
        let id = alloc(HandleObj::FdSet(Box::new(unsafe { std::mem::zeroed() })));
        assert_ne!(id, 0);
        let p = fd_set_ptr(id).unwrap();
        assert_eq!(fd_set_ptr(id), Some(p));
        free(id);
        assert_eq!(fd_set_ptr(id), None);
        // Freeing an unknown id is a no-op.
        free(id);
    }

    #[test]
    fn same_address_same_id() {
        let addr = 0xdead_0000usize;
        let a = alloc(HandleObj::Ptr(addr));
        let b = alloc(HandleObj::Ptr(addr));
        assert_eq!(a, b);
        assert_eq!(get_id(addr), a);
        free(a);
        assert_eq!(get_id(addr), 0);
    }

    #[test]
    fn handler_name_round_trip() {
        let addr = 0xbeef_1000usize;
        let name = handler2name(addr);
        // Not a static symbol, so a decimal id comes back.
        assert!(name.parse::<u32>().is_ok());
        assert_eq!(name2handler(&name).unwrap(), addr);
        assert_eq!(handler2name(addr), name);
    }

    #[test]
    fn null_handler_is_empty_name() {
        assert_eq!(name2handler("").unwrap(), 0);
        assert_eq!(handler2name(0), "0");
    }
}
