use crate::errors::{TarpcError, TarpcResult};
use crate::log::LogError;

/// One guard-banded buffer: everything past `len_visible` must be
/// byte-identical after the wrapped call returns.
struct CheckedArg {
    real_arg: *const u8,
    pristine: Vec<u8>,
    len: usize,
    len_visible: usize,
    name: String,
}

unsafe impl Send for CheckedArg {}

/// Per-call list of guard-banded arguments, verified after the native
/// call. Strictly thread-local to the call record.
#[derive(Default)]
pub struct CheckedArgList {
    args: Vec<CheckedArg>,
}

impl CheckedArgList {
    pub fn new() -> Self {
        Default::default()
    }

    /// Snapshot the tail `[len_visible, len)` of `buf`. Null buffers and
    /// buffers with no tail are silently skipped.
    ///
    /// Safety: `buf` must stay valid and unmoved until `verify()`.
    pub unsafe fn register(&mut self, buf: *const u8, len: usize, len_visible: usize, name: &str) {
        if buf.is_null() || len <= len_visible {
            return;
        }
        let tail = std::slice::from_raw_parts(buf.add(len_visible), len - len_visible);
        self.args.push(CheckedArg {
            real_arg: buf,
            pristine: tail.to_vec(),
            len,
            len_visible,
            name: name.to_owned(),
        });
    }

    /// Convenience for slice-backed buffers.
    pub fn register_slice(&mut self, buf: &[u8], len_visible: usize, name: &str) {
        unsafe { self.register(buf.as_ptr(), buf.len(), len_visible, name) }
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Compare every tail against its snapshot, most recent first, and
    /// report the first corrupted argument. The list is consumed.
    pub fn verify(&mut self) -> TarpcResult<()> {
        let mut rc = Ok(());
        while let Some(arg) = self.args.pop() {
            let tail = unsafe {
                std::slice::from_raw_parts(
                    arg.real_arg.add(arg.len_visible),
                    arg.len - arg.len_visible,
                )
            };
            if tail != &arg.pristine[..] {
                log!(
                    LogError,
                    "Argument {}: visible length is {}, tail of {} bytes was modified",
                    arg.name,
                    arg.len_visible,
                    arg.len - arg.len_visible
                );
                if rc.is_ok() {
                    rc = Err(TarpcError::Corrupted(arg.name.clone()));
                }
            }
        }
        rc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn untouched_tail_passes() {
        let buf = vec![7u8; 64];
        let mut list = CheckedArgList::new();
        list.register_slice(&buf, 5, "buf");
        assert!(list.verify().is_ok());
        assert!(list.is_empty());
    }

    #[test]
    fn modified_tail_is_corruption() {
        let mut buf = vec![0u8; 16];
        let mut list = CheckedArgList::new();
        list.register_slice(&buf, 5, "buf");
        buf[10] = 0xff;
        match list.verify() {
            Err(TarpcError::Corrupted(name)) => assert_eq!(name, "buf"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn writes_within_visible_prefix_are_fine() {
        let mut buf = vec![0u8; 16];
        let mut list = CheckedArgList::new();
        list.register_slice(&buf, 8, "buf");
        for b in &mut buf[..8] {
            *b = 0xaa;
        }
        assert!(list.verify().is_ok());
    }

    #[test]
    fn degenerate_registrations_are_noops() {
        let mut list = CheckedArgList::new();
        unsafe { list.register(std::ptr::null(), 16, 4, "null") };
        let buf = [0u8; 4];
        list.register_slice(&buf, 4, "no_tail");
        assert!(list.is_empty());
        assert!(list.verify().is_ok());
    }
}
