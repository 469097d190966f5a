//! `poll()` event mask in neutral encoding.

use libc::c_short;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcPollEvents: u16 {
        const POLLIN = 0x1;
        const POLLPRI = 0x2;
        const POLLOUT = 0x4;
        const POLLRDNORM = 0x8;
        const POLLWRNORM = 0x10;
        const POLLRDBAND = 0x20;
        const POLLWRBAND = 0x40;
        const POLLERR = 0x80;
        const POLLHUP = 0x100;
        const POLLNVAL = 0x200;
        const POLL_UNKNOWN = 0x400;
    }
}

const POLL_PAIRS: &[(RpcPollEvents, c_short)] = &[
    (RpcPollEvents::POLLIN, libc::POLLIN),
    (RpcPollEvents::POLLPRI, libc::POLLPRI),
    (RpcPollEvents::POLLOUT, libc::POLLOUT),
    (RpcPollEvents::POLLRDNORM, libc::POLLRDNORM),
    (RpcPollEvents::POLLWRNORM, libc::POLLWRNORM),
    (RpcPollEvents::POLLRDBAND, libc::POLLRDBAND),
    (RpcPollEvents::POLLWRBAND, libc::POLLWRBAND),
    (RpcPollEvents::POLLERR, libc::POLLERR),
    (RpcPollEvents::POLLHUP, libc::POLLHUP),
    (RpcPollEvents::POLLNVAL, libc::POLLNVAL),
];

pub fn poll_event_rpc2h(events: RpcPollEvents) -> c_short {
    let mut out = 0;
    for &(rpc, native) in POLL_PAIRS {
        if events.contains(rpc) {
            out |= native;
        }
    }
    if events.contains(RpcPollEvents::POLL_UNKNOWN) {
        out = !0;
    }
    out
}

pub fn poll_event_h2rpc(events: c_short) -> RpcPollEvents {
    let mut out = RpcPollEvents::empty();
    let mut mapped: c_short = 0;
    for &(rpc, native) in POLL_PAIRS {
        if events & native != 0 {
            out |= rpc;
        }
        mapped |= native;
    }
    if events & !mapped != 0 {
        out |= RpcPollEvents::POLL_UNKNOWN;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_out_round_trip() {
        let rpc = RpcPollEvents::POLLIN | RpcPollEvents::POLLOUT;
        assert_eq!(poll_event_rpc2h(rpc), libc::POLLIN | libc::POLLOUT);
        assert_eq!(poll_event_h2rpc(libc::POLLIN | libc::POLLOUT), rpc);
    }

    #[test]
    fn error_events_come_back() {
        let revents = libc::POLLERR | libc::POLLHUP;
        assert_eq!(
            poll_event_h2rpc(revents),
            RpcPollEvents::POLLERR | RpcPollEvents::POLLHUP
        );
    }
}
