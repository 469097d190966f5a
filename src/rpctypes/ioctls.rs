//! `ioctl()` request codes plus the interface/ARP flag masks their
//! payloads carry. Request codes are `c_ulong`, so these converters
//! are written out instead of going through the shared enum macro.

use libc::{c_int, c_ulong};
use serde::{Deserialize, Serialize};

// linux/sockios.h values libc does not export.
const SIOCATMARK: c_ulong = 0x8905;
const SIOCDARP: c_ulong = 0x8953;
const SIOCGARP: c_ulong = 0x8954;
const SIOCSARP: c_ulong = 0x8955;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcIoctlCode {
    Fionbio,
    Fionread,
    SiocAtmark,
    Siocgifaddr,
    Siocsifaddr,
    Siocgifnetmask,
    Siocsifnetmask,
    Siocgifbrdaddr,
    Siocsifbrdaddr,
    Siocgifconf,
    Siocgifflags,
    Siocsifflags,
    Siocgifmtu,
    Siocsifmtu,
    Siocgifhwaddr,
    Siocgifindex,
    Siocgarp,
    Siocsarp,
    Siocdarp,
    IoctlUnknown,
}

impl Default for RpcIoctlCode {
    fn default() -> Self {
        RpcIoctlCode::IoctlUnknown
    }
}

impl RpcIoctlCode {
    pub fn as_str(self) -> &'static str {
        use RpcIoctlCode::*;
        match self {
            Fionbio => "FIONBIO",
            Fionread => "FIONREAD",
            SiocAtmark => "SIOCATMARK",
            Siocgifaddr => "SIOCGIFADDR",
            Siocsifaddr => "SIOCSIFADDR",
            Siocgifnetmask => "SIOCGIFNETMASK",
            Siocsifnetmask => "SIOCSIFNETMASK",
            Siocgifbrdaddr => "SIOCGIFBRDADDR",
            Siocsifbrdaddr => "SIOCSIFBRDADDR",
            Siocgifconf => "SIOCGIFCONF",
            Siocgifflags => "SIOCGIFFLAGS",
            Siocsifflags => "SIOCSIFFLAGS",
            Siocgifmtu => "SIOCGIFMTU",
            Siocsifmtu => "SIOCSIFMTU",
            Siocgifhwaddr => "SIOCGIFHWADDR",
            Siocgifindex => "SIOCGIFINDEX",
            Siocgarp => "SIOCGARP",
            Siocsarp => "SIOCSARP",
            Siocdarp => "SIOCDARP",
            IoctlUnknown => "<IOCTL_UNKNOWN>",
        }
    }
}

impl std::fmt::Display for RpcIoctlCode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unrecognized code converts to an invalid request so the call
/// fails with ENOTTY/EINVAL rather than hitting a random driver.
pub fn ioctl_rpc2h(code: RpcIoctlCode) -> c_ulong {
    use RpcIoctlCode::*;
    match code {
        Fionbio => libc::FIONBIO,
        Fionread => libc::FIONREAD,
        SiocAtmark => SIOCATMARK,
        Siocgifaddr => libc::SIOCGIFADDR,
        Siocsifaddr => libc::SIOCSIFADDR,
        Siocgifnetmask => libc::SIOCGIFNETMASK,
        Siocsifnetmask => libc::SIOCSIFNETMASK,
        Siocgifbrdaddr => libc::SIOCGIFBRDADDR,
        Siocsifbrdaddr => libc::SIOCSIFBRDADDR,
        Siocgifconf => libc::SIOCGIFCONF,
        Siocgifflags => libc::SIOCGIFFLAGS,
        Siocsifflags => libc::SIOCSIFFLAGS,
        Siocgifmtu => libc::SIOCGIFMTU,
        Siocsifmtu => libc::SIOCSIFMTU,
        Siocgifhwaddr => libc::SIOCGIFHWADDR,
        Siocgifindex => libc::SIOCGIFINDEX,
        Siocgarp => SIOCGARP,
        Siocsarp => SIOCSARP,
        Siocdarp => SIOCDARP,
        IoctlUnknown => c_ulong::max_value(),
    }
}

bitflags! {
    /// `ifr_flags` of SIOCGIFFLAGS/SIOCSIFFLAGS.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcIfFlags: u32 {
        const IFF_UP = 0x1;
        const IFF_BROADCAST = 0x2;
        const IFF_DEBUG = 0x4;
        const IFF_LOOPBACK = 0x8;
        const IFF_POINTOPOINT = 0x10;
        const IFF_NOTRAILERS = 0x20;
        const IFF_RUNNING = 0x40;
        const IFF_NOARP = 0x80;
        const IFF_PROMISC = 0x100;
        const IFF_ALLMULTI = 0x200;
        const IFF_MASTER = 0x400;
        const IFF_SLAVE = 0x800;
        const IFF_MULTICAST = 0x1000;
        const IFF_PORTSEL = 0x2000;
        const IFF_AUTOMEDIA = 0x4000;
        const IFF_UNKNOWN = 0x8000;
    }
}

const IF_FLAG_PAIRS: &[(RpcIfFlags, c_int)] = &[
    (RpcIfFlags::IFF_UP, libc::IFF_UP),
    (RpcIfFlags::IFF_BROADCAST, libc::IFF_BROADCAST),
    (RpcIfFlags::IFF_DEBUG, libc::IFF_DEBUG),
    (RpcIfFlags::IFF_LOOPBACK, libc::IFF_LOOPBACK),
    (RpcIfFlags::IFF_POINTOPOINT, libc::IFF_POINTOPOINT),
    (RpcIfFlags::IFF_NOTRAILERS, libc::IFF_NOTRAILERS),
    (RpcIfFlags::IFF_RUNNING, libc::IFF_RUNNING),
    (RpcIfFlags::IFF_NOARP, libc::IFF_NOARP),
    (RpcIfFlags::IFF_PROMISC, libc::IFF_PROMISC),
    (RpcIfFlags::IFF_ALLMULTI, libc::IFF_ALLMULTI),
    (RpcIfFlags::IFF_MASTER, libc::IFF_MASTER),
    (RpcIfFlags::IFF_SLAVE, libc::IFF_SLAVE),
    (RpcIfFlags::IFF_MULTICAST, libc::IFF_MULTICAST),
    (RpcIfFlags::IFF_PORTSEL, libc::IFF_PORTSEL),
    (RpcIfFlags::IFF_AUTOMEDIA, libc::IFF_AUTOMEDIA),
];

pub fn if_fl_rpc2h(flags: RpcIfFlags) -> c_int {
    let mut out = 0;
    for &(rpc, native) in IF_FLAG_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    out
}

pub fn if_fl_h2rpc(flags: c_int) -> RpcIfFlags {
    let mut out = RpcIfFlags::empty();
    let mut mapped = 0;
    for &(rpc, native) in IF_FLAG_PAIRS {
        if flags & native != 0 {
            out |= rpc;
        }
        mapped |= native;
    }
    if flags & !mapped != 0 {
        out |= RpcIfFlags::IFF_UNKNOWN;
    }
    out
}

// net/if_arp.h values libc does not export.
const ATF_COM: c_int = 0x02;
const ATF_PERM: c_int = 0x04;
const ATF_PUBL: c_int = 0x08;
const ATF_NETMASK: c_int = 0x20;
const ATF_DONTPUB: c_int = 0x40;

bitflags! {
    /// `arp_flags` of SIOCGARP/SIOCSARP.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcArpFlags: u32 {
        const ATF_COM = 0x1;
        const ATF_PERM = 0x2;
        const ATF_PUBL = 0x4;
        const ATF_NETMASK = 0x8;
        const ATF_DONTPUB = 0x10;
    }
}

const ARP_FLAG_PAIRS: &[(RpcArpFlags, c_int)] = &[
    (RpcArpFlags::ATF_COM, ATF_COM),
    (RpcArpFlags::ATF_PERM, ATF_PERM),
    (RpcArpFlags::ATF_PUBL, ATF_PUBL),
    (RpcArpFlags::ATF_NETMASK, ATF_NETMASK),
    (RpcArpFlags::ATF_DONTPUB, ATF_DONTPUB),
];

pub fn arp_fl_rpc2h(flags: RpcArpFlags) -> c_int {
    let mut out = 0;
    for &(rpc, native) in ARP_FLAG_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    out
}

pub fn arp_fl_h2rpc(flags: c_int) -> RpcArpFlags {
    let mut out = RpcArpFlags::empty();
    for &(rpc, native) in ARP_FLAG_PAIRS {
        if flags & native != 0 {
            out |= rpc;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map() {
        assert_eq!(ioctl_rpc2h(RpcIoctlCode::Fionbio), libc::FIONBIO);
        assert_eq!(ioctl_rpc2h(RpcIoctlCode::Siocgifconf), libc::SIOCGIFCONF);
        assert_eq!(ioctl_rpc2h(RpcIoctlCode::SiocAtmark), 0x8905);
    }

    #[test]
    fn unknown_code_is_invalid() {
        assert_eq!(ioctl_rpc2h(RpcIoctlCode::IoctlUnknown), c_ulong::max_value());
    }

    #[test]
    fn if_flags_round_trip() {
        let rpc = RpcIfFlags::IFF_UP | RpcIfFlags::IFF_RUNNING | RpcIfFlags::IFF_MULTICAST;
        assert_eq!(if_fl_h2rpc(if_fl_rpc2h(rpc)), rpc);
    }

    #[test]
    fn arp_flags_round_trip() {
        let rpc = RpcArpFlags::ATF_COM | RpcArpFlags::ATF_PERM;
        assert_eq!(arp_fl_h2rpc(arp_fl_rpc2h(rpc)), rpc);
    }
}
