//! Neutral analogues of the `sys/socket.h`, `netinet/in.h` and
//! `netinet/tcp.h` constant groups.

use crate::log::LogWarn;
use libc::c_int;
use serde::{Deserialize, Serialize};

/// Native value used when a neutral constant has no host counterpart.
/// Any syscall handed this value fails instead of guessing.
const INVALID_NATIVE: c_int = -1;

rpc_const_enum! {
    /// Protocol family argument of `socket()`.
    pub enum RpcDomain / domain_rpc2h_raw / domain_h2rpc {
        PfUnspec = libc::PF_UNSPEC => "PF_UNSPEC",
        PfInet = libc::PF_INET => "PF_INET",
        PfInet6 = libc::PF_INET6 => "PF_INET6",
        PfPacket = libc::PF_PACKET => "PF_PACKET",
        PfUnix = libc::PF_UNIX => "PF_UNIX",
        PfLocal = libc::PF_LOCAL => "PF_LOCAL",
        @unknown PfUnknown => INVALID_NATIVE,
    }
}

pub fn domain_rpc2h(domain: RpcDomain) -> c_int {
    if domain == RpcDomain::PfUnknown {
        log!(LogWarn, "{} is converted to an invalid protocol family", domain);
    }
    domain_rpc2h_raw(domain)
}

rpc_const_enum! {
    /// Address family stored in a `sockaddr`.
    ///
    /// `AfEther` has no kernel counterpart; it marks a neutral address
    /// carrying a raw link-layer payload and degrades to `AF_LOCAL`.
    pub enum RpcAddrFamily / addr_family_rpc2h_raw / addr_family_h2rpc {
        AfUnspec = libc::AF_UNSPEC => "AF_UNSPEC",
        AfInet = libc::AF_INET => "AF_INET",
        AfInet6 = libc::AF_INET6 => "AF_INET6",
        AfPacket = libc::AF_PACKET => "AF_PACKET",
        AfUnix = libc::AF_UNIX => "AF_UNIX",
        AfLocal = libc::AF_LOCAL => "AF_LOCAL",
        AfEther = libc::AF_LOCAL => "AF_ETHER",
        @unknown AfUnknown => INVALID_NATIVE,
    }
}

pub fn addr_family_rpc2h(family: RpcAddrFamily) -> c_int {
    if family == RpcAddrFamily::AfUnknown {
        log!(LogWarn, "{} is converted to an invalid address family", family);
    }
    addr_family_rpc2h_raw(family)
}

rpc_const_enum! {
    /// Socket type argument of `socket()`.
    pub enum RpcSockType / socktype_rpc2h / socktype_h2rpc {
        SockUnspec = 0 => "0",
        SockStream = libc::SOCK_STREAM => "SOCK_STREAM",
        SockDgram = libc::SOCK_DGRAM => "SOCK_DGRAM",
        SockRaw = libc::SOCK_RAW => "SOCK_RAW",
        SockSeqpacket = libc::SOCK_SEQPACKET => "SOCK_SEQPACKET",
        SockRdm = libc::SOCK_RDM => "SOCK_RDM",
        @unknown SockUnknown => INVALID_NATIVE,
    }
}

rpc_const_enum! {
    /// Protocol argument of `socket()`. Zero selects the default
    /// protocol of the (domain, type) pair.
    pub enum RpcProto / proto_rpc2h / proto_h2rpc {
        ProtoDefault = 0 => "0",
        ProtoIp = libc::IPPROTO_IP => "IPPROTO_IP",
        ProtoIcmp = libc::IPPROTO_ICMP => "IPPROTO_ICMP",
        ProtoTcp = libc::IPPROTO_TCP => "IPPROTO_TCP",
        ProtoUdp = libc::IPPROTO_UDP => "IPPROTO_UDP",
        @unknown ProtoUnknown => INVALID_NATIVE,
    }
}

rpc_const_enum! {
    /// `shutdown()` direction argument.
    pub enum RpcShutHow / shut_how_rpc2h / shut_how_h2rpc {
        ShutNone = INVALID_NATIVE => "SHUT_NONE",
        ShutRd = libc::SHUT_RD => "SHUT_RD",
        ShutWr = libc::SHUT_WR => "SHUT_WR",
        ShutRdwr = libc::SHUT_RDWR => "SHUT_RDWR",
        @unknown ShutUnknown => INVALID_NATIVE,
    }
}

// IPPROTO_IP == 0, which also serves as the default-protocol sentinel,
// so proto_h2rpc(0) resolves to ProtoDefault.

bitflags! {
    /// Neutral `send`/`recv` flag mask. Bit positions are wire format,
    /// not host values.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcSendRecvFlags: u32 {
        const MSG_OOB = 0x1;
        const MSG_PEEK = 0x2;
        const MSG_DONTROUTE = 0x4;
        const MSG_DONTWAIT = 0x8;
        const MSG_WAITALL = 0x10;
        const MSG_NOSIGNAL = 0x20;
        const MSG_TRUNC = 0x40;
        const MSG_CTRUNC = 0x80;
        const MSG_ERRQUEUE = 0x100;
        const MSG_MORE = 0x200;
        const MSG_CONFIRM = 0x400;
        const MSG_EOR = 0x800;
        /// Winsock-only; no host counterpart on this platform.
        const MSG_MCAST = 0x1000;
        /// Winsock-only; no host counterpart on this platform.
        const MSG_BCAST = 0x2000;
        /// Winsock-only; no host counterpart on this platform.
        const MSG_PARTIAL = 0x4000;
        /// Deliberately unmapped; converts to an all-ones native mask.
        const MSG_UNKNOWN = 0x8000;
    }
}

const SEND_RECV_PAIRS: &[(RpcSendRecvFlags, c_int)] = &[
    (RpcSendRecvFlags::MSG_OOB, libc::MSG_OOB),
    (RpcSendRecvFlags::MSG_PEEK, libc::MSG_PEEK),
    (RpcSendRecvFlags::MSG_DONTROUTE, libc::MSG_DONTROUTE),
    (RpcSendRecvFlags::MSG_DONTWAIT, libc::MSG_DONTWAIT),
    (RpcSendRecvFlags::MSG_WAITALL, libc::MSG_WAITALL),
    (RpcSendRecvFlags::MSG_NOSIGNAL, libc::MSG_NOSIGNAL),
    (RpcSendRecvFlags::MSG_TRUNC, libc::MSG_TRUNC),
    (RpcSendRecvFlags::MSG_CTRUNC, libc::MSG_CTRUNC),
    (RpcSendRecvFlags::MSG_ERRQUEUE, libc::MSG_ERRQUEUE),
    (RpcSendRecvFlags::MSG_MORE, libc::MSG_MORE),
    (RpcSendRecvFlags::MSG_CONFIRM, libc::MSG_CONFIRM),
    (RpcSendRecvFlags::MSG_EOR, libc::MSG_EOR),
];

/// Flags with a neutral-to-native mapping on this host.
fn send_recv_mapped_native() -> c_int {
    SEND_RECV_PAIRS.iter().fold(0, |acc, &(_, h)| acc | h)
}

pub fn send_recv_flags_rpc2h(flags: RpcSendRecvFlags) -> c_int {
    let mut out = 0;
    for &(rpc, native) in SEND_RECV_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    let unmapped = RpcSendRecvFlags::MSG_UNKNOWN
        | RpcSendRecvFlags::MSG_MCAST
        | RpcSendRecvFlags::MSG_BCAST
        | RpcSendRecvFlags::MSG_PARTIAL;
    if flags.intersects(unmapped) {
        out = !0;
    }
    out
}

pub fn send_recv_flags_h2rpc(flags: c_int) -> RpcSendRecvFlags {
    let mut out = RpcSendRecvFlags::empty();
    for &(rpc, native) in SEND_RECV_PAIRS {
        if flags & native != 0 {
            out |= rpc;
        }
    }
    if flags & !send_recv_mapped_native() != 0 {
        out |= RpcSendRecvFlags::MSG_UNKNOWN;
    }
    out
}

rpc_const_enum! {
    /// `level` argument of `getsockopt`/`setsockopt`.
    pub enum RpcSockLevel / socklevel_rpc2h / socklevel_h2rpc {
        SolSocket = libc::SOL_SOCKET => "SOL_SOCKET",
        SolIp = libc::IPPROTO_IP => "IPPROTO_IP",
        SolIpv6 = libc::IPPROTO_IPV6 => "IPPROTO_IPV6",
        SolTcp = libc::IPPROTO_TCP => "IPPROTO_TCP",
        SolUdp = libc::IPPROTO_UDP => "IPPROTO_UDP",
        @unknown SolUnknown => INVALID_NATIVE,
    }
}

// Options libc does not export for every target it supports.
const IP_OPTIONS: c_int = 4;
const IP_RECVOPTS: c_int = 6;
const IP_RETOPTS: c_int = 7;
const IP_RECVERR: c_int = 11;
const IP_RECVTTL: c_int = 12;
const IP_RECVTOS: c_int = 13;
const IP_MTU_DISCOVER: c_int = 10;
const IP_MTU: c_int = 14;
const TCP_INFO: c_int = 11;
const TCP_DEFER_ACCEPT: c_int = 9;

rpc_const_enum! {
    /// Socket option name. The native numbering spaces of the levels
    /// overlap, so `sockopt_h2rpc` takes the native level as well.
    pub enum RpcSockOpt / sockopt_rpc2h / sockopt_h2rpc_raw {
        SoAcceptconn = libc::SO_ACCEPTCONN => "SO_ACCEPTCONN",
        SoBindtodevice = libc::SO_BINDTODEVICE => "SO_BINDTODEVICE",
        SoBroadcast = libc::SO_BROADCAST => "SO_BROADCAST",
        SoDebug = libc::SO_DEBUG => "SO_DEBUG",
        SoDontroute = libc::SO_DONTROUTE => "SO_DONTROUTE",
        SoError = libc::SO_ERROR => "SO_ERROR",
        SoKeepalive = libc::SO_KEEPALIVE => "SO_KEEPALIVE",
        SoLinger = libc::SO_LINGER => "SO_LINGER",
        SoOobinline = libc::SO_OOBINLINE => "SO_OOBINLINE",
        SoPriority = libc::SO_PRIORITY => "SO_PRIORITY",
        SoRcvbuf = libc::SO_RCVBUF => "SO_RCVBUF",
        SoRcvlowat = libc::SO_RCVLOWAT => "SO_RCVLOWAT",
        SoRcvtimeo = libc::SO_RCVTIMEO => "SO_RCVTIMEO",
        SoReuseaddr = libc::SO_REUSEADDR => "SO_REUSEADDR",
        SoSndbuf = libc::SO_SNDBUF => "SO_SNDBUF",
        SoSndlowat = libc::SO_SNDLOWAT => "SO_SNDLOWAT",
        SoSndtimeo = libc::SO_SNDTIMEO => "SO_SNDTIMEO",
        SoType = libc::SO_TYPE => "SO_TYPE",
        IpAddMembership = libc::IP_ADD_MEMBERSHIP => "IP_ADD_MEMBERSHIP",
        IpDropMembership = libc::IP_DROP_MEMBERSHIP => "IP_DROP_MEMBERSHIP",
        IpMulticastIf = libc::IP_MULTICAST_IF => "IP_MULTICAST_IF",
        IpMulticastLoop = libc::IP_MULTICAST_LOOP => "IP_MULTICAST_LOOP",
        IpMulticastTtl = libc::IP_MULTICAST_TTL => "IP_MULTICAST_TTL",
        IpOptions = IP_OPTIONS => "IP_OPTIONS",
        IpPktinfo = libc::IP_PKTINFO => "IP_PKTINFO",
        IpRecverr = IP_RECVERR => "IP_RECVERR",
        IpRecvopts = IP_RECVOPTS => "IP_RECVOPTS",
        IpRecvtos = IP_RECVTOS => "IP_RECVTOS",
        IpRecvttl = IP_RECVTTL => "IP_RECVTTL",
        IpRetopts = IP_RETOPTS => "IP_RETOPTS",
        IpTos = libc::IP_TOS => "IP_TOS",
        IpTtl = libc::IP_TTL => "IP_TTL",
        IpMtu = IP_MTU => "IP_MTU",
        IpMtuDiscover = IP_MTU_DISCOVER => "IP_MTU_DISCOVER",
        TcpMaxseg = libc::TCP_MAXSEG => "TCP_MAXSEG",
        TcpNodelay = libc::TCP_NODELAY => "TCP_NODELAY",
        TcpCork = libc::TCP_CORK => "TCP_CORK",
        TcpKeepidle = libc::TCP_KEEPIDLE => "TCP_KEEPIDLE",
        TcpKeepintvl = libc::TCP_KEEPINTVL => "TCP_KEEPINTVL",
        TcpKeepcnt = libc::TCP_KEEPCNT => "TCP_KEEPCNT",
        TcpInfo = TCP_INFO => "TCP_INFO",
        TcpDeferAccept = TCP_DEFER_ACCEPT => "TCP_DEFER_ACCEPT",
        @unknown SockoptUnknown => INVALID_NATIVE,
    }
}

impl RpcSockOpt {
    /// Level the option belongs to.
    pub fn level(self) -> RpcSockLevel {
        use RpcSockOpt::*;
        match self {
            SoAcceptconn | SoBindtodevice | SoBroadcast | SoDebug | SoDontroute | SoError
            | SoKeepalive | SoLinger | SoOobinline | SoPriority | SoRcvbuf | SoRcvlowat
            | SoRcvtimeo | SoReuseaddr | SoSndbuf | SoSndlowat | SoSndtimeo | SoType => {
                RpcSockLevel::SolSocket
            }
            TcpMaxseg | TcpNodelay | TcpCork | TcpKeepidle | TcpKeepintvl | TcpKeepcnt
            | TcpInfo | TcpDeferAccept => RpcSockLevel::SolTcp,
            SockoptUnknown => RpcSockLevel::SolUnknown,
            _ => RpcSockLevel::SolIp,
        }
    }
}

/// The generated reverse map ignores the level and the numbering spaces
/// collide (SO_DEBUG == TCP_NODELAY == 1), so resolve within the level
/// by hand.
pub fn sockopt_h2rpc(level: c_int, opt: c_int) -> RpcSockOpt {
    let candidate = sockopt_h2rpc_raw(opt);
    if candidate != RpcSockOpt::SockoptUnknown
        && socklevel_rpc2h(candidate.level()) == level
    {
        return candidate;
    }
    // First hit had the wrong level; scan the level's own options.
    for &opt_rpc in ALL_SOCKOPTS {
        if socklevel_rpc2h(opt_rpc.level()) == level && sockopt_rpc2h(opt_rpc) == opt {
            return opt_rpc;
        }
    }
    RpcSockOpt::SockoptUnknown
}

const ALL_SOCKOPTS: &[RpcSockOpt] = &[
    RpcSockOpt::SoAcceptconn,
    RpcSockOpt::SoBindtodevice,
    RpcSockOpt::SoBroadcast,
    RpcSockOpt::SoDebug,
    RpcSockOpt::SoDontroute,
    RpcSockOpt::SoError,
    RpcSockOpt::SoKeepalive,
    RpcSockOpt::SoLinger,
    RpcSockOpt::SoOobinline,
    RpcSockOpt::SoPriority,
    RpcSockOpt::SoRcvbuf,
    RpcSockOpt::SoRcvlowat,
    RpcSockOpt::SoRcvtimeo,
    RpcSockOpt::SoReuseaddr,
    RpcSockOpt::SoSndbuf,
    RpcSockOpt::SoSndlowat,
    RpcSockOpt::SoSndtimeo,
    RpcSockOpt::SoType,
    RpcSockOpt::IpAddMembership,
    RpcSockOpt::IpDropMembership,
    RpcSockOpt::IpMulticastIf,
    RpcSockOpt::IpMulticastLoop,
    RpcSockOpt::IpMulticastTtl,
    RpcSockOpt::IpOptions,
    RpcSockOpt::IpPktinfo,
    RpcSockOpt::IpRecverr,
    RpcSockOpt::IpRecvopts,
    RpcSockOpt::IpRecvtos,
    RpcSockOpt::IpRecvttl,
    RpcSockOpt::IpRetopts,
    RpcSockOpt::IpTos,
    RpcSockOpt::IpTtl,
    RpcSockOpt::IpMtu,
    RpcSockOpt::IpMtuDiscover,
    RpcSockOpt::TcpMaxseg,
    RpcSockOpt::TcpNodelay,
    RpcSockOpt::TcpCork,
    RpcSockOpt::TcpKeepidle,
    RpcSockOpt::TcpKeepintvl,
    RpcSockOpt::TcpKeepcnt,
    RpcSockOpt::TcpInfo,
    RpcSockOpt::TcpDeferAccept,
];

rpc_const_enum! {
    /// `IP_MTU_DISCOVER` argument values.
    pub enum RpcMtuDiscoverArg / mtu_discover_arg_rpc2h / mtu_discover_arg_h2rpc {
        IpPmtudiscDont = 0 => "IP_PMTUDISC_DONT",
        IpPmtudiscWant = 1 => "IP_PMTUDISC_WANT",
        IpPmtudiscDo = 2 => "IP_PMTUDISC_DO",
        @unknown IpPmtudiscUnknown => INVALID_NATIVE,
    }
}

/// getsockopt returns SO_TYPE and SO_ERROR values in native encoding;
/// re-encode them before they cross the wire.
pub fn sockopt_value_h2rpc(opt: RpcSockOpt, value: c_int) -> c_int {
    match opt {
        RpcSockOpt::SoType => socktype_h2rpc(value) as c_int,
        RpcSockOpt::SoError => crate::errors::errno_h2rpc(value) as c_int,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_round_trip() {
        for d in &[
            RpcDomain::PfUnspec,
            RpcDomain::PfInet,
            RpcDomain::PfInet6,
            RpcDomain::PfPacket,
        ] {
            assert_eq!(domain_h2rpc(domain_rpc2h(*d)), *d);
        }
    }

    #[test]
    fn local_and_unix_collapse() {
        // PF_LOCAL == PF_UNIX on Linux; the first listed variant wins.
        assert_eq!(domain_h2rpc(libc::PF_UNIX), RpcDomain::PfUnix);
        assert_eq!(domain_rpc2h(RpcDomain::PfLocal), libc::PF_UNIX);
    }

    #[test]
    fn unknown_family_is_invalid_native() {
        assert_eq!(domain_rpc2h(RpcDomain::PfUnknown), -1);
        assert_eq!(addr_family_h2rpc(12345), RpcAddrFamily::AfUnknown);
    }

    #[test]
    fn ether_degrades_to_local() {
        assert_eq!(addr_family_rpc2h(RpcAddrFamily::AfEther), libc::AF_LOCAL);
    }

    #[test]
    fn send_recv_flags_both_ways() {
        let rpc = RpcSendRecvFlags::MSG_OOB
            | RpcSendRecvFlags::MSG_DONTWAIT
            | RpcSendRecvFlags::MSG_NOSIGNAL;
        let native = send_recv_flags_rpc2h(rpc);
        assert_eq!(native, libc::MSG_OOB | libc::MSG_DONTWAIT | libc::MSG_NOSIGNAL);
        assert_eq!(send_recv_flags_h2rpc(native), rpc);
    }

    #[test]
    fn unmapped_send_flag_poisons_mask() {
        let native = send_recv_flags_rpc2h(RpcSendRecvFlags::MSG_MCAST);
        assert_eq!(native, !0);
    }

    #[test]
    fn sockopt_reverse_respects_level() {
        // SO_DEBUG and TCP_NODELAY are both 1.
        assert_eq!(
            sockopt_h2rpc(libc::SOL_SOCKET, libc::SO_DEBUG),
            RpcSockOpt::SoDebug
        );
        assert_eq!(
            sockopt_h2rpc(libc::IPPROTO_TCP, libc::TCP_NODELAY),
            RpcSockOpt::TcpNodelay
        );
    }

    #[test]
    fn so_type_value_reencoded() {
        assert_eq!(
            sockopt_value_h2rpc(RpcSockOpt::SoType, libc::SOCK_DGRAM),
            RpcSockType::SockDgram as c_int
        );
        // Other options pass through untouched.
        assert_eq!(sockopt_value_h2rpc(RpcSockOpt::SoRcvbuf, 4096), 4096);
    }
}
