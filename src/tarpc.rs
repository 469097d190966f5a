//! Wire records of the RPC protocol.
//!
//! Every call carries an input record and produces an output record.
//! Both embed a common sub-record: the input side selects the call
//! mode and names the deferred-call handles, the output side carries
//! errno, duration and the same handles back. Addresses, option
//! values and flag masks cross in the neutral encodings of
//! `crate::rpctypes`.

use crate::errors::RpcErrno;
use crate::handle_registry::Handle;
use crate::rpctypes::address::RpcSockaddr;
use crate::rpctypes::fcntls::{RpcFcntlCmd, RpcLseekWhence, RpcOpenFlags};
use crate::rpctypes::ioctls::{RpcArpFlags, RpcIfFlags, RpcIoctlCode};
use crate::rpctypes::netdb::{RpcAiError, RpcAiFlags, RpcHErrno};
use crate::rpctypes::polls::RpcPollEvents;
use crate::rpctypes::signals::{RpcSaFlags, RpcSigHow, RpcSignum, RpcWaitOptions};
use crate::rpctypes::socket::{
    RpcAddrFamily, RpcDomain, RpcProto, RpcSendRecvFlags, RpcShutHow, RpcSockLevel, RpcSockOpt,
    RpcSockType,
};
use serde::{Deserialize, Serialize};

/// Upper bound on the scatter/gather vector length on the wire.
pub const RPC_IOV_MAX: usize = 32;

/// `optlen` value asking the server to pick the native size from the
/// option-value discriminant.
pub const OPTLEN_AUTO: u32 = u32::max_value();

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallMode {
    Call,
    Wait,
    CallWait,
    IsDone,
}

impl Default for CallMode {
    fn default() -> Self {
        CallMode::CallWait
    }
}

/// Common prefix of every input record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InCommon {
    /// Library hint for symbol resolution; empty means "use the
    /// configured override, else the default object".
    pub lib: String,
    pub op: CallMode,
    /// Not-before timestamp, µs since the epoch. Zero means "now".
    pub start: u64,
    /// Worker-thread handle, WAIT only.
    pub tid: Handle,
    /// Done-flag handle, WAIT/IS_DONE only.
    pub done: Handle,
}

/// Common prefix of every output record.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutCommon {
    pub errno: RpcErrno,
    pub errno_changed: bool,
    /// Wall-clock µs spent inside the wrapper body.
    pub duration: u64,
    pub tid: Handle,
    pub done: Handle,
    /// Winsock encoding of the error for cross-platform suites.
    pub win_error: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTimeval {
    pub tv_sec: i64,
    pub tv_usec: i64,
}

impl RpcTimeval {
    pub fn to_timeval(self) -> libc::timeval {
        libc::timeval {
            tv_sec: self.tv_sec as libc::time_t,
            tv_usec: self.tv_usec as libc::suseconds_t,
        }
    }

    pub fn from_timeval(tv: libc::timeval) -> RpcTimeval {
        RpcTimeval {
            tv_sec: tv.tv_sec as i64,
            tv_usec: tv.tv_usec as i64,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTimespec {
    pub tv_sec: i64,
    pub tv_nsec: i64,
}

impl RpcTimespec {
    pub fn to_timespec(self) -> libc::timespec {
        libc::timespec {
            tv_sec: self.tv_sec as libc::time_t,
            tv_nsec: self.tv_nsec as libc::c_long,
        }
    }
}

/// One scatter/gather element. `len` is the declared length for the
/// native call; `base` may be longer, leaving a guard band.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcIovec {
    pub base: Vec<u8>,
    pub len: u32,
}

/// One control message of a `msghdr` chain.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcCmsg {
    pub level: RpcSockLevel,
    pub ty: RpcSockOpt,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcMsghdr {
    pub name: RpcSockaddr,
    /// Declared address length; the allocation behind `name.raw` may
    /// be larger.
    pub namelen: u32,
    pub iov: Vec<RpcIovec>,
    pub control: Vec<RpcCmsg>,
    /// Declared control length for receive calls.
    pub controllen: u32,
    pub flags: RpcSendRecvFlags,
}

/// `setsockopt`/`getsockopt` value, discriminated the way the native
/// size is chosen under `OPTLEN_AUTO`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OptVal {
    Int(i32),
    Linger { onoff: i32, linger: i32 },
    Mreq { multiaddr: u32, interface: u32 },
    Mreqn { multiaddr: u32, address: u32, ifindex: i32 },
    IpAddr(u32),
    Timeval(RpcTimeval),
    Str(String),
    TcpInfo(RpcTcpInfo),
}

/// Subset of `struct tcp_info` the suites inspect.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcTcpInfo {
    pub state: u8,
    pub ca_state: u8,
    pub retransmits: u8,
    pub probes: u8,
    pub backoff: u8,
    pub options: u8,
    pub snd_wscale: u8,
    pub rcv_wscale: u8,
    pub rto: u32,
    pub ato: u32,
    pub snd_mss: u32,
    pub rcv_mss: u32,
    pub unacked: u32,
    pub lost: u32,
    pub retrans: u32,
    pub rtt: u32,
    pub rttvar: u32,
    pub snd_cwnd: u32,
    pub total_retrans: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcIfreq {
    pub name: String,
    pub addr: RpcSockaddr,
    pub flags: RpcIfFlags,
    pub mtu: i32,
    pub hwaddr: Vec<u8>,
    pub ifindex: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcArpreq {
    pub pa: RpcSockaddr,
    pub ha: RpcSockaddr,
    pub flags: RpcArpFlags,
}

/// `ioctl` third argument, discriminated by the request code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum IoctlVal {
    Int(i32),
    Timeval(RpcTimeval),
    Ifreq(RpcIfreq),
    /// Request: buffer size to offer. Response: one record per
    /// returned slot.
    Ifconf { bufsize: u32, reqs: Vec<RpcIfreq> },
    Arpreq(RpcArpreq),
}

/// `hostent` as a value tree.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcHostent {
    pub name: String,
    pub aliases: Vec<String>,
    pub addrtype: RpcAddrFamily,
    pub addrs: Vec<Vec<u8>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcAiHints {
    pub flags: RpcAiFlags,
    pub family: RpcDomain,
    pub socktype: RpcSockType,
    pub protocol: RpcProto,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcAddrinfo {
    pub flags: RpcAiFlags,
    pub family: RpcDomain,
    pub socktype: RpcSockType,
    pub protocol: RpcProto,
    pub addr: RpcSockaddr,
    pub canonname: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcSigevNotify {
    None,
    Signal,
    Thread,
}

impl Default for RpcSigevNotify {
    fn default() -> Self {
        RpcSigevNotify::None
    }
}

/// `sigevent` with the callback carried by symbol name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcSigevent {
    pub notify: RpcSigevNotify,
    pub signo: RpcSignum,
    pub value: i64,
    pub function: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcLioOpcode {
    Nop,
    Read,
    Write,
}

impl Default for RpcLioOpcode {
    fn default() -> Self {
        RpcLioOpcode::Nop
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcLioMode {
    Wait,
    Nowait,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcAioFsyncOp {
    OSync,
    ODsync,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcIomux {
    Select,
    Pselect,
    Poll,
}

impl Default for RpcIomux {
    fn default() -> Self {
        RpcIomux::Select
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcPollfd {
    pub fd: i32,
    pub events: RpcPollEvents,
    pub revents: RpcPollEvents,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcSigaction {
    /// Handler by name: a known symbol, "SIG_DFL", "SIG_IGN" or a
    /// decimal registry id.
    pub handler: String,
    pub mask: Handle,
    pub flags: RpcSaFlags,
}

// Input records. Shapes shared by several calls are defined once.

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VoidIn {
    pub common: InCommon,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FdIn {
    pub common: InCommon,
    pub fd: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SocketIn {
    pub common: InCommon,
    pub domain: RpcDomain,
    pub sock_type: RpcSockType,
    pub proto: RpcProto,
}

/// bind and connect.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddrCallIn {
    pub common: InCommon,
    pub fd: i32,
    pub addr: RpcSockaddr,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListenIn {
    pub common: InCommon,
    pub fd: i32,
    pub backlog: i32,
}

/// accept, getsockname and getpeername: fd plus a declared address
/// buffer length.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddrLenIn {
    pub common: InCommon,
    pub fd: i32,
    pub addrlen: u32,
    /// Allocation behind the address buffer; anything past `addrlen`
    /// is a guard band.
    pub addr_buflen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShutdownIn {
    pub common: InCommon,
    pub fd: i32,
    pub how: RpcShutHow,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendIn {
    pub common: InCommon,
    pub fd: i32,
    pub buf: Vec<u8>,
    pub len: u32,
    pub flags: RpcSendRecvFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvIn {
    pub common: InCommon,
    pub fd: i32,
    /// Declared maximum for the native call.
    pub len: u32,
    /// Actual allocation; the tail past `len` is a guard band.
    pub buflen: u32,
    pub flags: RpcSendRecvFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendtoIn {
    pub common: InCommon,
    pub fd: i32,
    pub buf: Vec<u8>,
    pub len: u32,
    pub flags: RpcSendRecvFlags,
    pub addr: RpcSockaddr,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvfromIn {
    pub common: InCommon,
    pub fd: i32,
    pub len: u32,
    pub buflen: u32,
    pub flags: RpcSendRecvFlags,
    /// Declared length of the peer-address buffer, in/out natively.
    pub fromlen: u32,
    pub from_buflen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReadIn {
    pub common: InCommon,
    pub fd: i32,
    pub len: u32,
    pub buflen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WriteIn {
    pub common: InCommon,
    pub fd: i32,
    pub buf: Vec<u8>,
    pub len: u32,
}

/// readv and writev.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IovIn {
    pub common: InCommon,
    pub fd: i32,
    pub iov: Vec<RpcIovec>,
    pub count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendmsgIn {
    pub common: InCommon,
    pub fd: i32,
    pub msg: RpcMsghdr,
    pub flags: RpcSendRecvFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvmsgIn {
    pub common: InCommon,
    pub fd: i32,
    pub msg: RpcMsghdr,
    pub flags: RpcSendRecvFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetsockoptIn {
    pub common: InCommon,
    pub fd: i32,
    pub level: RpcSockLevel,
    pub optname: RpcSockOpt,
    pub optval: Option<OptVal>,
    /// `OPTLEN_AUTO` asks the server to size from the discriminant.
    pub optlen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetsockoptIn {
    pub common: InCommon,
    pub fd: i32,
    pub level: RpcSockLevel,
    pub optname: RpcSockOpt,
    pub optval: Option<OptVal>,
    pub optlen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IoctlIn {
    pub common: InCommon,
    pub fd: i32,
    pub code: RpcIoctlCode,
    pub arg: Option<IoctlVal>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FcntlIn {
    pub common: InCommon,
    pub fd: i32,
    pub cmd: RpcFcntlCmd,
    pub arg: i32,
    pub arg_flags: RpcOpenFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OpenIn {
    pub common: InCommon,
    pub path: String,
    pub flags: RpcOpenFlags,
    pub mode: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Dup2In {
    pub common: InCommon,
    pub oldfd: i32,
    pub newfd: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LseekIn {
    pub common: InCommon,
    pub fd: i32,
    pub offset: i64,
    pub whence: RpcLseekWhence,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WaitpidIn {
    pub common: InCommon,
    pub pid: i32,
    pub options: RpcWaitOptions,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendfileIn {
    pub common: InCommon,
    pub out_fd: i32,
    pub in_fd: i32,
    /// None passes a null offset so the source position advances.
    pub offset: Option<i64>,
    pub count: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IfNameIn {
    pub common: InCommon,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IfIndexIn {
    pub common: InCommon,
    pub ifindex: u32,
}

/// FD_SET/FD_CLR/FD_ISSET/FD_ZERO.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FdSetOpIn {
    pub common: InCommon,
    pub set: Handle,
    pub fd: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HandleIn {
    pub common: InCommon,
    pub handle: Handle,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SelectIn {
    pub common: InCommon,
    pub n: i32,
    pub readfds: Handle,
    pub writefds: Handle,
    pub exceptfds: Handle,
    pub timeout: Option<RpcTimeval>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PselectIn {
    pub common: InCommon,
    pub n: i32,
    pub readfds: Handle,
    pub writefds: Handle,
    pub exceptfds: Handle,
    pub timeout: Option<RpcTimespec>,
    pub sigmask: Handle,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PollIn {
    pub common: InCommon,
    pub ufds: Vec<RpcPollfd>,
    pub nfds: u32,
    pub timeout: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigsetOpIn {
    pub common: InCommon,
    pub set: Handle,
    pub signum: RpcSignum,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigprocmaskIn {
    pub common: InCommon,
    pub how: RpcSigHow,
    pub set: Handle,
    pub oldset: Handle,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignalIn {
    pub common: InCommon,
    pub signum: RpcSignum,
    pub handler: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigactionIn {
    pub common: InCommon,
    pub signum: RpcSignum,
    pub action: Option<RpcSigaction>,
    /// Whether the peer wants the previous action back.
    pub want_old: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct KillIn {
    pub common: InCommon,
    pub pid: i32,
    pub signum: RpcSignum,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct UidIn {
    pub common: InCommon,
    pub uid: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GethostbynameIn {
    pub common: InCommon,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GethostbyaddrIn {
    pub common: InCommon,
    pub addr: Vec<u8>,
    pub family: RpcAddrFamily,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetaddrinfoIn {
    pub common: InCommon,
    pub node: String,
    pub service: String,
    pub hints: Option<RpcAiHints>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FillAiocbIn {
    pub common: InCommon,
    pub cb: Handle,
    pub fildes: i32,
    pub lio_opcode: RpcLioOpcode,
    pub reqprio: i32,
    pub offset: i64,
    pub nbytes: u32,
    pub sigevent: RpcSigevent,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AioCancelIn {
    pub common: InCommon,
    pub fd: i32,
    pub cb: Handle,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AioFsyncIn {
    pub common: InCommon,
    pub op: RpcAioFsyncOp,
    pub cb: Handle,
}

impl Default for AioFsyncIn {
    fn default() -> Self {
        AioFsyncIn {
            common: InCommon::default(),
            op: RpcAioFsyncOp::OSync,
            cb: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AioSuspendIn {
    pub common: InCommon,
    pub cbs: Vec<Handle>,
    pub timeout: Option<RpcTimespec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LioListioIn {
    pub common: InCommon,
    pub mode: RpcLioMode,
    pub cbs: Vec<Handle>,
    pub sig: Option<RpcSigevent>,
}

impl Default for LioListioIn {
    fn default() -> Self {
        LioListioIn {
            common: InCommon::default(),
            mode: RpcLioMode::Nowait,
            cbs: Vec::new(),
            sig: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SetlibnameIn {
    pub common: InCommon,
    pub libname: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FindFuncIn {
    pub common: InCommon,
    pub func_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetSizeofIn {
    pub common: InCommon,
    pub typename: String,
}

/// fork or fork+execve creation of a new server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CreateProcessIn {
    pub common: InCommon,
    pub name: String,
    /// Re-exec the agent binary instead of serving from the fork.
    pub exec: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThreadCreateIn {
    pub common: InCommon,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecveIn {
    pub common: InCommon,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PluginEnableIn {
    pub common: InCommon,
    pub install: String,
    pub action: String,
    pub uninstall: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimpleSenderIn {
    pub common: InCommon,
    pub sock: i32,
    pub size_min: u32,
    pub size_max: u32,
    pub size_rnd_once: bool,
    /// Microseconds.
    pub delay_min: u32,
    pub delay_max: u32,
    pub delay_rnd_once: bool,
    /// Seconds.
    pub time2run: u32,
    pub ignore_err: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimpleReceiverIn {
    pub common: InCommon,
    pub sock: i32,
    /// Seconds; zero means "until the peer closes".
    pub time2run: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlooderIn {
    pub common: InCommon,
    pub rcvrs: Vec<i32>,
    pub sndrs: Vec<i32>,
    pub bulkszs: u32,
    pub time2run: u32,
    pub time2wait: u32,
    pub iomux: RpcIomux,
    pub rx_nonblock: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EchoerIn {
    pub common: InCommon,
    pub socks: Vec<i32>,
    pub time2run: u32,
    pub time2wait: u32,
    pub iomux: RpcIomux,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SocketToFileIn {
    pub common: InCommon,
    pub sock: i32,
    pub path: String,
    /// Seconds.
    pub timeout: u32,
}

// Output records.

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VoidOut {
    pub common: OutCommon,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IntRetOut {
    pub common: OutCommon,
    pub retval: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SsizeOut {
    pub common: OutCommon,
    pub retval: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HandleOut {
    pub common: OutCommon,
    pub handle: Handle,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AddrOut {
    pub common: OutCommon,
    pub retval: i32,
    pub addr: RpcSockaddr,
    pub addrlen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvOut {
    pub common: OutCommon,
    pub retval: i64,
    pub buf: Vec<u8>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvfromOut {
    pub common: OutCommon,
    pub retval: i64,
    pub buf: Vec<u8>,
    pub from: RpcSockaddr,
    pub fromlen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IovOut {
    pub common: OutCommon,
    pub retval: i64,
    pub iov: Vec<RpcIovec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RecvmsgOut {
    pub common: OutCommon,
    pub retval: i64,
    pub msg: RpcMsghdr,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetsockoptOut {
    pub common: OutCommon,
    pub retval: i32,
    pub optval: Option<OptVal>,
    pub optlen: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IoctlOut {
    pub common: OutCommon,
    pub retval: i32,
    pub arg: Option<IoctlVal>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FcntlOut {
    pub common: OutCommon,
    pub retval: i32,
    pub retval_flags: RpcOpenFlags,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SelectOut {
    pub common: OutCommon,
    pub retval: i32,
    /// Remaining time when the host mutates it.
    pub timeout: Option<RpcTimeval>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PollOut {
    pub common: OutCommon,
    pub retval: i32,
    pub ufds: Vec<RpcPollfd>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SignalOut {
    pub common: OutCommon,
    /// Previous handler by name; empty on failure.
    pub handler: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SigactionOut {
    pub common: OutCommon,
    pub retval: i32,
    pub oldaction: Option<RpcSigaction>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostentOut {
    pub common: OutCommon,
    pub res: Option<RpcHostent>,
    pub h_errno: RpcHErrno,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GetaddrinfoOut {
    pub common: OutCommon,
    pub retval: RpcAiError,
    /// Handle of the native list for the matching freeaddrinfo.
    pub mem_ptr: Handle,
    pub res: Vec<RpcAddrinfo>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AioErrorOut {
    pub common: OutCommon,
    pub retval: RpcErrno,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThreadCreateOut {
    pub common: OutCommon,
    pub retval: i32,
    pub tid: Handle,
}

/// How `waitpid` status decodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcWaitStatusFlag {
    Exited,
    Signaled,
    CoreDumped,
    Stopped,
    Continued,
    Running,
}

impl Default for RpcWaitStatusFlag {
    fn default() -> Self {
        RpcWaitStatusFlag::Running
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WaitpidOut {
    pub common: OutCommon,
    pub retval: i32,
    pub status_flag: RpcWaitStatusFlag,
    /// Exit code, signal number, or zero, depending on the flag.
    pub status_value: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SendfileOut {
    pub common: OutCommon,
    pub retval: i64,
    /// Updated file offset when one was supplied.
    pub offset: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IfNameOut {
    pub common: OutCommon,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RpcIfNameindexEntry {
    pub index: u32,
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IfNameindexOut {
    pub common: OutCommon,
    /// Handle of the native array for the matching if_freenameindex.
    pub mem_ptr: Handle,
    pub items: Vec<RpcIfNameindexEntry>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GettimeofdayOut {
    pub common: OutCommon,
    pub retval: i32,
    pub tv: RpcTimeval,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BytesOut {
    pub common: OutCommon,
    pub retval: i32,
    pub bytes: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlooderOut {
    pub common: OutCommon,
    pub retval: i32,
    pub tx_stat: Vec<u64>,
    pub rx_stat: Vec<u64>,
}

/// Declares the full RPC table: request/response enums plus uniform
/// access to the common sub-records of every variant.
macro_rules! rpc_ops {
    ($( $op:ident / $opname:expr => $in_ty:ty, $out_ty:ty; )+) => {
        #[derive(Clone, Debug, Serialize, Deserialize)]
        pub enum Request {
            $( $op($in_ty), )+
        }

        #[derive(Clone, Debug, Serialize, Deserialize)]
        pub enum Response {
            $( $op($out_ty), )+
        }

        impl Request {
            pub fn name(&self) -> &'static str {
                match self {
                    $( Request::$op(_) => $opname, )+
                }
            }

            pub fn common(&self) -> &InCommon {
                match self {
                    $( Request::$op(r) => &r.common, )+
                }
            }

            pub fn common_mut(&mut self) -> &mut InCommon {
                match self {
                    $( Request::$op(r) => &mut r.common, )+
                }
            }

            /// Default-valued response of the matching shape, used by
            /// the deferred CALL answer and by error paths.
            pub fn empty_response(&self) -> Response {
                match self {
                    $( Request::$op(_) => Response::$op(<$out_ty>::default()), )+
                }
            }
        }

        impl Response {
            pub fn common(&self) -> &OutCommon {
                match self {
                    $( Response::$op(r) => &r.common, )+
                }
            }

            pub fn common_mut(&mut self) -> &mut OutCommon {
                match self {
                    $( Response::$op(r) => &mut r.common, )+
                }
            }
        }
    };
}

rpc_ops! {
    Socket / "socket" => SocketIn, IntRetOut;
    Bind / "bind" => AddrCallIn, IntRetOut;
    Connect / "connect" => AddrCallIn, IntRetOut;
    Listen / "listen" => ListenIn, IntRetOut;
    Accept / "accept" => AddrLenIn, AddrOut;
    Close / "close" => FdIn, IntRetOut;
    Dup / "dup" => FdIn, IntRetOut;
    Dup2 / "dup2" => Dup2In, IntRetOut;
    Shutdown / "shutdown" => ShutdownIn, IntRetOut;
    Fsync / "fsync" => FdIn, IntRetOut;
    Lseek / "lseek" => LseekIn, SsizeOut;
    Waitpid / "waitpid" => WaitpidIn, WaitpidOut;
    Getsockname / "getsockname" => AddrLenIn, AddrOut;
    Getpeername / "getpeername" => AddrLenIn, AddrOut;
    Open / "open" => OpenIn, IntRetOut;

    Send / "send" => SendIn, SsizeOut;
    Recv / "recv" => RecvIn, RecvOut;
    Sendto / "sendto" => SendtoIn, SsizeOut;
    Recvfrom / "recvfrom" => RecvfromIn, RecvfromOut;
    Read / "read" => ReadIn, RecvOut;
    Write / "write" => WriteIn, SsizeOut;
    Readv / "readv" => IovIn, IovOut;
    Writev / "writev" => IovIn, SsizeOut;
    Sendmsg / "sendmsg" => SendmsgIn, SsizeOut;
    Recvmsg / "recvmsg" => RecvmsgIn, RecvmsgOut;
    Sendfile / "sendfile" => SendfileIn, SendfileOut;

    Getsockopt / "getsockopt" => GetsockoptIn, GetsockoptOut;
    Setsockopt / "setsockopt" => SetsockoptIn, IntRetOut;
    Ioctl / "ioctl" => IoctlIn, IoctlOut;
    Fcntl / "fcntl" => FcntlIn, FcntlOut;
    IfNametoindex / "if_nametoindex" => IfNameIn, IntRetOut;
    IfIndextoname / "if_indextoname" => IfIndexIn, IfNameOut;
    IfNameindex / "if_nameindex" => VoidIn, IfNameindexOut;
    IfFreenameindex / "if_freenameindex" => HandleIn, VoidOut;

    FdSetNew / "fd_set_new" => VoidIn, HandleOut;
    FdSetDelete / "fd_set_delete" => HandleIn, VoidOut;
    DoFdSet / "do_fd_set" => FdSetOpIn, VoidOut;
    DoFdClr / "do_fd_clr" => FdSetOpIn, VoidOut;
    DoFdIsSet / "do_fd_isset" => FdSetOpIn, IntRetOut;
    DoFdZero / "do_fd_zero" => FdSetOpIn, VoidOut;
    Select / "select" => SelectIn, SelectOut;
    Pselect / "pselect" => PselectIn, IntRetOut;
    Poll / "poll" => PollIn, PollOut;

    SigsetNew / "sigset_new" => VoidIn, HandleOut;
    SigsetDelete / "sigset_delete" => HandleIn, VoidOut;
    Sigemptyset / "sigemptyset" => SigsetOpIn, IntRetOut;
    Sigfillset / "sigfillset" => SigsetOpIn, IntRetOut;
    Sigaddset / "sigaddset" => SigsetOpIn, IntRetOut;
    Sigdelset / "sigdelset" => SigsetOpIn, IntRetOut;
    Sigismember / "sigismember" => SigsetOpIn, IntRetOut;
    Sigprocmask / "sigprocmask" => SigprocmaskIn, IntRetOut;
    Sigpending / "sigpending" => HandleIn, IntRetOut;
    Sigsuspend / "sigsuspend" => HandleIn, IntRetOut;
    Sigreceived / "sigreceived" => VoidIn, HandleOut;
    Signal / "signal" => SignalIn, SignalOut;
    Sigaction / "sigaction" => SigactionIn, SigactionOut;
    Kill / "kill" => KillIn, IntRetOut;

    Getpid / "getpid" => VoidIn, IntRetOut;
    Gettimeofday / "gettimeofday" => VoidIn, GettimeofdayOut;
    Getuid / "getuid" => VoidIn, IntRetOut;
    Geteuid / "geteuid" => VoidIn, IntRetOut;
    Setuid / "setuid" => UidIn, IntRetOut;
    Seteuid / "seteuid" => UidIn, IntRetOut;

    Gethostbyname / "gethostbyname" => GethostbynameIn, HostentOut;
    Gethostbyaddr / "gethostbyaddr" => GethostbyaddrIn, HostentOut;
    Getaddrinfo / "getaddrinfo" => GetaddrinfoIn, GetaddrinfoOut;
    Freeaddrinfo / "freeaddrinfo" => HandleIn, VoidOut;

    CreateAiocb / "create_aiocb" => VoidIn, HandleOut;
    FillAiocb / "fill_aiocb" => FillAiocbIn, VoidOut;
    DeleteAiocb / "delete_aiocb" => HandleIn, VoidOut;
    AioRead / "aio_read" => HandleIn, IntRetOut;
    AioWrite / "aio_write" => HandleIn, IntRetOut;
    AioError / "aio_error" => HandleIn, AioErrorOut;
    AioReturn / "aio_return" => HandleIn, SsizeOut;
    AioCancel / "aio_cancel" => AioCancelIn, IntRetOut;
    AioFsync / "aio_fsync" => AioFsyncIn, IntRetOut;
    AioSuspend / "aio_suspend" => AioSuspendIn, IntRetOut;
    LioListio / "lio_listio" => LioListioIn, IntRetOut;

    Setlibname / "setlibname" => SetlibnameIn, IntRetOut;
    RpcFindFunc / "rpc_find_func" => FindFuncIn, IntRetOut;
    RpcIsOpDone / "rpc_is_op_done" => VoidIn, VoidOut;
    GetSizeof / "get_sizeof" => GetSizeofIn, IntRetOut;
    CreateProcess / "create_process" => CreateProcessIn, IntRetOut;
    ThreadCreate / "thread_create" => ThreadCreateIn, ThreadCreateOut;
    ThreadCancel / "thread_cancel" => HandleIn, IntRetOut;
    ThreadJoin / "thread_join" => HandleIn, IntRetOut;
    Execve / "execve" => ExecveIn, VoidOut;
    PluginEnable / "rpcserver_plugin_enable" => PluginEnableIn, IntRetOut;
    PluginDisable / "rpcserver_plugin_disable" => VoidIn, IntRetOut;

    SimpleSender / "simple_sender" => SimpleSenderIn, BytesOut;
    SimpleReceiver / "simple_receiver" => SimpleReceiverIn, BytesOut;
    Flooder / "flooder" => FlooderIn, FlooderOut;
    Echoer / "echoer" => EchoerIn, FlooderOut;
    SocketToFile / "socket_to_file" => SocketToFileIn, SsizeOut;
    OverfillBuffers / "overfill_buffers" => FdIn, BytesOut;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_matches_shape() {
        let req = Request::Socket(SocketIn::default());
        match req.empty_response() {
            Response::Socket(out) => {
                assert_eq!(out.retval, 0);
                assert_eq!(out.common.errno, RpcErrno::Ok);
            }
            _ => panic!("shape mismatch"),
        }
    }

    #[test]
    fn request_names() {
        assert_eq!(Request::Getpid(VoidIn::default()).name(), "getpid");
        assert_eq!(
            Request::RpcIsOpDone(VoidIn::default()).name(),
            "rpc_is_op_done"
        );
    }

    #[test]
    fn records_survive_the_codec() {
        let mut req = Request::Recvfrom(RecvfromIn {
            fd: 5,
            len: 10,
            buflen: 32,
            ..Default::default()
        });
        req.common_mut().op = CallMode::Call;
        let bytes = serde_json::to_vec(&req).unwrap();
        let back: Request = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back.common().op, CallMode::Call);
        match back {
            Request::Recvfrom(r) => {
                assert_eq!(r.fd, 5);
                assert_eq!(r.buflen, 32);
            }
            _ => panic!("wrong variant"),
        }
    }
}
