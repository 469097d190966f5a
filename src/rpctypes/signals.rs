//! Signal numbers, `sigprocmask` how-values and `sigaction` flags.

use libc::c_int;
use serde::{Deserialize, Serialize};

rpc_const_enum! {
    pub enum RpcSignum / signum_rpc2h / signum_h2rpc {
        Sighup = libc::SIGHUP => "SIGHUP",
        Sigint = libc::SIGINT => "SIGINT",
        Sigquit = libc::SIGQUIT => "SIGQUIT",
        Sigill = libc::SIGILL => "SIGILL",
        Sigtrap = libc::SIGTRAP => "SIGTRAP",
        Sigabrt = libc::SIGABRT => "SIGABRT",
        Sigbus = libc::SIGBUS => "SIGBUS",
        Sigfpe = libc::SIGFPE => "SIGFPE",
        Sigkill = libc::SIGKILL => "SIGKILL",
        Sigusr1 = libc::SIGUSR1 => "SIGUSR1",
        Sigsegv = libc::SIGSEGV => "SIGSEGV",
        Sigusr2 = libc::SIGUSR2 => "SIGUSR2",
        Sigpipe = libc::SIGPIPE => "SIGPIPE",
        Sigalrm = libc::SIGALRM => "SIGALRM",
        Sigterm = libc::SIGTERM => "SIGTERM",
        Sigchld = libc::SIGCHLD => "SIGCHLD",
        Sigcont = libc::SIGCONT => "SIGCONT",
        Sigstop = libc::SIGSTOP => "SIGSTOP",
        Sigtstp = libc::SIGTSTP => "SIGTSTP",
        Sigttin = libc::SIGTTIN => "SIGTTIN",
        Sigttou = libc::SIGTTOU => "SIGTTOU",
        Sigio = libc::SIGIO => "SIGIO",
        Sigwinch = libc::SIGWINCH => "SIGWINCH",
        @unknown SigUnknown => -1,
    }
}

rpc_const_enum! {
    /// First argument of `sigprocmask`.
    pub enum RpcSigHow / sighow_rpc2h / sighow_h2rpc {
        SigBlock = libc::SIG_BLOCK => "SIG_BLOCK",
        SigUnblock = libc::SIG_UNBLOCK => "SIG_UNBLOCK",
        SigSetmask = libc::SIG_SETMASK => "SIG_SETMASK",
        @unknown SighowUnknown => -1,
    }
}

bitflags! {
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcSaFlags: u32 {
        const SA_NOCLDSTOP = 0x1;
        const SA_NOCLDWAIT = 0x2;
        const SA_SIGINFO = 0x4;
        const SA_ONSTACK = 0x8;
        const SA_RESTART = 0x10;
        const SA_NODEFER = 0x20;
        const SA_RESETHAND = 0x40;
        const SA_UNKNOWN = 0x8000;
    }
}

const SA_PAIRS: &[(RpcSaFlags, c_int)] = &[
    (RpcSaFlags::SA_NOCLDSTOP, libc::SA_NOCLDSTOP),
    (RpcSaFlags::SA_NOCLDWAIT, libc::SA_NOCLDWAIT),
    (RpcSaFlags::SA_SIGINFO, libc::SA_SIGINFO),
    (RpcSaFlags::SA_ONSTACK, libc::SA_ONSTACK),
    (RpcSaFlags::SA_RESTART, libc::SA_RESTART),
    (RpcSaFlags::SA_NODEFER, libc::SA_NODEFER),
    (RpcSaFlags::SA_RESETHAND, libc::SA_RESETHAND),
];

bitflags! {
    /// `waitpid` options.
    #[derive(Serialize, Deserialize, Default)]
    pub struct RpcWaitOptions: u32 {
        const WNOHANG = 0x1;
        const WUNTRACED = 0x2;
        const WCONTINUED = 0x4;
    }
}

pub fn wait_options_rpc2h(flags: RpcWaitOptions) -> c_int {
    let mut out = 0;
    if flags.contains(RpcWaitOptions::WNOHANG) {
        out |= libc::WNOHANG;
    }
    if flags.contains(RpcWaitOptions::WUNTRACED) {
        out |= libc::WUNTRACED;
    }
    if flags.contains(RpcWaitOptions::WCONTINUED) {
        out |= libc::WCONTINUED;
    }
    out
}

pub fn sigaction_flags_rpc2h(flags: RpcSaFlags) -> c_int {
    let mut out = 0;
    for &(rpc, native) in SA_PAIRS {
        if flags.contains(rpc) {
            out |= native;
        }
    }
    out
}

pub fn sigaction_flags_h2rpc(flags: c_int) -> RpcSaFlags {
    let mut out = RpcSaFlags::empty();
    let mut mapped = 0;
    for &(rpc, native) in SA_PAIRS {
        if flags & native != 0 {
            out |= rpc;
        }
        mapped |= native;
    }
    if flags & !mapped != 0 {
        out |= RpcSaFlags::SA_UNKNOWN;
    }
    out
}
