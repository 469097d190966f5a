#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate static_assertions;

#[macro_use]
mod log;
mod checked_args;
mod config;
mod dispatch;
mod errors;
mod handle_registry;
mod plugin;
mod rpctypes;
mod server;
mod sniffer;
mod symbols;
mod tarpc;
mod traffic;
mod transport;
mod util;
mod wrappers;

use std::net::SocketAddr;
use structopt::clap::AppSettings;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "tarpcs", about = "Test agent RPC server")]
struct TarpcsOptions {
    /// UDP log collector; TARPC_LOG_ADDR is the fallback.
    #[structopt(long = "log-addr")]
    log_addr: Option<SocketAddr>,

    #[structopt(subcommand)]
    cmd: TarpcsSubCommand,
}

#[derive(Debug, StructOpt)]
enum TarpcsSubCommand {
    /// Serve a named RPC server in the foreground.
    #[structopt(name = "start")]
    Start { name: String },

    /// Re-entry point of the execve spawn path; not for direct use.
    #[structopt(name = "rpcserver", setting = AppSettings::Hidden)]
    RpcServer {
        name: String,
        logfd: i32,
        libname: String,
    },
}

/// Symbols callable by name without a dynamic library.
fn register_builtin_symbols() {
    symbols::register_static_symbol(
        "signal_registrar",
        wrappers::sigsets::signal_registrar as usize,
    );
}

fn main() {
    let options = TarpcsOptions::from_args();

    let log_addr = options.log_addr.or_else(|| {
        std::env::var("TARPC_LOG_ADDR")
            .ok()
            .and_then(|s| s.parse().ok())
    });
    if let Some(addr) = log_addr {
        if let Err(e) = log::logfork_attach(addr) {
            fatal!("Cannot attach the log collector at {}: {}", addr, e);
        }
    }
    register_builtin_symbols();

    let result = match &options.cmd {
        TarpcsSubCommand::Start { name } => server::serve_listener(name),
        TarpcsSubCommand::RpcServer {
            name,
            logfd,
            libname,
        } => server::reexec_entry(name, *logfd, libname),
    };
    if let Err(e) = result {
        fatal!("RPC server exited with an error: {}", e);
    }
}
