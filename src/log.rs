use crate::errors::errno_h2rpc;
use backtrace::Backtrace;
use nix::errno::errno;
use std::{
    collections::HashMap,
    env,
    env::var_os,
    fs::{File, OpenOptions},
    io::{self, BufWriter, Result, Write},
    net::{SocketAddr, UdpSocket},
    path::Path,
    sync::{Mutex, MutexGuard},
};

#[derive(Clone)]
struct LogModule {
    name: String,
    level: LogLevel,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub enum LogLevel {
    LogFatal,
    LogError,
    LogWarn,
    LogRing,
    LogInfo,
    LogVerb,
}

pub use LogLevel::*;

/// Maximum logfork datagram: u16 level + 64-byte server name + text.
const LOGFORK_MAX_DGRAM: usize = 320;
const LOGFORK_NAME_LEN: usize = 64;

struct LogGlobals {
    level_map: HashMap<String, LogLevel>,
    log_modules_cache: HashMap<String, LogModule>,
    /// Possibly buffered
    log_file: Box<dyn Write + Send>,
    default_level: LogLevel,
    /// UDP fan-in collector; every record is also sent there when set.
    logfork: Option<UdpSocket>,
    /// Name of this RPC server, carried in every logfork datagram.
    server_name: String,
}

extern "C" fn flush_log_buffer() {
    let mut maybe_log_lock = LOG_GLOBALS.lock();
    match &mut maybe_log_lock {
        Ok(lock) => {
            lock.log_file.flush().unwrap_or(());
        }
        Err(e) => panic!("Could not obtain lock on the log. Can't flush log buffer: {:?}", e),
    };
}

lazy_static! {
    static ref LOG_GLOBALS: Mutex<LogGlobals> = {
        let maybe_filename = var_os("TARPC_LOG_FILE");
        let maybe_append_filename = var_os("TARPC_APPEND_LOG_FILE");
        let mut f: Box<dyn Write + Sync + Send>;
        if let Some(filename) = maybe_filename {
            f = Box::new(File::create(&filename).expect(&format!(
                "Error. Could not create filename `{:?}' specified in environment variable TARPC_LOG_FILE",
                filename
            )));
        } else if let Some(append_filename) = maybe_append_filename {
            f = Box::new(
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .open(&append_filename)
                    .expect(&format!(
                        "Error. Could not append to filename `{:?}' specified in env variable TARPC_APPEND_LOG_FILE",
                        append_filename
                    )),
            );
        } else {
            f = Box::new(io::stderr());
        }

        if let Ok(buf_size) = env::var("TARPC_LOG_BUFFER") {
            let log_buffer_size = buf_size.parse::<usize>().expect(&format!(
                "Error. Could not parse `{:?}' in environment var `TARPC_LOG_BUFFER' as a number",
                buf_size
            ));
            f = Box::new(BufWriter::with_capacity(log_buffer_size, f));
        }

        let ret = unsafe { libc::atexit(flush_log_buffer) };
        assert_eq!(ret, 0);

        let (default_level, level_map) = match env::var("TARPC_LOG") {
            Ok(tarpc_log) => init_log_levels(&tarpc_log),
            Err(_) => (LogRing, HashMap::new()),
        };

        Mutex::new(LogGlobals {
            level_map,
            log_modules_cache: HashMap::new(),
            log_file: f,
            default_level,
            logfork: None,
            server_name: "rpcserver".to_owned(),
        })
    };
}

fn log_level_string_to_level(log_level_string: &str) -> LogLevel {
    match log_level_string {
        "fatal" => LogFatal,
        "error" => LogError,
        "warn" => LogWarn,
        "ring" => LogRing,
        "info" => LogInfo,
        "verb" => LogVerb,
        _ => LogWarn,
    }
}

fn init_log_levels(tarpc_log: &str) -> (LogLevel, HashMap<String, LogLevel>) {
    let mut hm: HashMap<String, LogLevel> = HashMap::new();
    let mod_colon_levels = tarpc_log.split(',');
    let mut default_level = LogInfo;
    for mod_colon_level in mod_colon_levels {
        let res: Vec<&str> = mod_colon_level.splitn(2, ':').collect();
        if res.len() == 2 {
            let mod_name = res[0].trim();
            let log_level_string = res[1].trim();
            if mod_name == "all" {
                default_level = log_level_string_to_level(log_level_string);
            } else {
                hm.insert(
                    mod_name.to_owned(),
                    log_level_string_to_level(log_level_string),
                );
            }
        }
    }
    (default_level, hm)
}

/// Given a module name, what is its log level?
fn get_log_level(module_name: &str, l: &MutexGuard<LogGlobals>) -> LogLevel {
    // We DONT lowercase here as filenames are usually case sensitive on Linux.
    let maybe_log_level = l.level_map.get(module_name);
    if let Some(log_level) = maybe_log_level {
        *log_level
    } else {
        l.default_level
    }
}

fn filename_to_module_name(filename: &str) -> String {
    let path = Path::new(filename);
    path.file_stem().unwrap().to_string_lossy().to_string()
}

/// Given the filename get the corresponding LogModule.
fn get_log_module(filename: &str, l: &mut MutexGuard<LogGlobals>) -> LogModule {
    let maybe_log_module = l.log_modules_cache.get(filename);
    if let Some(log_module) = maybe_log_module {
        log_module.to_owned()
    } else {
        let name = filename_to_module_name(filename);
        let level = get_log_level(&name, l);
        let m = LogModule { level, name };
        l.log_modules_cache.insert(filename.to_owned(), m.clone());
        m
    }
}

fn log_name(level: LogLevel) -> String {
    match level {
        LogFatal => "FATAL".into(),
        LogError => "ERROR".into(),
        LogWarn => "WARN".into(),
        LogRing => "RING".into(),
        LogInfo => "INFO".into(),
        LogVerb => "VERB".into(),
    }
}

/// Point every subsequent log record at a UDP fan-in collector.
pub fn logfork_attach(addr: SocketAddr) -> Result<()> {
    let sock = UdpSocket::bind(("0.0.0.0", 0))?;
    sock.connect(addr)?;
    let mut lock = LOG_GLOBALS.lock().unwrap();
    lock.logfork = Some(sock);
    Ok(())
}

/// Reattach to an already open collector socket fd (the execve path).
pub fn logfork_attach_fd(fd: i32) {
    use std::os::unix::io::FromRawFd;
    let sock = unsafe { UdpSocket::from_raw_fd(fd) };
    let mut lock = LOG_GLOBALS.lock().unwrap();
    lock.logfork = Some(sock);
}

/// Register the current RPC server's name for logfork datagrams.
pub fn logfork_register_user(name: &str) {
    let mut lock = LOG_GLOBALS.lock().unwrap();
    lock.server_name = name.to_owned();
}

pub fn logfork_fd() -> Option<i32> {
    use std::os::unix::io::AsRawFd;
    let lock = LOG_GLOBALS.lock().unwrap();
    lock.logfork.as_ref().map(|s| s.as_raw_fd())
}

/// Build the logfork datagram: level, fixed-size server name, text.
pub fn logfork_datagram(level: u16, server_name: &str, text: &[u8]) -> Vec<u8> {
    let mut dgram = Vec::with_capacity(LOGFORK_MAX_DGRAM);
    dgram.extend_from_slice(&level.to_le_bytes());
    let mut name = [0u8; LOGFORK_NAME_LEN];
    let nb = server_name.as_bytes();
    let n = nb.len().min(LOGFORK_NAME_LEN - 1);
    name[..n].copy_from_slice(&nb[..n]);
    dgram.extend_from_slice(&name);
    let room = LOGFORK_MAX_DGRAM - dgram.len();
    dgram.extend_from_slice(&text[..text.len().min(room)]);
    dgram
}

fn logfork_send(level: LogLevel, message: &[u8], l: &MutexGuard<LogGlobals>) {
    if let Some(sock) = &l.logfork {
        let dgram = logfork_datagram(level as u16, &l.server_name, message);
        // A lost log datagram must never fail the RPC being logged.
        let _ = sock.send(&dgram);
    }
}

pub struct NewLineTerminatingOstream {
    enabled: bool,
    level: LogLevel,
    message: Vec<u8>,
    lock: MutexGuard<'static, LogGlobals>,
}

impl NewLineTerminatingOstream {
    fn new(
        level: LogLevel,
        filename: &str,
        line: u32,
        module_path: &str,
        always_enabled: bool,
    ) -> Option<NewLineTerminatingOstream> {
        let mut lock = LOG_GLOBALS.lock().unwrap();
        let m = get_log_module(filename, &mut lock);
        let enabled = always_enabled || level <= m.level;
        if enabled {
            let mut stream = NewLineTerminatingOstream {
                message: Vec::new(),
                enabled,
                level,
                lock,
            };
            if level == LogVerb {
                write!(stream, "[{}] ", m.name).unwrap();
            } else {
                write_prefix(&mut stream, level, filename, line, module_path);
            }

            Some(stream)
        } else {
            None
        }
    }
}

/// Low level. Use is_logging!() macro instead.
pub fn is_logging(level: LogLevel, filename: &str, _line: u32, _func_name: &str) -> bool {
    let mut lock = LOG_GLOBALS.lock().unwrap();
    let m = get_log_module(filename, &mut lock);
    level <= m.level
}

impl Drop for NewLineTerminatingOstream {
    fn drop(&mut self) {
        if self.enabled {
            logfork_send(self.level, &self.message, &self.lock);
            self.write(b"\n").unwrap();
            // Flushes self.message to the log file, NOT the file itself.
            self.flush().unwrap_or(());
        }
    }
}

impl Write for NewLineTerminatingOstream {
    fn flush(&mut self) -> Result<()> {
        if self.message.len() > 0 && self.enabled {
            self.lock.log_file.write_all(&self.message)?;
        }
        self.message.clear();
        Ok(())
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if self.enabled {
            self.message.extend_from_slice(buf);
        }

        // Need to pretend these were written even if the stream was not
        // enabled, otherwise the caller gets a WriteZero error.
        Ok(buf.len())
    }
}

pub fn write_prefix(
    stream: &mut dyn Write,
    level: LogLevel,
    filename: &str,
    line: u32,
    _module_path: &str,
) {
    write!(stream, "[{} {}:{}", log_name(level), filename, line).unwrap();

    let err = errno();
    if level <= LogWarn && err != 0 {
        write!(stream, " errno: {}", errno_h2rpc(err)).unwrap();
    }
    write!(stream, "] ").unwrap();
}

/// This is almost always not the method you want. Use log!() macro instead
pub fn log(
    log_level: LogLevel,
    filename: &str,
    line: u32,
    module_path: &str,
    always_enabled: bool,
) -> Option<NewLineTerminatingOstream> {
    NewLineTerminatingOstream::new(log_level, filename, line, module_path, always_enabled)
}

/// Outputs to (possibly write buffered) log file (or stderr if no log file
/// was specified) and to the logfork collector when one is attached.
macro_rules! log {
    ($log_level:expr, $($args:tt)+) => {
        {
            use std::io::Write;
            let maybe_stream = crate::log::log(
                $log_level,
                file!(),
                line!(),
                module_path!(),
                false
            );
            match maybe_stream {
                Some(mut stream) => write!(stream, $($args)+).unwrap(),
                None => ()
            }
        }
    };
}

macro_rules! is_logging {
    ($log_level:expr) => {
        crate::log::is_logging($log_level, file!(), line!(), module_path!())
    };
}

/// Log at FATAL, print the backtrace to stderr and abort.
macro_rules! fatal {
    ($($args:tt)+) => {
        {
            {
                use std::io::Write;
                use crate::log::LogFatal;
                let maybe_stream = crate::log::log(
                    LogFatal,
                    file!(),
                    line!(),
                    module_path!(),
                    true
                );
                match maybe_stream {
                   Some(mut stream) => write!(stream, $($args)+).unwrap(),
                   None => ()
                }
            }
            crate::log::notifying_abort(backtrace::Backtrace::new());
            unreachable!();
        }
    };
}

/// Output to stderr always. No backtrace -- simply exit.
macro_rules! clean_fatal {
    ($($args:tt)+) => {
        use std::io::stderr;
        crate::log::write_prefix(&mut stderr(), crate::log::LogLevel::LogFatal, file!(), line!(), module_path!());
        eprintln!($($args)+);
        std::process::exit(1);
    };
}

/// Dump the stacktrace and abort.
pub fn notifying_abort(bt: Backtrace) -> ! {
    flush_log_buffer();
    dump_stack(bt);
    std::process::abort();
}

fn dump_stack(bt: Backtrace) {
    eprintln!("=== Start tarpcs backtrace:");
    eprintln!("{:?}", bt);
    eprintln!("=== End tarpcs backtrace");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagram_layout() {
        let d = logfork_datagram(2, "first_srv", b"hello");
        assert_eq!(d.len(), 2 + 64 + 5);
        assert_eq!(&d[0..2], &2u16.to_le_bytes());
        assert_eq!(&d[2..11], b"first_srv");
        assert_eq!(d[11], 0);
        assert_eq!(&d[66..], b"hello");
    }

    #[test]
    fn datagram_bounded() {
        let big = vec![b'x'; 1000];
        let d = logfork_datagram(1, "srv", &big);
        assert_eq!(d.len(), 320);
    }

    #[test]
    fn level_parsing() {
        let (default, map) = init_log_levels("all:warn, traffic:verb");
        assert_eq!(default, LogWarn);
        assert_eq!(map.get("traffic"), Some(&LogVerb));
    }
}
