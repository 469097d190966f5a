//! The wrapper corpus: one function per wrapped call. Each wrapper
//! marshals the neutral input record, invokes the resolved target
//! through `CallCtx`, and harvests the outputs. Errno and duration
//! capture happen in the driver, not here.

use crate::dispatch::CallCtx;
use crate::errors::TarpcError;
use crate::tarpc::{Request, Response};

/// Resolves `$name` via the context's library hint and casts it to the
/// wrapped signature, returning `$out` as-is when resolution fails
/// (the recorded error reaches the peer through the driver).
macro_rules! resolve_fn {
    ($ctx:expr, $name:expr, $out:expr, $fty:ty) => {
        match $ctx.resolve($name) {
            Some(addr) => unsafe { std::mem::transmute::<usize, $fty>(addr) },
            None => return $out,
        }
    };
}

pub mod agent;
pub mod aio;
pub mod basic;
pub mod fdset;
pub mod io;
pub mod ioctls;
pub mod netdb;
pub mod sigsets;
pub mod sockopt;

pub fn dispatch_call(ctx: &mut CallCtx, req: &Request) -> Response {
    match req {
        Request::Socket(a) => Response::Socket(basic::socket(ctx, a)),
        Request::Bind(a) => Response::Bind(basic::bind(ctx, a)),
        Request::Connect(a) => Response::Connect(basic::connect(ctx, a)),
        Request::Listen(a) => Response::Listen(basic::listen(ctx, a)),
        Request::Accept(a) => Response::Accept(basic::accept(ctx, a)),
        Request::Close(a) => Response::Close(basic::close(ctx, a)),
        Request::Dup(a) => Response::Dup(basic::dup(ctx, a)),
        Request::Dup2(a) => Response::Dup2(basic::dup2(ctx, a)),
        Request::Shutdown(a) => Response::Shutdown(basic::shutdown(ctx, a)),
        Request::Getsockname(a) => Response::Getsockname(basic::getsockname(ctx, a)),
        Request::Getpeername(a) => Response::Getpeername(basic::getpeername(ctx, a)),
        Request::Open(a) => Response::Open(basic::open(ctx, a)),
        Request::Fsync(a) => Response::Fsync(basic::fsync(ctx, a)),
        Request::Lseek(a) => Response::Lseek(basic::lseek(ctx, a)),
        Request::Waitpid(a) => Response::Waitpid(basic::waitpid(ctx, a)),

        Request::Send(a) => Response::Send(io::send(ctx, a)),
        Request::Recv(a) => Response::Recv(io::recv(ctx, a)),
        Request::Sendto(a) => Response::Sendto(io::sendto(ctx, a)),
        Request::Recvfrom(a) => Response::Recvfrom(io::recvfrom(ctx, a)),
        Request::Read(a) => Response::Read(io::read(ctx, a)),
        Request::Write(a) => Response::Write(io::write(ctx, a)),
        Request::Readv(a) => Response::Readv(io::readv(ctx, a)),
        Request::Writev(a) => Response::Writev(io::writev(ctx, a)),
        Request::Sendmsg(a) => Response::Sendmsg(io::sendmsg(ctx, a)),
        Request::Recvmsg(a) => Response::Recvmsg(io::recvmsg(ctx, a)),
        Request::Sendfile(a) => Response::Sendfile(io::sendfile(ctx, a)),

        Request::Getsockopt(a) => Response::Getsockopt(sockopt::getsockopt(ctx, a)),
        Request::Setsockopt(a) => Response::Setsockopt(sockopt::setsockopt(ctx, a)),
        Request::Ioctl(a) => Response::Ioctl(ioctls::ioctl(ctx, a)),
        Request::Fcntl(a) => Response::Fcntl(basic::fcntl(ctx, a)),
        Request::IfNametoindex(a) => Response::IfNametoindex(ioctls::if_nametoindex(ctx, a)),
        Request::IfIndextoname(a) => Response::IfIndextoname(ioctls::if_indextoname(ctx, a)),
        Request::IfNameindex(a) => Response::IfNameindex(ioctls::if_nameindex(ctx, a)),
        Request::IfFreenameindex(a) => Response::IfFreenameindex(ioctls::if_freenameindex(ctx, a)),

        Request::FdSetNew(a) => Response::FdSetNew(fdset::fd_set_new(ctx, a)),
        Request::FdSetDelete(a) => Response::FdSetDelete(fdset::fd_set_delete(ctx, a)),
        Request::DoFdSet(a) => Response::DoFdSet(fdset::do_fd_set(ctx, a)),
        Request::DoFdClr(a) => Response::DoFdClr(fdset::do_fd_clr(ctx, a)),
        Request::DoFdIsSet(a) => Response::DoFdIsSet(fdset::do_fd_isset(ctx, a)),
        Request::DoFdZero(a) => Response::DoFdZero(fdset::do_fd_zero(ctx, a)),
        Request::Select(a) => Response::Select(fdset::select(ctx, a)),
        Request::Pselect(a) => Response::Pselect(fdset::pselect(ctx, a)),
        Request::Poll(a) => Response::Poll(fdset::poll(ctx, a)),

        Request::SigsetNew(a) => Response::SigsetNew(sigsets::sigset_new(ctx, a)),
        Request::SigsetDelete(a) => Response::SigsetDelete(sigsets::sigset_delete(ctx, a)),
        Request::Sigemptyset(a) => Response::Sigemptyset(sigsets::sigemptyset(ctx, a)),
        Request::Sigfillset(a) => Response::Sigfillset(sigsets::sigfillset(ctx, a)),
        Request::Sigaddset(a) => Response::Sigaddset(sigsets::sigaddset(ctx, a)),
        Request::Sigdelset(a) => Response::Sigdelset(sigsets::sigdelset(ctx, a)),
        Request::Sigismember(a) => Response::Sigismember(sigsets::sigismember(ctx, a)),
        Request::Sigprocmask(a) => Response::Sigprocmask(sigsets::sigprocmask(ctx, a)),
        Request::Sigpending(a) => Response::Sigpending(sigsets::sigpending(ctx, a)),
        Request::Sigsuspend(a) => Response::Sigsuspend(sigsets::sigsuspend(ctx, a)),
        Request::Sigreceived(a) => Response::Sigreceived(sigsets::sigreceived(ctx, a)),
        Request::Signal(a) => Response::Signal(sigsets::signal(ctx, a)),
        Request::Sigaction(a) => Response::Sigaction(sigsets::sigaction(ctx, a)),
        Request::Kill(a) => Response::Kill(basic::kill(ctx, a)),

        Request::Getpid(a) => Response::Getpid(basic::getpid(ctx, a)),
        Request::Gettimeofday(a) => Response::Gettimeofday(basic::gettimeofday(ctx, a)),
        Request::Getuid(a) => Response::Getuid(basic::getuid(ctx, a)),
        Request::Geteuid(a) => Response::Geteuid(basic::geteuid(ctx, a)),
        Request::Setuid(a) => Response::Setuid(basic::setuid(ctx, a)),
        Request::Seteuid(a) => Response::Seteuid(basic::seteuid(ctx, a)),

        Request::Gethostbyname(a) => Response::Gethostbyname(netdb::gethostbyname(ctx, a)),
        Request::Gethostbyaddr(a) => Response::Gethostbyaddr(netdb::gethostbyaddr(ctx, a)),
        Request::Getaddrinfo(a) => Response::Getaddrinfo(netdb::getaddrinfo(ctx, a)),
        Request::Freeaddrinfo(a) => Response::Freeaddrinfo(netdb::freeaddrinfo(ctx, a)),

        Request::CreateAiocb(a) => Response::CreateAiocb(aio::create_aiocb(ctx, a)),
        Request::FillAiocb(a) => Response::FillAiocb(aio::fill_aiocb(ctx, a)),
        Request::DeleteAiocb(a) => Response::DeleteAiocb(aio::delete_aiocb(ctx, a)),
        Request::AioRead(a) => Response::AioRead(aio::aio_read(ctx, a)),
        Request::AioWrite(a) => Response::AioWrite(aio::aio_write(ctx, a)),
        Request::AioError(a) => Response::AioError(aio::aio_error(ctx, a)),
        Request::AioReturn(a) => Response::AioReturn(aio::aio_return(ctx, a)),
        Request::AioCancel(a) => Response::AioCancel(aio::aio_cancel(ctx, a)),
        Request::AioFsync(a) => Response::AioFsync(aio::aio_fsync(ctx, a)),
        Request::AioSuspend(a) => Response::AioSuspend(aio::aio_suspend(ctx, a)),
        Request::LioListio(a) => Response::LioListio(aio::lio_listio(ctx, a)),

        Request::Setlibname(a) => Response::Setlibname(agent::setlibname(ctx, a)),
        Request::RpcFindFunc(a) => Response::RpcFindFunc(agent::rpc_find_func(ctx, a)),
        Request::GetSizeof(a) => Response::GetSizeof(agent::get_sizeof(ctx, a)),
        Request::CreateProcess(a) => Response::CreateProcess(agent::create_process(ctx, a)),
        Request::ThreadCreate(a) => Response::ThreadCreate(agent::thread_create(ctx, a)),
        Request::ThreadCancel(a) => Response::ThreadCancel(agent::thread_cancel(ctx, a)),
        Request::ThreadJoin(a) => Response::ThreadJoin(agent::thread_join(ctx, a)),
        Request::Execve(a) => Response::Execve(agent::execve(ctx, a)),
        Request::PluginEnable(a) => Response::PluginEnable(agent::plugin_enable(ctx, a)),
        Request::PluginDisable(a) => Response::PluginDisable(agent::plugin_disable(ctx, a)),

        Request::SimpleSender(a) => Response::SimpleSender(crate::traffic::simple_sender(ctx, a)),
        Request::SimpleReceiver(a) => {
            Response::SimpleReceiver(crate::traffic::simple_receiver(ctx, a))
        }
        Request::Flooder(a) => Response::Flooder(crate::traffic::flooder(ctx, a)),
        Request::Echoer(a) => Response::Echoer(crate::traffic::echoer(ctx, a)),
        Request::SocketToFile(a) => Response::SocketToFile(crate::traffic::socket_to_file(ctx, a)),
        Request::OverfillBuffers(a) => {
            Response::OverfillBuffers(crate::traffic::overfill_buffers(ctx, a))
        }

        // Served by the driver before dispatch; reaching here means the
        // peer sent it with a plain call mode.
        Request::RpcIsOpDone(_) => {
            ctx.fail(TarpcError::InvalidArgument(
                "rpc_is_op_done outside IS_DONE mode".to_owned(),
            ));
            req.empty_response()
        }
    }
}
