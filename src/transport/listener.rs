//! Raw-socket TCP listener setup.
//!
//! `std::net::TcpListener` has no way to set `SO_REUSEPORT`, so the
//! listening socket is built with raw `libc` calls (the reactor module
//! already leans on `libc` for epoll/eventfd) and handed back wrapped in
//! a `std::net::TcpListener` for everything past `bind`/`listen`.

use std::io;
use std::mem;
use std::net::{SocketAddr, SocketAddrV4, TcpListener};
use std::os::unix::io::{FromRawFd, RawFd};

/// Backlog passed to `listen(2)`. Generous relative to expected
/// concurrent SETUP bursts from one client population.
const BACKLOG: i32 = 1024;

/// Minimum send-buffer size requested on every accepted connection so a
/// burst of RTP fragments destined for a slow TCP-interleaved client
/// doesn't immediately trip `EWOULDBLOCK`.
pub const MIN_SEND_BUFFER: i32 = 100 * 1024;

/// Bind a non-blocking, `SO_REUSEADDR`/`SO_REUSEPORT` TCP listener.
pub fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let SocketAddr::V4(addr) = addr else {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "only IPv4 listen addresses are supported",
        ));
    };

    unsafe {
        let fd = libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_NONBLOCK, 0);
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        let on: libc::c_int = 1;
        set_sockopt(fd, libc::SO_REUSEADDR, on)?;
        set_sockopt(fd, libc::SO_REUSEPORT, on)?;

        let sockaddr = sockaddr_v4(addr);
        let ret = libc::bind(
            fd,
            &sockaddr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        );
        if ret < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        if libc::listen(fd, BACKLOG) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            return Err(err);
        }

        Ok(TcpListener::from_raw_fd(fd))
    }
}

/// Apply the per-connection socket options every accepted RTSP client
/// gets: non-blocking, TCP keepalive, and a generous send buffer.
pub fn configure_accepted(fd: RawFd) -> io::Result<()> {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }

        let on: libc::c_int = 1;
        set_sockopt(fd, libc::SO_KEEPALIVE, on)?;
        set_sockopt(fd, libc::SO_SNDBUF, MIN_SEND_BUFFER)?;
    }
    Ok(())
}

unsafe fn set_sockopt(fd: RawFd, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    unsafe {
        let ret = libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        );
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn sockaddr_v4(addr: SocketAddrV4) -> libc::sockaddr_in {
    libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: addr.port().to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from_ne_bytes(addr.ip().octets()),
        },
        sin_zero: [0; 8],
    }
}
