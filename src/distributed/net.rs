//! Socket helpers
//!
//! Socket options tokio does not expose: address/port reuse on the discovery
//! socket (several workers on one host must all hear the same broadcast) and
//! aggressive TCP keepalive on worker connections during result collection.

use std::io;
use std::net::{SocketAddrV4, UdpSocket};

#[cfg(unix)]
use std::os::unix::io::RawFd;

#[cfg(unix)]
fn set_int_option(fd: RawFd, level: libc::c_int, name: libc::c_int, value: libc::c_int) -> io::Result<()> {
    let result = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Bind a UDP socket on `addr` with `SO_REUSEADDR` and `SO_REUSEPORT` set
///
/// The options must be set before `bind`, which `std::net::UdpSocket::bind`
/// does not allow, so the socket is built with raw syscalls.
#[cfg(unix)]
pub fn bind_reusable_udp(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    use std::os::unix::io::FromRawFd;

    let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_DGRAM, libc::IPPROTO_UDP) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Owns the descriptor from here on, closing it on any early return
    let socket = unsafe { UdpSocket::from_raw_fd(fd) };

    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR, 1)?;
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_REUSEPORT, 1)?;

    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*addr.ip()).to_be(),
    };
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd",
        target_os = "dragonfly"
    ))]
    {
        sin.sin_len = std::mem::size_of::<libc::sockaddr_in>() as u8;
    }

    let result = unsafe {
        libc::bind(
            fd,
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(socket)
}

#[cfg(not(unix))]
pub fn bind_reusable_udp(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    UdpSocket::bind(addr)
}

/// Enable TCP keepalive with a one second idle time, interval and probe count
#[cfg(target_os = "linux")]
pub fn enable_keepalive(stream: &tokio::net::TcpStream) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    set_int_option(fd, libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)?;
    set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPIDLE, 1)?;
    set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPINTVL, 1)?;
    set_int_option(fd, libc::IPPROTO_TCP, libc::TCP_KEEPCNT, 1)?;
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn enable_keepalive(stream: &tokio::net::TcpStream) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    set_int_option(stream.as_raw_fd(), libc::SOL_SOCKET, libc::SO_KEEPALIVE, 1)
}

#[cfg(not(unix))]
pub fn enable_keepalive(_stream: &tokio::net::TcpStream) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_bind_reusable_udp_ephemeral() {
        let socket = bind_reusable_udp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let local = socket.local_addr().unwrap();
        assert!(local.port() > 0);
        assert!(local.ip().is_loopback());
    }

    #[cfg(unix)]
    #[test]
    fn test_port_can_be_shared() {
        let first = bind_reusable_udp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = first.local_addr().unwrap().port();

        let second = bind_reusable_udp(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        assert!(second.is_ok(), "second bind failed: {:?}", second.err());
    }

    #[tokio::test]
    async fn test_enable_keepalive() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_server, _) = listener.accept().await.unwrap();

        enable_keepalive(&client).unwrap();
    }
}
