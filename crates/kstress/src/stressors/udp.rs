//! Loopback UDP round trips
//!
//! Each instance reserves a two-port window, binds a receiver and a sender
//! on 127.0.0.1 and bounces random-length datagrams between them.

use core::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use nix::errno::Errno;
use kstress_core::{kdebug, release_ports, reserve_ports, ExitOutcome};
use kstress_runtime::WorkerContext;
use super::Stressor;

/// First port tried; instance `i` starts at `DEFAULT_PORT + 2 * i`
pub const DEFAULT_PORT: u16 = 7000;

const MIN_PAYLOAD: usize = 16;
const MAX_PAYLOAD: usize = 1024;

/// Receive timeout so a lost datagram cannot wedge the loop
const RECV_TIMEOUT_US: libc::suseconds_t = 100_000;

pub struct UdpStressor;

/// Datagram socket bound to a loopback port
struct UdpEndpoint {
    fd: OwnedFd,
    port: u16,
}

fn loopback(port: u16) -> libc::sockaddr_in {
    // Safety: all-zero is a valid sockaddr_in
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_addr.s_addr = u32::from(std::net::Ipv4Addr::LOCALHOST).to_be();
    addr.sin_port = port.to_be();
    addr
}

impl UdpEndpoint {
    /// Bind to `port` on loopback; port 0 picks an ephemeral one
    fn bind(port: u16) -> nix::Result<Self> {
        // Safety: plain socket(2) call
        let raw = Errno::result(unsafe {
            libc::socket(libc::AF_INET, libc::SOCK_DGRAM | libc::SOCK_CLOEXEC, 0)
        })?;
        // Safety: raw is a fresh fd nobody else owns
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let tv = libc::timeval { tv_sec: 0, tv_usec: RECV_TIMEOUT_US };
        // Safety: tv outlives the call and the length matches
        Errno::result(unsafe {
            libc::setsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const libc::c_void,
                mem::size_of_val(&tv) as libc::socklen_t,
            )
        })?;

        let addr = loopback(port);
        // Safety: addr is a sockaddr_in of the given size
        Errno::result(unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of_val(&addr) as libc::socklen_t,
            )
        })?;

        // Safety: all-zero is a valid sockaddr_in
        let mut bound: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of_val(&bound) as libc::socklen_t;
        // Safety: bound and len describe a writable sockaddr_in
        Errno::result(unsafe {
            libc::getsockname(fd.as_raw_fd(), &mut bound as *mut _ as *mut libc::sockaddr, &mut len)
        })?;
        Ok(Self { fd, port: u16::from_be(bound.sin_port) })
    }

    fn send_to(&self, buf: &[u8], port: u16) -> nix::Result<usize> {
        let addr = loopback(port);
        // Safety: buf and addr are valid for the lengths passed
        let n = Errno::result(unsafe {
            libc::sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr() as *const libc::c_void,
                buf.len(),
                0,
                &addr as *const _ as *const libc::sockaddr,
                mem::size_of_val(&addr) as libc::socklen_t,
            )
        })?;
        Ok(n as usize)
    }

    fn recv(&self, buf: &mut [u8]) -> nix::Result<usize> {
        // Safety: buf is writable for its length
        let n = Errno::result(unsafe {
            libc::recv(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0)
        })?;
        Ok(n as usize)
    }
}

/// Releases the reserved window on every exit path
struct PortGuard {
    start: u16,
    end: u16,
}

impl Drop for PortGuard {
    fn drop(&mut self) {
        release_ports(self.start, self.end);
    }
}

impl Stressor for UdpStressor {
    fn name(&self) -> &'static str {
        "udp"
    }

    fn supported(&self) -> Result<(), &'static str> {
        UdpEndpoint::bind(0).map(|_| ()).map_err(|_| "cannot bind a loopback UDP socket")
    }

    fn run(&self, ctx: &mut WorkerContext<'_>) -> ExitOutcome {
        let want = DEFAULT_PORT.saturating_add((ctx.instance() as u16).saturating_mul(2));
        let start = match reserve_ports(want, want.saturating_add(1)) {
            Ok(p) => p,
            Err(e) => {
                kdebug!("udp: instance {}: {}", ctx.instance(), e);
                return ExitOutcome::NoResource;
            }
        };
        let _guard = PortGuard { start, end: start + 1 };

        let rx = match ctx.retry_transient(|| UdpEndpoint::bind(start)) {
            Some(Ok(ep)) => ep,
            Some(Err(e)) => return ctx.errno_outcome("bind receiver", e),
            None => return ExitOutcome::Success,
        };
        let tx = match ctx.retry_transient(|| UdpEndpoint::bind(start + 1)) {
            Some(Ok(ep)) => ep,
            Some(Err(e)) => return ctx.errno_outcome("bind sender", e),
            None => return ExitOutcome::Success,
        };

        let verify = ctx.verify();
        let mut out = [0u8; MAX_PAYLOAD];
        let mut inb = [0u8; MAX_PAYLOAD];
        let mut bytes = 0u64;

        while ctx.keep_running() {
            let len = MIN_PAYLOAD + ctx.rng().bounded_u32((MAX_PAYLOAD - MIN_PAYLOAD + 1) as u32) as usize;
            ctx.rng().fill_bytes(&mut out[..len]);

            match ctx.retry_transient(|| tx.send_to(&out[..len], rx.port)) {
                Some(Ok(_)) => {}
                Some(Err(e)) => return ctx.errno_outcome("sendto", e),
                None => break,
            }
            let n = match ctx.retry_on_eintr(|| rx.recv(&mut inb)) {
                Some(Ok(n)) => n,
                // Timed out; loopback drops are rare but legal
                Some(Err(Errno::EAGAIN)) => continue,
                Some(Err(e)) => return ctx.errno_outcome("recv", e),
                None => break,
            };
            if verify && inb[..n] != out[..len] {
                kdebug!("udp: payload mismatch, sent {} bytes, got {}", len, n);
                return ExitOutcome::Failure;
            }
            bytes += n as u64;
            ctx.bogo_inc();
        }

        let ops = ctx.bogo_get();
        if ops > 0 {
            ctx.metric_set(0, "bytes per bogo-op", bytes as f64 / ops as f64);
        }
        ExitOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_round_trip() {
        let rx = UdpEndpoint::bind(0).unwrap();
        let tx = UdpEndpoint::bind(0).unwrap();
        assert_ne!(rx.port, 0);
        assert_eq!(tx.send_to(b"kstress", rx.port).unwrap(), 7);
        let mut buf = [0u8; 16];
        let n = rx.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"kstress");
    }

    #[test]
    fn test_recv_times_out() {
        let rx = UdpEndpoint::bind(0).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(rx.recv(&mut buf), Err(Errno::EAGAIN));
    }
}
