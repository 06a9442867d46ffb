//! Address resolution and peer identification.
//!
//! Resolution turns a port into an ordered list of IPv4/TCP candidates using
//! the system resolver with no host, which yields the local address. The
//! order is exactly what the resolver returned; the first candidate that can
//! be established wins downstream.

use crate::error::{IdentifyError, ResolutionError};
use socket2::{Domain, Protocol, Type};
use std::ffi::{CStr, CString};
use std::fmt;
use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::raw::c_char;
use std::ptr;
use tracing::debug;

/// Port used when none is given.
pub const DEFAULT_PORT: &str = "8080";

/// Name reported for a peer whose reverse lookup failed.
pub const UNNAMED: &str = "unnamed";

const NAME_MAX: usize = 1025;
const SERVICE_MAX: usize = 32;

/// Host/port pair to resolve. The host is `None` for the local address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: String,
}

impl Endpoint {
    /// Endpoint on the local address.
    pub fn local(port: impl Into<String>) -> Self {
        Self {
            host: None,
            port: port.into(),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) => write!(f, "{host}:{}", self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

/// One resolved address usable to create a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCandidate {
    pub family: Domain,
    pub socket_type: Type,
    pub protocol: Option<Protocol>,
    pub addr: SocketAddr,
}

impl AddressCandidate {
    /// TCP candidate for an IPv4 address.
    pub fn tcp_v4(addr: SocketAddrV4) -> Self {
        Self {
            family: Domain::IPV4,
            socket_type: Type::STREAM,
            protocol: Some(Protocol::TCP),
            addr: SocketAddr::V4(addr),
        }
    }

    /// Build a candidate from one resolver entry. Non-IPv4 entries are skipped.
    fn from_addrinfo(info: &libc::addrinfo) -> Option<Self> {
        if info.ai_family != libc::AF_INET || info.ai_addr.is_null() {
            return None;
        }
        // SAFETY: the resolver guarantees `ai_addr` points at a `sockaddr_in`
        // when `ai_family` is `AF_INET`.
        let sin = unsafe { &*(info.ai_addr as *const libc::sockaddr_in) };
        let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
        let port = u16::from_be(sin.sin_port);

        Some(Self {
            family: Domain::from(info.ai_family),
            socket_type: Type::from(info.ai_socktype),
            protocol: (info.ai_protocol != 0).then(|| Protocol::from(info.ai_protocol)),
            addr: SocketAddr::V4(SocketAddrV4::new(ip, port)),
        })
    }
}

/// Owned resolver result list, freed on drop.
struct AddrInfoList(*mut libc::addrinfo);

impl AddrInfoList {
    fn candidates(&self) -> Vec<AddressCandidate> {
        let mut out = Vec::new();
        let mut cursor = self.0;
        while !cursor.is_null() {
            // SAFETY: `cursor` walks the list returned by `getaddrinfo`,
            // which stays alive until `self` is dropped.
            let info = unsafe { &*cursor };
            out.extend(AddressCandidate::from_addrinfo(info));
            cursor = info.ai_next;
        }
        out
    }
}

impl Drop for AddrInfoList {
    fn drop(&mut self) {
        if !self.0.is_null() {
            unsafe { libc::freeaddrinfo(self.0) };
        }
    }
}

/// Resolve an endpoint to IPv4 stream candidates.
pub fn resolve(endpoint: &Endpoint) -> Result<Vec<AddressCandidate>, ResolutionError> {
    debug!(endpoint = %endpoint, "looking up port");

    let port = CString::new(endpoint.port.as_str())
        .map_err(|_| ResolutionError::InvalidPort(endpoint.port.clone()))?;
    let host = match &endpoint.host {
        Some(host) => Some(
            CString::new(host.as_str())
                .map_err(|_| ResolutionError::InvalidHost(host.clone()))?,
        ),
        None => None,
    };

    // SAFETY: an all-zero `addrinfo` is the documented "no criteria" hint.
    let mut hints: libc::addrinfo = unsafe { mem::zeroed() };
    hints.ai_family = libc::AF_INET;
    hints.ai_socktype = libc::SOCK_STREAM;

    let mut results: *mut libc::addrinfo = ptr::null_mut();
    let host_ptr = host.as_ref().map_or(ptr::null(), |h| h.as_ptr());
    let status = unsafe { libc::getaddrinfo(host_ptr, port.as_ptr(), &hints, &mut results) };
    if status != 0 {
        let os_error = io::Error::last_os_error();
        return Err(ResolutionError::Lookup {
            port: endpoint.port.clone(),
            code: status,
            diagnostic: gai_diagnostic(status),
            os_error,
        });
    }

    let list = AddrInfoList(results);
    let candidates = list.candidates();
    if candidates.is_empty() {
        return Err(ResolutionError::NoCandidates {
            port: endpoint.port.clone(),
        });
    }

    debug!(count = candidates.len(), "resolved candidates");
    Ok(candidates)
}

fn gai_diagnostic(code: i32) -> String {
    // SAFETY: `gai_strerror` returns a static NUL-terminated string.
    unsafe { CStr::from_ptr(libc::gai_strerror(code)) }
        .to_string_lossy()
        .into_owned()
}

/// Identity of the remote end of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// Host name, or `None` when the reverse lookup failed.
    pub name: Option<String>,
    pub port: String,
}

impl Peer {
    pub fn unnamed(port: u16) -> Self {
        Self {
            name: None,
            port: port.to_string(),
        }
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name.as_deref().unwrap_or(UNNAMED), self.port)
    }
}

/// Reverse-resolve a peer address to a host name and numeric port.
pub fn identify(addr: &SocketAddr) -> Result<Peer, IdentifyError> {
    let SocketAddr::V4(v4) = addr else {
        return Err(IdentifyError::Unsupported);
    };

    // SAFETY: zeroed `sockaddr_in` is valid; the fields are filled below.
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = v4.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from(*v4.ip()).to_be(),
    };
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))]
    {
        sin.sin_len = mem::size_of::<libc::sockaddr_in>() as u8;
    }

    let mut name = [0 as c_char; NAME_MAX];
    let mut service = [0 as c_char; SERVICE_MAX];
    let status = unsafe {
        libc::getnameinfo(
            &sin as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            name.as_mut_ptr(),
            NAME_MAX as _,
            service.as_mut_ptr(),
            SERVICE_MAX as _,
            libc::NI_NUMERICSERV,
        )
    };
    if status != 0 {
        return Err(IdentifyError::Lookup {
            code: status,
            diagnostic: gai_diagnostic(status),
        });
    }

    // SAFETY: on success both buffers hold NUL-terminated strings.
    let name = unsafe { CStr::from_ptr(name.as_ptr()) }.to_string_lossy().into_owned();
    let port = unsafe { CStr::from_ptr(service.as_ptr()) }
        .to_string_lossy()
        .into_owned();

    Ok(Peer {
        name: Some(name),
        port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_local_port() {
        let candidates = resolve(&Endpoint::local("9090")).unwrap();
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            assert_eq!(candidate.family, Domain::IPV4);
            assert_eq!(candidate.socket_type, Type::STREAM);
            assert_eq!(candidate.addr.port(), 9090);
            assert!(candidate.addr.is_ipv4());
        }
    }

    #[test]
    fn test_resolve_unknown_service() {
        match resolve(&Endpoint::local("no-such-service-name")) {
            Err(ResolutionError::Lookup { port, code, .. }) => {
                assert_eq!(port, "no-such-service-name");
                assert_ne!(code, 0);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_rejects_nul() {
        assert!(matches!(
            resolve(&Endpoint::local("80\0")),
            Err(ResolutionError::InvalidPort(_))
        ));
    }

    #[test]
    fn test_resolve_explicit_host() {
        let endpoint = Endpoint {
            host: Some("127.0.0.1".to_string()),
            port: "9090".to_string(),
        };
        let candidates = resolve(&endpoint).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].addr, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_resolve_rejects_nul_host() {
        let endpoint = Endpoint {
            host: Some("local\0host".to_string()),
            port: "9090".to_string(),
        };
        assert!(matches!(
            resolve(&endpoint),
            Err(ResolutionError::InvalidHost(host)) if host == "local\0host"
        ));
    }

    #[test]
    fn test_identify_loopback() {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let peer = identify(&addr).unwrap();
        assert!(peer.name.is_some());
        assert_eq!(peer.port, "40000");
    }

    #[test]
    fn test_identify_ipv6_unsupported() {
        let addr: SocketAddr = "[::1]:40000".parse().unwrap();
        assert!(matches!(identify(&addr), Err(IdentifyError::Unsupported)));
    }

    #[test]
    fn test_peer_display() {
        assert_eq!(Peer::unnamed(1234).to_string(), "unnamed:1234");
        let named = Peer {
            name: Some("localhost".to_string()),
            port: "80".to_string(),
        };
        assert_eq!(named.to_string(), "localhost:80");
        assert_eq!(Endpoint::local("8080").to_string(), "*:8080");
    }
}
