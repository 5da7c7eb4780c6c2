// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport addresses and the factory registry.
//!
//! Addresses are strings with a carrier prefix: `tcp4:host:port`,
//! `tcp6:[host]:port`, `unxs:/path`, `unxs:@abstract`, the datagram
//! variants `udp4`/`udp6`/`unxdgrm`, and `internal:<name>` for
//! in-process pairs. Resolution offers the string to every registered
//! factory in order; the first factory that recognizes the prefix wins.

use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4, SocketAddrV6, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use smol_str::SmolStr;

use plinth_core::error::{Error, Result};
use plinth_mainloop::Mainloop;

use crate::transport::{Driver, Flags, Mode};

/// A Unix socket name: a filesystem path or an abstract-namespace name
/// (written with a leading `@`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnixName {
    Path(PathBuf),
    Abstract(Vec<u8>),
}

impl std::fmt::Display for UnixName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnixName::Path(p) => write!(f, "{}", p.display()),
            UnixName::Abstract(name) => {
                write!(f, "@{}", String::from_utf8_lossy(name))
            }
        }
    }
}

/// A resolved transport address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Tcp4(SocketAddrV4),
    Tcp6(SocketAddrV6),
    Udp4(SocketAddrV4),
    Udp6(SocketAddrV6),
    UnxStream(UnixName),
    UnxDgram(UnixName),
    Internal(SmolStr),
}

impl Address {
    /// The factory prefix this address belongs to.
    pub fn prefix(&self) -> &'static str {
        match self {
            Address::Tcp4(_) => "tcp4",
            Address::Tcp6(_) => "tcp6",
            Address::Udp4(_) => "udp4",
            Address::Udp6(_) => "udp6",
            Address::UnxStream(_) => "unxs",
            Address::UnxDgram(_) => "unxdgrm",
            Address::Internal(_) => "internal",
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Tcp4(a) => write!(f, "tcp4:{a}"),
            Address::Tcp6(a) => write!(f, "tcp6:[{}]:{}", a.ip(), a.port()),
            Address::Udp4(a) => write!(f, "udp4:{a}"),
            Address::Udp6(a) => write!(f, "udp6:[{}]:{}", a.ip(), a.port()),
            Address::UnxStream(n) => write!(f, "unxs:{n}"),
            Address::UnxDgram(n) => write!(f, "unxdgrm:{n}"),
            Address::Internal(n) => write!(f, "internal:{n}"),
        }
    }
}

/// One registered carrier: an address prefix, its resolver, and its
/// driver constructor.
pub trait TransportFactory: Send + Sync {
    fn prefix(&self) -> &'static str;

    /// Parse and resolve an address string of this factory's prefix;
    /// `NotFound` here means "not mine, try the next factory".
    fn resolve(&self, addr: &str) -> Result<Address>;

    fn create(&self, ml: &Mainloop, mode: Mode, flags: Flags) -> Result<Box<dyn Driver>>;
}

fn registry() -> &'static RwLock<HashMap<SmolStr, Arc<dyn TransportFactory>>> {
    static REGISTRY: OnceLock<RwLock<HashMap<SmolStr, Arc<dyn TransportFactory>>>> =
        OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: HashMap<SmolStr, Arc<dyn TransportFactory>> = HashMap::new();
        for factory in builtin_factories() {
            map.insert(factory.prefix().into(), factory);
        }
        RwLock::new(map)
    })
}

fn builtin_factories() -> Vec<Arc<dyn TransportFactory>> {
    vec![
        Arc::new(crate::stream::StreamFactory::new("tcp4")),
        Arc::new(crate::stream::StreamFactory::new("tcp6")),
        Arc::new(crate::stream::StreamFactory::new("unxs")),
        Arc::new(crate::dgram::DgramFactory::new("udp4")),
        Arc::new(crate::dgram::DgramFactory::new("udp6")),
        Arc::new(crate::dgram::DgramFactory::new("unxdgrm")),
        Arc::new(crate::internal::InternalFactory),
    ]
}

/// Register an additional carrier; duplicate prefixes fail with
/// `Exists`.
pub fn register_factory(factory: Arc<dyn TransportFactory>) -> Result<()> {
    let mut reg = registry().write();
    let prefix: SmolStr = factory.prefix().into();
    if reg.contains_key(&prefix) {
        return Err(Error::Exists);
    }
    reg.insert(prefix, factory);
    Ok(())
}

pub(crate) fn find_factory(prefix: &str) -> Option<Arc<dyn TransportFactory>> {
    registry().read().get(prefix).cloned()
}

/// Resolve an address string through the registered factories.
pub fn resolve_address(addr: &str) -> Result<Address> {
    let factories: Vec<Arc<dyn TransportFactory>> =
        registry().read().values().cloned().collect();
    for factory in factories {
        match factory.resolve(addr) {
            Ok(resolved) => return Ok(resolved),
            Err(Error::NotFound) => continue,
            Err(other) => return Err(other),
        }
    }
    Err(Error::AddrResolve(addr.to_string()))
}

/*
 * shared address parsing for the socket factories
 */

/// Split `host:port`, accepting `[v6]:port` brackets. Unbracketed IPv6
/// literals are rejected: with bare colons the port is ambiguous.
pub(crate) fn split_host_port(rest: &str) -> Result<(&str, u16)> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| Error::AddrResolve(format!("missing port in '{rest}'")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| Error::AddrResolve(format!("bad port in '{rest}'")))?;

    if let Some(stripped) = host.strip_prefix('[') {
        let host = stripped
            .strip_suffix(']')
            .ok_or_else(|| Error::AddrResolve(format!("unbalanced brackets in '{rest}'")))?;
        Ok((host, port))
    } else {
        if host.contains(':') {
            return Err(Error::AddrResolve(format!(
                "unbracketed IPv6 literal in '{rest}'"
            )));
        }
        Ok((host, port))
    }
}

/// Resolve `host:port` to a v4 socket address.
pub(crate) fn lookup_v4(rest: &str) -> Result<SocketAddrV4> {
    let (host, port) = split_host_port(rest)?;
    (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddrResolve(format!("cannot resolve '{host}'")))?
        .find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::AddrResolve(format!("no IPv4 address for '{host}'")))
}

/// Resolve `[host]:port` to a v6 socket address.
pub(crate) fn lookup_v6(rest: &str) -> Result<SocketAddrV6> {
    let (host, port) = split_host_port(rest)?;
    (host, port)
        .to_socket_addrs()
        .map_err(|_| Error::AddrResolve(format!("cannot resolve '{host}'")))?
        .find_map(|a| match a {
            SocketAddr::V6(v6) => Some(v6),
            SocketAddr::V4(_) => None,
        })
        .ok_or_else(|| Error::AddrResolve(format!("no IPv6 address for '{host}'")))
}

/// Parse a Unix socket name; `@name` selects the abstract namespace.
pub(crate) fn parse_unix(rest: &str) -> Result<UnixName> {
    if rest.is_empty() {
        return Err(Error::AddrResolve("empty socket path".to_string()));
    }
    match rest.strip_prefix('@') {
        Some(name) if !name.is_empty() => Ok(UnixName::Abstract(name.as_bytes().to_vec())),
        Some(_) => Err(Error::AddrResolve("empty abstract name".to_string())),
        None => Ok(UnixName::Path(PathBuf::from(rest))),
    }
}

#[cfg(test)]
#[path = "addr_tests.rs"]
mod tests;
