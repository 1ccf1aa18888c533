//! Hostname resolution on the executor.
//!
//! `getaddrinfo` is a blocking call, so lookups run on an executor worker
//! and the task suspends until the results arrive.

use crate::error::{Error, ErrorKind, Result};
use crate::net::{AddressFamily, TcpEndpoint};
use crate::reactor::{invoke_blocking, ReactorHandle};
use std::net::ToSocketAddrs;

/// Resolves `host` to TCP endpoints on `port`, optionally restricted to one
/// address family.
///
/// Returns at least one endpoint on success; a name that resolves to no
/// address in the requested family maps to `NotFound`.
pub async fn resolve_tcp(
    reactor: &ReactorHandle,
    host: &str,
    port: u16,
    family: Option<AddressFamily>,
) -> Result<Vec<TcpEndpoint>> {
    let query = (host.to_owned(), port);
    let resolved = invoke_blocking(reactor.get().executor(), move || {
        query.to_socket_addrs().map(|addrs| addrs.collect::<Vec<_>>())
    })
    .await
    .map_err(Error::from_os)?;

    let endpoints: Vec<TcpEndpoint> = resolved
        .into_iter()
        .filter(|addr| match family {
            Some(AddressFamily::Inet) => addr.is_ipv4(),
            Some(AddressFamily::Inet6) => addr.is_ipv6(),
            Some(AddressFamily::Unix) => false,
            None => true,
        })
        .map(TcpEndpoint::from_socket_addr)
        .collect();

    if endpoints.is_empty() {
        return Err(Error::new(ErrorKind::NotFound));
    }
    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::wait;

    #[test]
    fn resolves_a_literal_address() {
        let reactor = ReactorHandle::acquire().unwrap();
        let endpoints =
            wait(resolve_tcp(&reactor, "127.0.0.1", 80, Some(AddressFamily::Inet))).unwrap();
        assert_eq!(endpoints[0].to_string(), "127.0.0.1:80");
    }

    #[test]
    fn family_filter_with_no_match_is_not_found() {
        let reactor = ReactorHandle::acquire().unwrap();
        let err = wait(resolve_tcp(
            &reactor,
            "127.0.0.1",
            80,
            Some(AddressFamily::Unix),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
