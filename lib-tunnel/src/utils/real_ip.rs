//! Proxy-chain client IP resolution
//!
//! Walks the `X-Forwarded-For` chain from the trusted end inward and returns
//! the first hop that does not belong to a trusted proxy range.

use std::net::IpAddr;

use anyhow::Result;

/// How far to trust proxy-supplied forwarding headers.
#[derive(Debug, Clone)]
pub enum TrustProxy {
    /// Ignore forwarding headers; the socket address is the client.
    Disabled,
    /// Trust the whole chain; the leftmost entry is the client.
    All,
    /// Trust only proxies inside these ranges.
    Ranges(Vec<Cidr>),
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cidr {
    network: IpAddr,
    prefix: u8,
}

impl Cidr {
    /// Parse `"10.0.0.0/8"` or `"fd00::/8"`. A bare address is a host route.
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = match s.split_once('/') {
            Some((addr, prefix)) => {
                let prefix: u8 = prefix
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Invalid CIDR prefix: {}", s))?;
                (addr, Some(prefix))
            }
            None => (s, None),
        };

        let network: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid CIDR address: {}", s))?;

        let max = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        let prefix = prefix.unwrap_or(max);
        if prefix > max {
            return Err(anyhow::anyhow!("CIDR prefix out of range: {}", s));
        }

        Ok(Self { network, prefix })
    }

    /// Whether `ip` falls inside this network. Mixed families never match.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                prefix_match(&net.octets(), &addr.octets(), self.prefix)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                prefix_match(&net.octets(), &addr.octets(), self.prefix)
            }
            _ => false,
        }
    }
}

fn prefix_match(net: &[u8], addr: &[u8], prefix: u8) -> bool {
    let full_bytes = (prefix / 8) as usize;
    if net[..full_bytes] != addr[..full_bytes] {
        return false;
    }

    let rem = prefix % 8;
    if rem == 0 {
        return true;
    }
    let mask = 0xFFu8 << (8 - rem);
    (net[full_bytes] & mask) == (addr[full_bytes] & mask)
}

/// Parse an `X-Forwarded-For` header value into addresses, leftmost first.
/// Entries that do not parse are dropped.
pub fn parse_forwarded_for(header: &str) -> Vec<IpAddr> {
    header
        .split(',')
        .filter_map(|entry| entry.trim().parse().ok())
        .collect()
}

/// Resolve the client address from the forwarding chain plus the transport's
/// own remote address.
pub fn resolve_real_ip(forwarded: &[IpAddr], remote: IpAddr, trust: &TrustProxy) -> IpAddr {
    match trust {
        TrustProxy::Disabled => remote,
        TrustProxy::All => forwarded.first().copied().unwrap_or(remote),
        TrustProxy::Ranges(ranges) => {
            let trusted = |ip: &IpAddr| ranges.iter().any(|cidr| cidr.contains(ip));

            // Walk from the transport inward through the chain.
            let mut current = remote;
            for hop in forwarded.iter().rev() {
                if !trusted(&current) {
                    return current;
                }
                current = *hop;
            }
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_parse_and_contains() -> Result<()> {
        let net = Cidr::parse("10.0.0.0/8")?;
        assert!(net.contains(&ip("10.1.2.3")));
        assert!(!net.contains(&ip("11.0.0.1")));
        assert!(!net.contains(&ip("::1")));

        let host = Cidr::parse("192.168.1.5")?;
        assert!(host.contains(&ip("192.168.1.5")));
        assert!(!host.contains(&ip("192.168.1.6")));

        let v6 = Cidr::parse("fd00::/8")?;
        assert!(v6.contains(&ip("fd12::1")));
        assert!(!v6.contains(&ip("fe80::1")));

        assert!(Cidr::parse("10.0.0.0/33").is_err());
        assert!(Cidr::parse("not-an-ip/8").is_err());

        Ok(())
    }

    #[test]
    fn test_disabled_uses_socket_address() {
        let forwarded = [ip("1.2.3.4"), ip("10.0.0.1")];
        assert_eq!(
            resolve_real_ip(&forwarded, ip("10.0.0.2"), &TrustProxy::Disabled),
            ip("10.0.0.2")
        );
    }

    #[test]
    fn test_all_uses_leftmost() {
        let forwarded = [ip("1.2.3.4"), ip("10.0.0.1")];
        assert_eq!(
            resolve_real_ip(&forwarded, ip("10.0.0.2"), &TrustProxy::All),
            ip("1.2.3.4")
        );
        assert_eq!(
            resolve_real_ip(&[], ip("10.0.0.2"), &TrustProxy::All),
            ip("10.0.0.2")
        );
    }

    #[test]
    fn test_ranges_walk_stops_at_first_untrusted() -> Result<()> {
        let trust = TrustProxy::Ranges(vec![Cidr::parse("10.0.0.0/8")?]);

        // Client behind two trusted proxies.
        let forwarded = [ip("203.0.113.7"), ip("10.0.0.5")];
        assert_eq!(
            resolve_real_ip(&forwarded, ip("10.0.0.9"), &trust),
            ip("203.0.113.7")
        );

        // Untrusted socket address wins outright.
        assert_eq!(
            resolve_real_ip(&forwarded, ip("198.51.100.1"), &trust),
            ip("198.51.100.1")
        );

        // A spoofed entry beyond an untrusted hop is never reached.
        let forwarded = [ip("203.0.113.7"), ip("198.51.100.1"), ip("10.0.0.5")];
        assert_eq!(
            resolve_real_ip(&forwarded, ip("10.0.0.9"), &trust),
            ip("198.51.100.1")
        );

        Ok(())
    }

    #[test]
    fn test_fully_trusted_chain_returns_leftmost() -> Result<()> {
        let trust = TrustProxy::Ranges(vec![Cidr::parse("10.0.0.0/8")?]);
        let forwarded = [ip("10.2.0.1"), ip("10.0.0.5")];
        assert_eq!(
            resolve_real_ip(&forwarded, ip("10.0.0.9"), &trust),
            ip("10.2.0.1")
        );
        Ok(())
    }

    #[test]
    fn test_parse_forwarded_for() {
        let parsed = parse_forwarded_for("203.0.113.7, 10.0.0.5 , garbage, fd00::1");
        assert_eq!(parsed, vec![ip("203.0.113.7"), ip("10.0.0.5"), ip("fd00::1")]);
    }
}
