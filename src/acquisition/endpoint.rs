//! Sensor endpoint addresses.

use std::fmt;

use super::LinkError;

/// How bytes are carried to the serial device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Telnet with COM-PORT-OPTION negotiation (RFC 2217)
    Rfc2217,
    /// Bare TCP stream, payload only
    RawTcp,
}

/// Parsed `scheme://host:port` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse `rfc2217://host:port`, `socket://host:port` or bare `host:port`.
    ///
    /// Bare addresses default to RFC 2217. IPv6 hosts go in brackets.
    pub fn parse(raw: &str) -> Result<Self, LinkError> {
        let invalid = |reason: &str| LinkError::InvalidEndpoint {
            endpoint: raw.to_string(),
            reason: reason.to_string(),
        };

        let raw_trimmed = raw.trim();
        let (transport, rest) = match raw_trimmed.split_once("://") {
            Some(("rfc2217", rest)) => (Transport::Rfc2217, rest),
            Some(("socket", rest)) => (Transport::RawTcp, rest),
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme '{scheme}'"))),
            None => (Transport::Rfc2217, raw_trimmed),
        };

        // pyserial-style URLs may carry options after '?'; none are used here
        let authority = rest.split(['?', '/']).next().unwrap_or_default();

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected HOST:PORT"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port number"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }

        Ok(Self {
            transport,
            host: host.to_string(),
            port,
        })
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    pub fn socket_addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.transport {
            Transport::Rfc2217 => "rfc2217",
            Transport::RawTcp => "socket",
        };
        write!(f, "{scheme}://{}", self.socket_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc2217_url() {
        let ep = Endpoint::parse("rfc2217://localhost:5000").unwrap();
        assert_eq!(ep.transport, Transport::Rfc2217);
        assert_eq!(ep.host, "localhost");
        assert_eq!(ep.port, 5000);
        assert_eq!(ep.to_string(), "rfc2217://localhost:5000");
    }

    #[test]
    fn test_socket_url_and_bare_address() {
        let raw = Endpoint::parse("socket://10.0.0.7:4001").unwrap();
        assert_eq!(raw.transport, Transport::RawTcp);
        assert_eq!(raw.socket_addr(), "10.0.0.7:4001");

        let bare = Endpoint::parse("sensor-gw:7000").unwrap();
        assert_eq!(bare.transport, Transport::Rfc2217);
        assert_eq!(bare.host, "sensor-gw");
    }

    #[test]
    fn test_url_options_are_ignored() {
        let ep = Endpoint::parse("rfc2217://gw:2217?ign_set_control&timeout=3").unwrap();
        assert_eq!(ep.socket_addr(), "gw:2217");
    }

    #[test]
    fn test_ipv6_host() {
        let ep = Endpoint::parse("socket://[::1]:5000").unwrap();
        assert_eq!(ep.host, "::1");
        assert_eq!(ep.socket_addr(), "[::1]:5000");
    }

    #[test]
    fn test_invalid_endpoints() {
        for bad in [
            "",
            "localhost",
            "rfc2217://:5000",
            "rfc2217://host:http",
            "rfc2217://host:0",
            "rfc2217://host:70000",
            "serial:///dev/ttyUSB0",
        ] {
            let err = Endpoint::parse(bad).unwrap_err();
            assert!(matches!(err, LinkError::InvalidEndpoint { .. }), "input {bad:?}");
            assert!(!err.is_recoverable());
        }
    }
}
