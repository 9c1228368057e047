// ABOUTME: Published ports of compose services.
// ABOUTME: Parses formats like "80", "8080:80", "127.0.0.1:8080:80/udp".

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// Kubernetes spelling.
    pub fn as_k8s(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// A port the service publishes. Only the container side matters in-cluster:
/// the Service exposes it on the same port number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortSpec {
    pub container_port: u16,
    pub host_port: Option<u16>,
    pub protocol: Protocol,
}

impl PortSpec {
    pub fn container_only(container_port: u16) -> Self {
        Self {
            container_port,
            host_port: None,
            protocol: Protocol::Tcp,
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        let s = s.trim();
        if s.is_empty() {
            return Err("port cannot be empty".to_string());
        }

        // Format: [[host_ip:]host_port:]container_port[/protocol]
        let (ports, protocol) = match s.rsplit_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, other)) => return Err(format!("unsupported protocol: {}", other)),
            None => (s, Protocol::Tcp),
        };

        let (host_part, container_part) = match ports.rsplit_once(':') {
            Some((host, container)) => (Some(host), container),
            None => (None, ports),
        };

        let container_port = parse_port(container_part)?;

        // The host side may still carry an IP prefix; only its port is kept.
        let host_port = host_part
            .map(|h| h.rsplit_once(':').map(|(_, port)| port).unwrap_or(h))
            .filter(|p| !p.is_empty())
            .map(parse_port)
            .transpose()?;

        Ok(PortSpec {
            container_port,
            host_port,
            protocol,
        })
    }
}

fn parse_port(s: &str) -> Result<u16, String> {
    if s.contains('-') {
        return Err(format!("port ranges are not supported: {}", s));
    }
    match s.parse::<u16>() {
        Ok(0) | Err(_) => Err(format!("invalid port: {}", s)),
        Ok(port) => Ok(port),
    }
}
