//! `[ip:][host:]container[/proto]` port mapping specs

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortMappingError {
    #[error("port mapping is empty")]
    Empty,

    #[error("invalid port {value:?}")]
    InvalidPort { value: String },

    #[error("unsupported protocol {value:?}")]
    InvalidProtocol { value: String },

    #[error("too many ':' separated parts in {spec:?}")]
    TooManyParts { spec: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Sctp => "sctp",
        })
    }
}

impl FromStr for Protocol {
    type Err = PortMappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            _ => Err(PortMappingError::InvalidProtocol {
                value: s.to_string(),
            }),
        }
    }
}

/// A single host-to-container port binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortMapping {
    pub host_ip: Option<String>,
    /// `None` lets the runtime pick a free host port
    pub host_port: Option<u16>,
    pub container_port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Key used by the Docker API, e.g. `80/tcp`
    pub fn container_key(&self) -> String {
        format!("{}/{}", self.container_port, self.protocol)
    }
}

fn parse_port(value: &str) -> Result<u16, PortMappingError> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(PortMappingError::InvalidPort {
            value: value.to_string(),
        }),
    }
}

impl FromStr for PortMapping {
    type Err = PortMappingError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(PortMappingError::Empty);
        }

        let (ports, protocol) = match spec.rsplit_once('/') {
            Some((ports, proto)) => (ports, proto.parse::<Protocol>()?),
            None => (spec, Protocol::Tcp),
        };

        let parts: Vec<&str> = ports.split(':').collect();
        let (host_ip, host_port, container_port) = match parts.as_slice() {
            [container] => (None, None, *container),
            [host, container] => (None, Some(*host), *container),
            [ip, host, container] => (Some(*ip), Some(*host), *container),
            _ => {
                return Err(PortMappingError::TooManyParts {
                    spec: spec.to_string(),
                })
            }
        };

        let host_port = match host_port {
            Some("") | None => None,
            Some(port) => Some(parse_port(port)?),
        };

        Ok(PortMapping {
            host_ip: host_ip.filter(|ip| !ip.is_empty()).map(str::to_string),
            host_port,
            container_port: parse_port(container_port)?,
            protocol,
        })
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ip) = &self.host_ip {
            write!(f, "{}:", ip)?;
        }
        if let Some(port) = self.host_port {
            write!(f, "{}:", port)?;
        }
        write!(f, "{}", self.container_key())
    }
}
