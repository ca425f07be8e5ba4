//! Flow Keys
//!
//! Session identity for multi-packet correlation.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// One packet's addressing as seen by a decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketFlow {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl PacketFlow {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }

    /// Correlation key for this packet's direction
    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            dst_port: self.dst_port,
        }
    }

    /// Correlation key for the opposite direction
    ///
    /// A server-to-client packet's reverse key is the key the client's
    /// initial packet was recorded under.
    pub fn reverse_key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

/// Session key: `(source IP, destination IP, destination port)`
///
/// Source port is deliberately excluded; the correlation heuristics do not
/// depend on it and excluding it lets retried client connections share state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub dst_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_key() {
        let client: IpAddr = "192.168.1.10".parse().unwrap();
        let server: IpAddr = "93.184.216.34".parse().unwrap();

        let outbound = PacketFlow::new(client, server, 49152, 443);
        let inbound = PacketFlow::new(server, client, 443, 49152);

        assert_eq!(outbound.key(), inbound.reverse_key());
    }
}
