//! IPv4 network ranges for environment VPCs

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::SynthError;

/// Smallest VPC prefix accepted (largest network)
pub const MIN_VPC_PREFIX: u8 = 16;
/// Largest VPC prefix accepted (smallest network)
pub const MAX_VPC_PREFIX: u8 = 24;

/// An IPv4 network in CIDR notation, e.g. `10.0.0.0/16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Split this network into consecutive subnets of the subnet prefix
    ///
    /// Subnets are /24 when the network is large enough, otherwise the
    /// network is halved.
    pub fn subnets(&self, count: usize) -> Vec<Ipv4Cidr> {
        let prefix = self.subnet_prefix();
        let size = 1u32 << (32 - prefix);
        let base = u32::from(self.network);
        let capacity = 1usize << (prefix - self.prefix);

        (0..count.min(capacity))
            .map(|i| Ipv4Cidr {
                network: Ipv4Addr::from(base + size * i as u32),
                prefix,
            })
            .collect()
    }

    fn subnet_prefix(&self) -> u8 {
        (self.prefix + 1).max(24)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = SynthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SynthError::InvalidCidr {
            cidr: s.to_string(),
            reason: reason.to_string(),
        };

        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected <address>/<prefix>"))?;
        let network: Ipv4Addr = addr.parse().map_err(|_| invalid("bad IPv4 address"))?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;

        if !(MIN_VPC_PREFIX..=MAX_VPC_PREFIX).contains(&prefix) {
            return Err(invalid(&format!(
                "prefix must be between /{} and /{}",
                MIN_VPC_PREFIX, MAX_VPC_PREFIX
            )));
        }

        let mask = u32::MAX << (32 - prefix);
        if u32::from(network) & !mask != 0 {
            return Err(invalid("host bits are set"));
        }

        Ok(Self { network, prefix })
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}
