//! Address-range allocation for new networks.
//!
//! Picks a `/16` whose second octet is not used by any network already in
//! the target account and derives the six subnets the rest of the
//! deployment wires into. The scan is a plain first-fit, so running it twice
//! against unchanged account state yields the same answer.

use std::collections::BTreeSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Highest second octet handed out.
pub const MAX_SECOND_OCTET: u8 = 254;

/// Prefix length of the network-level block.
pub const VPC_PREFIX: u8 = 16;

/// Tier of each derived subnet, in third-octet order (1..=6).
pub const TIER_ORDER: [SubnetTier; 6] = [
    SubnetTier::Public,
    SubnetTier::Public,
    SubnetTier::Private,
    SubnetTier::Private,
    SubnetTier::Database,
    SubnetTier::Database,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    #[error("no free address block: every second octet in 0..={MAX_SECOND_OCTET} is in use")]
    ResourceExhausted,

    #[error("invalid CIDR block: {0}")]
    InvalidBlock(String),

    #[error("unsupported subnet prefix /{0}: must be between /24 and /28")]
    UnsupportedPrefix(u8),
}

/// An IPv4 block in `a.b.c.d/len` notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CidrBlock {
    addr: Ipv4Addr,
    prefix: u8,
}

impl CidrBlock {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self, CidrError> {
        if prefix > 32 {
            return Err(CidrError::InvalidBlock(format!("{addr}/{prefix}")));
        }
        Ok(Self { addr, prefix })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn second_octet(&self) -> u8 {
        self.addr.octets()[1]
    }
}

impl FromStr for CidrBlock {
    type Err = CidrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CidrError::InvalidBlock(s.to_string());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix).map_err(|_| invalid())
    }
}

impl fmt::Display for CidrBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl TryFrom<String> for CidrBlock {
    type Error = CidrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CidrBlock> for String {
    fn from(block: CidrBlock) -> Self {
        block.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubnetTier {
    Public,
    Private,
    Database,
}

impl fmt::Display for SubnetTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubnetTier::Public => "public",
            SubnetTier::Private => "private",
            SubnetTier::Database => "database",
        };
        f.write_str(s)
    }
}

/// One derived subnet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub tier: SubnetTier,
    /// Zone index within the tier (0 or 1).
    pub zone: u8,
    pub block: CidrBlock,
}

impl Subnet {
    /// Stable label such as `private-2`, used to name the subnet resource.
    pub fn label(&self) -> String {
        format!("{}-{}", self.tier, self.zone + 1)
    }
}

/// The network block plus its subnet layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CidrAllocation {
    pub vpc: CidrBlock,
    pub subnets: Vec<Subnet>,
}

impl CidrAllocation {
    /// Subnets of one tier, in zone order.
    pub fn tier(&self, tier: SubnetTier) -> impl Iterator<Item = &Subnet> {
        self.subnets.iter().filter(move |s| s.tier == tier)
    }
}

/// Inputs to [`allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    /// First octet shared by every block (10 for `10.x.0.0/16`).
    pub first_octet: u8,
    /// Second octet to try first.
    pub preferred_octet: u8,
    /// Prefix length of each derived subnet.
    pub subnet_prefix: u8,
}

impl Default for AllocationRequest {
    fn default() -> Self {
        Self {
            first_octet: 10,
            preferred_octet: 1,
            subnet_prefix: 24,
        }
    }
}

/// Pick the first free second octet and derive the subnet layout.
///
/// The scan runs upward from `preferred_octet` to [`MAX_SECOND_OCTET`], then
/// wraps to 0 and stops just before the preferred start. Entries of
/// `in_use` that do not parse are skipped with a warning.
pub fn allocate(request: &AllocationRequest, in_use: &[String]) -> Result<CidrAllocation, CidrError> {
    check_subnet_prefix(request.subnet_prefix)?;

    let used: BTreeSet<u8> = in_use
        .iter()
        .filter_map(|raw| match raw.parse::<CidrBlock>() {
            Ok(block) => Some(block.second_octet()),
            Err(e) => {
                warn!(block = %raw, error = %e, "ignoring unparseable in-use block");
                None
            }
        })
        .collect();

    let start = request.preferred_octet.min(MAX_SECOND_OCTET);
    let second = (start..=MAX_SECOND_OCTET)
        .chain(0..start)
        .find(|octet| !used.contains(octet))
        .ok_or(CidrError::ResourceExhausted)?;

    if second != request.preferred_octet {
        debug!(
            preferred = request.preferred_octet,
            chosen = second,
            in_use = used.len(),
            "preferred octet taken, using next free block"
        );
    }

    let allocation = derive(request.first_octet, second, request.subnet_prefix)?;
    info!(vpc = %allocation.vpc, "allocated network block");
    Ok(allocation)
}

/// Build the allocation for a fixed `first.second.0.0/16` block.
pub fn derive(first_octet: u8, second_octet: u8, subnet_prefix: u8) -> Result<CidrAllocation, CidrError> {
    check_subnet_prefix(subnet_prefix)?;

    let vpc = CidrBlock::new(Ipv4Addr::new(first_octet, second_octet, 0, 0), VPC_PREFIX)?;
    let mut zones = [0u8; 3];
    let mut subnets = Vec::with_capacity(TIER_ORDER.len());
    for (i, tier) in TIER_ORDER.iter().enumerate() {
        let slot = match tier {
            SubnetTier::Public => 0,
            SubnetTier::Private => 1,
            SubnetTier::Database => 2,
        };
        let third = (i + 1) as u8;
        subnets.push(Subnet {
            tier: *tier,
            zone: zones[slot],
            block: CidrBlock::new(Ipv4Addr::new(first_octet, second_octet, third, 0), subnet_prefix)?,
        });
        zones[slot] += 1;
    }

    Ok(CidrAllocation { vpc, subnets })
}

fn check_subnet_prefix(prefix: u8) -> Result<(), CidrError> {
    // The third octet is fixed per subnet, so anything wider than /24 would
    // overlap its neighbours.
    if !(24..=28).contains(&prefix) {
        return Err(CidrError::UnsupportedPrefix(prefix));
    }
    Ok(())
}
