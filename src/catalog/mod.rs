//! Register catalog: the static description of everything the node polls.
//!
//! ```text
//!  Catalog
//!   ├── NodeDescriptor "array"   ── RegisterDescriptor voltage  @0x3100 u16
//!   │                            ── RegisterDescriptor current  @0x3101 u16
//!   │                            ── RegisterDescriptor power    @0x3102 u32
//!   ├── NodeDescriptor "battery" ── ...
//!   └── ...
//! ```
//!
//! Iteration order is the order attributes are advertised and registers are
//! polled.  The catalog is pure data; [`Catalog::new`] checks the invariants
//! once at startup so the rest of the firmware can rely on them.

pub mod epsolar;

use crate::error::{self, CatalogError};
use crate::homie;

// ---------------------------------------------------------------------------
// Register width
// ---------------------------------------------------------------------------

/// How many 16-bit registers make up a value, and whether it is signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    Uint16,
    Int16,
    /// Two registers, first register holds the low word.
    Uint32,
    /// Two registers, first register holds the low word.
    Int32,
}

impl RegisterWidth {
    /// Number of registers to request from the bus.
    pub const fn registers(self) -> usize {
        match self {
            Self::Uint16 | Self::Int16 => 1,
            Self::Uint32 | Self::Int32 => 2,
        }
    }

    pub const fn is_signed(self) -> bool {
        matches!(self, Self::Int16 | Self::Int32)
    }

    /// Decode raw registers into the 32-bit value pattern.
    ///
    /// `Int16` is sign-extended, `Uint16` zero-extended.  Double registers
    /// combine as `hi << 16 | lo`; for `Int32` the same bits are the two's
    /// complement value.  Returns `None` if fewer registers than the width
    /// needs were supplied.
    pub fn decode(self, words: &[u16]) -> Option<u32> {
        match self {
            Self::Uint16 => words.first().map(|&w| u32::from(w)),
            Self::Int16 => words.first().map(|&w| i32::from(w as i16) as u32),
            Self::Uint32 | Self::Int32 => match words {
                [lo, hi, ..] => Some((u32::from(*hi) << 16) | u32::from(*lo)),
                _ => None,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Display format
// ---------------------------------------------------------------------------

/// How a decoded value is rendered into its publish payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// Base-10, signed or unsigned according to the register width.
    Decimal,
    /// `0x`-prefixed upper-case hex, zero padded to the register width.
    Hex,
}

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// One named value read from the field device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor<'c> {
    /// Homie property id, unique within its node.
    pub id: &'c str,
    /// Human-readable name advertised as `$name`.
    pub name: &'c str,
    /// Unit advertised as `$unit` (may be empty).
    pub unit: &'c str,
    /// First input-register address.
    pub address: u16,
    pub width: RegisterWidth,
    pub format: ValueFormat,
}

/// A group of related registers, advertised as one Homie node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeDescriptor<'c> {
    pub id: &'c str,
    pub name: &'c str,
    pub properties: &'c [RegisterDescriptor<'c>],
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// An ordered, validated sequence of nodes.
#[derive(Debug, Clone, Copy)]
pub struct Catalog<'c> {
    nodes: &'c [NodeDescriptor<'c>],
}

impl<'c> Catalog<'c> {
    /// Validate `nodes` and wrap them.
    ///
    /// Every id must be a Homie id, node ids must be unique and property ids
    /// must be unique within their node, which makes every
    /// `(node_id, property_id)` pair unique across the catalog.
    pub fn new(nodes: &'c [NodeDescriptor<'c>]) -> error::Result<Self> {
        if nodes.is_empty() {
            return Err(CatalogError::Empty.into());
        }
        for (i, node) in nodes.iter().enumerate() {
            if !homie::is_valid_id(node.id) {
                return Err(CatalogError::InvalidId("node").into());
            }
            if nodes[..i].iter().any(|n| n.id == node.id) {
                return Err(CatalogError::DuplicateNode.into());
            }
            for (j, prop) in node.properties.iter().enumerate() {
                if !homie::is_valid_id(prop.id) {
                    return Err(CatalogError::InvalidId("property").into());
                }
                if node.properties[..j].iter().any(|p| p.id == prop.id) {
                    return Err(CatalogError::DuplicateProperty.into());
                }
            }
        }
        Ok(Self { nodes })
    }

    pub fn nodes(&self) -> &'c [NodeDescriptor<'c>] {
        self.nodes
    }

    /// Every `(node, register)` pair in poll order.
    pub fn registers(&self) -> impl Iterator<Item = (&'c NodeDescriptor<'c>, &'c RegisterDescriptor<'c>)> {
        self.nodes
            .iter()
            .flat_map(|node| node.properties.iter().map(move |prop| (node, prop)))
    }

    /// Total number of properties across all nodes.
    pub fn property_count(&self) -> usize {
        self.nodes.iter().map(|n| n.properties.len()).sum()
    }

    /// Property count of the largest node (lower bound for handoff depth).
    pub fn largest_node(&self) -> usize {
        self.nodes.iter().map(|n| n.properties.len()).max().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// A decoded value produced by the poller, consumed once by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading<'c> {
    pub node: &'c NodeDescriptor<'c>,
    pub register: &'c RegisterDescriptor<'c>,
    /// 32-bit pattern after sign extension; see [`RegisterWidth::decode`].
    pub raw: u32,
}

impl Reading<'_> {
    /// The value interpreted according to the register's signedness.
    pub fn value(&self) -> i64 {
        if self.register.width.is_signed() {
            i64::from(self.raw as i32)
        } else {
            i64::from(self.raw)
        }
    }
}
