use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use super::error::AddressParseError;

// ---------------------------------------------------------------------------
// PeerAddress
// ---------------------------------------------------------------------------

/// Six-octet device address of a remote peer.
///
/// Displayed and parsed most-significant octet first, upper-case hex,
/// `AA:BB:CC:DD:EE:FF`. Parsing accepts either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress([u8; 6]);

// ---

impl PeerAddress {
    // ---
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

// ---

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // ---
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

// ---

impl FromStr for PeerAddress {
    // ---
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // ---
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 6 {
            return Err(AddressParseError::Shape(s.to_string()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(AddressParseError::Octet {
                    input: s.to_string(),
                    octet: part.to_string(),
                });
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| AddressParseError::Octet {
                input: s.to_string(),
                octet: part.to_string(),
            })?;
        }

        Ok(Self(octets))
    }
}

// ---

impl Serialize for PeerAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
