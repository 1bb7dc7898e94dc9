use thiserror::Error;

// ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressParseError {
    // ---
    #[error("address {0:?} must be six ':'-separated octets")]
    Shape(String),

    #[error("address {input:?} has invalid octet {octet:?}")]
    Octet { input: String, octet: String },
}

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown retransmission mode {0}")]
pub struct ModeError(pub i32);
