//! Identifier newtypes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for a pooled upstream connection.
pub type ConnectionId = u64;

/// A token mint address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MintAddress(String);

impl MintAddress {
    /// Create a new mint address from a string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MintAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MintAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for MintAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A transaction signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxSignature(String);

impl TxSignature {
    /// Create a new signature from a string.
    pub fn new(sig: impl Into<String>) -> Self {
        Self(sig.into())
    }

    /// Get the signature as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TxSignature {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for TxSignature {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A wallet address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletAddress(String);

impl WalletAddress {
    /// Create a new wallet address from a string.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WalletAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for WalletAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
