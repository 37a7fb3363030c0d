//! Block numbers and block hashes as reported by the nodes.
use std::{fmt, str::FromStr};

/// Sequential number of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockNumber(pub u64);

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl BlockNumber {
    /// Parses a block number from its JSON representation.
    /// Headers carry `0x`-prefixed hex strings, some endpoints plain integers.
    pub fn from_json(value: &serde_json::Value) -> anyhow::Result<Self> {
        match value {
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(Self)
                .ok_or_else(|| anyhow::format_err!("{n} is not a block number")),
            serde_json::Value::String(s) => {
                let digits = s
                    .strip_prefix("0x")
                    .ok_or_else(|| anyhow::format_err!("{s:?} is not 0x-prefixed"))?;
                Ok(Self(u64::from_str_radix(digits, 16)?))
            }
            other => anyhow::bail!("unexpected block number {other}"),
        }
    }
}

/// Content hash identifying a block.
/// The canonical string form is lowercase `0x`-prefixed hex, which is also
/// the key format of the chain spec `codeSubstitutes` map.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(Vec<u8>);

/// Error returned when parsing a [`BlockId`].
#[derive(Debug, thiserror::Error)]
pub enum ParseBlockIdError {
    /// Missing `0x` prefix.
    #[error("block hash {0:?} is not 0x-prefixed")]
    MissingPrefix(String),
    /// Not valid hex.
    #[error("block hash is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// No bytes after the prefix.
    #[error("block hash is empty")]
    Empty,
}

impl BlockId {
    /// Raw bytes of the hash.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether every byte is zero. Nodes answer with the zero hash for
    /// heights they don't know, it never identifies a real block.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl From<Vec<u8>> for BlockId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl FromStr for BlockId {
    type Err = ParseBlockIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| ParseBlockIdError::MissingPrefix(s.to_owned()))?;
        let bytes = hex::decode(digits)?;
        if bytes.is_empty() {
            return Err(ParseBlockIdError::Empty);
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(&self.0))
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({self})")
    }
}
