//! Chain spec patching.
//!
//! The chain spec is treated as an ordered list of top-level fields whose
//! values are kept as raw JSON text. Only the `codeSubstitutes` field is ever
//! decoded and re-encoded; every other field is written back byte for byte,
//! so hand-tuned genesis values (including integers that don't fit into 64
//! bits) survive the patch untouched.
use crate::block::BlockId;
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap as _,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::value::RawValue;
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};


/// Top-level chain spec field mapping block hashes to runtime code.
pub const CODE_SUBSTITUTES: &str = "codeSubstitutes";

/// Error returned by the descriptor patcher.
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Reading an input file failed.
    #[error("failed to read {path}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
    /// The chain spec is not a JSON object.
    #[error("{path} is not a JSON object")]
    Decode {
        /// File being decoded.
        path: PathBuf,
        /// Cause.
        #[source]
        source: serde_json::Error,
    },
    /// The target field exists but is not a map of strings.
    #[error("`{field}` is not a map of block hashes to code")]
    MalformedField {
        /// Name of the field.
        field: String,
        /// Cause.
        #[source]
        source: serde_json::Error,
    },
    /// Encoding the patched document failed.
    #[error("failed to encode the patched chain spec")]
    Encode(#[source] serde_json::Error),
    /// Writing the output failed.
    #[error("failed to write {path}")]
    Write {
        /// File being written.
        path: PathBuf,
        /// Cause.
        #[source]
        source: io::Error,
    },
    /// The output would replace the input.
    #[error("refusing to overwrite the original chain spec {0}")]
    InPlace(PathBuf),
}

/// Runtime code substituted at a block, loaded from a file.
#[derive(Clone, PartialEq, Eq)]
pub struct CorrectivePayload(Vec<u8>);

impl fmt::Debug for CorrectivePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrectivePayload({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for CorrectivePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl CorrectivePayload {
    /// Reads the whole file.
    pub fn load(path: &Path) -> Result<Self, PatchError> {
        fs::read(path).map(Self).map_err(|source| PatchError::Read {
            path: path.to_owned(),
            source,
        })
    }

    /// Size of the code in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Lowercase hex without prefix, as stored in the chain spec.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Chain spec document with opaque top-level fields.
#[derive(Debug, Clone)]
pub struct Descriptor {
    fields: Vec<(String, Box<RawValue>)>,
}

impl<'de> Deserialize<'de> for Descriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldsVisitor;

        impl<'de> Visitor<'de> for FieldsVisitor {
            type Value = Vec<(String, Box<RawValue>)>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(field) = map.next_entry()? {
                    fields.push(field);
                }
                Ok(fields)
            }
        }

        let fields = deserializer.deserialize_map(FieldsVisitor)?;
        Ok(Self { fields })
    }
}

impl Serialize for Descriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl Descriptor {
    /// Parses a chain spec.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Reads and parses a chain spec file.
    pub fn read(path: &Path) -> Result<Self, PatchError> {
        let json = fs::read_to_string(path).map_err(|source| PatchError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&json).map_err(|source| PatchError::Decode {
            path: path.to_owned(),
            source,
        })
    }

    /// Raw JSON text of a top-level field.
    pub fn field(&self, key: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_ref())
    }

    /// Names of the top-level fields, in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// Inserts or overwrites the code substituted at block `id`, keeping
    /// the other substitutes. Adds the field if the chain spec has none.
    pub fn set_code_substitute(
        &mut self,
        id: &BlockId,
        payload: &CorrectivePayload,
    ) -> Result<(), PatchError> {
        let malformed = |source| PatchError::MalformedField {
            field: CODE_SUBSTITUTES.to_owned(),
            source,
        };
        let mut substitutes: serde_json::Map<String, serde_json::Value> =
            match self.field(CODE_SUBSTITUTES) {
                Some(raw) => {
                    let map: serde_json::Map<String, serde_json::Value> =
                        serde_json::from_str(raw.get()).map_err(malformed)?;
                    // Validate the shape the node expects, hash -> hex code.
                    serde_json::from_value::<std::collections::BTreeMap<String, String>>(
                        serde_json::Value::Object(map.clone()),
                    )
                    .map_err(malformed)?;
                    map
                }
                None => serde_json::Map::new(),
            };
        substitutes.insert(id.to_string(), payload.to_hex().into());
        let raw = serde_json::value::to_raw_value(&substitutes).map_err(PatchError::Encode)?;
        match self.fields.iter_mut().find(|(k, _)| k == CODE_SUBSTITUTES) {
            Some((_, v)) => *v = raw,
            None => self.fields.push((CODE_SUBSTITUTES.to_owned(), raw)),
        }
        Ok(())
    }

    /// Encodes the document. Field values keep their original text.
    pub fn to_json(&self) -> Result<String, PatchError> {
        serde_json::to_string(self).map_err(PatchError::Encode)
    }
}

/// What [`patch`] wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    /// Key of the inserted substitute.
    pub key: String,
    /// Size of the substituted code.
    pub code_size: usize,
    /// Written chain spec.
    pub output: PathBuf,
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Writes a copy of the chain spec at `original` to `output`, with the code
/// from `payload_path` substituted at block `id`. The original file is
/// never modified.
#[tracing::instrument(level = "info", skip_all, fields(%id), err)]
pub fn patch(
    original: &Path,
    id: &BlockId,
    payload_path: &Path,
    output: &Path,
) -> Result<PatchSummary, PatchError> {
    if same_file(original, output) {
        return Err(PatchError::InPlace(original.to_owned()));
    }
    let mut descriptor = Descriptor::read(original)?;
    let payload = CorrectivePayload::load(payload_path)?;
    descriptor.set_code_substitute(id, &payload)?;
    fs::write(output, descriptor.to_json()?).map_err(|source| PatchError::Write {
        path: output.to_owned(),
        source,
    })?;
    tracing::info!(
        original = %original.display(),
        output = %output.display(),
        code_size = payload.len(),
        "set `{CODE_SUBSTITUTES}`"
    );
    Ok(PatchSummary {
        key: id.to_string(),
        code_size: payload.len(),
        output: output.to_owned(),
    })
}
