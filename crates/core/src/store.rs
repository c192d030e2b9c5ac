//! Wire-level shapes exchanged with the search store.

/// A stored hash as returned by a search: its full key plus raw field
/// values, in the order the store produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub key: String,
    pub fields: Vec<(String, Vec<u8>)>,
}

impl StoredDocument {
    /// The record id, i.e. the key with its index prefix removed.
    pub fn id(&self, prefix: &str) -> String {
        self.key
            .strip_prefix(prefix)
            .unwrap_or(&self.key)
            .to_string()
    }
}

/// One page of a cursor-based key scan. A `cursor` of 0 ends the scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// Little-endian concatenation of IEEE-754 32-bit floats.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|value| value.to_le_bytes()).collect()
}

/// Inverse of [`encode_vector`]. Returns `None` when the byte length is not
/// a multiple of four.
pub fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_encoding_is_little_endian() {
        let bytes = encode_vector(&[1.0, -2.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(decode_vector(&bytes), Some(vec![1.0, -2.5]));
        assert_eq!(decode_vector(&bytes[..3]), None);
    }

    #[test]
    fn document_id_strips_prefix() {
        let document = StoredDocument {
            key: "vs:books:42".to_string(),
            fields: Vec::new(),
        };
        assert_eq!(document.id("vs:books:"), "42");
        assert_eq!(document.id("vs:other:"), "vs:books:42");
    }
}
