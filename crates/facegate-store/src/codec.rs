//! Binary signature format.
//!
//! Signatures are stored as a self-describing little-endian layout so the
//! files remain readable across versions and languages:
//!
//! ```text
//! magic "FGSG" | u16 version | u32 element count | count * f32 values
//! ```

use facegate_core::Embedding;
use thiserror::Error;

use crate::blobs::BlobStore;
use crate::error::StoreError;

pub const SIGNATURE_MAGIC: [u8; 4] = *b"FGSG";
pub const SIGNATURE_VERSION: u16 = 1;

const HEADER_LEN: usize = 4 + 2 + 4;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("not a signature file (bad magic)")]
    BadMagic,
    #[error("unsupported signature version {0}")]
    UnsupportedVersion(u16),
    #[error("truncated signature: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
}

/// Serialize an embedding into the signature format.
pub fn encode(embedding: &Embedding) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + embedding.dim() * 4);
    out.extend_from_slice(&SIGNATURE_MAGIC);
    out.extend_from_slice(&SIGNATURE_VERSION.to_le_bytes());
    out.extend_from_slice(&(embedding.dim() as u32).to_le_bytes());
    for v in &embedding.values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Parse a signature file back into an embedding.
pub fn decode(bytes: &[u8]) -> Result<Embedding, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: HEADER_LEN,
            found: bytes.len(),
        });
    }
    if bytes[0..4] != SIGNATURE_MAGIC {
        return Err(CodecError::BadMagic);
    }

    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SIGNATURE_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let count = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
    let expected = HEADER_LEN + count * 4;
    if bytes.len() < expected {
        return Err(CodecError::Truncated {
            expected,
            found: bytes.len(),
        });
    }

    let values = bytes[HEADER_LEN..expected]
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    Ok(Embedding::new(values))
}

/// Read a committed signature blob and decode it.
///
/// Distinguishes an absent signature ([`StoreError::Missing`]) from a
/// present-but-unreadable one ([`StoreError::BadSignature`]) so callers
/// can log them apart.
pub async fn read_signature(store: &BlobStore, key: &str) -> Result<Embedding, StoreError> {
    let bytes = store.read(key).await?;
    decode(&bytes).map_err(|source| StoreError::BadSignature {
        key: key.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_values() {
        let embedding = Embedding::new(vec![0.25, -1.5, 0.0, 3.125]);
        let decoded = decode(&encode(&embedding)).unwrap();
        assert_eq!(decoded, embedding);
    }

    #[test]
    fn rejects_wrong_magic() {
        let mut bytes = encode(&Embedding::new(vec![1.0]));
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(CodecError::BadMagic)));
    }

    #[test]
    fn rejects_future_version() {
        let mut bytes = encode(&Embedding::new(vec![1.0]));
        bytes[4..6].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn rejects_truncated_body() {
        let bytes = encode(&Embedding::new(vec![1.0, 2.0, 3.0]));
        let cut = &bytes[..bytes.len() - 5];
        assert!(matches!(decode(cut), Err(CodecError::Truncated { .. })));
    }

    #[test]
    fn rejects_short_header() {
        assert!(matches!(
            decode(b"FGS"),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn read_signature_distinguishes_missing_from_corrupt() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = BlobStore::signatures(tmp.path());
        store.ensure_dirs().await.unwrap();

        assert!(matches!(
            read_signature(&store, "absent").await,
            Err(StoreError::Missing { .. })
        ));

        store.stage("mangled", b"not a signature").await.unwrap();
        store.commit("mangled").await.unwrap();
        assert!(matches!(
            read_signature(&store, "mangled").await,
            Err(StoreError::BadSignature { .. })
        ));

        store
            .stage("good", &encode(&Embedding::new(vec![1.0, 2.0])))
            .await
            .unwrap();
        store.commit("good").await.unwrap();
        let embedding = read_signature(&store, "good").await.unwrap();
        assert_eq!(embedding.values, vec![1.0, 2.0]);
    }
}
