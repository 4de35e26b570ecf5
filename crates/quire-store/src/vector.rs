//! Embedding storage helpers backed by sqlite-vec.
//!
//! Embeddings are stored as native-endian `f32` BLOBs (the layout sqlite-vec
//! reads) next to the entry row. Similarity is computed in SQL with
//! `vec_distance_cosine`, guarded by the stored dimension count so vectors
//! from a different model never compare.

use std::sync::Once;

use rusqlite::Connection;
use zerocopy::IntoBytes;

use crate::error::{Result, StoreError};

static INIT: Once = Once::new();

/// Register sqlite-vec for every connection opened afterwards.
///
/// `sqlite3_auto_extension` is process-global, so this only runs once.
pub fn init_vector_extension() {
    INIT.call_once(|| {
        use rusqlite::ffi::sqlite3_auto_extension;
        use sqlite_vec::sqlite3_vec_init;

        unsafe {
            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(sqlite3_vec_init as *const ())));
        }
    });
}

/// Version string of the loaded sqlite-vec extension.
pub fn check_vector_extension(conn: &Connection) -> Result<String> {
    let version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
    Ok(version)
}

/// Encode an embedding for storage.
pub fn embedding_to_blob(embedding: &[f32]) -> &[u8] {
    embedding.as_bytes()
}

/// Decode a stored embedding.
pub fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.25_f32, -1.5, 3.0];
        let blob = embedding_to_blob(&v).to_vec();
        assert_eq!(blob.len(), 12);
        assert_eq!(blob_to_embedding(&blob).unwrap(), v);
    }

    #[test]
    fn test_rejects_truncated_blob() {
        assert!(blob_to_embedding(&[0, 0, 0]).is_err());
    }

    #[test]
    fn test_cosine_distance_in_sql() {
        init_vector_extension();
        let conn = Connection::open_in_memory().unwrap();
        assert!(!check_vector_extension(&conn).unwrap().is_empty());

        let a = [1.0_f32, 0.0];
        let b = [0.0_f32, 1.0];
        let same: f64 = conn
            .query_row(
                "SELECT vec_distance_cosine(?1, ?2)",
                [embedding_to_blob(&a), embedding_to_blob(&a)],
                |r| r.get(0),
            )
            .unwrap();
        let orthogonal: f64 = conn
            .query_row(
                "SELECT vec_distance_cosine(?1, ?2)",
                [embedding_to_blob(&a), embedding_to_blob(&b)],
                |r| r.get(0),
            )
            .unwrap();
        assert!(same.abs() < 1e-6);
        assert!((orthogonal - 1.0).abs() < 1e-6);
    }
}
