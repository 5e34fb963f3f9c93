//! Compressed JSON-lines segment files

use super::{IndexedVector, StoreError};
use std::fs;
use std::io::Write;
use std::path::Path;

const COMPRESSION_LEVEL: i32 = 3;

/// Write vectors to `path` atomically (temp file, sync, rename)
pub fn write_segment(path: &Path, vectors: &[IndexedVector]) -> Result<(), StoreError> {
    let mut lines = Vec::new();
    for vector in vectors {
        serde_json::to_writer(&mut lines, vector).map_err(|e| StoreError::Json {
            source: e,
            context: format!("Failed to serialize vector for chunk {}", vector.chunk.id),
        })?;
        lines.push(b'\n');
    }

    let compressed = zstd::encode_all(&lines[..], COMPRESSION_LEVEL).map_err(|e| StoreError::Io {
        source: e,
        context: "Failed to compress segment".to_string(),
    })?;

    let temp_path = path.with_extension("zst.tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to create temp segment file: {}", temp_path.display()),
    })?;
    file.write_all(&compressed).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to write segment: {}", temp_path.display()),
    })?;
    file.sync_all().map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to sync segment: {}", temp_path.display()),
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| StoreError::Io {
        source: e,
        context: format!(
            "Failed to rename temp segment to final location: {} -> {}",
            temp_path.display(),
            path.display()
        ),
    })
}

/// Read every vector stored in the segment at `path`
pub fn read_segment(path: &Path) -> Result<Vec<IndexedVector>, StoreError> {
    let data = fs::read(path).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to read segment: {}", path.display()),
    })?;
    let decompressed = zstd::decode_all(&data[..]).map_err(|e| StoreError::Io {
        source: e,
        context: format!("Failed to decompress segment: {}", path.display()),
    })?;
    let text = String::from_utf8(decompressed).map_err(|e| StoreError::Io {
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        context: format!("Segment is not UTF-8: {}", path.display()),
    })?;

    text.lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(n, line)| {
            serde_json::from_str(line).map_err(|e| StoreError::Json {
                source: e,
                context: format!("Bad record {} in {}", n, path.display()),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::{Chunk, DataType};
    use tempfile::TempDir;

    #[test]
    fn test_segment_preserves_provenance() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("segment-00000.jsonl.zst");

        let chunk = Chunk::new(
            "| 刘俊涛 | 92 |".to_string(),
            3,
            "kb-7",
            "scores",
            "grades.csv",
            DataType::Structured,
        );
        let vectors = vec![IndexedVector {
            chunk: chunk.clone(),
            embedding: vec![0.25, -0.5, 1.0],
        }];

        write_segment(&path, &vectors).unwrap();
        assert!(!path.with_extension("zst.tmp").exists());

        let loaded = read_segment(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].chunk, chunk);
        assert_eq!(loaded[0].embedding, vec![0.25, -0.5, 1.0]);
    }

    #[test]
    fn test_missing_segment() {
        let temp = TempDir::new().unwrap();
        assert!(read_segment(&temp.path().join("nope.zst")).is_err());
    }
}
