use crate::config::SiteConfig;
use crate::error::PipelineError;
use crate::store::VectorStore;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Encoding tag recorded on every exported record so a reader can dispatch.
pub const EMBEDDING_FORMAT: &str = "float32_base64";

/// Top-level manifest describing a partitioned export.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExportManifest {
    pub site: String,
    pub total_passages: usize,
    pub part_count: usize,
    pub passages_per_part: usize,
    pub embedding_dimension: usize,
    pub total_bytes: u64,
}

/// One self-describing part file.
#[derive(Debug, Serialize, Deserialize)]
pub struct PartFile {
    pub site: String,
    pub part_index: usize,
    pub part_passages: usize,
    pub embedding_dimension: usize,
    pub passages: Vec<PartRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PartRecord {
    pub id: String,
    pub curid: String,
    pub title: String,
    pub content: String,
    pub seq: usize,
    pub start: usize,
    pub end: usize,
    pub embedding_binary: String,
    pub embedding_format: String,
}

pub fn manifest_path(out_dir: &Path) -> PathBuf {
    out_dir.join("manifest.json")
}

pub fn part_path(out_dir: &Path, part_index: usize) -> PathBuf {
    out_dir.join(format!("vector_store_part_{:03}.json", part_index))
}

/// Packs a vector as little-endian f32 bytes in base64.
pub fn encode_embedding(embedding: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Inverse of [`encode_embedding`], for readers and round-trip checks.
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>> {
    let bytes = BASE64
        .decode(encoded)
        .context("Embedding payload is not valid base64")?;
    anyhow::ensure!(
        bytes.len() % 4 == 0,
        "Embedding payload length {} is not a multiple of 4",
        bytes.len()
    );
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Serializes the index into fixed-size part files plus a manifest, in index
/// iteration order. Each part is also written as a `.json.bz2` companion for
/// transport. Re-running against an unchanged index and part size produces
/// identical partitioning.
pub fn export_partitioned(
    store: &VectorStore,
    site: &SiteConfig,
    passages_per_part: usize,
    out_dir: &Path,
) -> Result<ExportManifest> {
    let dimension = store.dimension().ok_or(PipelineError::EmptyIndex)?;
    let passages_per_part = passages_per_part.max(1);

    for record in store.records() {
        if record.embedding.len() != dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: dimension,
                actual: record.embedding.len(),
            }
            .into());
        }
    }

    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create export directory: {}", out_dir.display()))?;

    let mut part_count = 0usize;
    let mut total_bytes = 0u64;

    for (part_index, batch) in store.records().chunks(passages_per_part).enumerate() {
        let part = PartFile {
            site: site.name.clone(),
            part_index,
            part_passages: batch.len(),
            embedding_dimension: dimension,
            passages: batch
                .iter()
                .map(|record| PartRecord {
                    id: record.id.clone(),
                    curid: record.page_id.clone(),
                    title: record.title.clone(),
                    content: record.content.clone(),
                    seq: record.seq,
                    start: record.start,
                    end: record.end,
                    embedding_binary: encode_embedding(&record.embedding),
                    embedding_format: EMBEDDING_FORMAT.to_string(),
                })
                .collect(),
        };

        let json = serde_json::to_vec(&part).context("Failed to serialize export part")?;
        let path = part_path(out_dir, part_index);
        fs::write(&path, &json)
            .with_context(|| format!("Failed to write export part: {}", path.display()))?;

        let bz2_path = path.with_extension("json.bz2");
        let bz2_file = File::create(&bz2_path)
            .with_context(|| format!("Failed to create: {}", bz2_path.display()))?;
        let mut encoder = BzEncoder::new(bz2_file, Compression::default());
        encoder
            .write_all(&json)
            .with_context(|| format!("Failed to compress: {}", bz2_path.display()))?;
        encoder
            .finish()
            .with_context(|| format!("Failed to finalize: {}", bz2_path.display()))?;

        total_bytes += json.len() as u64;
        part_count += 1;
    }

    let manifest = ExportManifest {
        site: site.name.clone(),
        total_passages: store.len(),
        part_count,
        passages_per_part,
        embedding_dimension: dimension,
        total_bytes,
    };

    let manifest_file = manifest_path(out_dir);
    let json = serde_json::to_vec_pretty(&manifest).context("Failed to serialize manifest")?;
    fs::write(&manifest_file, json)
        .with_context(|| format!("Failed to write manifest: {}", manifest_file.display()))?;

    info!(
        parts = part_count,
        passages = store.len(),
        dir = %out_dir.display(),
        "Partitioned export written"
    );

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::VectorRecord;
    use bzip2::read::BzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn record(i: usize) -> VectorRecord {
        VectorRecord {
            id: format!("{}-0", i),
            page_id: i.to_string(),
            title: format!("Page {i}"),
            url: format!("https://example.org/?curid={i}"),
            seq: 0,
            start: 0,
            end: 7,
            content: format!("body {i}"),
            embedding: vec![i as f32, 1.0, -2.5],
        }
    }

    fn store_with(n: usize) -> VectorStore {
        VectorStore::from_records((0..n).map(record).collect()).unwrap()
    }

    fn site() -> SiteConfig {
        SiteConfig::new("Example Wiki", "https://example.org")
    }

    #[test]
    fn embedding_encoding_round_trips() {
        let original = vec![0.0f32, 1.5, -3.25, f32::MIN_POSITIVE];
        let decoded = decode_embedding(&encode_embedding(&original)).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_rejects_bad_payloads() {
        assert!(decode_embedding("not base64!!!").is_err());
        // Valid base64, but 3 bytes is not a whole number of floats.
        assert!(decode_embedding(&BASE64.encode([1u8, 2, 3])).is_err());
    }

    #[test]
    fn export_splits_into_fixed_parts_with_short_tail() {
        let dir = TempDir::new().unwrap();
        let manifest = export_partitioned(&store_with(5), &site(), 2, dir.path()).unwrap();

        assert_eq!(manifest.total_passages, 5);
        assert_eq!(manifest.part_count, 3);
        assert_eq!(manifest.passages_per_part, 2);
        assert_eq!(manifest.embedding_dimension, 3);

        let part2: PartFile =
            serde_json::from_slice(&fs::read(part_path(dir.path(), 2)).unwrap()).unwrap();
        assert_eq!(part2.part_passages, 1);
        assert_eq!(part2.passages.len(), 1);
    }

    #[test]
    fn part_concatenation_reproduces_index_order() {
        let dir = TempDir::new().unwrap();
        let store = store_with(7);
        let manifest = export_partitioned(&store, &site(), 3, dir.path()).unwrap();

        let mut seen = Vec::new();
        for part_index in 0..manifest.part_count {
            let part: PartFile =
                serde_json::from_slice(&fs::read(part_path(dir.path(), part_index)).unwrap())
                    .unwrap();
            assert_eq!(part.part_index, part_index);
            for passage in part.passages {
                assert_eq!(passage.embedding_format, EMBEDDING_FORMAT);
                seen.push((passage.id, passage.content));
            }
        }

        let expected: Vec<(String, String)> = store
            .records()
            .iter()
            .map(|r| (r.id.clone(), r.content.clone()))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn exported_embeddings_decode_to_original_vectors() {
        let dir = TempDir::new().unwrap();
        let store = store_with(3);
        export_partitioned(&store, &site(), 10, dir.path()).unwrap();

        let part: PartFile =
            serde_json::from_slice(&fs::read(part_path(dir.path(), 0)).unwrap()).unwrap();
        for (record, passage) in store.records().iter().zip(&part.passages) {
            assert_eq!(
                decode_embedding(&passage.embedding_binary).unwrap(),
                record.embedding
            );
        }
    }

    #[test]
    fn companion_bz2_matches_plain_part() {
        let dir = TempDir::new().unwrap();
        export_partitioned(&store_with(2), &site(), 10, dir.path()).unwrap();

        let plain = fs::read(part_path(dir.path(), 0)).unwrap();
        let bz2_path = part_path(dir.path(), 0).with_extension("json.bz2");
        let mut decompressed = Vec::new();
        BzDecoder::new(File::open(bz2_path).unwrap())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, plain);
    }

    #[test]
    fn export_is_deterministic() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let store = store_with(4);

        export_partitioned(&store, &site(), 2, dir_a.path()).unwrap();
        export_partitioned(&store, &site(), 2, dir_b.path()).unwrap();

        for part_index in 0..2 {
            assert_eq!(
                fs::read(part_path(dir_a.path(), part_index)).unwrap(),
                fs::read(part_path(dir_b.path(), part_index)).unwrap()
            );
        }
    }

    #[test]
    fn export_of_empty_index_fails() {
        let dir = TempDir::new().unwrap();
        let err = export_partitioned(&VectorStore::new(), &site(), 2, dir.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyIndex)
        ));
    }
}
