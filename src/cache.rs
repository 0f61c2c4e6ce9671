use crate::config::{ChunkConfig, SiteConfig, STORE_CACHE_VERSION, TITLE_CACHE_VERSION};
use crate::embed::EmbedderConfig;
use crate::error::PipelineError;
use crate::index::TitleIndex;
use crate::store::VectorStore;
use anyhow::{Context, Result};
use bincode::Options;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

#[derive(Serialize, Deserialize)]
pub struct TitleCacheMetadata {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub title_count: usize,
}

#[derive(Deserialize)]
struct TitleCacheDe {
    metadata: TitleCacheMetadata,
    title_to_id: FxHashMap<String, String>,
    stripped_to_canonical: FxHashMap<String, String>,
}

/// Borrows the index maps to avoid cloning every title during serialization.
#[derive(Serialize)]
struct TitleCacheSer<'a> {
    metadata: TitleCacheMetadata,
    title_to_id: &'a FxHashMap<String, String>,
    stripped_to_canonical: &'a FxHashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreCacheMetadata {
    pub version: u32,
    pub input_path: String,
    pub input_mtime: u64,
    pub input_size: u64,
    pub site: SiteConfig,
    pub chunk: ChunkConfig,
    pub embedder: EmbedderConfig,
    pub passage_count: usize,
}

#[derive(Deserialize)]
struct StoreCacheDe {
    metadata: StoreCacheMetadata,
    store: VectorStore,
}

#[derive(Serialize)]
struct StoreCacheSer<'a> {
    metadata: StoreCacheMetadata,
    store: &'a VectorStore,
}

pub fn title_cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join("title_index.cache")
}

pub fn store_cache_path(output_dir: &Path) -> PathBuf {
    output_dir.join("vector_store.cache")
}

pub fn titles_csv_path(output_dir: &Path) -> PathBuf {
    output_dir.join("titles.csv")
}

fn get_input_metadata(input_path: &Path) -> Result<(u64, u64)> {
    let metadata = fs::metadata(input_path)
        .with_context(|| format!("Failed to get metadata for: {}", input_path.display()))?;
    let mtime = metadata
        .modified()
        .context("Failed to get modification time")?
        .duration_since(SystemTime::UNIX_EPOCH)
        .context("Invalid modification time")?
        .as_secs();
    Ok((mtime, metadata.len()))
}

/// Returns `Ok(Some(index))` when the cache is present and matches the
/// input; `Ok(None)` on a miss of any kind, including corruption.
pub fn try_load_title_index(cache_path: &Path, input_path: &Path) -> Result<Option<TitleIndex>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(cache_path).context("Failed to open title index cache")?;
    let reader = BufReader::with_capacity(256 * 1024, file);
    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let cache: TitleCacheDe = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Title index cache is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.metadata.version != TITLE_CACHE_VERSION {
        info!(
            cached = cache.metadata.version,
            current = TITLE_CACHE_VERSION,
            "Title cache version mismatch"
        );
        return Ok(None);
    }

    if Path::new(&cache.metadata.input_path) != input_path {
        info!(
            cached = cache.metadata.input_path,
            current = %input_path.display(),
            "Title cache input path mismatch"
        );
        return Ok(None);
    }

    let (mtime, size) = get_input_metadata(input_path)?;
    if cache.metadata.input_mtime != mtime || cache.metadata.input_size != size {
        info!("Input export has changed since title cache was created");
        return Ok(None);
    }

    info!(titles = cache.metadata.title_count, "Title index loaded from cache");
    Ok(Some(TitleIndex::from_maps(
        cache.title_to_id,
        cache.stripped_to_canonical,
    )))
}

/// Serializes the title index by reference and writes atomically via rename.
pub fn save_title_index(index: &TitleIndex, input_path: &Path, output_dir: &Path) -> Result<()> {
    let path = title_cache_path(output_dir);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let (mtime, size) = get_input_metadata(input_path)?;
    let (title_to_id, stripped_to_canonical) = index.maps();

    let cache = TitleCacheSer {
        metadata: TitleCacheMetadata {
            version: TITLE_CACHE_VERSION,
            input_path: input_path.display().to_string(),
            input_mtime: mtime,
            input_size: size,
            title_count: index.len(),
        },
        title_to_id,
        stripped_to_canonical,
    };

    write_atomically(&path, &cache)?;
    info!(titles = index.len(), path = ?path, "Title index cache saved");
    Ok(())
}

/// Returns `Ok(Some(store))` when the cache matches the input file and the
/// chunking/embedding configuration it was built with.
pub fn try_load_store(
    cache_path: &Path,
    input_path: &Path,
    chunk: &ChunkConfig,
    embedder: &EmbedderConfig,
) -> Result<Option<VectorStore>> {
    let Some((metadata, store)) = read_store_cache(cache_path)? else {
        return Ok(None);
    };

    if Path::new(&metadata.input_path) != input_path {
        info!("Vector store cache input path mismatch");
        return Ok(None);
    }

    let (mtime, size) = get_input_metadata(input_path)?;
    if metadata.input_mtime != mtime || metadata.input_size != size {
        info!("Input export has changed since vector store cache was created");
        return Ok(None);
    }

    if &metadata.chunk != chunk || &metadata.embedder != embedder {
        info!("Vector store cache was built with different parameters");
        return Ok(None);
    }

    info!(passages = metadata.passage_count, "Vector store loaded from cache");
    Ok(Some(store))
}

/// Loads the vector store unconditionally, as the search and export
/// commands do. A missing cache is the distinct "index not built" failure.
pub fn load_store(cache_path: &Path) -> Result<(StoreCacheMetadata, VectorStore)> {
    if !cache_path.exists() {
        return Err(PipelineError::IndexNotBuilt {
            path: cache_path.to_path_buf(),
        }
        .into());
    }

    read_store_cache(cache_path)?.ok_or_else(|| {
        anyhow::Error::from(PipelineError::IndexNotBuilt {
            path: cache_path.to_path_buf(),
        })
    })
}

fn read_store_cache(cache_path: &Path) -> Result<Option<(StoreCacheMetadata, VectorStore)>> {
    if !cache_path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(cache_path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(cache_path).context("Failed to open vector store cache")?;
    let reader = BufReader::with_capacity(256 * 1024, file);
    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let cache: StoreCacheDe = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Vector store cache is corrupt or unreadable");
            return Ok(None);
        }
    };

    if cache.metadata.version != STORE_CACHE_VERSION {
        info!(
            cached = cache.metadata.version,
            current = STORE_CACHE_VERSION,
            "Vector store cache version mismatch"
        );
        return Ok(None);
    }

    Ok(Some((cache.metadata, cache.store)))
}

pub fn save_store(
    store: &VectorStore,
    input_path: &Path,
    output_dir: &Path,
    site: SiteConfig,
    chunk: ChunkConfig,
    embedder: EmbedderConfig,
) -> Result<()> {
    let path = store_cache_path(output_dir);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;

    let (mtime, size) = get_input_metadata(input_path)?;
    let cache = StoreCacheSer {
        metadata: StoreCacheMetadata {
            version: STORE_CACHE_VERSION,
            input_path: input_path.display().to_string(),
            input_mtime: mtime,
            input_size: size,
            site,
            chunk,
            embedder,
            passage_count: store.len(),
        },
        store,
    };

    write_atomically(&path, &cache)?;
    info!(passages = store.len(), path = ?path, "Vector store cache saved");
    Ok(())
}

fn write_atomically<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("cache.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp cache file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::DefaultOptions::new()
        .serialize_into(writer, value)
        .context("Failed to serialize cache")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp cache file to: {:?}", path))?;
    Ok(())
}

/// Writes the human-consumable title→identifier mapping, sorted by title so
/// re-runs produce identical files.
pub fn write_titles_csv(index: &TitleIndex, output_dir: &Path) -> Result<()> {
    let path = titles_csv_path(output_dir);
    let mut writer = csv::Writer::from_writer(BufWriter::with_capacity(
        128 * 1024,
        File::create(&path).with_context(|| format!("Failed to create: {}", path.display()))?,
    ));

    writer.write_record(["title", "id"])?;

    let (title_to_id, _) = index.maps();
    let mut rows: Vec<(&String, &String)> = title_to_id.iter().collect();
    rows.sort();
    for (title, id) in rows {
        writer.write_record([title.as_str(), id.as_str()])?;
    }

    writer.flush()?;
    info!(titles = index.len(), path = ?path, "Title mapping written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::EmbedderBackend;
    use crate::store::VectorRecord;
    use std::io::Write;
    use tempfile::TempDir;

    fn create_test_input(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("export.xml");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "<mediawiki></mediawiki>").unwrap();
        path
    }

    fn test_index() -> TitleIndex {
        let mut title_to_id = FxHashMap::default();
        title_to_id.insert("Alpha".to_string(), "1".to_string());
        title_to_id.insert("User blog:Alice/Post".to_string(), "2".to_string());
        let mut stripped = FxHashMap::default();
        stripped.insert("Alpha".to_string(), "Alpha".to_string());
        stripped.insert("Alice/Post".to_string(), "User blog:Alice/Post".to_string());
        TitleIndex::from_maps(title_to_id, stripped)
    }

    fn test_store() -> VectorStore {
        VectorStore::from_records(vec![VectorRecord {
            id: "1-0".to_string(),
            page_id: "1".to_string(),
            title: "Alpha".to_string(),
            url: "https://example.org/?curid=1".to_string(),
            seq: 0,
            start: 0,
            end: 4,
            content: "body".to_string(),
            embedding: vec![1.0, 0.0],
        }])
        .unwrap()
    }

    fn test_site() -> SiteConfig {
        SiteConfig::new("Example Wiki", "https://example.org")
    }

    fn test_chunk() -> ChunkConfig {
        ChunkConfig::default()
    }

    fn test_embedder() -> EmbedderConfig {
        EmbedderConfig {
            backend: EmbedderBackend::Hashing,
            dimension: 2,
            normalize: true,
            segment_cjk: false,
        }
    }

    #[test]
    fn title_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);

        save_title_index(&test_index(), &input, dir.path()).unwrap();
        let loaded = try_load_title_index(&title_cache_path(dir.path()), &input)
            .unwrap()
            .unwrap();

        assert_eq!(loaded.resolve_id("Alpha"), Some("1"));
        assert_eq!(
            loaded.canonical_title("Alice/Post"),
            Some("User blog:Alice/Post")
        );
    }

    #[test]
    fn title_cache_misses_when_input_changes() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        save_title_index(&test_index(), &input, dir.path()).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut file = File::create(&input).unwrap();
        writeln!(file, "<mediawiki><page></page></mediawiki>").unwrap();

        let loaded = try_load_title_index(&title_cache_path(dir.path()), &input).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn title_cache_misses_on_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        let cache_file = title_cache_path(dir.path());
        let mut file = File::create(&cache_file).unwrap();
        file.write_all(b"not valid bincode").unwrap();

        assert!(try_load_title_index(&cache_file, &input).unwrap().is_none());
    }

    #[test]
    fn store_cache_round_trip() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);

        save_store(&test_store(), &input, dir.path(), test_site(), test_chunk(), test_embedder()).unwrap();
        let loaded = try_load_store(
            &store_cache_path(dir.path()),
            &input,
            &test_chunk(),
            &test_embedder(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.dimension(), Some(2));
        assert_eq!(loaded.records()[0].id, "1-0");
    }

    #[test]
    fn store_cache_misses_on_parameter_change() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        save_store(&test_store(), &input, dir.path(), test_site(), test_chunk(), test_embedder()).unwrap();

        let other_chunk = ChunkConfig {
            chunk_size: 500,
            overlap: 100,
        };
        let loaded = try_load_store(
            &store_cache_path(dir.path()),
            &input,
            &other_chunk,
            &test_embedder(),
        )
        .unwrap();
        assert!(loaded.is_none());

        let other_embedder = EmbedderConfig {
            dimension: 8,
            ..test_embedder()
        };
        let loaded = try_load_store(
            &store_cache_path(dir.path()),
            &input,
            &test_chunk(),
            &other_embedder,
        )
        .unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn load_store_missing_is_index_not_built() {
        let dir = TempDir::new().unwrap();
        let err = load_store(&store_cache_path(dir.path())).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::IndexNotBuilt { .. })
        ));
    }

    #[test]
    fn load_store_returns_embedder_config() {
        let dir = TempDir::new().unwrap();
        let input = create_test_input(&dir);
        save_store(&test_store(), &input, dir.path(), test_site(), test_chunk(), test_embedder()).unwrap();

        let (metadata, store) = load_store(&store_cache_path(dir.path())).unwrap();
        assert_eq!(metadata.embedder, test_embedder());
        assert_eq!(metadata.passage_count, store.len());
    }

    #[test]
    fn titles_csv_is_sorted_and_complete() {
        let dir = TempDir::new().unwrap();
        write_titles_csv(&test_index(), dir.path()).unwrap();

        let content = fs::read_to_string(titles_csv_path(dir.path())).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "title,id");
        assert_eq!(lines[1], "Alpha,1");
        assert_eq!(lines[2], "User blog:Alice/Post,2");
    }
}
