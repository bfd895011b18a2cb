//! RocksDB-backed persistent document store.
//!
//! Column families:
//! - `documents`: One bincode record per document, content LZ4 compressed
//! - `members`: Visibility index keyed `username\0doc_id`, one key for
//!   the owner and one per collaborator
//!
//! Listing what a user can see is a prefix scan over `members` followed by
//! point lookups in `documents`. Every save or delete rewrites the record
//! and its index keys in a single `WriteBatch`. RocksDB calls block, so
//! the async store methods hand them to `spawn_blocking`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{sort_recent_first, DocumentStore, StoreError};
use crate::model::{Document, DocumentId};

const CF_DOCUMENTS: &str = "documents";
const CF_MEMBERS: &str = "members";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_MEMBERS];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// Enable fsync on every write (default: false)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 512)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("coedit_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
        }
    }
}

impl StoreConfig {
    /// Create config for testing (small caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// On-disk document record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredDocument {
    id: Uuid,
    title: String,
    /// LZ4 with prepended size
    content: Vec<u8>,
    owner: String,
    collaborators: BTreeSet<String>,
    created_at_micros: i64,
    updated_at_micros: i64,
}

impl StoredDocument {
    fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id,
            title: doc.title.clone(),
            content: lz4_flex::compress_prepend_size(doc.content.as_bytes()),
            owner: doc.owner.clone(),
            collaborators: doc.collaborators.clone(),
            created_at_micros: doc.created_at.timestamp_micros(),
            updated_at_micros: doc.updated_at.timestamp_micros(),
        }
    }

    fn into_document(self) -> Result<Document, StoreError> {
        let raw = lz4_flex::decompress_size_prepended(&self.content)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let content =
            String::from_utf8(raw).map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(Document {
            id: self.id,
            title: self.title,
            content,
            owner: self.owner,
            collaborators: self.collaborators,
            created_at: timestamp(self.created_at_micros)?,
            updated_at: timestamp(self.updated_at_micros)?,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (record, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(record)
    }

    fn members(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner.as_str()).chain(self.collaborators.iter().map(String::as_str))
    }
}

fn timestamp(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::Deserialization(format!("timestamp out of range: {micros}")))
}

/// RocksDB-backed document store.
///
/// Read-modify-write callers must serialize saves of the same document;
/// the index update reads the previous record before writing the batch.
/// Every trait call runs on tokio's blocking pool.
pub struct RocksDocumentStore {
    inner: Arc<RocksInner>,
}

struct RocksInner {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
}

impl RocksDocumentStore {
    /// Open the store at the configured path.
    ///
    /// Creates the database and column families if they don't exist.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        log::info!("Opened document store at {}", config.path.display());
        Ok(Self {
            inner: Arc::new(RocksInner { db, config }),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_DOCUMENTS => {
                // Content is already LZ4 compressed in the record.
                opts.set_compression_type(DBCompressionType::None);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_MEMBERS => {
                opts.set_compression_type(DBCompressionType::Lz4);
            }
            _ => {}
        }

        opts
    }

    /// Get the database path.
    pub fn path(&self) -> &Path {
        &self.inner.config.path
    }

    /// Force a flush of memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.inner.db.flush()?;
        Ok(())
    }

    /// Run `op` against the database off the async workers.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&RocksInner) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Database(format!("store task failed: {e}")))?
    }
}

impl RocksInner {
    fn load(&self, id: DocumentId) -> Result<Option<StoredDocument>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(StoredDocument::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn save(&self, doc: &Document) -> Result<(), StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_members = self.cf(CF_MEMBERS)?;

        let record = StoredDocument::from_document(doc);
        let previous = self.load(doc.id)?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = &previous {
            for stale in previous.members().filter(|m| !record.members().any(|n| n == *m)) {
                batch.delete_cf(cf_members, member_key(stale, doc.id));
            }
        }
        for member in record.members() {
            batch.put_cf(cf_members, member_key(member, doc.id), b"");
        }
        batch.put_cf(cf_docs, doc.id.as_bytes(), record.encode()?);
        self.write(batch)
    }

    fn delete(&self, id: DocumentId) -> Result<bool, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_members = self.cf(CF_MEMBERS)?;

        let Some(record) = self.load(id)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        for member in record.members() {
            batch.delete_cf(cf_members, member_key(member, id));
        }
        batch.delete_cf(cf_docs, id.as_bytes());
        self.write(batch)?;
        Ok(true)
    }

    fn list_visible_to(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        let mut docs = Vec::new();
        for id in self.member_documents(username)? {
            match self.load(id)? {
                Some(record) => docs.push(record.into_document()?),
                None => log::warn!("Dangling member key {username} -> {id}"),
            }
        }
        sort_recent_first(&mut docs);
        Ok(docs)
    }

    /// Document ids indexed under `username`.
    fn member_documents(&self, username: &str) -> Result<Vec<DocumentId>, StoreError> {
        let cf = self.cf(CF_MEMBERS)?;
        let prefix = member_prefix(username);

        let mut ids = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let raw: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| StoreError::Deserialization("invalid member key".into()))?;
            ids.push(Uuid::from_bytes(raw));
        }
        Ok(ids)
    }

    fn write(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

fn member_prefix(username: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(username.len() + 1);
    key.extend_from_slice(username.as_bytes());
    key.push(0);
    key
}

/// `username \0 doc_id(16 bytes)`
fn member_key(username: &str, id: DocumentId) -> Vec<u8> {
    let mut key = member_prefix(username);
    key.extend_from_slice(id.as_bytes());
    key
}

#[async_trait]
impl DocumentStore for RocksDocumentStore {
    async fn get(&self, id: DocumentId) -> Result<Option<Document>, StoreError> {
        self.blocking(move |db| db.load(id)?.map(StoredDocument::into_document).transpose())
            .await
    }

    async fn save(&self, doc: &Document) -> Result<(), StoreError> {
        let doc = doc.clone();
        self.blocking(move |db| db.save(&doc)).await
    }

    async fn delete(&self, id: DocumentId) -> Result<bool, StoreError> {
        self.blocking(move |db| db.delete(id)).await
    }

    async fn list_owned_by(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        let mut owned: Vec<Document> = self
            .list_visible_to(username)
            .await?
            .into_iter()
            .filter(|d| d.is_owner(username))
            .collect();
        sort_recent_first(&mut owned);
        Ok(owned)
    }

    async fn list_visible_to(&self, username: &str) -> Result<Vec<Document>, StoreError> {
        let username = username.to_string();
        self.blocking(move |db| db.list_visible_to(&username)).await
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}
