// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Process-wide cache of pre-signed file URLs.
//!
//! Credentials are batch-issued: one issuance call signs the URLs for every
//! file discovered by one scan resolution. Entries are therefore grouped
//! into partitions keyed by `<tableLocation>#<fingerprint>`, so distinct
//! queries against the same table never share or prematurely evict each
//! other's URL sets, while identical queries reuse one set. The unit of
//! refresh is the partition batch, never the individual file.
//!
//! Concurrency: reads go through a lock-free concurrent cache; a stale
//! batch is refreshed under a per-partition lock so that N concurrent
//! readers produce exactly one issuance call. Waiters that cannot acquire
//! the lock within the configured timeout surface an error instead of
//! blocking indefinitely, and an abandoned refresh releases its lock on
//! drop, so no partition can stay marked "refreshing" forever.
//!
//! The cache is an explicitly constructed service object shared by `Arc`
//! and handed to callers by dependency injection, not an ambient global.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::policy::EvictionPolicy;
use tracing::{debug, warn};

use crate::client::CredentialIssuer;
use crate::config::ClientConfig;
use crate::scan::TableReference;
use crate::{Error, ErrorKind, Result};

/// One cached signed URL together with its signer-stated expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The pre-signed URL.
    pub url: String,
    /// Expiry as stated by the signer, epoch milliseconds.
    pub expiration_epoch_millis: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FileKey {
    partition: String,
    file_id: String,
}

/// Lets moka expire each entry at the signer-stated instant.
struct UrlExpiry;

impl UrlExpiry {
    fn until_expiration(entry: &CacheEntry) -> Option<Duration> {
        let remaining_millis = entry.expiration_epoch_millis - now_millis();
        Some(Duration::from_millis(remaining_millis.max(0) as u64))
    }
}

impl Expiry<FileKey, CacheEntry> for UrlExpiry {
    fn expire_after_create(
        &self,
        _key: &FileKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Self::until_expiration(value)
    }

    fn expire_after_update(
        &self,
        _key: &FileKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Self::until_expiration(value)
    }
}

#[derive(Debug)]
struct LeaseInner {
    #[allow(dead_code)]
    partition: String,
}

/// Keeps a cache partition alive for the duration of a scan.
///
/// The cache holds only weak references; once every lease of a partition is
/// dropped, the next sweep may evict the partition's expired URLs.
#[derive(Debug, Clone)]
pub struct ScanLease {
    _inner: Arc<LeaseInner>,
}

struct Partition {
    table: TableReference,
    file_ids: HashSet<String>,
    leases: Vec<Weak<LeaseInner>>,
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Partition {
    fn is_live(&self) -> bool {
        self.leases.iter().any(|lease| lease.strong_count() > 0)
    }

    fn prune_leases(&mut self) {
        self.leases.retain(|lease| lease.strong_count() > 0);
    }
}

/// Process-wide, expiration-aware store of pre-signed URLs.
pub struct PresignedUrlCache {
    entries: moka::future::Cache<FileKey, CacheEntry>,
    partitions: RwLock<HashMap<String, Partition>>,
    issuer: Arc<dyn CredentialIssuer>,
    refresh_skew_millis: i64,
    refresh_timeout: Duration,
}

impl PresignedUrlCache {
    /// Creates a cache that refreshes through `issuer`, sized and tuned
    /// from `config`.
    pub fn new(issuer: Arc<dyn CredentialIssuer>, config: &ClientConfig) -> Self {
        let entries = moka::future::Cache::builder()
            .eviction_policy(EvictionPolicy::lru())
            .max_capacity(config.max_cached_urls)
            .expire_after(UrlExpiry)
            .build();

        Self {
            entries,
            partitions: RwLock::new(HashMap::new()),
            issuer,
            refresh_skew_millis: config.refresh_skew.as_millis() as i64,
            refresh_timeout: config.refresh_timeout,
        }
    }

    /// Registers (or extends) a partition for one resolved scan and returns
    /// the lease that keeps it alive.
    pub fn register(
        &self,
        table: &TableReference,
        partition_key: &str,
        file_ids: impl IntoIterator<Item = String>,
    ) -> ScanLease {
        let lease = Arc::new(LeaseInner {
            partition: partition_key.to_string(),
        });

        let mut partitions = self.partitions.write().expect("partition registry poisoned");
        let partition = partitions
            .entry(partition_key.to_string())
            .or_insert_with(|| Partition {
                table: table.clone(),
                file_ids: HashSet::new(),
                leases: Vec::new(),
                refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
            });
        partition.file_ids.extend(file_ids);
        partition.prune_leases();
        partition.leases.push(Arc::downgrade(&lease));

        ScanLease { _inner: lease }
    }

    /// Eagerly signs the whole batch of a registered partition.
    pub async fn populate(&self, partition_key: &str) -> Result<()> {
        self.refresh_partition(partition_key).await
    }

    /// Returns a usable URL for one file, refreshing the owning batch if
    /// the cached entry is absent or within the refresh skew of expiry.
    pub async fn get(&self, partition_key: &str, file_id: &str) -> Result<CacheEntry> {
        let key = FileKey {
            partition: partition_key.to_string(),
            file_id: file_id.to_string(),
        };

        if let Some(entry) = self.entries.get(&key).await
            && self.is_fresh(&entry)
        {
            return Ok(entry);
        }

        self.refresh_partition(partition_key).await?;

        self.entries.get(&key).await.ok_or_else(|| {
            Error::new(
                ErrorKind::CredentialUnavailable,
                format!("no signed URL was issued for file `{file_id}`"),
            )
            .with_context("partition", partition_key)
        })
    }

    /// Number of live URL entries. Eventually consistent; call
    /// [`PresignedUrlCache::run_pending_tasks`] first for an exact count.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Number of registered cache partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions
            .read()
            .expect("partition registry poisoned")
            .len()
    }

    /// Flushes the backing cache's pending maintenance so counts are exact.
    pub async fn run_pending_tasks(&self) {
        self.entries.run_pending_tasks().await;
    }

    /// Evicts partitions whose URLs are all past expiration and whose scan
    /// leases have all been released; refreshes still-leased partitions
    /// that have gone stale.
    pub async fn sweep(&self) {
        let snapshot: Vec<(String, Vec<String>, bool)> = {
            let mut partitions = self.partitions.write().expect("partition registry poisoned");
            partitions
                .iter_mut()
                .map(|(key, partition)| {
                    partition.prune_leases();
                    (
                        key.clone(),
                        partition.file_ids.iter().cloned().collect(),
                        partition.is_live(),
                    )
                })
                .collect()
        };

        for (partition_key, file_ids, live) in snapshot {
            if live {
                if self.any_member_stale(&partition_key, &file_ids).await
                    && let Err(err) = self.refresh_partition(&partition_key).await
                {
                    warn!(
                        partition = %partition_key,
                        error = %err,
                        "background refresh of a leased partition failed"
                    );
                }
                continue;
            }

            if self.all_members_expired(&partition_key, &file_ids).await {
                debug!(partition = %partition_key, "evicting released cache partition");
                self.partitions
                    .write()
                    .expect("partition registry poisoned")
                    .remove(&partition_key);
                for file_id in file_ids {
                    self.entries
                        .invalidate(&FileKey {
                            partition: partition_key.clone(),
                            file_id,
                        })
                        .await;
                }
            }
        }
    }

    /// Runs [`PresignedUrlCache::sweep`] on a fixed interval until the last
    /// strong reference to the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep().await;
            }
        })
    }

    /// Refreshes the whole batch of one partition through the issuer,
    /// de-duplicating concurrent refreshes of the same partition.
    async fn refresh_partition(&self, partition_key: &str) -> Result<()> {
        let (table, file_ids, refresh_lock) = {
            let partitions = self.partitions.read().expect("partition registry poisoned");
            let Some(partition) = partitions.get(partition_key) else {
                return Err(Error::new(
                    ErrorKind::CredentialUnavailable,
                    format!("unknown cache partition `{partition_key}`"),
                ));
            };
            (
                partition.table.clone(),
                partition.file_ids.clone(),
                Arc::clone(&partition.refresh_lock),
            )
        };

        let _guard = tokio::time::timeout(self.refresh_timeout, refresh_lock.lock())
            .await
            .map_err(|_| {
                Error::new(
                    ErrorKind::CredentialUnavailable,
                    format!(
                        "an in-flight credential refresh for partition `{partition_key}` did not complete within {:?}",
                        self.refresh_timeout
                    ),
                )
            })?;

        // Another reader may have finished the refresh while this one was
        // waiting on the lock.
        if self.all_members_fresh(partition_key, &file_ids).await {
            debug!(partition = %partition_key, "joined a completed in-flight refresh");
            return Ok(());
        }

        let signed = self.issuer.sign(&table, &file_ids).await.map_err(|err| {
            Error::new(
                ErrorKind::CredentialUnavailable,
                format!("credential issuance failed for partition `{partition_key}`"),
            )
            .with_source(err)
        })?;

        debug!(
            partition = %partition_key,
            files = signed.len(),
            "installed refreshed signed URLs"
        );
        for (file_id, url) in signed {
            self.entries
                .insert(
                    FileKey {
                        partition: partition_key.to_string(),
                        file_id,
                    },
                    CacheEntry {
                        url: url.url,
                        expiration_epoch_millis: url.expiration_epoch_millis,
                    },
                )
                .await;
        }
        Ok(())
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        now_millis() < entry.expiration_epoch_millis - self.refresh_skew_millis
    }

    async fn all_members_fresh(&self, partition_key: &str, file_ids: &HashSet<String>) -> bool {
        for file_id in file_ids {
            let key = FileKey {
                partition: partition_key.to_string(),
                file_id: file_id.clone(),
            };
            match self.entries.get(&key).await {
                Some(entry) if self.is_fresh(&entry) => {}
                _ => return false,
            }
        }
        true
    }

    async fn any_member_stale(&self, partition_key: &str, file_ids: &[String]) -> bool {
        for file_id in file_ids {
            let key = FileKey {
                partition: partition_key.to_string(),
                file_id: file_id.clone(),
            };
            match self.entries.get(&key).await {
                Some(entry) if self.is_fresh(&entry) => {}
                _ => return true,
            }
        }
        false
    }

    async fn all_members_expired(&self, partition_key: &str, file_ids: &[String]) -> bool {
        let now = now_millis();
        for file_id in file_ids {
            let key = FileKey {
                partition: partition_key.to_string(),
                file_id: file_id.clone(),
            };
            if let Some(entry) = self.entries.get(&key).await
                && now < entry.expiration_epoch_millis
            {
                return false;
            }
        }
        true
    }
}

impl std::fmt::Debug for PresignedUrlCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresignedUrlCache")
            .field("entries", &self.entries.entry_count())
            .field("partitions", &self.partition_count())
            .finish()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::client::SignedUrl;
    use crate::config::ClientConfig;

    struct MockIssuer {
        calls: AtomicUsize,
        validity: Duration,
        delay: Duration,
    }

    impl MockIssuer {
        fn new(validity: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                validity,
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CredentialIssuer for MockIssuer {
        async fn sign(
            &self,
            _table: &TableReference,
            file_ids: &HashSet<String>,
        ) -> Result<HashMap<String, SignedUrl>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let expiration = now_millis() + self.validity.as_millis() as i64;
            Ok(file_ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        SignedUrl {
                            url: format!("https://signed.example.com/{id}?gen={call}"),
                            expiration_epoch_millis: expiration,
                        },
                    )
                })
                .collect())
        }
    }

    fn table() -> TableReference {
        TableReference::new("share1", "default", "table1")
    }

    fn config(skew: Duration, timeout: Duration) -> ClientConfig {
        ClientConfig::builder()
            .refresh_skew(skew)
            .refresh_timeout(timeout)
            .build()
    }

    fn cache_with(
        issuer: Arc<MockIssuer>,
        skew: Duration,
        timeout: Duration,
    ) -> Arc<PresignedUrlCache> {
        Arc::new(PresignedUrlCache::new(issuer, &config(skew, timeout)))
    }

    #[tokio::test]
    async fn test_populate_then_idempotent_reads() {
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(3600)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string(), "f2".to_string()]);
        cache.populate("loc#fp1").await.unwrap();
        assert_eq!(issuer.calls(), 1);

        let first = cache.get("loc#fp1", "f1").await.unwrap();
        let second = cache.get("loc#fp1", "f1").await.unwrap();
        let other = cache.get("loc#fp1", "f2").await.unwrap();
        assert_eq!(first, second);
        assert_ne!(first.url, other.url);
        // all reads served from cache, no further issuance
        assert_eq!(issuer.calls(), 1);

        cache.run_pending_tasks().await;
        assert_eq!(cache.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_lazy_get_refreshes_on_miss() {
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(3600)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);
        let entry = cache.get("loc#fp1", "f1").await.unwrap();
        assert!(entry.url.contains("f1"));
        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_entry_triggers_batch_refresh() {
        // URLs are issued already inside the refresh skew, so the second
        // read refreshes the batch once more.
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(30)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string(), "f2".to_string()]);
        cache.get("loc#fp1", "f1").await.unwrap();
        assert_eq!(issuer.calls(), 1);

        // stale again, refresh covers the whole batch
        cache.get("loc#fp1", "f2").await.unwrap();
        assert_eq!(issuer.calls(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_share_one_refresh() {
        let issuer = Arc::new(
            MockIssuer::new(Duration::from_secs(3600)).with_delay(Duration::from_millis(25)),
        );
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string(), "f2".to_string()]);

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                let file_id = if i % 2 == 0 { "f1" } else { "f2" };
                tokio::spawn(async move { cache.get("loc#fp1", file_id).await.unwrap() })
            })
            .collect();
        for entry in futures::future::join_all(tasks).await {
            entry.unwrap();
        }

        assert_eq!(issuer.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_wait_timeout_surfaces_error() {
        let issuer = Arc::new(
            MockIssuer::new(Duration::from_secs(3600)).with_delay(Duration::from_millis(200)),
        );
        let cache = cache_with(
            issuer.clone(),
            Duration::from_secs(60),
            Duration::from_millis(20),
        );

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get("loc#fp1", "f1").await })
        };
        // let the slow refresh take the lock first
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = cache.get("loc#fp1", "f1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(err.message().contains("did not complete"));

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_partition_and_unknown_file() {
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(3600)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let err = cache.get("loc#missing", "f1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(err.message().contains("unknown cache partition"));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);
        let err = cache.get("loc#fp1", "not-a-member").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CredentialUnavailable);
        assert!(err.message().contains("not-a-member"));
    }

    #[tokio::test]
    async fn test_partition_isolation() {
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(3600)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease_a = cache.register(&table(), "loc#fpA", ["f1".to_string()]);
        let _lease_b = cache.register(&table(), "loc#fpB", ["f1".to_string()]);
        assert_eq!(cache.partition_count(), 2);

        let a = cache.get("loc#fpA", "f1").await.unwrap();
        let b = cache.get("loc#fpB", "f1").await.unwrap();
        // same file id, separate batches, separately issued URLs
        assert_ne!(a.url, b.url);
        assert_eq!(issuer.calls(), 2);

        // an identical query registers into the existing partition
        let _lease_a2 = cache.register(&table(), "loc#fpA", ["f1".to_string()]);
        assert_eq!(cache.partition_count(), 2);
    }

    #[tokio::test]
    async fn test_sweep_evicts_released_expired_partitions() {
        // zero validity: issued URLs are expired immediately
        let issuer = Arc::new(MockIssuer::new(Duration::ZERO));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);
        let _ = cache.populate("loc#fp1").await;
        assert_eq!(cache.partition_count(), 1);

        // still leased: sweep must keep the partition
        cache.sweep().await;
        assert_eq!(cache.partition_count(), 1);

        drop(lease);
        cache.sweep().await;
        assert_eq!(cache.partition_count(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_released_but_unexpired_partitions() {
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(3600)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);
        cache.populate("loc#fp1").await.unwrap();
        drop(lease);

        cache.sweep().await;
        assert_eq!(cache.partition_count(), 1);
    }

    #[tokio::test]
    async fn test_sweep_refreshes_leased_stale_partitions() {
        // URLs are always within the skew, so a sweep refreshes them.
        let issuer = Arc::new(MockIssuer::new(Duration::from_secs(30)));
        let cache = cache_with(issuer.clone(), Duration::from_secs(60), Duration::from_secs(5));

        let _lease = cache.register(&table(), "loc#fp1", ["f1".to_string()]);
        let _ = cache.populate("loc#fp1").await;
        let before = issuer.calls();

        cache.sweep().await;
        assert_eq!(issuer.calls(), before + 1);
    }
}
