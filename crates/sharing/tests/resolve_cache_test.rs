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

//! End-to-end tests of scan resolution against the pre-signed URL cache,
//! with mocked server capabilities.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use delta_sharing::cache::PresignedUrlCache;
use delta_sharing::client::{
    ChangeFiles, CredentialIssuer, FileAction, MetadataClient, SignedUrl, TableMetadata,
};
use delta_sharing::config::{CachePopulation, ClientConfig};
use delta_sharing::expr::{Reference, ValueType};
use delta_sharing::fingerprint::QueryFingerprint;
use delta_sharing::profile::ShareProfile;
use delta_sharing::scan::{
    CHANGE_TYPE_COLUMN, COMMIT_TIMESTAMP_COLUMN, COMMIT_VERSION_COLUMN, ScanParameters,
    ScanResolver, TableReference, VersionSelector,
};
use delta_sharing::{ErrorKind, Result};
use serde_json::Value as JsonValue;

const SCHEMA: &str = r#"{"type":"struct","fields":[{"name":"id","type":"integer","nullable":false},{"name":"name","type":"string","nullable":true}]}"#;

fn file(id: &str, size: u64) -> FileAction {
    FileAction {
        id: id.to_string(),
        size,
        partition_values: HashMap::new(),
        version: None,
        timestamp: None,
    }
}

fn change_file(id: &str, version: i64, timestamp: i64) -> FileAction {
    FileAction {
        id: id.to_string(),
        size: 100,
        partition_values: HashMap::new(),
        version: Some(version),
        timestamp: Some(timestamp),
    }
}

#[derive(Default)]
struct MockServer {
    files: Vec<FileAction>,
    changes: ChangeFiles,
    schema_string: String,
    last_predicates: Mutex<Option<JsonValue>>,
    last_limit: Mutex<Option<u64>>,
}

impl MockServer {
    fn with_files(files: Vec<FileAction>) -> Self {
        Self {
            files,
            schema_string: SCHEMA.to_string(),
            ..Self::default()
        }
    }

    fn last_predicates(&self) -> Option<JsonValue> {
        self.last_predicates.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataClient for MockServer {
    async fn get_metadata(
        &self,
        _table: &TableReference,
        _version: &VersionSelector,
    ) -> Result<TableMetadata> {
        Ok(TableMetadata {
            schema_string: self.schema_string.clone(),
            partition_columns: vec![],
            num_files: Some(self.files.len() as u64),
            size_in_bytes: None,
        })
    }

    async fn list_files(
        &self,
        _table: &TableReference,
        predicates: Option<&JsonValue>,
        limit: Option<u64>,
        _version: &VersionSelector,
    ) -> Result<Vec<FileAction>> {
        *self.last_predicates.lock().unwrap() = predicates.cloned();
        *self.last_limit.lock().unwrap() = limit;
        // the server treats the limit as a hint and ignores it here
        Ok(self.files.clone())
    }

    async fn list_change_files(
        &self,
        _table: &TableReference,
        _start_version: i64,
        _end_version: i64,
        predicates: Option<&JsonValue>,
    ) -> Result<ChangeFiles> {
        *self.last_predicates.lock().unwrap() = predicates.cloned();
        Ok(self.changes.clone())
    }
}

struct CountingIssuer {
    calls: AtomicUsize,
}

impl CountingIssuer {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialIssuer for CountingIssuer {
    async fn sign(
        &self,
        _table: &TableReference,
        file_ids: &HashSet<String>,
    ) -> Result<HashMap<String, SignedUrl>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let expiration = chrono::Utc::now().timestamp_millis() + 3_600_000;
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

fn profile() -> Arc<ShareProfile> {
    Arc::new(
        ShareProfile::from_json(
            r#"{
                "shareCredentialsVersion": 1,
                "endpoint": "https://sharing.example.com/api",
                "bearerToken": "token"
            }"#,
        )
        .unwrap(),
    )
}

fn table() -> TableReference {
    TableReference::parse_fragment("share1.default.table1").unwrap()
}

struct Fixture {
    resolver: ScanResolver,
    cache: Arc<PresignedUrlCache>,
    server: Arc<MockServer>,
    issuer: Arc<CountingIssuer>,
}

fn fixture(server: MockServer, config: ClientConfig) -> Fixture {
    let server = Arc::new(server);
    let issuer = Arc::new(CountingIssuer::new());
    let cache = Arc::new(PresignedUrlCache::new(issuer.clone(), &config));
    let resolver = ScanResolver::new(profile(), server.clone(), config)
        .with_url_cache(cache.clone());
    Fixture {
        resolver,
        cache,
        server,
        issuer,
    }
}

#[tokio::test]
async fn test_resolve_populates_cache_eagerly() {
    let fx = fixture(
        MockServer::with_files(vec![file("f1", 10), file("f2", 20)]),
        ClientConfig::default(),
    );

    let params = ScanParameters::builder().build();
    let resolution = fx.resolver.resolve(&table(), &params).await.unwrap();

    assert_eq!(resolution.files.len(), 2);
    assert!(resolution.lease.is_some());
    assert_eq!(fx.issuer.calls(), 1);

    // every read is served from the primed cache
    for file in &resolution.files {
        let entry = fx
            .cache
            .get(&file.cache_partition(), &file.file_id)
            .await
            .unwrap();
        assert!(entry.url.contains(&file.file_id));
    }
    assert_eq!(fx.issuer.calls(), 1);
}

#[tokio::test]
async fn test_lazy_population_defers_to_first_read() {
    let config = ClientConfig::builder()
        .cache_population(CachePopulation::OnRead)
        .build();
    let fx = fixture(MockServer::with_files(vec![file("f1", 10)]), config);

    let resolution = fx
        .resolver
        .resolve(&table(), &ScanParameters::builder().build())
        .await
        .unwrap();
    assert_eq!(fx.issuer.calls(), 0);

    let file = &resolution.files[0];
    fx.cache
        .get(&file.cache_partition(), &file.file_id)
        .await
        .unwrap();
    assert_eq!(fx.issuer.calls(), 1);
}

#[tokio::test]
async fn test_cache_disabled_skips_population() {
    let config = ClientConfig::builder().url_cache_enabled(false).build();
    let fx = fixture(MockServer::with_files(vec![file("f1", 10)]), config);

    let resolution = fx
        .resolver
        .resolve(&table(), &ScanParameters::builder().build())
        .await
        .unwrap();
    assert!(resolution.lease.is_none());
    assert_eq!(fx.issuer.calls(), 0);
    assert_eq!(fx.cache.partition_count(), 0);
}

#[tokio::test]
async fn test_distinct_queries_use_disjoint_partitions() {
    let fx = fixture(
        MockServer::with_files(vec![file("f1", 10)]),
        ClientConfig::default(),
    );

    let plain = ScanParameters::builder().build();
    let filtered = ScanParameters::builder()
        .partition_predicate(Reference::new("id", ValueType::Int).equal("23"))
        .build();

    let a = fx.resolver.resolve(&table(), &plain).await.unwrap();
    let b = fx.resolver.resolve(&table(), &filtered).await.unwrap();
    assert_ne!(a.fingerprint, b.fingerprint);
    assert_eq!(fx.cache.partition_count(), 2);

    // same file id, separately issued URL sets
    let url_a = fx
        .cache
        .get(&a.files[0].cache_partition(), "f1")
        .await
        .unwrap();
    let url_b = fx
        .cache
        .get(&b.files[0].cache_partition(), "f1")
        .await
        .unwrap();
    assert_ne!(url_a.url, url_b.url);

    // an identical query reuses the existing partition
    let again = fx.resolver.resolve(&table(), &plain).await.unwrap();
    assert_eq!(again.fingerprint, a.fingerprint);
    assert_eq!(fx.cache.partition_count(), 2);
}

#[tokio::test]
async fn test_limit_truncates_primary_listing_only() {
    let files: Vec<FileAction> = (0..6).map(|i| file(&format!("f{i}"), 10)).collect();
    let fx = fixture(MockServer::with_files(files), ClientConfig::default());

    let params = ScanParameters::builder().limit(2).build();
    let resolution = fx.resolver.resolve(&table(), &params).await.unwrap();
    assert_eq!(resolution.files.len(), 2);
    // the hint was forwarded to the server as well
    assert_eq!(*fx.server.last_limit.lock().unwrap(), Some(2));

    let all = fx
        .resolver
        .list_input_files(&table(), &params)
        .await
        .unwrap();
    assert_eq!(all.len(), 6);
    assert_eq!(*fx.server.last_limit.lock().unwrap(), None);
    // input-file enumeration never touches the cache
    assert_eq!(fx.issuer.calls(), 1);
}

#[tokio::test]
async fn test_cdf_groups_carry_derived_partition_columns() {
    let server = MockServer {
        changes: ChangeFiles {
            add_files: vec![change_file("a1", 3, 1000)],
            remove_files: vec![change_file("r1", 4, 2000)],
            cdc_files: vec![change_file("c1", 5, 3000)],
        },
        schema_string: SCHEMA.to_string(),
        ..MockServer::default()
    };
    let fx = fixture(server, ClientConfig::default());

    let params = ScanParameters::builder()
        .version(VersionSelector::ChangeRange { start: 0, end: 5 })
        .build();
    let resolution = fx.resolver.resolve(&table(), &params).await.unwrap();
    assert_eq!(resolution.files.len(), 3);

    let by_id: HashMap<&str, _> = resolution
        .files
        .iter()
        .map(|f| (f.file_id.as_str(), f))
        .collect();

    let added = by_id["a1"];
    assert_eq!(added.partition_values[COMMIT_VERSION_COLUMN], "3");
    assert_eq!(added.partition_values[COMMIT_TIMESTAMP_COLUMN], "1000");
    assert_eq!(added.partition_values[CHANGE_TYPE_COLUMN], "insert");

    let removed = by_id["r1"];
    assert_eq!(removed.partition_values[CHANGE_TYPE_COLUMN], "delete");

    let cdc = by_id["c1"];
    assert_eq!(cdc.partition_values[COMMIT_VERSION_COLUMN], "5");
    assert!(!cdc.partition_values.contains_key(CHANGE_TYPE_COLUMN));
    assert!(cdc.change_type.is_none());

    // the fingerprint is derived from the range alone
    assert_eq!(
        resolution.fingerprint,
        QueryFingerprint::of_change_range(0, 5)
    );
}

#[tokio::test]
async fn test_predicate_hints_reach_the_server() {
    let fx = fixture(
        MockServer::with_files(vec![file("f1", 10)]),
        ClientConfig::builder().predicate_v2_enabled(true).build(),
    );

    let params = ScanParameters::builder()
        .partition_predicate(Reference::new("id", ValueType::Int).equal("23"))
        .data_predicate(Reference::new("cost", ValueType::Double).equal("23.5"))
        .build();
    fx.resolver.resolve(&table(), &params).await.unwrap();

    let hints = fx.server.last_predicates().unwrap();
    assert_eq!(hints["op"], "and");
    assert_eq!(hints["children"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_hints_disabled_sends_nothing() {
    let fx = fixture(
        MockServer::with_files(vec![file("f1", 10)]),
        ClientConfig::builder()
            .predicate_hints_enabled(false)
            .predicate_v2_enabled(true)
            .build(),
    );

    let params = ScanParameters::builder()
        .partition_predicate(Reference::new("id", ValueType::Int).equal("23"))
        .build();
    fx.resolver.resolve(&table(), &params).await.unwrap();
    assert_eq!(fx.server.last_predicates(), None);
}

#[tokio::test]
async fn test_schema_subset_fails_with_structural_matching() {
    let mut server = MockServer::with_files(vec![file("f1", 10)]);
    // the live table dropped the `name` field
    server.schema_string =
        r#"{"type":"struct","fields":[{"name":"id","type":"integer","nullable":false}]}"#
            .to_string();
    let fx = fixture(
        server,
        ClientConfig::builder()
            .structural_schema_match_enabled(true)
            .build(),
    );

    let params = ScanParameters::builder().expected_schema(SCHEMA).build();
    let err = fx.resolver.resolve(&table(), &params).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
}

#[tokio::test]
async fn test_schema_additions_are_compatible() {
    let mut server = MockServer::with_files(vec![file("f1", 10)]);
    server.schema_string = r#"{"type":"struct","fields":[{"name":"id","type":"integer","nullable":false},{"name":"name","type":"string","nullable":true},{"name":"added","type":"double","nullable":true}]}"#.to_string();
    let fx = fixture(
        server,
        ClientConfig::builder()
            .structural_schema_match_enabled(true)
            .build(),
    );

    let params = ScanParameters::builder().expected_schema(SCHEMA).build();
    fx.resolver.resolve(&table(), &params).await.unwrap();
}

#[tokio::test]
async fn test_file_paths_round_trip_through_the_read_path() {
    let fx = fixture(
        MockServer::with_files(vec![file("f1", 10)]),
        ClientConfig::default(),
    );

    let resolution = fx
        .resolver
        .resolve(&table(), &ScanParameters::builder().build())
        .await
        .unwrap();
    let file = &resolution.files[0];

    let decoded = delta_sharing::scan::SharedFilePath::parse(&file.to_path()).unwrap();
    let entry = fx
        .cache
        .get(&decoded.cache_partition(), &decoded.file_id)
        .await
        .unwrap();
    assert!(entry.url.contains("f1"));
}
