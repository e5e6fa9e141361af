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

//! Scan resolution.
//!
//! [`ScanResolver`] turns a logical table plus scan parameters into the
//! list of opaque [`FileReference`]s the engine will read, populating the
//! pre-signed URL cache along the way. It performs no I/O of its own and no
//! retries; failures from the metadata client propagate as-is, so callers
//! either get a complete file list or a single descriptive error.

mod file_ref;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

pub use self::file_ref::{FILE_PATH_SCHEME, FileReference, SharedFilePath, cache_partition_key};
use crate::cache::{PresignedUrlCache, ScanLease};
use crate::client::{FileAction, MetadataClient};
use crate::config::{CachePopulation, ClientConfig};
use crate::expr::translate::predicate_hints;
use crate::expr::Expr;
use crate::fingerprint::QueryFingerprint;
use crate::profile::ShareProfile;
use crate::schema::ensure_read_compatible;
use crate::{Error, ErrorKind, Result};

/// Derived partition column holding the commit version of a change action.
pub const COMMIT_VERSION_COLUMN: &str = "_commit_version";

/// Derived partition column holding the commit timestamp of a change action.
pub const COMMIT_TIMESTAMP_COLUMN: &str = "_commit_timestamp";

/// Derived partition column distinguishing inserts from deletes in a
/// change-data scan. Only add/remove groups carry it; cdc files encode the
/// change type in their data instead.
pub const CHANGE_TYPE_COLUMN: &str = "_change_type";

const CHANGE_TYPE_INSERT: &str = "insert";
const CHANGE_TYPE_DELETE: &str = "delete";

/// Identifies one logical table within a share.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableReference {
    /// Share the table is exposed through.
    pub share: String,
    /// Schema within the share.
    pub schema: String,
    /// Table name.
    pub name: String,
}

impl TableReference {
    /// Creates a table reference from its three parts.
    pub fn new(
        share: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            share: share.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses the `share.schema.table` fragment used to address tables.
    pub fn parse_fragment(fragment: &str) -> Result<Self> {
        let parts: Vec<&str> = fragment.split('.').collect();
        let [share, schema, name] = parts[..] else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("invalid table fragment `{fragment}` (expected `share.schema.table`)"),
            ));
        };
        if share.is_empty() || schema.is_empty() || name.is_empty() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("invalid table fragment `{fragment}` (expected `share.schema.table`)"),
            ));
        }
        Ok(Self::new(share, schema, name))
    }
}

impl fmt::Display for TableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.share, self.schema, self.name)
    }
}

/// Selects the table state a scan reads.
///
/// The variants are mutually exclusive by construction; a change-range
/// selector turns the scan into a change-data-feed scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    /// The latest snapshot.
    Latest,
    /// The snapshot at a specific version.
    Version(i64),
    /// The snapshot current at a timestamp.
    Timestamp(String),
    /// Change actions between two versions, both inclusive.
    ChangeRange {
        /// First version of the range.
        start: i64,
        /// Last version of the range.
        end: i64,
    },
}

impl VersionSelector {
    /// Whether this selector denotes a change-data-feed scan.
    pub fn is_change_range(&self) -> bool {
        matches!(self, VersionSelector::ChangeRange { .. })
    }

    pub(crate) fn fingerprint_part(&self) -> String {
        match self {
            VersionSelector::Latest => "latest".to_string(),
            VersionSelector::Version(version) => format!("version:{version}"),
            VersionSelector::Timestamp(timestamp) => format!("timestamp:{timestamp}"),
            VersionSelector::ChangeRange { start, end } => format!("range:{start}:{end}"),
        }
    }
}

/// Everything that shapes one logical scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanParameters {
    /// Predicates over partition columns.
    pub partition_predicates: Vec<Expr>,
    /// Predicates over data columns.
    pub data_predicates: Vec<Expr>,
    /// Upper bound on the total number of returned files.
    pub limit: Option<u64>,
    /// Table state to read.
    pub version: VersionSelector,
    /// Schema the scan was planned against, for compatibility checking.
    pub expected_schema: Option<String>,
}

impl ScanParameters {
    /// Creates a builder reading the latest snapshot.
    pub fn builder() -> ScanParametersBuilder {
        ScanParametersBuilder::default()
    }

    /// Whether these parameters describe a change-data-feed scan.
    pub fn is_cdf(&self) -> bool {
        self.version.is_change_range()
    }

    fn all_predicates(&self) -> Vec<Expr> {
        let mut predicates = self.partition_predicates.clone();
        predicates.extend(self.data_predicates.iter().cloned());
        predicates
    }

    /// Fingerprint of these parameters: change-range scans hash only the
    /// range, point-in-time scans hash predicates, limit, and version.
    pub fn fingerprint(&self) -> QueryFingerprint {
        match &self.version {
            VersionSelector::ChangeRange { start, end } => {
                QueryFingerprint::of_change_range(*start, *end)
            }
            version => QueryFingerprint::of_scan(&self.all_predicates(), self.limit, version),
        }
    }
}

/// Builder for [`ScanParameters`].
#[derive(Debug, Clone)]
pub struct ScanParametersBuilder {
    params: ScanParameters,
}

impl Default for ScanParametersBuilder {
    fn default() -> Self {
        Self {
            params: ScanParameters {
                partition_predicates: Vec::new(),
                data_predicates: Vec::new(),
                limit: None,
                version: VersionSelector::Latest,
                expected_schema: None,
            },
        }
    }
}

impl ScanParametersBuilder {
    /// Adds a predicate over partition columns.
    pub fn partition_predicate(mut self, predicate: Expr) -> Self {
        self.params.partition_predicates.push(predicate);
        self
    }

    /// Adds a predicate over data columns.
    pub fn data_predicate(mut self, predicate: Expr) -> Self {
        self.params.data_predicates.push(predicate);
        self
    }

    /// Bounds the total number of returned files.
    pub fn limit(mut self, limit: u64) -> Self {
        self.params.limit = Some(limit);
        self
    }

    /// Selects the table state to read.
    pub fn version(mut self, version: VersionSelector) -> Self {
        self.params.version = version;
        self
    }

    /// Records the schema the scan was planned against.
    pub fn expected_schema(mut self, schema: impl Into<String>) -> Self {
        self.params.expected_schema = Some(schema.into());
        self
    }

    /// Builds the parameters.
    pub fn build(self) -> ScanParameters {
        self.params
    }
}

/// The outcome of one scan resolution.
#[derive(Debug)]
pub struct Resolution {
    /// The files to read, ordered by discovery within each group.
    pub files: Vec<FileReference>,
    /// Fingerprint under which the files were cached.
    pub fingerprint: QueryFingerprint,
    /// Keeps the URL-cache partition alive; `None` when caching is off.
    pub lease: Option<ScanLease>,
}

/// Resolves logical scans into file references.
pub struct ScanResolver {
    profile: Arc<ShareProfile>,
    metadata_client: Arc<dyn MetadataClient>,
    url_cache: Option<Arc<PresignedUrlCache>>,
    config: ClientConfig,
}

impl ScanResolver {
    /// Creates a resolver without URL caching.
    pub fn new(
        profile: Arc<ShareProfile>,
        metadata_client: Arc<dyn MetadataClient>,
        config: ClientConfig,
    ) -> Self {
        Self {
            profile,
            metadata_client,
            url_cache: None,
            config,
        }
    }

    /// Attaches the shared URL cache this resolver populates.
    pub fn with_url_cache(mut self, cache: Arc<PresignedUrlCache>) -> Self {
        self.url_cache = Some(cache);
        self
    }

    /// The location string identifying `table` for caching and file paths.
    pub fn table_location(&self, table: &TableReference) -> String {
        format!("{}#{}", self.profile.endpoint(), table)
    }

    /// Resolves a scan into its file references, populating the URL cache
    /// as a side effect when enabled.
    pub async fn resolve(&self, table: &TableReference, params: &ScanParameters) -> Result<Resolution> {
        if self.profile.is_expired(chrono::Utc::now()) {
            return Err(Error::new(
                ErrorKind::CredentialUnavailable,
                "the bearer token in the share profile has expired",
            ));
        }

        let fingerprint = params.fingerprint();
        let files = self.list(table, params, &fingerprint, params.limit).await?;

        let lease = match &self.url_cache {
            Some(cache) if self.config.url_cache_enabled => {
                let partition_key = cache_partition_key(&self.table_location(table), &fingerprint);
                let lease = cache.register(
                    table,
                    &partition_key,
                    files.iter().map(|file| file.file_id.clone()),
                );
                if self.config.cache_population == CachePopulation::OnResolve
                    && !files.is_empty()
                    && let Err(err) = cache.populate(&partition_key).await
                {
                    // A failed eager population only degrades to lazy; the
                    // read path retries and surfaces its own error.
                    warn!(
                        partition = %partition_key,
                        error = %err,
                        "eager URL population failed, deferring to first read"
                    );
                }
                Some(lease)
            }
            _ => None,
        };

        debug!(
            table = %table,
            fingerprint = %fingerprint,
            files = files.len(),
            "resolved scan"
        );

        Ok(Resolution {
            files,
            fingerprint,
            lease,
        })
    }

    /// Enumerates every file of the scan, ignoring the limit and never
    /// touching the URL cache. Used for lineage/input-file listings.
    pub async fn list_input_files(
        &self,
        table: &TableReference,
        params: &ScanParameters,
    ) -> Result<Vec<FileReference>> {
        let unlimited = ScanParameters {
            limit: None,
            ..params.clone()
        };
        let fingerprint = unlimited.fingerprint();
        self.list(table, &unlimited, &fingerprint, None).await
    }

    async fn list(
        &self,
        table: &TableReference,
        params: &ScanParameters,
        fingerprint: &QueryFingerprint,
        limit: Option<u64>,
    ) -> Result<Vec<FileReference>> {
        if let Some(planned) = &params.expected_schema {
            let metadata = self
                .metadata_client
                .get_metadata(table, &params.version)
                .await?;
            ensure_read_compatible(
                planned,
                &metadata.schema_string,
                self.config.structural_schema_match_enabled,
            )?;
        }

        let hints = predicate_hints(
            &params.partition_predicates,
            &params.data_predicates,
            self.config.predicate_hints_enabled,
            self.config.predicate_v2_enabled,
        );

        let table_location = self.table_location(table);
        let mut files = match &params.version {
            VersionSelector::ChangeRange { start, end } => {
                let changes = self
                    .metadata_client
                    .list_change_files(table, *start, *end, hints.as_ref())
                    .await?;
                let mut files = Vec::with_capacity(
                    changes.add_files.len() + changes.remove_files.len() + changes.cdc_files.len(),
                );
                for action in &changes.add_files {
                    files.push(self.change_file(
                        &table_location,
                        fingerprint,
                        action,
                        Some(CHANGE_TYPE_INSERT),
                    ));
                }
                for action in &changes.remove_files {
                    files.push(self.change_file(
                        &table_location,
                        fingerprint,
                        action,
                        Some(CHANGE_TYPE_DELETE),
                    ));
                }
                for action in &changes.cdc_files {
                    files.push(self.change_file(&table_location, fingerprint, action, None));
                }
                files
            }
            version => self
                .metadata_client
                .list_files(table, hints.as_ref(), limit, version)
                .await?
                .iter()
                .map(|action| FileReference {
                    table_location: table_location.clone(),
                    fingerprint: fingerprint.clone(),
                    file_id: action.id.clone(),
                    size: action.size,
                    partition_values: action.partition_values.clone(),
                    commit_version: action.version,
                    commit_timestamp: action.timestamp,
                    change_type: None,
                })
                .collect(),
        };

        // The server treats the limit as a hint; enforce it over the total
        // count across all groups.
        if let Some(limit) = limit
            && files.len() as u64 > limit
        {
            files.truncate(limit as usize);
        }

        Ok(files)
    }

    /// Builds a change-data file reference with its derived partition
    /// columns.
    fn change_file(
        &self,
        table_location: &str,
        fingerprint: &QueryFingerprint,
        action: &FileAction,
        change_type: Option<&str>,
    ) -> FileReference {
        let mut partition_values: HashMap<String, String> = HashMap::new();
        if let Some(version) = action.version {
            partition_values.insert(COMMIT_VERSION_COLUMN.to_string(), version.to_string());
        }
        if let Some(timestamp) = action.timestamp {
            partition_values.insert(COMMIT_TIMESTAMP_COLUMN.to_string(), timestamp.to_string());
        }
        if let Some(change_type) = change_type {
            partition_values.insert(CHANGE_TYPE_COLUMN.to_string(), change_type.to_string());
        }

        FileReference {
            table_location: table_location.to_string(),
            fingerprint: fingerprint.clone(),
            file_id: action.id.clone(),
            size: action.size,
            partition_values,
            commit_version: action.version,
            commit_timestamp: action.timestamp,
            change_type: change_type.map(str::to_string),
        }
    }
}
