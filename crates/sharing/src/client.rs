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

//! Capability seams towards the sharing server.
//!
//! The resolver and the URL cache never perform I/O themselves; they consume
//! two capabilities, one for table metadata and file listings and one for
//! signed-URL issuance. The HTTP implementations (transport, retry, auth
//! headers) live outside this crate.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Result;
use crate::scan::{TableReference, VersionSelector};

/// Table-level metadata returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    /// JSON rendering of the table schema (struct type).
    pub schema_string: String,
    /// Names of the table's partition columns.
    #[serde(default)]
    pub partition_columns: Vec<String>,
    /// Number of data files, when the server reports it.
    #[serde(default)]
    pub num_files: Option<u64>,
    /// Total data size in bytes, when the server reports it.
    #[serde(default)]
    pub size_in_bytes: Option<u64>,
}

/// One file action from a listing response.
///
/// Only the fields relevant to scan resolution are modeled; a snapshot
/// listing populates `partition_values`, a change-data listing additionally
/// carries the commit version and timestamp of the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAction {
    /// Stable file identifier, unique within the table.
    pub id: String,
    /// File size in bytes.
    pub size: u64,
    /// Engine-visible partition values of the file.
    #[serde(default)]
    pub partition_values: HashMap<String, String>,
    /// Commit version the action belongs to, for change-data listings.
    #[serde(default)]
    pub version: Option<i64>,
    /// Commit timestamp in epoch milliseconds, for change-data listings.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// The three action groups of a change-data listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeFiles {
    /// Files added within the range.
    pub add_files: Vec<FileAction>,
    /// Files removed within the range.
    pub remove_files: Vec<FileAction>,
    /// Dedicated change-data files within the range.
    pub cdc_files: Vec<FileAction>,
}

/// A time-limited pre-signed URL for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    /// The URL granting direct read access.
    pub url: String,
    /// Signer-stated expiry, epoch milliseconds.
    pub expiration_epoch_millis: i64,
}

/// Fetches table metadata and file-action listings from the sharing server.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Returns metadata of the table at the selected version.
    async fn get_metadata(
        &self,
        table: &TableReference,
        version: &VersionSelector,
    ) -> Result<TableMetadata>;

    /// Lists file actions of a snapshot scan.
    ///
    /// `predicates` is the translated wire-JSON hint, if any; `limit` is a
    /// server-side hint that may or may not be honored, so callers enforce
    /// it again locally.
    async fn list_files(
        &self,
        table: &TableReference,
        predicates: Option<&JsonValue>,
        limit: Option<u64>,
        version: &VersionSelector,
    ) -> Result<Vec<FileAction>>;

    /// Lists the add/remove/cdc actions of a change-range scan.
    async fn list_change_files(
        &self,
        table: &TableReference,
        start_version: i64,
        end_version: i64,
        predicates: Option<&JsonValue>,
    ) -> Result<ChangeFiles>;
}

/// Exchanges a table's credentials for pre-signed URLs on a batch of files.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Signs every file in `file_ids`, returning one URL per id.
    async fn sign(
        &self,
        table: &TableReference,
        file_ids: &HashSet<String>,
    ) -> Result<HashMap<String, SignedUrl>>;
}
