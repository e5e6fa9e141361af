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

//! Opaque file references handed to the storage read path.
//!
//! A resolved scan yields one [`FileReference`] per remote file. The engine
//! only ever sees its string path form; the read path decodes the path back
//! into the cache partition and file id and asks the URL cache for a signed
//! URL. The path embeds the query fingerprint so that reads are served from
//! the URL set of exactly the query that produced them.

use std::collections::HashMap;

use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};

use crate::fingerprint::QueryFingerprint;
use crate::{Error, ErrorKind, Result};

/// Scheme of encoded file paths.
pub const FILE_PATH_SCHEME: &str = "delta-sharing";

/// Characters escaped inside the table-location path segment. `/` and `%`
/// must be escaped for the segment split to be unambiguous.
const LOCATION_SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'/')
    .add(b'%')
    .add(b'?')
    .add(b'#');

/// One remote file of a resolved scan.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReference {
    /// Location of the owning table.
    pub table_location: String,
    /// Fingerprint of the query that discovered this file.
    pub fingerprint: QueryFingerprint,
    /// Stable file identifier.
    pub file_id: String,
    /// File size in bytes.
    pub size: u64,
    /// Partition values as seen by the engine, including derived
    /// change-data columns where applicable.
    pub partition_values: HashMap<String, String>,
    /// Commit version the file belongs to, for change-data scans.
    pub commit_version: Option<i64>,
    /// Commit timestamp in epoch milliseconds, for change-data scans.
    pub commit_timestamp: Option<i64>,
    /// `insert`/`delete` for change-data add/remove groups.
    pub change_type: Option<String>,
}

impl FileReference {
    /// The URL-cache partition this file belongs to.
    pub fn cache_partition(&self) -> String {
        cache_partition_key(&self.table_location, &self.fingerprint)
    }

    /// Encodes this reference into its opaque path form:
    /// `delta-sharing:/<location#fingerprint>/<fileId>/<commitVersion>`.
    pub fn to_path(&self) -> String {
        let partition = self.cache_partition();
        format!(
            "{FILE_PATH_SCHEME}:/{}/{}/{}",
            utf8_percent_encode(&partition, LOCATION_SEGMENT),
            self.file_id,
            self.commit_version.unwrap_or(0),
        )
    }
}

/// Builds the URL-cache partition key for a table location and fingerprint.
pub fn cache_partition_key(table_location: &str, fingerprint: &QueryFingerprint) -> String {
    format!("{table_location}#{fingerprint}")
}

/// The identifying fields carried by an encoded file path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFilePath {
    /// Location of the owning table.
    pub table_location: String,
    /// Fingerprint segment of the cache partition.
    pub fingerprint: String,
    /// Stable file identifier.
    pub file_id: String,
    /// Commit version segment (0 for snapshot scans).
    pub commit_version: i64,
}

impl SharedFilePath {
    /// Decodes a path produced by [`FileReference::to_path`].
    pub fn parse(path: &str) -> Result<SharedFilePath> {
        let invalid = || {
            Error::new(
                ErrorKind::DataInvalid,
                format!("`{path}` is not a valid shared file path"),
            )
        };

        let rest = path
            .strip_prefix(FILE_PATH_SCHEME)
            .and_then(|rest| rest.strip_prefix(":/"))
            .ok_or_else(invalid)?;

        let mut segments = rest.split('/');
        let (Some(encoded), Some(file_id), Some(version), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(invalid());
        };
        if encoded.is_empty() || file_id.is_empty() {
            return Err(invalid());
        }

        let partition = percent_decode_str(encoded)
            .decode_utf8()
            .map_err(|_| invalid())?;
        let (table_location, fingerprint) = partition.rsplit_once('#').ok_or_else(invalid)?;
        let commit_version = version.parse::<i64>().map_err(|_| invalid())?;

        Ok(SharedFilePath {
            table_location: table_location.to_string(),
            fingerprint: fingerprint.to_string(),
            file_id: file_id.to_string(),
            commit_version,
        })
    }

    /// The URL-cache partition this path resolves against.
    pub fn cache_partition(&self) -> String {
        format!("{}#{}", self.table_location, self.fingerprint)
    }
}
