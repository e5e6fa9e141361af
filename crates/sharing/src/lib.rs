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

//! Client-side query resolution and credential caching for an open
//! data-sharing protocol.
//!
//! A sharing server exposes large tabular datasets across organizational
//! boundaries without copying them: recipients receive short-lived
//! pre-signed object-storage URLs for the individual files of a logical
//! table. This crate implements the recipient-side core that sits between a
//! query engine and that server:
//!
//! - [`profile`] parses and validates the credential profiles a client is
//!   configured with.
//! - [`expr`] models predicate trees and translates them into the wire
//!   predicate grammar ([`expr::translate`]).
//! - [`fingerprint`] derives the deterministic cache-partition key of a
//!   scan.
//! - [`cache`] maintains the process-wide, expiration-aware store of
//!   pre-signed URLs with singleflight batch refresh.
//! - [`scan`] orchestrates the above, resolving a logical table and scan
//!   parameters into opaque file references.
//!
//! The HTTP transport, storage read paths, and engine integration are
//! external collaborators, consumed through the [`client::MetadataClient`]
//! and [`client::CredentialIssuer`] capabilities.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//!
//! use delta_sharing::cache::PresignedUrlCache;
//! use delta_sharing::config::ClientConfig;
//! use delta_sharing::profile::ShareProfile;
//! use delta_sharing::scan::{ScanParameters, ScanResolver, TableReference};
//!
//! let profile = Arc::new(ShareProfile::from_json(&profile_json)?);
//! let config = ClientConfig::default();
//! let cache = Arc::new(PresignedUrlCache::new(issuer, &config));
//! let resolver =
//!     ScanResolver::new(profile, metadata_client, config).with_url_cache(cache.clone());
//!
//! let table = TableReference::parse_fragment("share1.default.table1")?;
//! let resolution = resolver.resolve(&table, &ScanParameters::builder().build()).await?;
//! for file in &resolution.files {
//!     let entry = cache.get(&file.cache_partition(), &file.file_id).await?;
//!     // hand entry.url to the storage read path
//! }
//! ```

mod error;

pub use error::{Error, ErrorKind, Result};

pub mod cache;
pub mod client;
pub mod config;
pub mod expr;
pub mod fingerprint;
pub mod profile;
pub mod scan;
pub mod schema;
