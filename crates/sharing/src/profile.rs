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

//! Credential profiles.
//!
//! A profile tells the client where the sharing server lives and how to
//! authenticate against it. Two generations exist on the wire: version 1 is
//! an untagged bearer-token shape, version 2 is type-tagged and currently
//! defines only the OAuth client-credentials flow. Profiles are parsed once
//! at session setup and are immutable afterwards; unknown fields are ignored
//! for forward compatibility, while a `shareCredentialsVersion` beyond
//! [`CURRENT_SHARE_CREDENTIALS_VERSION`] is rejected so that an old client
//! never silently misreads a newer profile.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::{Error, ErrorKind, Result};

/// Highest `shareCredentialsVersion` this client understands.
pub const CURRENT_SHARE_CREDENTIALS_VERSION: i64 = 2;

const BEARER_TOKEN_TYPE: &str = "bearer_token";
const OAUTH_CLIENT_CREDENTIALS_TYPE: &str = "oauth_client_credentials";

/// A parsed, validated credential profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShareProfile {
    /// Version 1: a long-lived bearer token.
    BearerToken {
        /// Base URL of the sharing server.
        endpoint: String,
        /// The token presented on every request.
        bearer_token: String,
        /// Optional expiry of the token itself.
        expiration_time: Option<DateTime<Utc>>,
    },
    /// Version 2, `oauth_client_credentials`: tokens are minted on demand
    /// from an OAuth token endpoint.
    OauthClientCredentials {
        /// Base URL of the sharing server.
        endpoint: String,
        /// OAuth token endpoint URL.
        token_endpoint: String,
        /// OAuth client id.
        client_id: String,
        /// OAuth client secret.
        client_secret: String,
        /// Optional OAuth scope.
        scope: Option<String>,
    },
}

impl ShareProfile {
    /// Parses a profile from its raw JSON text.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(raw)
            .map_err(|err| Error::new(ErrorKind::DataInvalid, "profile is not valid json").with_source(err))?;
        Self::from_value(&value)
    }

    /// Parses a profile from an already-deserialized JSON value.
    pub fn from_value(value: &JsonValue) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "profile must be a json object",
            ));
        };

        let version = match object.get("shareCredentialsVersion") {
            Some(JsonValue::Number(n)) => n.as_i64().ok_or_else(|| {
                Error::new(
                    ErrorKind::DataInvalid,
                    "shareCredentialsVersion must be an integer",
                )
            })?,
            Some(JsonValue::Null) | None => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "missing shareCredentialsVersion",
                ));
            }
            Some(_) => {
                return Err(Error::new(
                    ErrorKind::DataInvalid,
                    "shareCredentialsVersion must be an integer",
                ));
            }
        };

        if version > CURRENT_SHARE_CREDENTIALS_VERSION {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!(
                    "shareCredentialsVersion {version} is too new; the highest supported version is {CURRENT_SHARE_CREDENTIALS_VERSION}"
                ),
            ));
        }

        match version {
            1 => Self::parse_v1(object),
            2 => Self::parse_v2(object),
            other => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("unsupported shareCredentialsVersion {other}"),
            )),
        }
    }

    fn parse_v1(object: &serde_json::Map<String, JsonValue>) -> Result<Self> {
        // The type tag is implicit for version 1.
        if let Some(tag) = optional_str(object, "type")
            && tag != BEARER_TOKEN_TYPE
        {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("unknown profile type `{tag}` for shareCredentialsVersion 1"),
            ));
        }

        let bearer_token = required_str(object, "bearerToken")?;
        let endpoint = required_url(object, "endpoint")?;
        let expiration_time = optional_str(object, "expirationTime")
            .map(|raw| {
                DateTime::parse_from_rfc3339(raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|err| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("invalid expirationTime `{raw}`"),
                        )
                        .with_source(err)
                    })
            })
            .transpose()?;

        Ok(ShareProfile::BearerToken {
            endpoint,
            bearer_token,
            expiration_time,
        })
    }

    fn parse_v2(object: &serde_json::Map<String, JsonValue>) -> Result<Self> {
        let Some(tag) = optional_str(object, "type") else {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "profile is missing required field `type`",
            ));
        };
        if tag != OAUTH_CLIENT_CREDENTIALS_TYPE {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("unknown profile type `{tag}` for shareCredentialsVersion 2"),
            ));
        }

        Ok(ShareProfile::OauthClientCredentials {
            endpoint: required_url(object, "endpoint")?,
            token_endpoint: required_url(object, "tokenEndpoint")?,
            client_id: required_str(object, "clientId")?,
            client_secret: required_str(object, "clientSecret")?,
            scope: optional_str(object, "scope").map(str::to_string),
        })
    }

    /// Base URL of the sharing server.
    pub fn endpoint(&self) -> &str {
        match self {
            ShareProfile::BearerToken { endpoint, .. } => endpoint,
            ShareProfile::OauthClientCredentials { endpoint, .. } => endpoint,
        }
    }

    /// The `shareCredentialsVersion` this profile shape belongs to.
    pub fn share_credentials_version(&self) -> i64 {
        match self {
            ShareProfile::BearerToken { .. } => 1,
            ShareProfile::OauthClientCredentials { .. } => 2,
        }
    }

    /// Whether the profile's own credential has expired at `now`.
    ///
    /// Only bearer profiles carry an expiry; OAuth profiles mint fresh
    /// tokens on demand and never expire as a whole.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            ShareProfile::BearerToken {
                expiration_time: Some(expiration),
                ..
            } => now >= *expiration,
            _ => false,
        }
    }
}

fn required_str(object: &serde_json::Map<String, JsonValue>, field: &str) -> Result<String> {
    match object.get(field) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Null) | None => Err(Error::new(
            ErrorKind::DataInvalid,
            format!("profile is missing required field `{field}`"),
        )),
        Some(_) => Err(Error::new(
            ErrorKind::DataInvalid,
            format!("profile field `{field}` must be a string"),
        )),
    }
}

fn required_url(object: &serde_json::Map<String, JsonValue>, field: &str) -> Result<String> {
    let value = required_str(object, field)?;
    url::Url::parse(&value).map_err(|err| {
        Error::new(
            ErrorKind::DataInvalid,
            format!("profile field `{field}` is not a valid URL: `{value}`"),
        )
        .with_source(err)
    })?;
    Ok(value)
}

fn optional_str<'a>(
    object: &'a serde_json::Map<String, JsonValue>,
    field: &str,
) -> Option<&'a str> {
    object.get(field).and_then(JsonValue::as_str)
}
