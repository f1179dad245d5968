//! Composite document identity.
//!
//! Documents are identified by a [`Uuid`] that is stable across backend
//! migrations, optionally paired with a backend-specific [`ProviderId`] and
//! a project name. The triple is a [`CompositeId`], with three textual
//! serializations (short, full, URI) described in `SPEC_FULL.md` §3.1.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while parsing or constructing identity values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("invalid UUID format: {0}")]
    InvalidFormat(String),
    #[error("unknown provider type: {0}")]
    InvalidProviderType(String),
    #[error("provider id must not be empty")]
    EmptyId,
    #[error("google provider id must be at least 10 characters")]
    TooShort,
    #[error("missing colon separator in provider id: {0}")]
    MissingSeparator(String),
    #[error("provider=... given without id=...")]
    ProviderWithoutId,
    #[error("unrecognized composite id format: {0}")]
    UnrecognizedFormat(String),
}

/// A 128-bit document identifier.
///
/// The canonical textual form is 36-character lowercase hyphenated
/// (`8-4-4-4-12`). The all-zero value is the sentinel "unset" identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uuid(uuid::Uuid);

impl Uuid {
    /// The sentinel "unset" UUID (all zero bits).
    pub const UNSET: Uuid = Uuid(uuid::Uuid::nil());

    /// Generate a new random (v4) UUID. Uniqueness is practical, not enforced.
    pub fn new() -> Self {
        Uuid(uuid::Uuid::new_v4())
    }

    /// Returns `true` if this is the all-zero sentinel value.
    pub fn is_unset(&self) -> bool {
        self.0.is_nil()
    }

    /// Parse a UUID string, accepting hyphenated, hyphenless, and mixed
    /// case input. The stored form is always normalized lowercase
    /// hyphenated.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let cleaned: String = s.chars().filter(|c| *c != '-').collect();
        if cleaned.len() != 32 || !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdentityError::InvalidFormat(s.to_string()));
        }
        let lower = cleaned.to_lowercase();
        let hyphenated = format!(
            "{}-{}-{}-{}-{}",
            &lower[0..8],
            &lower[8..12],
            &lower[12..16],
            &lower[16..20],
            &lower[20..32]
        );
        uuid::Uuid::parse_str(&hyphenated)
            .map(Uuid)
            .map_err(|_| IdentityError::InvalidFormat(s.to_string()))
    }

    /// Canonical lowercase hyphenated string form.
    pub fn as_str(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for Uuid {
    fn default() -> Self {
        Uuid::UNSET
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Uuid {
    type Err = IdentityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse(s)
    }
}

/// Closed set of storage backends a provider id can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Google,
    Local,
    RemoteHermes,
}

impl ProviderType {
    fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Google => "google",
            ProviderType::Local => "local",
            ProviderType::RemoteHermes => "remote-hermes",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = IdentityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(ProviderType::Google),
            "local" => Ok(ProviderType::Local),
            "remote-hermes" => Ok(ProviderType::RemoteHermes),
            other => Err(IdentityError::InvalidProviderType(other.to_string())),
        }
    }
}

/// A backend-specific document id, paired with the backend it came from.
///
/// - `google` ids are Drive file ids (minimum 10 alphanumeric/hyphen chars).
/// - `local` ids are workspace-relative paths; backslashes are normalized
///   to forward slashes.
/// - `remote-hermes` ids are a URL or a UUID string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    pub provider_type: ProviderType,
    id: String,
}

impl ProviderId {
    /// Construct a validated provider id.
    pub fn new(provider_type: ProviderType, id: impl Into<String>) -> Result<Self, IdentityError> {
        let mut id = id.into();
        if id.is_empty() {
            return Err(IdentityError::EmptyId);
        }
        if provider_type == ProviderType::Local {
            id = id.replace('\\', "/");
        }
        if provider_type == ProviderType::Google && id.len() < 10 {
            return Err(IdentityError::TooShort);
        }
        Ok(ProviderId { provider_type, id })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `type:id` wire form.
    pub fn to_string(&self) -> String {
        format!("{}:{}", self.provider_type, self.id)
    }

    /// Parse a `type:id` string, splitting on the first colon.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        let (ty, id) = s
            .split_once(':')
            .ok_or_else(|| IdentityError::MissingSeparator(s.to_string()))?;
        if ty.is_empty() || id.is_empty() {
            return Err(IdentityError::MissingSeparator(s.to_string()));
        }
        let provider_type = ProviderType::from_str(ty)?;
        ProviderId::new(provider_type, id)
    }
}

impl PartialEq<ProviderType> for &ProviderId {
    fn eq(&self, other: &ProviderType) -> bool {
        self.provider_type == *other
    }
}

/// `(UUID, ProviderID?, project-name?)` triple identifying a document.
///
/// At least one of `uuid` (non-[`Uuid::UNSET`]) or `provider_id` must be
/// present.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompositeId {
    pub uuid: Option<Uuid>,
    pub provider_id: Option<ProviderId>,
    pub project: Option<String>,
}

impl CompositeId {
    /// Construct a composite id, enforcing that at least one identifying
    /// field is present.
    pub fn new(
        uuid: Option<Uuid>,
        provider_id: Option<ProviderId>,
        project: Option<String>,
    ) -> Result<Self, IdentityError> {
        let has_uuid = uuid.map(|u| !u.is_unset()).unwrap_or(false);
        if !has_uuid && provider_id.is_none() {
            return Err(IdentityError::UnrecognizedFormat(
                "composite id requires a UUID or a provider id".to_string(),
            ));
        }
        Ok(CompositeId {
            uuid,
            provider_id,
            project,
        })
    }

    pub fn is_complete(&self) -> bool {
        self.uuid.map(|u| !u.is_unset()).unwrap_or(false) && self.provider_id.is_some()
    }

    /// `uuid/{u}` — path-safe, used in URLs. Always derived from the UUID
    /// when one is present.
    pub fn short_string(&self) -> String {
        match self.uuid {
            Some(u) => format!("uuid/{}", u),
            None => String::new(),
        }
    }

    /// `uuid:{u}:provider:{p}:id:{pid}:project:{proj}` — omits empty fields.
    pub fn full_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(u) = self.uuid {
            if !u.is_unset() {
                parts.push(format!("uuid:{}", u));
            }
        }
        if let Some(ref pid) = self.provider_id {
            parts.push(format!("provider:{}", pid.provider_type));
            parts.push(format!("id:{}", pid.id()));
        }
        if let Some(ref proj) = self.project {
            parts.push(format!("project:{}", proj));
        }
        parts.join(":")
    }

    /// `uuid/{u}?provider=..&id=..&project=..`.
    pub fn uri_string(&self) -> String {
        let base = match self.uuid {
            Some(u) => format!("uuid/{}", u),
            None => "uuid/".to_string(),
        };
        let mut query = Vec::new();
        if let Some(ref pid) = self.provider_id {
            query.push(format!("provider={}", pid.provider_type));
            query.push(format!("id={}", pid.id()));
        }
        if let Some(ref proj) = self.project {
            query.push(format!("project={}", proj));
        }
        if query.is_empty() {
            base
        } else {
            format!("{}?{}", base, query.join("&"))
        }
    }

    /// Parse any of the three serializations, or a bare UUID.
    ///
    /// Tried in order: `uuid/{..}`, `uuid/{..}?query`, colon-delimited
    /// `k:v` pairs, bare UUID.
    pub fn parse(s: &str) -> Result<Self, IdentityError> {
        if let Some(rest) = s.strip_prefix("uuid/") {
            let (uuid_part, query_part) = match rest.split_once('?') {
                Some((u, q)) => (u, Some(q)),
                None => (rest, None),
            };
            let uuid = if uuid_part.is_empty() {
                None
            } else {
                Some(Uuid::parse(uuid_part)?)
            };

            let mut provider_type: Option<&str> = None;
            let mut id: Option<&str> = None;
            let mut project: Option<String> = None;

            if let Some(query) = query_part {
                for pair in query.split('&') {
                    if pair.is_empty() {
                        continue;
                    }
                    let (k, v) = pair
                        .split_once('=')
                        .ok_or_else(|| IdentityError::UnrecognizedFormat(s.to_string()))?;
                    match k {
                        "provider" => provider_type = Some(v),
                        "id" => id = Some(v),
                        "project" => project = Some(v.to_string()),
                        _ => {}
                    }
                }
            }

            let provider_id = match (provider_type, id) {
                (Some(ty), Some(pid)) => Some(ProviderId::new(ProviderType::from_str(ty)?, pid)?),
                (Some(_), None) => return Err(IdentityError::ProviderWithoutId),
                (None, Some(_)) => return Err(IdentityError::ProviderWithoutId),
                (None, None) => None,
            };

            return CompositeId::new(uuid, provider_id, project);
        }

        if s.contains(':') {
            // The `id` segment (a local path or a remote-hermes URL) may
            // itself contain colons, so this can't be a naive split on
            // ':'. Instead each value runs up to wherever the next known
            // `key:` marker begins, rather than to the next colon.
            const MARKERS: [&str; 4] = ["uuid:", "provider:", "id:", "project:"];

            let mut uuid: Option<Uuid> = None;
            let mut provider_type: Option<&str> = None;
            let mut id: Option<&str> = None;
            let mut project: Option<String> = None;

            let mut cursor = s;
            loop {
                let (key, after_key) = cursor
                    .split_once(':')
                    .ok_or_else(|| IdentityError::UnrecognizedFormat(s.to_string()))?;

                let next_marker = MARKERS.iter().filter_map(|m| after_key.find(m)).min();
                let (value, remainder) = match next_marker {
                    Some(pos) if pos > 0 => (&after_key[..pos - 1], &after_key[pos..]),
                    Some(_) => return Err(IdentityError::UnrecognizedFormat(s.to_string())),
                    None => (after_key, ""),
                };

                match key {
                    "uuid" => uuid = Some(Uuid::parse(value)?),
                    "provider" => provider_type = Some(value),
                    "id" => id = Some(value),
                    "project" => project = Some(value.to_string()),
                    _ => return Err(IdentityError::UnrecognizedFormat(s.to_string())),
                }

                if remainder.is_empty() {
                    break;
                }
                cursor = remainder;
            }

            let provider_id = match (provider_type, id) {
                (Some(ty), Some(pid)) => Some(ProviderId::new(ProviderType::from_str(ty)?, pid)?),
                (Some(_), None) | (None, Some(_)) => return Err(IdentityError::ProviderWithoutId),
                (None, None) => None,
            };

            return CompositeId::new(uuid, provider_id, project);
        }

        // Bare UUID fallback.
        let uuid = Uuid::parse(s).map_err(|_| IdentityError::UnrecognizedFormat(s.to_string()))?;
        CompositeId::new(Some(uuid), None, None)
    }
}
