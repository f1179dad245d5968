//! Configuration consumed by the core at startup (§6.3).
//!
//! Hermes is configured via a TOML file. Parsing itself is in scope only
//! as a dev-convenience loader; the loader's job in production is to
//! resolve `env(NAME)` indirections in sensitive fields before handing
//! values to [`hermes_core::project`] (§9) — this module's `env(NAME)`
//! resolution exists for that convenience only, and the core still
//! independently rejects a literal `env(...)` string that slips through.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use hermes_core::project::{MigrationState, Project, ProjectMetadata, ProjectStatus, Provider, ProviderConfig};

/// Top-level instance configuration: identity of this process within the
/// sync protocol, and whether it runs the Central-only sync endpoints.
#[derive(Debug, Deserialize, Clone)]
pub struct InstanceConfig {
    pub edge_instance_id: String,
    #[serde(default)]
    pub central_base_url: Option<String>,
    #[serde(default)]
    pub is_central: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

/// Database location for the local SQLite store.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where to find bearer tokens this process presents to a secondary
/// backend (§6.3's "Token source": path or environment variable name).
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenSourceConfig {
    File { path: PathBuf },
    Env { var: String },
}

impl TokenSourceConfig {
    pub fn resolve(&self) -> Result<String> {
        match self {
            TokenSourceConfig::File { path } => std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .with_context(|| format!("failed to read token file: {}", path.display())),
            TokenSourceConfig::Env { var } => std::env::var(var)
                .with_context(|| format!("environment variable '{var}' is not set")),
        }
    }
}

/// A single entry in the projects file, pre-resolution of `env(NAME)`.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectFileEntry {
    pub name: String,
    pub title: String,
    pub short_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_project_status")]
    pub status: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub providers: Vec<ProviderFileEntry>,
}

fn default_project_status() -> String {
    "active".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderFileEntry {
    #[serde(flatten)]
    pub config: ProviderConfig,
    #[serde(default)]
    pub state: Option<String>,
}

/// The full projects file: a list of [`ProjectFileEntry`] records (§6.3).
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProjectsFileConfig {
    #[serde(default)]
    pub projects: Vec<ProjectFileEntry>,
}

/// Resolve an `env(NAME)` indirection in a single string field. Fields
/// that are not wrapped in `env(...)` pass through unchanged.
fn resolve_env_indirection(value: &str) -> Result<String> {
    if let Some(inner) = value.strip_prefix("env(").and_then(|s| s.strip_suffix(')')) {
        std::env::var(inner)
            .with_context(|| format!("environment variable '{inner}' referenced by env(...) is not set"))
    } else {
        Ok(value.to_string())
    }
}

fn resolve_provider_config(config: ProviderConfig) -> Result<ProviderConfig> {
    Ok(match config {
        ProviderConfig::Local {
            workspace_path,
            git_remote,
            git_branch,
            indexing_policy,
        } => ProviderConfig::Local {
            workspace_path: resolve_env_indirection(&workspace_path)?,
            git_remote,
            git_branch,
            indexing_policy,
        },
        ProviderConfig::Google {
            workspace_id,
            service_account_ref,
            credentials_ref,
        } => ProviderConfig::Google {
            workspace_id,
            service_account_ref: resolve_env_indirection(&service_account_ref)?,
            credentials_ref: resolve_env_indirection(&credentials_ref)?,
        },
        ProviderConfig::RemoteHermes {
            url,
            api_version,
            auth_method,
            sync_mode,
            cache_ttl_seconds,
            project_filter,
        } => ProviderConfig::RemoteHermes {
            url,
            api_version,
            auth_method,
            sync_mode,
            cache_ttl_seconds,
            project_filter,
        },
    })
}

fn parse_migration_state(s: Option<&str>) -> Result<MigrationState> {
    match s {
        None | Some("active") => Ok(MigrationState::Active),
        Some("source") => Ok(MigrationState::Source),
        Some("target") => Ok(MigrationState::Target),
        Some("archived") => Ok(MigrationState::Archived),
        Some(other) => anyhow::bail!("unknown provider state '{other}'"),
    }
}

fn parse_project_status(s: &str) -> Result<ProjectStatus> {
    match s {
        "active" => Ok(ProjectStatus::Active),
        "archived" => Ok(ProjectStatus::Archived),
        "completed" => Ok(ProjectStatus::Completed),
        other => anyhow::bail!("unknown project status '{other}'"),
    }
}

/// Resolve `env(NAME)` indirections and convert a dev-convenience projects
/// file into the [`Project`] values the core validates and registers.
pub fn resolve_projects(file: ProjectsFileConfig) -> Result<Vec<Project>> {
    file.projects
        .into_iter()
        .map(|entry| {
            let providers = entry
                .providers
                .into_iter()
                .map(|p| {
                    Ok(Provider {
                        config: resolve_provider_config(p.config)?,
                        state: parse_migration_state(p.state.as_deref())?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Project {
                name: entry.name,
                title: entry.title,
                short_name: entry.short_name,
                description: entry.description,
                status: parse_project_status(&entry.status)?,
                metadata: ProjectMetadata {
                    owner: entry.owner,
                    tags: entry.tags,
                    notes: None,
                    created_at: None,
                },
                providers,
            })
        })
        .collect()
}

pub fn load_toml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_indirection_resolves_from_process_env() {
        std::env::set_var("HERMES_TEST_CREDS", "resolved-secret");
        let resolved = resolve_env_indirection("env(HERMES_TEST_CREDS)").unwrap();
        assert_eq!(resolved, "resolved-secret");
        std::env::remove_var("HERMES_TEST_CREDS");
    }

    #[test]
    fn plain_value_passes_through() {
        assert_eq!(resolve_env_indirection("plain-value").unwrap(), "plain-value");
    }

    #[test]
    fn missing_env_var_errors() {
        assert!(resolve_env_indirection("env(HERMES_DEFINITELY_UNSET_VAR)").is_err());
    }

    #[test]
    fn default_provider_state_is_active() {
        assert!(matches!(parse_migration_state(None).unwrap(), MigrationState::Active));
    }
}
