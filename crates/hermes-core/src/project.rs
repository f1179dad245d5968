//! Project & Provider model (§3.2/4.B): named workspaces, their backends,
//! and the migration state machine.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed set of project lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
    Completed,
}

/// Closed set of backend kinds a [`Provider`] may implement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Google,
    RemoteHermes,
}

/// A provider's position in a migration, or its steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    /// The sole read/write backend. Default when unspecified.
    Active,
    /// Read-only predecessor during migration.
    Source,
    /// Write destination during migration; reads fall back to `Source`.
    Target,
    /// No operations permitted.
    Archived,
}

impl Default for MigrationState {
    fn default() -> Self {
        MigrationState::Active
    }
}

/// Type-specific provider configuration. Fields named here as sensitive
/// must never appear in a [`Project::sanitize`] summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderConfig {
    Local {
        workspace_path: String,
        git_remote: Option<String>,
        git_branch: Option<String>,
        indexing_policy: Option<String>,
    },
    Google {
        workspace_id: String,
        service_account_ref: String,
        credentials_ref: String,
    },
    RemoteHermes {
        url: String,
        api_version: String,
        auth_method: Option<String>,
        sync_mode: Option<String>,
        cache_ttl_seconds: Option<u64>,
        project_filter: Option<String>,
    },
}

impl ProviderConfig {
    fn kind(&self) -> ProviderKind {
        match self {
            ProviderConfig::Local { .. } => ProviderKind::Local,
            ProviderConfig::Google { .. } => ProviderKind::Google,
            ProviderConfig::RemoteHermes { .. } => ProviderKind::RemoteHermes,
        }
    }

    /// Whether any authentication material is configured, without
    /// revealing it.
    fn has_authentication(&self) -> bool {
        match self {
            ProviderConfig::Local { git_remote, .. } => git_remote.is_some(),
            ProviderConfig::Google { .. } => true,
            ProviderConfig::RemoteHermes { auth_method, .. } => auth_method.is_some(),
        }
    }
}

/// A single backend entry in a [`Project`]'s ordered provider list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub config: ProviderConfig,
    #[serde(default)]
    pub state: MigrationState,
}

impl Provider {
    pub fn kind(&self) -> ProviderKind {
        self.config.kind()
    }
}

/// Non-secret summary of a [`Provider`], safe to expose beyond the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub kind: ProviderKind,
    pub state: MigrationState,
    pub has_authentication: bool,
}

/// Creation/ownership metadata for a project, not used for routing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    pub owner: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// A named logical workspace with one or more backends and a migration
/// state machine over them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub title: String,
    pub short_name: String,
    pub description: String,
    pub status: ProjectStatus,
    pub metadata: ProjectMetadata,
    pub providers: Vec<Provider>,
}

/// Non-secret summary of a [`Project`], safe to expose beyond the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    pub title: String,
    pub short_name: String,
    pub status: ProjectStatus,
    pub providers: Vec<ProviderSummary>,
}

/// One validation failure, with a dotted field path and a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The outcome of validating a single project: hard errors (any present
/// fails the call) and soft warnings (never fail the call).
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn is_kebab_case(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() {
        return false;
    }
    let alnum_lower = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !alnum_lower(bytes[0]) || !alnum_lower(bytes[bytes.len() - 1]) {
        return false;
    }
    bytes.iter().all(|&b| alnum_lower(b) || b == b'-')
}

fn is_short_name(name: &str) -> bool {
    let len = name.len();
    (2..=10).contains(&len) && name.bytes().all(|b| b.is_ascii_uppercase())
}

fn looks_like_env_indirection(value: &str) -> bool {
    value.starts_with("env(") && value.ends_with(')')
}

/// Validate a project per §4.B's rules, returning both hard errors and
/// soft warnings. Does not mutate the project.
pub fn validate_project(project: &Project) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !is_kebab_case(&project.name) {
        report.errors.push(ValidationError {
            field: "name".to_string(),
            message: format!("'{}' is not kebab-case", project.name),
        });
    }
    if !is_short_name(&project.short_name) {
        report.errors.push(ValidationError {
            field: "short_name".to_string(),
            message: format!(
                "'{}' must match ^[A-Z]{{2,10}}$",
                project.short_name
            ),
        });
    }

    if project.providers.is_empty() {
        report.errors.push(ValidationError {
            field: "providers".to_string(),
            message: "at least one provider is required".to_string(),
        });
    }

    let mut source_count = 0;
    let mut target_count = 0;
    let mut active_count = 0;

    for (idx, provider) in project.providers.iter().enumerate() {
        match provider.state {
            MigrationState::Source => source_count += 1,
            MigrationState::Target => target_count += 1,
            MigrationState::Active => active_count += 1,
            MigrationState::Archived => {}
        }

        match &provider.config {
            ProviderConfig::Google {
                workspace_id,
                service_account_ref,
                credentials_ref,
            } => {
                if workspace_id.is_empty() || service_account_ref.is_empty() || credentials_ref.is_empty() {
                    report.errors.push(ValidationError {
                        field: format!("providers[{idx}]"),
                        message: "google provider requires workspace-id, service-account, and credentials references".to_string(),
                    });
                }
                if !looks_like_env_indirection(credentials_ref) {
                    report.warnings.push(ValidationError {
                        field: format!("providers[{idx}].credentials_ref"),
                        message: "sensitive field is not expressed through env(...) indirection".to_string(),
                    });
                }
            }
            ProviderConfig::RemoteHermes { url, api_version, .. } => {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    report.errors.push(ValidationError {
                        field: format!("providers[{idx}].url"),
                        message: format!("'{}' is not an http(s) URL", url),
                    });
                }
                if api_version != "v1" && api_version != "v2" {
                    report.errors.push(ValidationError {
                        field: format!("providers[{idx}].api_version"),
                        message: format!("'{}' must be v1 or v2", api_version),
                    });
                }
            }
            ProviderConfig::Local { workspace_path, .. } => {
                if workspace_path.is_empty() {
                    report.errors.push(ValidationError {
                        field: format!("providers[{idx}].workspace_path"),
                        message: "local provider requires a workspace path".to_string(),
                    });
                }
            }
        }
    }

    if source_count != target_count {
        report.errors.push(ValidationError {
            field: "providers".to_string(),
            message: "migration requires a balanced source/target pair".to_string(),
        });
    } else if source_count == 0 && active_count != 1 && !project.providers.is_empty() {
        report.errors.push(ValidationError {
            field: "providers".to_string(),
            message: "exactly one provider must be active outside migration".to_string(),
        });
    }

    report
}

/// Process-wide registered project/provider state (§3.6): loaded at
/// startup, upserted from configuration, the durable store is the
/// canonical runtime view. This in-memory registry models "the durable
/// store" for the core's purposes; a persistence-backed implementation
/// wraps it the same way the local/API backends wrap capability traits.
#[derive(Default)]
pub struct ProjectRegistry {
    projects: RwLock<HashMap<String, Project>>,
}

impl ProjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Project> {
        self.projects.read().unwrap().get(name).cloned()
    }

    pub fn list(&self) -> Vec<Project> {
        self.projects.read().unwrap().values().cloned().collect()
    }

    pub fn list_active(&self) -> Vec<Project> {
        self.projects
            .read()
            .unwrap()
            .values()
            .filter(|p| p.status == ProjectStatus::Active)
            .cloned()
            .collect()
    }

    pub fn get_provider(&self, project: &str, kind: ProviderKind) -> Option<Provider> {
        self.get(project)?
            .providers
            .into_iter()
            .find(|p| p.kind() == kind)
    }

    pub fn get_provider_by_state(&self, project: &str, state: MigrationState) -> Option<Provider> {
        self.get(project)?
            .providers
            .into_iter()
            .find(|p| p.state == state)
    }

    pub fn get_active_provider(&self, project: &str) -> Option<Provider> {
        self.get_provider_by_state(project, MigrationState::Active)
    }

    pub fn get_source_provider(&self, project: &str) -> Option<Provider> {
        self.get_provider_by_state(project, MigrationState::Source)
    }

    pub fn get_target_provider(&self, project: &str) -> Option<Provider> {
        self.get_provider_by_state(project, MigrationState::Target)
    }

    pub fn is_in_migration(&self, project: &str) -> bool {
        self.get_source_provider(project).is_some() && self.get_target_provider(project).is_some()
    }

    /// The primary provider for an operation: the target during
    /// migration, otherwise the active one.
    pub fn get_primary_provider(&self, project: &str) -> Option<Provider> {
        if self.is_in_migration(project) {
            self.get_target_provider(project)
        } else {
            self.get_active_provider(project)
        }
    }

    /// Strip sensitive fields, returning only non-secret attributes.
    pub fn sanitize(&self, project: &Project) -> ProjectSummary {
        ProjectSummary {
            name: project.name.clone(),
            title: project.title.clone(),
            short_name: project.short_name.clone(),
            status: project.status,
            providers: project
                .providers
                .iter()
                .map(|p| ProviderSummary {
                    kind: p.kind(),
                    state: p.state,
                    has_authentication: p.config.has_authentication(),
                })
                .collect(),
        }
    }

    /// Validate and upsert each project from a loaded configuration,
    /// returning the number that synced cleanly and the errors for any
    /// that did not (those are left unmodified in the registry).
    pub fn upsert_from_config(&self, projects: Vec<Project>) -> (usize, Vec<(String, ValidationReport)>) {
        let mut synced = 0;
        let mut errors = Vec::new();
        let mut guard = self.projects.write().unwrap();
        for project in projects {
            let report = validate_project(&project);
            if report.is_valid() {
                guard.insert(project.name.clone(), project);
                synced += 1;
            } else {
                errors.push((project.name.clone(), report));
            }
        }
        (synced, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_provider(state: MigrationState) -> Provider {
        Provider {
            config: ProviderConfig::Local {
                workspace_path: "/workspace/rfcs".to_string(),
                git_remote: None,
                git_branch: None,
                indexing_policy: None,
            },
            state,
        }
    }

    fn base_project() -> Project {
        Project {
            name: "eng-rfcs".to_string(),
            title: "Engineering RFCs".to_string(),
            short_name: "ENG".to_string(),
            description: "".to_string(),
            status: ProjectStatus::Active,
            metadata: ProjectMetadata::default(),
            providers: vec![local_provider(MigrationState::Active)],
        }
    }

    #[test]
    fn valid_project_has_no_errors() {
        let report = validate_project(&base_project());
        assert!(report.is_valid());
    }

    #[test]
    fn bad_name_fails() {
        let mut p = base_project();
        p.name = "Eng_RFCs".to_string();
        let report = validate_project(&p);
        assert!(!report.is_valid());
        assert!(report.errors.iter().any(|e| e.field == "name"));
    }

    #[test]
    fn bad_short_name_fails() {
        let mut p = base_project();
        p.short_name = "eng".to_string();
        let report = validate_project(&p);
        assert!(report.errors.iter().any(|e| e.field == "short_name"));
    }

    #[test]
    fn unbalanced_migration_fails() {
        let mut p = base_project();
        p.providers = vec![local_provider(MigrationState::Source)];
        let report = validate_project(&p);
        assert!(report.errors.iter().any(|e| e.field == "providers"));
    }

    #[test]
    fn balanced_migration_passes() {
        let mut p = base_project();
        p.providers = vec![
            local_provider(MigrationState::Source),
            Provider {
                config: ProviderConfig::RemoteHermes {
                    url: "https://hermes.example".to_string(),
                    api_version: "v2".to_string(),
                    auth_method: Some("bearer".to_string()),
                    sync_mode: None,
                    cache_ttl_seconds: None,
                    project_filter: None,
                },
                state: MigrationState::Target,
            },
        ];
        assert!(validate_project(&p).is_valid());
    }

    #[test]
    fn remote_hermes_rejects_non_http_url() {
        let mut p = base_project();
        p.providers = vec![Provider {
            config: ProviderConfig::RemoteHermes {
                url: "ftp://hermes.example".to_string(),
                api_version: "v2".to_string(),
                auth_method: None,
                sync_mode: None,
                cache_ttl_seconds: None,
                project_filter: None,
            },
            state: MigrationState::Active,
        }];
        let report = validate_project(&p);
        assert!(report.errors.iter().any(|e| e.field.ends_with(".url")));
    }

    #[test]
    fn non_env_credential_is_a_warning_not_an_error() {
        let mut p = base_project();
        p.providers = vec![Provider {
            config: ProviderConfig::Google {
                workspace_id: "ws-1".to_string(),
                service_account_ref: "svc@example.iam".to_string(),
                credentials_ref: "/literal/path/creds.json".to_string(),
            },
            state: MigrationState::Active,
        }];
        let report = validate_project(&p);
        assert!(report.is_valid());
        assert!(!report.warnings.is_empty());
    }

    #[test]
    fn primary_provider_during_migration_is_target() {
        let registry = ProjectRegistry::new();
        let mut p = base_project();
        p.providers = vec![
            local_provider(MigrationState::Source),
            Provider {
                config: ProviderConfig::RemoteHermes {
                    url: "https://hermes.example".to_string(),
                    api_version: "v2".to_string(),
                    auth_method: None,
                    sync_mode: None,
                    cache_ttl_seconds: None,
                    project_filter: None,
                },
                state: MigrationState::Target,
            },
        ];
        registry.upsert_from_config(vec![p]);
        assert!(registry.is_in_migration("eng-rfcs"));
        let primary = registry.get_primary_provider("eng-rfcs").unwrap();
        assert_eq!(primary.kind(), ProviderKind::RemoteHermes);
    }

    #[test]
    fn primary_provider_outside_migration_is_active() {
        let registry = ProjectRegistry::new();
        registry.upsert_from_config(vec![base_project()]);
        assert!(!registry.is_in_migration("eng-rfcs"));
        let primary = registry.get_primary_provider("eng-rfcs").unwrap();
        assert_eq!(primary.kind(), ProviderKind::Local);
    }

    #[test]
    fn sanitize_strips_secrets() {
        let registry = ProjectRegistry::new();
        let mut p = base_project();
        p.providers = vec![Provider {
            config: ProviderConfig::Google {
                workspace_id: "ws-1".to_string(),
                service_account_ref: "svc@example.iam".to_string(),
                credentials_ref: "super-secret-path".to_string(),
            },
            state: MigrationState::Active,
        }];
        let summary = registry.sanitize(&p);
        let serialized = serde_json::to_string(&summary).unwrap();
        assert!(!serialized.contains("super-secret-path"));
        assert!(!serialized.contains("svc@example.iam"));
        assert!(summary.providers[0].has_authentication);
    }

    #[test]
    fn upsert_rejects_invalid_and_counts_valid() {
        let registry = ProjectRegistry::new();
        let mut bad = base_project();
        bad.name = "Bad Name".to_string();
        let (synced, errors) = registry.upsert_from_config(vec![base_project(), bad]);
        assert_eq!(synced, 1);
        assert_eq!(errors.len(), 1);
    }
}
