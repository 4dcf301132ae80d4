//! Typed configuration
//!
//! One JSON record produces an [`AgentProfile`] per role plus the top-level
//! orchestrator options. API keys are never stored inline: profiles name a
//! secret, and the key is resolved from a separate secret store at load
//! time. A missing required secret is fatal.

pub mod secrets;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::agent::AgentRole;
use crate::error::{OrchestratorError, Result};
use secrets::SecretStore;

/// Immutable per-role agent profile, fully resolved (secrets included).
#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub provider: String,
    pub base_url: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub role: AgentRole,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream_enabled: bool,
    pub system_prompt: String,
    pub spawn_keywords: Vec<String>,
    pub cost_per_1k_tokens: Option<f64>,
}

/// File-operation policy for the tool executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileOpsPolicy {
    pub allow_read: bool,
    pub allow_write: bool,
    pub allow_edit: bool,
    pub max_file_size_kb: u64,
    /// Empty means "deny everything outside the working directory".
    pub allowed_directories: Vec<PathBuf>,
    pub backup_before_edit: bool,
    pub overwrite_warning: bool,
}

impl Default for FileOpsPolicy {
    fn default() -> Self {
        Self {
            allow_read: true,
            allow_write: true,
            allow_edit: true,
            max_file_size_kb: 500,
            allowed_directories: Vec::new(),
            backup_before_edit: true,
            overwrite_warning: true,
        }
    }
}

/// Shell-command policy for the tool executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPolicy {
    /// First token of a command must be a member.
    pub safe_commands: BTreeSet<String>,
    /// Blocked even when present in the safe set.
    pub denied_commands: BTreeSet<String>,
    pub default_timeout_seconds: u64,
    /// Commands explicitly permitted to carry shell metacharacters.
    pub allow_metacharacters_for: BTreeSet<String>,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        let safe = [
            "ls", "cat", "pwd", "echo", "grep", "find", "wc", "head", "tail", "mkdir", "touch",
            "cp", "mv", "python", "python3", "pip", "git", "node", "npm", "pytest", "test",
            "diff", "sort", "uniq", "sed", "awk",
        ];
        let denied = [
            "rm", "rmdir", "dd", "mkfs", "format", "fdisk", "chmod", "chown", "sudo", "su",
            "kill", "killall", "reboot", "shutdown", "halt", "systemctl", "service",
        ];
        Self {
            safe_commands: safe.iter().map(|s| s.to_string()).collect(),
            denied_commands: denied.iter().map(|s| s.to_string()).collect(),
            default_timeout_seconds: 60,
            allow_metacharacters_for: BTreeSet::new(),
        }
    }
}

/// Raw on-disk profile shape, before secret resolution.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawProfile {
    provider: String,
    base_url: String,
    model_id: String,
    #[serde(default)]
    api_key_secret: Option<String>,
    #[serde(default = "default_temperature")]
    temperature: f32,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_true")]
    stream_enabled: bool,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Alternative to `system_prompt`: load the prompt from a file.
    #[serde(default)]
    system_prompt_file: Option<PathBuf>,
    #[serde(default)]
    spawn_keywords: Vec<String>,
    #[serde(default)]
    cost_per_1k_tokens: Option<f64>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    4
}

/// Raw on-disk config shape.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_max_concurrent")]
    max_concurrent_agents: usize,
    #[serde(default)]
    auto_spawn_on_keywords: bool,
    #[serde(default)]
    plan_mode: bool,
    #[serde(default)]
    file_ops: FileOpsPolicy,
    #[serde(default)]
    tool_policy: ToolPolicy,
    profiles: HashMap<String, RawProfile>,
}

/// Fully-loaded orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_concurrent_agents: usize,
    pub auto_spawn_on_keywords: bool,
    pub plan_mode: bool,
    pub file_ops: FileOpsPolicy,
    pub tool_policy: ToolPolicy,
    profiles: HashMap<AgentRole, AgentProfile>,
}

impl OrchestratorConfig {
    /// Load and resolve configuration from a JSON file plus a secret store.
    pub fn load(config_path: &Path, secrets: &SecretStore) -> Result<Self> {
        let text = std::fs::read_to_string(config_path).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "cannot read {}: {e}",
                config_path.display()
            ))
        })?;
        let raw: RawConfig = serde_json::from_str(&text)
            .map_err(|e| OrchestratorError::Configuration(format!("malformed config: {e}")))?;
        Self::from_raw(raw, secrets)
    }

    /// Parse configuration from an in-memory JSON string.
    pub fn from_json(json: &str, secrets: &SecretStore) -> Result<Self> {
        let raw: RawConfig = serde_json::from_str(json)
            .map_err(|e| OrchestratorError::Configuration(format!("malformed config: {e}")))?;
        Self::from_raw(raw, secrets)
    }

    fn from_raw(raw: RawConfig, secrets: &SecretStore) -> Result<Self> {
        if raw.max_concurrent_agents < 1 {
            return Err(OrchestratorError::Configuration(
                "max_concurrent_agents must be >= 1".into(),
            ));
        }

        let mut profiles = HashMap::new();
        for (name, profile) in raw.profiles {
            let role: AgentRole = name.parse().map_err(|_| {
                OrchestratorError::Configuration(format!("unknown role '{name}' in profiles"))
            })?;
            profiles.insert(role, resolve_profile(role, profile, secrets)?);
        }

        if !profiles.contains_key(&AgentRole::Main) {
            return Err(OrchestratorError::Configuration(
                "profiles must include 'main'".into(),
            ));
        }

        Ok(Self {
            max_concurrent_agents: raw.max_concurrent_agents,
            auto_spawn_on_keywords: raw.auto_spawn_on_keywords,
            plan_mode: raw.plan_mode,
            file_ops: raw.file_ops,
            tool_policy: raw.tool_policy,
            profiles,
        })
    }

    /// Profile for a role, if one is configured.
    pub fn profile(&self, role: AgentRole) -> Option<&AgentProfile> {
        self.profiles.get(&role)
    }

    /// All configured roles.
    pub fn roles(&self) -> impl Iterator<Item = AgentRole> + '_ {
        self.profiles.keys().copied()
    }

    /// Per-role cost table used by plan cost rollups.
    pub fn role_costs(&self) -> HashMap<AgentRole, f64> {
        self.profiles
            .iter()
            .filter_map(|(role, p)| p.cost_per_1k_tokens.map(|c| (*role, c)))
            .collect()
    }
}

fn resolve_profile(role: AgentRole, raw: RawProfile, secrets: &SecretStore) -> Result<AgentProfile> {
    let api_key = match &raw.api_key_secret {
        Some(name) => Some(secrets.get(name).ok_or_else(|| {
            OrchestratorError::Configuration(format!(
                "secret '{name}' required by {role} profile is not in the secret store"
            ))
        })?),
        None => None,
    };

    let system_prompt = match (&raw.system_prompt, &raw.system_prompt_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Configuration(format!(
                "cannot read system prompt {}: {e}",
                path.display()
            ))
        })?,
        (None, None) => default_system_prompt(role),
    };

    Ok(AgentProfile {
        provider: raw.provider,
        base_url: raw.base_url,
        model_id: raw.model_id,
        api_key,
        role,
        temperature: raw.temperature,
        max_tokens: raw.max_tokens,
        stream_enabled: raw.stream_enabled,
        system_prompt,
        spawn_keywords: raw.spawn_keywords,
        cost_per_1k_tokens: raw.cost_per_1k_tokens,
    })
}

fn default_system_prompt(role: AgentRole) -> String {
    match role {
        AgentRole::Main => "You are the coordinating agent of a multi-agent system. \
                            Delegate specialised work to sub-agents and integrate their summaries."
            .to_string(),
        other => format!(
            "You are a {other} agent. Complete the assigned task, then report your findings \
             between [SUMMARY] and [/SUMMARY] markers."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(extra: &str) -> String {
        format!(
            r#"{{
                "profiles": {{
                    "main": {{
                        "provider": "ollama",
                        "base_url": "http://localhost:11434/v1",
                        "model_id": "gpt-oss:120b"
                    }}{extra}
                }}
            }}"#
        )
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = OrchestratorConfig::from_json(&minimal_config(""), &SecretStore::empty())
            .expect("minimal config loads");

        assert_eq!(config.max_concurrent_agents, 4);
        assert!(!config.plan_mode);
        assert!(config.file_ops.allow_read);
        assert!(config.tool_policy.safe_commands.contains("echo"));
        assert!(config.tool_policy.denied_commands.contains("rm"));

        let main = config.profile(AgentRole::Main).unwrap();
        assert_eq!(main.temperature, 0.7);
        assert!(main.stream_enabled);
        assert!(main.api_key.is_none());
    }

    #[test]
    fn missing_main_profile_is_fatal() {
        let json = r#"{"profiles": {"reviewer": {
            "provider": "ollama",
            "base_url": "http://localhost:11434/v1",
            "model_id": "small"
        }}}"#;
        let err = OrchestratorConfig::from_json(json, &SecretStore::empty()).unwrap_err();
        assert!(matches!(err, OrchestratorError::Configuration(_)));
    }

    #[test]
    fn unknown_role_is_fatal() {
        let extra = r#",
            "wizard": {
                "provider": "ollama",
                "base_url": "http://localhost:11434/v1",
                "model_id": "small"
            }"#;
        let err =
            OrchestratorConfig::from_json(&minimal_config(extra), &SecretStore::empty())
                .unwrap_err();
        assert!(err.to_string().contains("wizard"));
    }

    #[test]
    fn missing_secret_is_fatal() {
        let json = r#"{"profiles": {"main": {
            "provider": "openai",
            "base_url": "https://api.openai.com/v1",
            "model_id": "gpt-4o-mini",
            "api_key_secret": "openai_api_key"
        }}}"#;
        let err = OrchestratorConfig::from_json(json, &SecretStore::empty()).unwrap_err();
        assert!(err.to_string().contains("openai_api_key"));
    }

    #[test]
    fn secret_is_resolved_into_profile() {
        let json = r#"{"profiles": {"main": {
            "provider": "openai",
            "base_url": "https://api.openai.com/v1",
            "model_id": "gpt-4o-mini",
            "api_key_secret": "openai_api_key"
        }}}"#;
        let secrets = SecretStore::from_pairs([("openai_api_key", "sk-test")]);
        let config = OrchestratorConfig::from_json(json, &secrets).unwrap();
        assert_eq!(
            config.profile(AgentRole::Main).unwrap().api_key.as_deref(),
            Some("sk-test")
        );
    }

    #[test]
    fn zero_concurrency_cap_is_rejected() {
        let json = r#"{"max_concurrent_agents": 0, "profiles": {"main": {
            "provider": "ollama",
            "base_url": "http://localhost:11434/v1",
            "model_id": "small"
        }}}"#;
        assert!(OrchestratorConfig::from_json(json, &SecretStore::empty()).is_err());
    }
}
