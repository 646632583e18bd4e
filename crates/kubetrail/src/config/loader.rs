use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::config::schema::{AuditConfig, GitAuthType, SYSTEM_NAMESPACES};
use crate::error::ConfigError;
use crate::secrets::has_secret_source;

const DEFAULT_STORAGE_PATH: &str = "/app/logs";

impl AuditConfig {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let storage_path = get("STORAGE_PATH").unwrap_or_else(|| DEFAULT_STORAGE_PATH.to_string());
        let mut config = AuditConfig::new(PathBuf::from(storage_path));

        if let Some(value) = get("HELM_TRACKING") {
            config.helm_tracking = parse_bool("HELM_TRACKING", &value)?;
        }

        config.excluded_namespaces = excluded_namespaces(
            get("EXCLUDED_NAMESPACES").as_deref(),
            get("RELEASE_NAMESPACE").as_deref(),
        );

        let git = &mut config.git;
        if let Some(url) = get("GIT_REMOTE_URL") {
            git.remote_url = url;
        }
        if let Some(branch) = get("GIT_BRANCH") {
            git.branch = branch;
        }
        if let Some(name) = get("GIT_USER_NAME") {
            git.user_name = name;
        }
        if let Some(email) = get("GIT_USER_EMAIL") {
            git.user_email = email;
        }
        if let Some(timeout) = get("GIT_TIMEOUT") {
            git.timeout_secs = parse_u64("GIT_TIMEOUT", &timeout)?;
            if git.timeout_secs == 0 {
                return Err(invalid("GIT_TIMEOUT", &timeout, "must be greater than zero"));
            }
        }

        git.auth.token = get("GIT_HTTPS_TOKEN");
        git.auth.token_file = get("GIT_TOKEN_FILE");
        if let Some(username) = get("GIT_USERNAME") {
            git.auth.username = username;
        }
        if let Some(key) = get("GIT_SSH_KEY_PATH") {
            git.auth.ssh_key_path = key;
        }
        git.auth.auth_type = match get("GIT_AUTH_METHOD") {
            Some(method) => parse_auth_method(&method)?,
            None if has_secret_source(
                git.auth.token.as_deref(),
                git.auth.token_file.as_deref(),
            ) =>
            {
                GitAuthType::Token
            }
            None if !git.auth.ssh_key_path.is_empty() => GitAuthType::Ssh,
            None => GitAuthType::None,
        };

        if let Some(interval) = get("CLEANUP_INTERVAL") {
            config.schedule.cleanup_interval_secs = parse_u64("CLEANUP_INTERVAL", &interval)?;
            if config.schedule.cleanup_interval_secs == 0 {
                return Err(invalid(
                    "CLEANUP_INTERVAL",
                    &interval,
                    "must be greater than zero",
                ));
            }
        }
        if let Some(interval) = get("SYNC_INTERVAL") {
            config.schedule.sync_interval_secs = parse_u64("SYNC_INTERVAL", &interval)?;
        }

        if let Some(account) = get("AUDIT_SERVICE_ACCOUNT") {
            config.audit_service_account = account;
        }
        if let Some(org) = get("HELM_PRIMARY_ORG") {
            config.helm.primary_org = org;
        }
        if let Some(org) = get("HELM_FALLBACK_ORG") {
            config.helm.fallback_org = org;
        }
        if let Some(probe) = get("HELM_REPO_PROBE") {
            config.helm.probe_repositories = parse_bool("HELM_REPO_PROBE", &probe)?;
        }

        validate_config(&config)?;
        Ok(config)
    }
}

fn excluded_namespaces(excluded: Option<&str>, release_namespace: Option<&str>) -> BTreeSet<String> {
    let mut set: BTreeSet<String> = SYSTEM_NAMESPACES.iter().map(|s| s.to_string()).collect();

    if let Some(list) = excluded {
        set.extend(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        );
    }

    if let Some(ns) = release_namespace {
        set.insert(ns.trim().to_string());
    }

    set
}

fn validate_config(config: &AuditConfig) -> Result<(), ConfigError> {
    if config.git.branch.contains(char::is_whitespace) {
        return Err(ConfigError::Validation {
            message: format!("Invalid git branch name: '{}'", config.git.branch),
        });
    }

    if config.git.auth.auth_type == GitAuthType::Token
        && !has_secret_source(
            config.git.auth.token.as_deref(),
            config.git.auth.token_file.as_deref(),
        )
    {
        return Err(ConfigError::Validation {
            message: "GIT_AUTH_METHOD=token requires GIT_HTTPS_TOKEN or GIT_TOKEN_FILE"
                .to_string(),
        });
    }

    Ok(())
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

fn parse_u64(name: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(name, value, &e.to_string()))
}

fn parse_auth_method(value: &str) -> Result<GitAuthType, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "none" => Ok(GitAuthType::None),
        "token" | "https" => Ok(GitAuthType::Token),
        "ssh" | "ssh-key" => Ok(GitAuthType::Ssh),
        _ => Err(invalid(
            "GIT_AUTH_METHOD",
            value,
            "expected none, token or ssh",
        )),
    }
}

fn invalid(name: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
