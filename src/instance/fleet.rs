//! Turning the fleet file into validated instances.

use std::collections::HashSet;

use globset::Glob;

use super::types::{
    Instance, InstanceKind, InstanceType, InstanceUrl, LocalSettings, USER_DEFAULT,
};
use crate::config::{FleetConfig, InstanceConfig, InstanceKindConfig};
use crate::error::{AppError, Result};
use crate::paths::get_instance_dir;

const JVM_OPTS_DEFAULT: [&str; 3] = ["-server", "-Xmx2048m", "-Djava.awt.headless=true"];
const RUN_MODE_DEFAULT: &str = "local";

/// Build every instance of the fleet, enforcing unique `<environment>-<id>` names.
pub fn build_fleet(config: &FleetConfig) -> Result<Vec<Instance>> {
    let mut used_ids: HashSet<String> = HashSet::new();
    let mut instances = Vec::with_capacity(config.instances.len());

    for definition in &config.instances {
        let instance = build_instance(config, definition, &used_ids)?;
        if !used_ids.insert(instance.id.clone()) {
            return Err(AppError::config(format!(
                "Instance name '{}' is defined more than once",
                instance.name
            )));
        }
        instances.push(instance);
    }

    Ok(instances)
}

fn build_instance(
    config: &FleetConfig,
    definition: &InstanceConfig,
    used_ids: &HashSet<String>,
) -> Result<Instance> {
    let url = InstanceUrl::parse(&definition.url)?;

    let instance_type = match definition.instance_type.as_deref() {
        Some(name) => InstanceType::by_name(name).ok_or_else(|| {
            AppError::config(format!("Unsupported instance type '{}'", name))
        })?,
        None => InstanceType::by_url(&url.url),
    };

    let id = match &definition.id {
        Some(id) => id.clone(),
        None => next_free_id(instance_type.as_str(), used_ids),
    };
    validate_id(&id)?;
    let name = format!("{}-{}", config.environment, id);

    let local = match definition.kind {
        Some(kind) => kind == InstanceKindConfig::Local,
        None => url.is_loopback(),
    };

    let kind = if local {
        if url.credentials.user != USER_DEFAULT {
            return Err(AppError::invalid_instance(
                &name,
                format!(
                    "user '{}' (other than '{}') is not allowed for local instances",
                    url.credentials.user, USER_DEFAULT
                ),
            ));
        }
        InstanceKind::Local(LocalSettings {
            dir: get_instance_dir(&config.local.root_dir, &id),
            debug_port: definition.debug_port.unwrap_or_else(|| url.debug_port()),
            debug_address: definition.debug_address.clone(),
            jvm_opts: definition.jvm_opts.clone().unwrap_or_else(|| {
                JVM_OPTS_DEFAULT.iter().map(|s| s.to_string()).collect()
            }),
            start_opts: definition.start_opts.clone(),
            run_modes: definition
                .run_modes
                .clone()
                .unwrap_or_else(|| vec![RUN_MODE_DEFAULT.to_string()]),
            open_path: definition.open_path.clone().unwrap_or_else(|| "/".to_string()),
            java_executable: config.local.java_executable.clone(),
        })
    } else {
        InstanceKind::Remote
    };

    Ok(Instance {
        id,
        name,
        environment: config.environment.clone(),
        instance_type,
        http_url: url.http_url(),
        credentials: url.credentials,
        properties: definition.properties.clone(),
        kind,
    })
}

/// `author`, then `author2`, `author3`... for repeated types.
fn next_free_id(base: &str, used_ids: &HashSet<String>) -> String {
    if !used_ids.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|index| format!("{base}{index}"))
        .find(|candidate| !used_ids.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn validate_id(id: &str) -> Result<()> {
    let is_safe = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
    if !is_safe {
        return Err(AppError::config(format!("Invalid instance id '{}'", id)));
    }
    Ok(())
}

/// Select instances whose name matches a wildcard pattern (e.g. `local-*`).
pub fn filter_instances(instances: &[Instance], pattern: &str) -> Result<Vec<Instance>> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let selected: Vec<Instance> = instances
        .iter()
        .filter(|instance| matcher.is_match(&instance.name))
        .cloned()
        .collect();
    if selected.is_empty() {
        return Err(AppError::instance_not_found(pattern));
    }
    Ok(selected)
}

/// Local instances only, preserving fleet order.
pub fn local_instances(instances: &[Instance]) -> Vec<Instance> {
    instances.iter().filter(|i| i.is_local()).cloned().collect()
}

pub fn names(instances: &[Instance]) -> String {
    instances
        .iter()
        .map(|i| i.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
