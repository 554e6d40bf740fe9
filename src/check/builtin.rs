use async_trait::async_trait;

use super::{log_values, Check, CheckGroup, StatusLogger};

/// Node type definitions export; answering it means the repository is up.
pub const METADATA_PATH: &str = "/crx/de/exportnodetype.jsp";

/// Passes when the instance answers a GET with 2xx or 3xx.
#[derive(Debug, Clone)]
pub struct AvailableCheck {
    pub path: String,
}

impl Default for AvailableCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
        }
    }
}

#[async_trait]
impl Check for AvailableCheck {
    fn name(&self) -> &'static str {
        "available"
    }

    async fn check(&self, group: &CheckGroup<'_>, status: &mut StatusLogger) {
        match group.http.get(&self.path).await {
            Ok(response) if response.is_ok() => status.info("Instance available", ""),
            Ok(response) => status.error(
                format!("Instance not available (HTTP {})", response.status),
                format!("GET {} as {}", self.path, group.http.credentials().user),
            ),
            Err(e) => status.error("Instance not available", e.to_string()),
        }
    }
}

/// Passes once node type metadata can be exported; the export is memoized
/// in the invocation context per instance.
#[derive(Debug, Clone, Default)]
pub struct MetadataCheck;

impl MetadataCheck {
    pub fn cache_key(instance_name: &str) -> String {
        format!("nodeTypes:{instance_name}")
    }
}

fn node_type_names(export: &str) -> Vec<String> {
    export
        .lines()
        .filter_map(|line| line.trim().strip_prefix('['))
        .filter_map(|rest| rest.split(']').next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Check for MetadataCheck {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn check(&self, group: &CheckGroup<'_>, status: &mut StatusLogger) {
        let key = Self::cache_key(&group.instance.name);
        if group.context.cached::<String>(&key).is_some() {
            status.info("Metadata already exported", "");
            return;
        }
        match group.http.get(METADATA_PATH).await {
            Ok(response) if response.is_ok() && !response.body.trim().is_empty() => {
                let names = node_type_names(&response.body);
                status.info(
                    format!("Metadata exported ({} node types)", names.len()),
                    log_values(&names),
                );
                group.context.put(&key, response.body);
            }
            Ok(response) => status.error(
                format!("Metadata not exported (HTTP {})", response.status),
                "",
            ),
            Err(e) => status.error("Metadata not exported", e.to_string()),
        }
    }
}

/// Passes when the instance no longer answers at all.
#[derive(Debug, Clone, Default)]
pub struct UnavailableCheck;

#[async_trait]
impl Check for UnavailableCheck {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn check(&self, group: &CheckGroup<'_>, status: &mut StatusLogger) {
        match group.http.get("/").await {
            Ok(response) => status.error(
                format!("Instance still responding (HTTP {})", response.status),
                "",
            ),
            Err(_) => status.info("Instance unavailable", ""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_node_type_names() {
        let export = "<'nt'='http://www.jcp.org/jcr/nt/1.0'>\n[nt:base]\n  - jcr:primaryType\n[cq:Page] > nt:hierarchyNode\n";
        assert_eq!(node_type_names(export), vec!["nt:base", "cq:Page"]);
    }
}
