//! Tolerant manifest parsing.
//!
//! App binaries may ship a small `manifest.json` describing metadata the
//! registry can't infer from the binary alone. Parsing is permissive: a
//! missing or malformed field falls back to a documented default rather than
//! failing the whole install, since a missing manifest is the common case
//! for apps pushed without one.

use serde::Deserialize;
use serde_json::Value;

use crate::appmgr::registry::RestartPolicy;

const DEFAULT_HEAP_KB: u16 = 64;
const DEFAULT_STACK_KB: u16 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub entry: String,
    pub heap_kb: u16,
    pub stack_kb: u16,
    pub restart_policy: RestartPolicy,
    pub permissions: u32,
}

#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    name: Option<String>,
    version: Option<String>,
    entry: Option<String>,
    heap_kb: Option<u16>,
    stack_kb: Option<u16>,
    restart: Option<RawRestart>,
    permissions: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRestart {
    enabled: Option<bool>,
    max_retries: Option<u16>,
    delay_ms: Option<u32>,
}

const KNOWN_PERMISSIONS: &[(&str, u32)] =
    &[("net", 1 << 0), ("storage", 1 << 1), ("gpio", 1 << 2), ("timer", 1 << 3)];

impl Manifest {
    /// Parse `bytes` as a manifest, falling back to `fallback_name` when the
    /// document is absent, empty, or not valid JSON, and filling every
    /// missing field with its default. Never fails.
    pub fn parse(bytes: &[u8], fallback_name: &str) -> Self {
        let raw: RawManifest = if bytes.is_empty() {
            RawManifest::default()
        } else {
            serde_json::from_slice::<Value>(bytes)
                .ok()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default()
        };

        let name = raw.name.filter(|n| !n.is_empty()).unwrap_or_else(|| fallback_name.to_string());
        let entry = raw.entry.filter(|e| !e.is_empty()).unwrap_or_else(|| "main".to_string());
        let version = raw.version.filter(|v| !v.is_empty()).unwrap_or_else(|| "0.0.0".to_string());

        let restart = raw.restart.unwrap_or_default();
        let restart_policy = RestartPolicy {
            enabled: restart.enabled.unwrap_or(false),
            max_retries: restart.max_retries.unwrap_or(3),
            delay_ms: restart.delay_ms.unwrap_or(1000),
        };

        let permissions = raw
            .permissions
            .unwrap_or_default()
            .iter()
            .filter_map(|name| KNOWN_PERMISSIONS.iter().find(|(k, _)| k == name).map(|(_, bit)| bit))
            .fold(0u32, |acc, bit| acc | bit);

        Self {
            name,
            version,
            entry,
            heap_kb: raw.heap_kb.unwrap_or(DEFAULT_HEAP_KB),
            stack_kb: raw.stack_kb.unwrap_or(DEFAULT_STACK_KB),
            restart_policy,
            permissions,
        }
    }
}
