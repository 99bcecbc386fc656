//! Auto-update settings derived from admin configuration.
//!
//! The admin blob is operator-edited JSON; anything missing, mistyped, or
//! out of range silently falls back to a documented default. Resolution
//! never fails.

use serde_json::Value;

const GIB: u64 = 1024 * 1024 * 1024;

/// Typed auto-update settings, derived fresh each tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoUpdateSettings {
    /// Master switch.
    pub enabled: bool,

    /// Retention window: newest history entries never pruned. Range 1..=20.
    pub keep_images: u32,

    /// Minimum free bytes on the daemon's data-root mount before a tick runs.
    pub min_free_bytes: u64,

    /// Upper bound on image removals per tick. Range 0..=200.
    pub max_prune_per_run: u32,

    /// Apply the digest-equality pull skip to every tag, not only `latest`.
    pub check_all_tags: bool,

    /// Container display names excluded from updates.
    pub disabled_containers: Vec<String>,
}

impl Default for AutoUpdateSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            keep_images: 2,
            min_free_bytes: 5 * GIB,
            max_prune_per_run: 30,
            check_all_tags: false,
            disabled_containers: Vec::new(),
        }
    }
}

impl AutoUpdateSettings {
    /// Resolve settings from the admin configuration blob, shaped
    /// `{widgets:[{id|type:"docker", data:{...}}]}`.
    pub fn from_admin_data(admin_data: &Value) -> Self {
        let defaults = Self::default();

        let data = admin_data
            .get("widgets")
            .and_then(Value::as_array)
            .and_then(|widgets| {
                widgets.iter().find(|w| {
                    w.get("type").and_then(Value::as_str) == Some("docker")
                        || w.get("id").and_then(Value::as_str) == Some("docker")
                })
            })
            .and_then(|widget| widget.get("data"));
        let Some(data) = data else {
            return defaults;
        };

        let enabled = data
            .get("autoUpdate")
            .map(truthy)
            .unwrap_or(defaults.enabled);

        let keep_images = number(data.get("autoUpdateKeepImages"))
            .map(|n| (n.floor() as i64).clamp(1, 20) as u32)
            .unwrap_or(defaults.keep_images);

        let min_free_bytes = number(data.get("autoUpdateMinFreeGB"))
            .map(|gb| (gb.max(0.0) * GIB as f64) as u64)
            .unwrap_or(defaults.min_free_bytes);

        let max_prune_per_run = number(data.get("autoUpdateMaxPrunePerRun"))
            .map(|n| (n.floor() as i64).clamp(0, 200) as u32)
            .unwrap_or(defaults.max_prune_per_run);

        let check_all_tags = data
            .get("autoUpdateCheckAllTags")
            .map(truthy)
            .unwrap_or(defaults.check_all_tags);

        let disabled_containers = data
            .get("disabledContainers")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|name| name.trim_start_matches('/').to_string())
                    .filter(|name| !name.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            enabled,
            keep_images,
            min_free_bytes,
            max_prune_per_run,
            check_all_tags,
            disabled_containers,
        }
    }

    /// True when updates for this container name are operator-disabled.
    pub fn is_disabled(&self, name: &str) -> bool {
        let name = name.trim_start_matches('/');
        self.disabled_containers.iter().any(|d| d == name)
    }
}

/// Parse-as-number-else-default coercion: accepts JSON numbers and numeric
/// strings, rejects everything else.
fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s == "true",
        _ => false,
    }
}
