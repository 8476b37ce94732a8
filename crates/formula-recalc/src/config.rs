use formula_model::{CalcSettings, SheetLimits};
use serde::{Deserialize, Serialize};

/// Default smallest formula group handed to the worker pool.
pub const DEFAULT_MIN_PARALLEL_GROUP_LEN: usize = 64;

/// Default number of listeners a single dirty propagation may visit before the engine gives up
/// on incremental marking and dirties every formula instead.
pub const DEFAULT_DIRTY_MARK_LIMIT: usize = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecalcMode {
    SingleThreaded,
    /// Large formula groups are sharded across the worker pool when one is available.
    #[default]
    MultiThreaded,
}

/// Engine configuration. Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    pub calc: CalcSettings,
    pub limits: SheetLimits,
    pub recalc_mode: RecalcMode,
    pub min_parallel_group_len: usize,
    pub dirty_mark_limit: usize,
    /// Base seed for evaluation contexts (`RAND`).
    pub rng_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calc: CalcSettings::default(),
            limits: SheetLimits::default(),
            recalc_mode: RecalcMode::default(),
            min_parallel_group_len: DEFAULT_MIN_PARALLEL_GROUP_LEN,
            dirty_mark_limit: DEFAULT_DIRTY_MARK_LIMIT,
            rng_seed: 0x5eed_f0a1,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
