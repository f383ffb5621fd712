use crate::error::QuantError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub recommend: RecommendConfig,
    #[serde(default)]
    pub narrative: NarrativeConfig,
}

/// Market-data source configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    #[serde(default = "default_krx_url")]
    pub krx_url: String,

    #[serde(default = "default_naver_url")]
    pub naver_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_request_delay_ms")]
    pub request_delay_ms: u64,

    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `KRX` (all boards), `KOSPI`, `KOSDAQ` or `KONEX`.
    #[serde(default = "default_listing_market")]
    pub listing_market: String,

    /// Offline listing CSV; when set the snapshot job reads it instead of KRX.
    #[serde(default)]
    pub snapshot_csv: Option<PathBuf>,
}

/// Storage configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Store identifier (DuckDB file). Required.
    #[serde(default)]
    pub location: Option<PathBuf>,

    #[serde(default)]
    pub sheets: SheetNames,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetNames {
    #[serde(default = "default_raw_sheet")]
    pub raw_universe: String,
    #[serde(default = "default_targets_sheet")]
    pub targets: String,
    #[serde(default = "default_history_sheet")]
    pub history: String,
    #[serde(default = "default_recommendations_sheet")]
    pub recommendations: String,
}

/// Universe filter thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UniverseConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_market_cap_quantile")]
    pub market_cap_quantile: f64,

    /// Strict floor: volume must be greater than this.
    #[serde(default = "default_min_volume")]
    pub min_volume: u64,

    #[serde(default = "default_name_blacklist")]
    pub name_blacklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    #[serde(default = "default_full_window_days")]
    pub full_window_days: i64,

    #[serde(default = "default_incremental_window_days")]
    pub incremental_window_days: i64,

    #[serde(default = "default_true")]
    pub bootstrap_full_when_empty: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecommendConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

/// Narrative enrichment via the Gemini API
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NarrativeConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_gemini_model")]
    pub model: String,

    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    #[serde(default = "default_narrative_delay_ms")]
    pub delay_ms: u64,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: i64,

    #[serde(default = "default_temperature")]
    pub temperature: f64,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_krx_url() -> String {
    "http://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd".to_string()
}
fn default_naver_url() -> String {
    "https://api.finance.naver.com/siseJson.naver".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_request_delay_ms() -> u64 {
    300
}
fn default_jitter_ms() -> u64 {
    200
}
fn default_user_agent() -> String {
    "krx-quant/0.1 (daily universe screener)".to_string()
}
fn default_listing_market() -> String {
    "KRX".to_string()
}
fn default_raw_sheet() -> String {
    "all_symbols".to_string()
}
fn default_targets_sheet() -> String {
    "quant_targets".to_string()
}
fn default_history_sheet() -> String {
    "price_history".to_string()
}
fn default_recommendations_sheet() -> String {
    "recommendations".to_string()
}
fn default_max_entries() -> usize {
    250
}
fn default_market_cap_quantile() -> f64 {
    0.8
}
fn default_min_volume() -> u64 {
    50_000
}
fn default_name_blacklist() -> Vec<String> {
    vec![
        "스팩".to_string(),
        "제[0-9]+호".to_string(),
        "우$".to_string(),
        "우[A-C]$".to_string(),
    ]
}
fn default_full_window_days() -> i64 {
    365
}
fn default_incremental_window_days() -> i64 {
    3
}
fn default_true() -> bool {
    true
}
fn default_top_k() -> usize {
    5
}
fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}
fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}
fn default_narrative_delay_ms() -> u64 {
    1000
}
fn default_max_output_tokens() -> i64 {
    512
}
fn default_temperature() -> f64 {
    0.4
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            krx_url: default_krx_url(),
            naver_url: default_naver_url(),
            timeout_secs: default_timeout_secs(),
            request_delay_ms: default_request_delay_ms(),
            jitter_ms: default_jitter_ms(),
            user_agent: default_user_agent(),
            listing_market: default_listing_market(),
            snapshot_csv: None,
        }
    }
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            raw_universe: default_raw_sheet(),
            targets: default_targets_sheet(),
            history: default_history_sheet(),
            recommendations: default_recommendations_sheet(),
        }
    }
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            market_cap_quantile: default_market_cap_quantile(),
            min_volume: default_min_volume(),
            name_blacklist: default_name_blacklist(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            full_window_days: default_full_window_days(),
            incremental_window_days: default_incremental_window_days(),
            bootstrap_full_when_empty: true,
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self { top_k: default_top_k() }
    }
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            model: default_gemini_model(),
            base_url: default_gemini_base_url(),
            delay_ms: default_narrative_delay_ms(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from file + environment overrides, then validate.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("KQUANT").separator("__"))
            .build()
            .context("Failed to assemble configuration sources")?;

        let mut app_cfg: AppConfig = cfg
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if app_cfg.narrative.api_key.is_none() {
            app_cfg.narrative.api_key = std::env::var("GEMINI_API_KEY").ok();
        }

        app_cfg.validate()?;
        Ok(app_cfg)
    }

    /// Reject configurations that cannot run any stage.
    pub fn validate(&self) -> std::result::Result<(), QuantError> {
        if self.storage.location.is_none() {
            return Err(QuantError::Config(
                "storage.location is not set (KQUANT__STORAGE__LOCATION)".into(),
            ));
        }

        if self.narrative.enabled
            && self.narrative.api_key.as_deref().is_none_or(|k| k.trim().is_empty())
        {
            return Err(QuantError::Config(
                "narrative.enabled requires an API key (GEMINI_API_KEY)".into(),
            ));
        }

        let q = self.universe.market_cap_quantile;
        if !(0.0..=1.0).contains(&q) {
            return Err(QuantError::Config(format!(
                "universe.market_cap_quantile must be within [0, 1], got {}",
                q
            )));
        }
        if self.universe.max_entries == 0 {
            return Err(QuantError::Config("universe.max_entries must be > 0".into()));
        }
        if self.recommend.top_k == 0 {
            return Err(QuantError::Config("recommend.top_k must be > 0".into()));
        }
        if self.history.full_window_days <= 0 || self.history.incremental_window_days <= 0 {
            return Err(QuantError::Config(
                "history window lengths must be positive".into(),
            ));
        }

        Ok(())
    }
}
