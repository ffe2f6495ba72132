use std::{env, num::NonZeroUsize, path::PathBuf, time::Duration};

use thiserror::Error;

#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::LazyLock<std::sync::Mutex<()>> =
    std::sync::LazyLock::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    vimeo_api_token: String,
    vimeo_base_url: String,
    vimeo_connect_timeout: Duration,
    vimeo_total_timeout: Duration,
    anthropic_api_key: Option<String>,
    anthropic_base_url: String,
    anthropic_model: Option<String>,
    anthropic_total_timeout: Duration,
    tmdb_api_key: Option<String>,
    tmdb_base_url: String,
    tmdb_total_timeout: Duration,
    query_override: Vec<String>,
    result_cap_per_query: usize,
    total_result_cap: usize,
    relevance_threshold: u8,
    verification_enabled: bool,
    min_duration: Duration,
    max_duration: Duration,
    classify_batch_size: usize,
    llm_max_concurrency: NonZeroUsize,
    fetch_concurrency: NonZeroUsize,
    search_per_page: u32,
    page_delay_min: Duration,
    page_delay_max: Duration,
    catalog_delay: Duration,
    catalog_failure_limit: u32,
    output_dir: PathBuf,
    http_max_retries: usize,
    http_backoff_base_ms: u64,
    http_backoff_cap_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数からワーカーの設定値を読み込み、検証する。
    ///
    /// 検索面の資格情報（`VIMEO_API_TOKEN`）は必須。分類オラクルと
    /// メタデータカタログの資格情報は任意の能力で、欠けていれば
    /// 該当ステージが劣化モードで動く。
    ///
    /// # Errors
    /// `VIMEO_API_TOKEN` が未設定、もしくは各種値のパースに失敗した
    /// 場合は [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let vimeo_api_token = env_var("VIMEO_API_TOKEN")?;
        let vimeo_base_url =
            env::var("VIMEO_BASE_URL").unwrap_or_else(|_| "https://api.vimeo.com/".to_string());
        let vimeo_connect_timeout = parse_duration_ms("VIMEO_CONNECT_TIMEOUT_MS", 3000)?;
        let vimeo_total_timeout = parse_duration_ms("VIMEO_TOTAL_TIMEOUT_MS", 30000)?;

        // 任意能力：分類オラクル
        let anthropic_api_key = env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        let anthropic_base_url = env::var("ANTHROPIC_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/".to_string());
        let anthropic_model = env::var("ANTHROPIC_MODEL").ok().filter(|m| !m.is_empty());
        let anthropic_total_timeout = parse_duration_ms("ANTHROPIC_TOTAL_TIMEOUT_MS", 60000)?;

        // 任意能力：メタデータカタログ
        let tmdb_api_key = env::var("TMDB_API_KEY").ok().filter(|k| !k.is_empty());
        let tmdb_base_url = env::var("TMDB_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3/".to_string());
        let tmdb_total_timeout = parse_duration_ms("TMDB_TOTAL_TIMEOUT_MS", 10000)?;

        // パイプライン設定
        let query_override = parse_csv("CINESCOUT_QUERIES", "");
        let result_cap_per_query = parse_usize("CINESCOUT_RESULT_CAP_PER_QUERY", 50)?;
        let total_result_cap = parse_usize("CINESCOUT_TOTAL_RESULT_CAP", 0)?;
        let relevance_threshold = parse_u8("CINESCOUT_RELEVANCE_THRESHOLD", 6)?;
        let verification_enabled = parse_bool("CINESCOUT_VERIFICATION_ENABLED", true)?;
        let min_duration =
            Duration::from_secs(parse_u64("CINESCOUT_MIN_DURATION_SECS", 45 * 60)?);
        let max_duration =
            Duration::from_secs(parse_u64("CINESCOUT_MAX_DURATION_SECS", 180 * 60)?);
        let classify_batch_size = parse_usize("CINESCOUT_CLASSIFY_BATCH_SIZE", 10)?;
        let llm_max_concurrency = parse_non_zero_usize("CINESCOUT_LLM_MAX_CONCURRENCY", 2)?;
        let fetch_concurrency = parse_non_zero_usize("CINESCOUT_FETCH_CONCURRENCY", 4)?;
        let search_per_page = parse_u32("CINESCOUT_SEARCH_PER_PAGE", 25)?;
        let page_delay_min = parse_duration_ms("CINESCOUT_PAGE_DELAY_MIN_MS", 300)?;
        let page_delay_max = parse_duration_ms("CINESCOUT_PAGE_DELAY_MAX_MS", 900)?;
        let catalog_delay = parse_duration_ms("CINESCOUT_CATALOG_DELAY_MS", 300)?;
        let catalog_failure_limit = parse_u32("CINESCOUT_CATALOG_FAILURE_LIMIT", 5)?;
        let output_dir =
            PathBuf::from(env::var("CINESCOUT_OUTPUT_DIR").unwrap_or_else(|_| "./outputs".to_string()));

        // 再試行設定（指数バックオフ+ジッター）
        let http_max_retries = parse_usize("HTTP_MAX_RETRIES", 3)?;
        let http_backoff_base_ms = parse_u64("HTTP_BACKOFF_BASE_MS", 250)?;
        let http_backoff_cap_ms = parse_u64("HTTP_BACKOFF_CAP_MS", 10000)?;

        Ok(Self {
            vimeo_api_token,
            vimeo_base_url,
            vimeo_connect_timeout,
            vimeo_total_timeout,
            anthropic_api_key,
            anthropic_base_url,
            anthropic_model,
            anthropic_total_timeout,
            tmdb_api_key,
            tmdb_base_url,
            tmdb_total_timeout,
            query_override,
            result_cap_per_query,
            total_result_cap,
            relevance_threshold,
            verification_enabled,
            min_duration,
            max_duration,
            classify_batch_size,
            llm_max_concurrency,
            fetch_concurrency,
            search_per_page,
            page_delay_min,
            page_delay_max,
            catalog_delay,
            catalog_failure_limit,
            output_dir,
            http_max_retries,
            http_backoff_base_ms,
            http_backoff_cap_ms,
        })
    }

    #[must_use]
    pub fn vimeo_api_token(&self) -> &str {
        &self.vimeo_api_token
    }

    #[must_use]
    pub fn vimeo_base_url(&self) -> &str {
        &self.vimeo_base_url
    }

    #[must_use]
    pub fn vimeo_connect_timeout(&self) -> Duration {
        self.vimeo_connect_timeout
    }

    #[must_use]
    pub fn vimeo_total_timeout(&self) -> Duration {
        self.vimeo_total_timeout
    }

    #[must_use]
    pub fn anthropic_api_key(&self) -> Option<&str> {
        self.anthropic_api_key.as_deref()
    }

    #[must_use]
    pub fn anthropic_base_url(&self) -> &str {
        &self.anthropic_base_url
    }

    #[must_use]
    pub fn anthropic_model(&self) -> Option<&str> {
        self.anthropic_model.as_deref()
    }

    #[must_use]
    pub fn anthropic_total_timeout(&self) -> Duration {
        self.anthropic_total_timeout
    }

    #[must_use]
    pub fn tmdb_api_key(&self) -> Option<&str> {
        self.tmdb_api_key.as_deref()
    }

    #[must_use]
    pub fn tmdb_base_url(&self) -> &str {
        &self.tmdb_base_url
    }

    #[must_use]
    pub fn tmdb_total_timeout(&self) -> Duration {
        self.tmdb_total_timeout
    }

    #[must_use]
    pub fn query_override(&self) -> &[String] {
        &self.query_override
    }

    #[must_use]
    pub fn result_cap_per_query(&self) -> usize {
        self.result_cap_per_query
    }

    /// 全クエリ合計の協調的な打ち切り上限。0は無制限。
    #[must_use]
    pub fn total_result_cap(&self) -> usize {
        self.total_result_cap
    }

    #[must_use]
    pub fn relevance_threshold(&self) -> u8 {
        self.relevance_threshold
    }

    #[must_use]
    pub fn verification_enabled(&self) -> bool {
        self.verification_enabled
    }

    #[must_use]
    pub fn min_duration(&self) -> Duration {
        self.min_duration
    }

    #[must_use]
    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    #[must_use]
    pub fn classify_batch_size(&self) -> usize {
        self.classify_batch_size
    }

    #[must_use]
    pub fn llm_max_concurrency(&self) -> NonZeroUsize {
        self.llm_max_concurrency
    }

    #[must_use]
    pub fn fetch_concurrency(&self) -> NonZeroUsize {
        self.fetch_concurrency
    }

    #[must_use]
    pub fn search_per_page(&self) -> u32 {
        self.search_per_page
    }

    #[must_use]
    pub fn page_delay_min(&self) -> Duration {
        self.page_delay_min
    }

    #[must_use]
    pub fn page_delay_max(&self) -> Duration {
        self.page_delay_max
    }

    #[must_use]
    pub fn catalog_delay(&self) -> Duration {
        self.catalog_delay
    }

    #[must_use]
    pub fn catalog_failure_limit(&self) -> u32 {
        self.catalog_failure_limit
    }

    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    #[must_use]
    pub fn http_max_retries(&self) -> usize {
        self.http_max_retries
    }

    #[must_use]
    pub fn http_backoff_base_ms(&self) -> u64 {
        self.http_backoff_base_ms
    }

    #[must_use]
    pub fn http_backoff_cap_ms(&self) -> u64 {
        self.http_backoff_cap_ms
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_non_zero_usize(name: &'static str, default: usize) -> Result<NonZeroUsize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let parsed = raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })?;
    NonZeroUsize::new(parsed).ok_or_else(|| ConfigError::Invalid {
        name,
        source: anyhow::anyhow!("must be greater than zero"),
    })
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u8(name: &'static str, default: u8) -> Result<u8, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u8>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("invalid boolean value: {raw}"),
        }),
    }
}

fn parse_csv(name: &'static str, default: &str) -> Vec<String> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
