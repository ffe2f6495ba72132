use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::{
    clients::{
        AnthropicClient, TmdbClient, VimeoClient,
        anthropic::AnthropicConfig,
        tmdb::TmdbConfig,
        vimeo::VimeoConfig,
    },
    config::Config,
    observability::Telemetry,
    pipeline::{
        PipelineOrchestrator,
        classify::ClassificationOracle,
        sink::{JsonFileSink, OutputSink, log_run_summary},
        verify::MetadataCatalog,
    },
};

/// 1回の実行の報告。
#[derive(Debug)]
pub struct RunReport {
    pub records_emitted: usize,
    pub artifact_path: Option<PathBuf>,
}

/// 構成情報と依存をまとめて初期化したアプリケーションのレジストリ。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    orchestrator: PipelineOrchestrator,
    sink: Box<dyn OutputSink>,
}

impl ComponentRegistry {
    /// 設定からクライアントとパイプラインを構築する。
    ///
    /// 分類オラクルとメタデータカタログは資格情報がある場合のみ
    /// 構築する。欠けていても失敗せず、劣化モードで動く。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;

        let vimeo_client = Arc::new(
            VimeoClient::new(VimeoConfig {
                base_url: config.vimeo_base_url().to_string(),
                token: config.vimeo_api_token().to_string(),
                connect_timeout: config.vimeo_connect_timeout(),
                total_timeout: config.vimeo_total_timeout(),
            })
            .context("failed to create search client")?,
        );

        let oracle: Option<Arc<dyn ClassificationOracle>> = match config.anthropic_api_key() {
            Some(api_key) => {
                let client = AnthropicClient::new(AnthropicConfig {
                    base_url: config.anthropic_base_url().to_string(),
                    api_key: api_key.to_string(),
                    model: config.anthropic_model().map(ToString::to_string),
                    total_timeout: config.anthropic_total_timeout(),
                })
                .context("failed to create classification oracle client")?;
                Some(Arc::new(client) as Arc<dyn ClassificationOracle>)
            }
            None => {
                warn!("ANTHROPIC_API_KEY not set, classification degrades to heuristic mode");
                None
            }
        };

        let catalog: Option<Arc<dyn MetadataCatalog>> = match config.tmdb_api_key() {
            Some(api_key) if config.verification_enabled() => {
                let client = TmdbClient::new(TmdbConfig {
                    base_url: config.tmdb_base_url().to_string(),
                    api_key: api_key.to_string(),
                    total_timeout: config.tmdb_total_timeout(),
                })
                .context("failed to create metadata catalog client")?;
                Some(Arc::new(client) as Arc<dyn MetadataCatalog>)
            }
            Some(_) => {
                info!("verification disabled by configuration");
                None
            }
            None => {
                warn!("TMDB_API_KEY not set, candidates will proceed unverified");
                None
            }
        };

        let orchestrator = PipelineOrchestrator::new(
            Arc::clone(&config),
            vimeo_client,
            oracle,
            catalog,
            Some(telemetry.metrics_arc()),
        );

        let sink: Box<dyn OutputSink> = Box::new(JsonFileSink::new(config.output_dir().clone()));

        Ok(Self {
            config,
            telemetry,
            orchestrator,
            sink,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// パイプラインを1回実行し、成果物を書き出す。
    ///
    /// # Errors
    /// 空のクエリプランと検索面の認証エラーのみ失敗を返す。それ以外は
    /// 生き残った候補から部分出力を生成する。
    pub async fn run_once(&self) -> Result<RunReport> {
        let plan = self.orchestrator.effective_plan();
        let outcome = self.orchestrator.run(&plan).await?;

        log_run_summary(&outcome.records);

        let artifact_path = if outcome.records.is_empty() {
            info!("no records survived the pipeline, skipping artifact write");
            None
        } else {
            Some(self.sink.write(&outcome.records)?)
        };

        Ok(RunReport {
            records_emitted: outcome.records.len(),
            artifact_path,
        })
    }
}
