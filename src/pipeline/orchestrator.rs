//! Pipeline orchestrator and builder.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use tracing::{info, warn};

use crate::{config::Config, observability::metrics::Metrics, util::retry::RetryConfig};

use super::classify::{ClassificationOracle, ClassifyStage};
use super::dedup::merge_batches;
use super::fetch::{FetchStage, FetchedBatch, SearchFetchStage};
use super::plan::QueryPlan;
use super::prefilter;
use super::score::{RankedRecord, score_and_rank};
use super::verify::{MetadataCatalog, VerifyStage};

/// 1回の実行の結果。
#[derive(Debug)]
pub struct RunOutcome {
    pub records: Vec<RankedRecord>,
    pub stats: RunStats,
}

/// 実行の各段階の件数。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub queries: usize,
    pub fetched: usize,
    pub duplicates_dropped: usize,
    pub prefilter_dropped: usize,
    pub excluded_by_classification: usize,
    pub verified: usize,
}

/// ステージを束ね、集約→分類→検証→順位付けを駆動するオーケストレータ。
pub struct PipelineOrchestrator {
    config: Arc<Config>,
    fetch: Arc<dyn FetchStage>,
    classify: ClassifyStage,
    verify: VerifyStage,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineOrchestrator {
    /// 既定のステージ実装でオーケストレータを構築する。
    ///
    /// `oracle` と `catalog` は任意能力。存在しない場合、該当ステージは
    /// 仕様どおりの劣化モードで動く。
    pub fn new(
        config: Arc<Config>,
        search: Arc<dyn crate::clients::vimeo::SearchInterface>,
        oracle: Option<Arc<dyn ClassificationOracle>>,
        catalog: Option<Arc<dyn MetadataCatalog>>,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        let retry_config = RetryConfig::new(
            config.http_max_retries(),
            config.http_backoff_base_ms(),
            config.http_backoff_cap_ms(),
        );

        let fetch = Arc::new(SearchFetchStage::new(
            search,
            retry_config,
            config.search_per_page(),
            (
                config.page_delay_min().as_millis() as u64,
                config.page_delay_max().as_millis() as u64,
            ),
            config.min_duration().as_secs(),
            config.max_duration().as_secs(),
        ));

        let classify = ClassifyStage::new(
            oracle,
            config.classify_batch_size(),
            config.relevance_threshold(),
            config.llm_max_concurrency().get(),
        );

        let catalog = if config.verification_enabled() {
            catalog
        } else {
            None
        };
        let verify = VerifyStage::new(
            catalog,
            config.catalog_delay(),
            config.catalog_failure_limit(),
        );

        Self {
            config,
            fetch,
            classify,
            verify,
            metrics,
        }
    }

    /// ステージを個別に差し替えるビルダーを返す。
    pub fn builder(config: Arc<Config>) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// 実行するクエリプランを決める。上書きがあればそれを、なければ既定を使う。
    pub fn effective_plan(&self) -> QueryPlan {
        if self.config.query_override().is_empty() {
            QueryPlan::built_in()
        } else {
            QueryPlan::from_override(self.config.query_override())
        }
    }

    /// パイプラインを1回実行する。
    ///
    /// # Errors
    /// 空のクエリプランと検索面の認証エラーのみ実行全体を失敗させる。
    /// それ以外の失敗はステージ内で劣化・除外として処理され、生き残った
    /// 候補から部分的な出力を生成する。
    pub async fn run(&self, plan: &QueryPlan) -> Result<RunOutcome> {
        if plan.is_empty() {
            bail!("query plan is empty, nothing to run");
        }

        info!(queries = plan.len(), "pipeline run started");

        let batches = self.fetch_all(plan).await?;

        let merged = merge_batches(batches);
        let mut stats = RunStats {
            queries: plan.len(),
            fetched: merged.records.len() + merged.duplicates_dropped,
            duplicates_dropped: merged.duplicates_dropped,
            ..RunStats::default()
        };

        let before_prefilter = merged.records.len();
        let prefiltered = prefilter::apply(merged);
        stats.prefilter_dropped = before_prefilter - prefiltered.records.len();

        if let Some(metrics) = &self.metrics {
            metrics.candidates_fetched.inc_by(stats.fetched as f64);
            metrics
                .duplicates_dropped
                .inc_by(stats.duplicates_dropped as f64);
            metrics
                .prefilter_dropped
                .inc_by(stats.prefilter_dropped as f64);
        }

        let classified = self.classify.classify(prefiltered).await;
        stats.excluded_by_classification = classified.excluded;

        if let Some(metrics) = &self.metrics {
            metrics
                .candidates_classified
                .inc_by(classified.records.len() as f64);
            metrics
                .candidates_excluded
                .inc_by(classified.excluded as f64);
        }

        let verified = self.verify.verify(classified).await;
        stats.verified = verified
            .records
            .iter()
            .filter(|candidate| {
                candidate
                    .verification
                    .as_ref()
                    .is_some_and(|verification| verification.verified)
            })
            .count();

        if let Some(metrics) = &self.metrics {
            metrics.candidates_verified.inc_by(stats.verified as f64);
            metrics
                .candidates_unverified
                .inc_by((verified.records.len() - stats.verified) as f64);
        }

        let records = score_and_rank(verified);

        if let Some(metrics) = &self.metrics {
            metrics.records_emitted.inc_by(records.len() as f64);
        }

        info!(
            queries = stats.queries,
            fetched = stats.fetched,
            duplicates_dropped = stats.duplicates_dropped,
            prefilter_dropped = stats.prefilter_dropped,
            excluded = stats.excluded_by_classification,
            verified = stats.verified,
            emitted = records.len(),
            "pipeline run finished"
        );

        Ok(RunOutcome { records, stats })
    }

    /// 全クエリを並行にフェッチし、ランク順にマージ可能なバッチ群を返す。
    ///
    /// 合計上限が設定されている場合は協調的に打ち切る：上限到達後に
    /// 開始したクエリは何も取得しない。実行中のクエリは完走させ、
    /// 余剰はマージ後にランク順で切り詰める。
    async fn fetch_all(&self, plan: &QueryPlan) -> Result<Vec<FetchedBatch>> {
        let per_query_cap = self.config.result_cap_per_query();
        let total_cap = self.config.total_result_cap();
        let collected_total = Arc::new(AtomicUsize::new(0));

        let results: Vec<Result<FetchedBatch>> =
            futures::stream::iter(plan.queries().iter().cloned().map(|query| {
                let fetch = Arc::clone(&self.fetch);
                let collected_total = Arc::clone(&collected_total);
                async move {
                    if total_cap > 0 && collected_total.load(Ordering::SeqCst) >= total_cap {
                        info!(
                            query = %query.text,
                            rank = query.rank,
                            total_cap,
                            "total result cap reached, skipping query"
                        );
                        return Ok(FetchedBatch {
                            rank: query.rank,
                            query: query.text,
                            records: Vec::new(),
                        });
                    }

                    let batch = fetch.fetch(&query, per_query_cap).await?;
                    collected_total.fetch_add(batch.records.len(), Ordering::SeqCst);
                    Ok(batch)
                }
            }))
            .buffer_unordered(self.config.fetch_concurrency().get())
            .collect()
            .await;

        let mut batches = Vec::with_capacity(results.len());
        for result in results {
            // 認証エラーだけがここに届く。1つでもあれば実行全体が失敗する。
            batches.push(result.context("run aborted by fatal search failure")?);
        }

        if total_cap > 0 {
            truncate_to_cap(&mut batches, total_cap);
        }

        Ok(batches)
    }
}

/// ランク順に数えて合計上限を超えた分を決定的に捨てる。
fn truncate_to_cap(batches: &mut [FetchedBatch], total_cap: usize) {
    let mut ordered: Vec<usize> = (0..batches.len()).collect();
    ordered.sort_by_key(|&index| batches[index].rank);

    let mut remaining = total_cap;
    for index in ordered {
        let batch = &mut batches[index];
        if batch.records.len() > remaining {
            let dropped = batch.records.len() - remaining;
            batch.records.truncate(remaining);
            if dropped > 0 {
                warn!(
                    rank = batch.rank,
                    dropped, "discarding surplus results beyond total cap"
                );
            }
        }
        remaining -= batch.records.len();
    }
}

/// ステージを個別に差し替えてオーケストレータを組み立てるビルダー。
pub struct PipelineBuilder {
    config: Arc<Config>,
    fetch: Option<Arc<dyn FetchStage>>,
    classify: Option<ClassifyStage>,
    verify: Option<VerifyStage>,
    metrics: Option<Arc<Metrics>>,
}

impl PipelineBuilder {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            fetch: None,
            classify: None,
            verify: None,
            metrics: None,
        }
    }

    pub fn with_fetch_stage(mut self, stage: Arc<dyn FetchStage>) -> Self {
        self.fetch = Some(stage);
        self
    }

    pub fn with_classify_stage(mut self, stage: ClassifyStage) -> Self {
        self.classify = Some(stage);
        self
    }

    pub fn with_verify_stage(mut self, stage: VerifyStage) -> Self {
        self.verify = Some(stage);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> PipelineOrchestrator {
        let config = self.config;
        PipelineOrchestrator {
            fetch: self
                .fetch
                .unwrap_or_else(|| panic!("fetch stage must be configured before build")),
            classify: self.classify.unwrap_or_else(|| {
                ClassifyStage::new(
                    None,
                    config.classify_batch_size(),
                    config.relevance_threshold(),
                    config.llm_max_concurrency().get(),
                )
            }),
            verify: self.verify.unwrap_or_else(|| {
                VerifyStage::new(
                    None,
                    config.catalog_delay(),
                    config.catalog_failure_limit(),
                )
            }),
            metrics: self.metrics,
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fetch::CandidateRecord;

    fn record(id: &str) -> CandidateRecord {
        CandidateRecord {
            id: id.to_string(),
            title: format!("Title {id}"),
            url: format!("https://vimeo.com/{id}"),
            description: String::new(),
            duration_secs: 5400,
            created_at: None,
            views: 0,
            uploader: None,
            uploader_url: None,
        }
    }

    fn batch(rank: usize, ids: &[&str]) -> FetchedBatch {
        FetchedBatch {
            rank,
            query: format!("query-{rank}"),
            records: ids.iter().map(|id| record(id)).collect(),
        }
    }

    #[test]
    fn truncate_to_cap_trims_in_rank_order() {
        let mut batches = vec![batch(1, &["c", "d"]), batch(0, &["a", "b"])];

        truncate_to_cap(&mut batches, 3);

        let merged = merge_batches(batches);
        let ids: Vec<&str> = merged.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn truncate_to_cap_leaves_small_runs_untouched() {
        let mut batches = vec![batch(0, &["a"]), batch(1, &["b"])];

        truncate_to_cap(&mut batches, 10);

        assert_eq!(batches[0].records.len(), 1);
        assert_eq!(batches[1].records.len(), 1);
    }
}
