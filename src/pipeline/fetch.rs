use std::sync::Arc;

use anyhow::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    clients::vimeo::{RawVideo, SearchError, SearchInterface, SearchPage},
    util::error::is_fatal,
    util::ident::canonical_video_id,
    util::retry::{RetryConfig, jittered_pause},
    util::text::truncate_chars,
};

use super::plan::PlannedQuery;

/// 説明文の保持上限（文字数）。
const MAX_DESCRIPTION_CHARS: usize = 500;

/// 発見された動画1件の候補レコード。
///
/// 識別子はソースURLのみから決定的に導出され、どのクエリから
/// 発見されたかに依存しない。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateRecord {
    pub id: String,
    pub title: String,
    pub url: String,
    pub description: String,
    pub duration_secs: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub views: u64,
    pub uploader: Option<String>,
    pub uploader_url: Option<String>,
}

/// 1クエリ分のフェッチ結果。ランクはマージ順に使う。
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedBatch {
    pub rank: usize,
    pub query: String,
    pub records: Vec<CandidateRecord>,
}

#[async_trait]
pub trait FetchStage: Send + Sync {
    /// 1クエリを実行し、上限または最終ページまで候補を収集する。
    ///
    /// # Errors
    /// 認証エラーのみ伝播する。一時エラーは該当クエリの残りページを
    /// スキップし、収集済みの候補を返す。
    async fn fetch(&self, query: &PlannedQuery, cap: usize) -> Result<FetchedBatch>;
}

/// 検索面からページングで候補を収集するステージ。
pub struct SearchFetchStage {
    search: Arc<dyn SearchInterface>,
    retry_config: RetryConfig,
    per_page: u32,
    page_delay_ms: (u64, u64),
    min_duration_secs: u64,
    max_duration_secs: u64,
}

impl SearchFetchStage {
    pub fn new(
        search: Arc<dyn SearchInterface>,
        retry_config: RetryConfig,
        per_page: u32,
        page_delay_ms: (u64, u64),
        min_duration_secs: u64,
        max_duration_secs: u64,
    ) -> Self {
        Self {
            search,
            retry_config,
            per_page,
            page_delay_ms,
            min_duration_secs,
            max_duration_secs,
        }
    }

    /// 再試行付きで1ページ取得する。
    ///
    /// 認証エラーと不正応答は再試行しない。
    async fn search_page_with_retry(&self, query: &str, page: u32) -> Result<SearchPage> {
        let mut attempt = 0;

        loop {
            match self.search.search(query, page, self.per_page).await {
                Ok(result) => {
                    if attempt > 0 {
                        info!(query, page, attempt, "search succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(err @ (SearchError::Auth { .. } | SearchError::Malformed(_))) => {
                    return Err(Error::new(err));
                }
                Err(err @ SearchError::Transient(_)) => {
                    attempt += 1;

                    if !self.retry_config.can_retry(attempt) {
                        warn!(
                            query,
                            page,
                            attempt,
                            max_attempts = self.retry_config.max_attempts,
                            "search failed after all retries"
                        );
                        return Err(Error::new(err));
                    }

                    let delay = self.retry_config.delay_for_attempt(attempt);
                    warn!(
                        query,
                        page,
                        attempt,
                        delay_ms = delay.as_millis(),
                        "transient search failure, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 生ヒットを候補レコードに正規化する。
    ///
    /// リンクを持たないヒットと、長さ窓の外にある動画は捨てる。
    fn normalize(&self, raw: RawVideo) -> Option<CandidateRecord> {
        if raw.link.trim().is_empty() {
            return None;
        }

        if raw.duration < self.min_duration_secs || raw.duration > self.max_duration_secs {
            return None;
        }

        let description = raw
            .description
            .map(|text| truncate_chars(&text, MAX_DESCRIPTION_CHARS))
            .unwrap_or_default();
        let views = raw.stats.as_ref().and_then(|stats| stats.plays).unwrap_or(0);
        let (uploader, uploader_url) = raw
            .user
            .map(|user| (user.name, user.link))
            .unwrap_or((None, None));

        Some(CandidateRecord {
            id: canonical_video_id(&raw.link),
            title: raw.title,
            url: raw.link,
            description,
            duration_secs: raw.duration,
            created_at: raw.created_time,
            views,
            uploader,
            uploader_url,
        })
    }
}

#[async_trait]
impl FetchStage for SearchFetchStage {
    async fn fetch(&self, query: &PlannedQuery, cap: usize) -> Result<FetchedBatch> {
        let mut records: Vec<CandidateRecord> = Vec::new();
        let mut page: u32 = 1;
        let mut seen_hits = 0usize;

        loop {
            let result = self.search_page_with_retry(&query.text, page).await;

            let search_page = match result {
                Ok(search_page) => search_page,
                Err(err) => {
                    if is_fatal(&err) {
                        return Err(err.context(format!(
                            "authorization failure while searching for '{}'",
                            query.text
                        )));
                    }
                    warn!(
                        query = %query.text,
                        page,
                        error = ?err,
                        "search failed, skipping remaining pages of this query"
                    );
                    break;
                }
            };

            seen_hits += search_page.items.len();
            let has_more = search_page.has_more;

            for raw in search_page.items {
                if records.len() >= cap {
                    break;
                }
                if let Some(record) = self.normalize(raw) {
                    records.push(record);
                }
            }

            debug!(
                query = %query.text,
                page,
                collected = records.len(),
                cap,
                "fetched search page"
            );

            if records.len() >= cap || !has_more {
                break;
            }

            page += 1;

            // レート制限への配慮。固定間隔だと並行クエリが同期するため
            // ジッターを入れる。
            let (min_ms, max_ms) = self.page_delay_ms;
            tokio::time::sleep(jittered_pause(min_ms, max_ms)).await;
        }

        info!(
            query = %query.text,
            rank = query.rank,
            hits = seen_hits,
            collected = records.len(),
            "query fetch finished"
        );

        Ok(FetchedBatch {
            rank: query.rank,
            query: query.text.clone(),
            records,
        })
    }
}
