/// Vimeo検索APIクライアント。
///
/// ベアラートークン認証とページングをサポートします。認証エラーは
/// 実行全体を止める致命エラーとして、一時エラーとは区別して返します。
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url, header};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const VIMEO_ACCEPT: &str = "application/vnd.vimeo.*+json;version=3.4";

/// 検索呼び出しのエラー。
#[derive(Debug, Error)]
pub enum SearchError {
    /// 資格情報が拒否された。実行全体を中断する。
    #[error("search credential rejected ({status})")]
    Auth { status: StatusCode },
    /// 一時的な失敗。該当クエリの残りページのみスキップする。
    #[error("transient search failure: {0}")]
    Transient(#[source] anyhow::Error),
    /// 解釈できない応答。該当クエリの残りページのみスキップする。
    #[error("malformed search response: {0}")]
    Malformed(#[source] anyhow::Error),
}

/// 検索面から返る生のヒット1件。
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawVideo {
    #[serde(rename = "name", default)]
    pub title: String,
    #[serde(rename = "link", default)]
    pub link: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: u64,
    #[serde(default)]
    pub created_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<RawStats>,
    #[serde(default)]
    pub user: Option<RawUser>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct RawStats {
    #[serde(default)]
    pub plays: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct RawUser {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// 検索結果の1ページ。
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub items: Vec<RawVideo>,
    pub has_more: bool,
}

/// 検索面の能力契約。
///
/// `search` は1ページ分のヒットと続きの有無を返す。
#[async_trait]
pub trait SearchInterface: Send + Sync {
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, SearchError>;
}

/// Vimeoクライアントの設定。
#[derive(Debug, Clone)]
pub struct VimeoConfig {
    pub base_url: String,
    pub token: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
}

/// Vimeo APIとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub struct VimeoClient {
    client: Client,
    base_url: Url,
    token: String,
}

impl VimeoClient {
    /// 新しいVimeoクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub fn new(config: VimeoConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static(VIMEO_ACCEPT));

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| anyhow!("failed to build vimeo HTTP client: {err}"))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|err| anyhow!("invalid vimeo base URL: {err}"))?;

        Ok(Self {
            client,
            base_url,
            token: config.token,
        })
    }

    fn videos_url(&self) -> Result<Url, SearchError> {
        self.base_url
            .join("videos")
            .map_err(|err| SearchError::Malformed(anyhow!("failed to build videos URL: {err}")))
    }
}

#[async_trait]
impl SearchInterface for VimeoClient {
    async fn search(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, SearchError> {
        let mut url = self.videos_url()?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("query", query);
            query_pairs.append_pair("page", &page.to_string());
            query_pairs.append_pair("per_page", &per_page.to_string());
            query_pairs.append_pair("sort", "relevant");
        }

        debug!(query, page, per_page, "searching vimeo");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|err| SearchError::Transient(anyhow!("vimeo search request failed: {err}")))?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SearchError::Auth { status });
        }

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SearchError::Transient(anyhow!(
                "vimeo returned error status {status}"
            )));
        }

        if !status.is_success() {
            return Err(SearchError::Malformed(anyhow!(
                "vimeo returned unexpected status {status}"
            )));
        }

        let body: VideosResponse = response.json().await.map_err(|err| {
            SearchError::Malformed(anyhow!("failed to deserialize vimeo search response: {err}"))
        })?;

        let has_more = body
            .paging
            .as_ref()
            .is_some_and(|paging| paging.next.is_some())
            && !body.data.is_empty();

        Ok(SearchPage {
            items: body.data,
            has_more,
        })
    }
}

/// Vimeoのページング付き応答。
#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    data: Vec<RawVideo>,
    #[serde(default)]
    paging: Option<Paging>,
}

#[derive(Debug, Deserialize, Default)]
struct Paging {
    #[serde(default)]
    next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_matcher, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> VimeoConfig {
        VimeoConfig {
            base_url,
            token: "test-token".to_string(),
            connect_timeout: Duration::from_secs(3),
            total_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn search_returns_page_with_items() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "data": [
                {
                    "name": "Nosferatu (1922)",
                    "link": "https://vimeo.com/1001",
                    "description": "Silent horror classic",
                    "duration": 5640,
                    "created_time": "2019-05-01T00:00:00Z",
                    "stats": {"plays": 12000},
                    "user": {"name": "Film Archive", "link": "https://vimeo.com/archive"}
                }
            ],
            "paging": {"next": "/videos?page=2"}
        });

        Mock::given(method("GET"))
            .and(path("/videos"))
            .and(query_param("query", "silent films"))
            .and(query_param("page", "1"))
            .and(header_matcher("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = VimeoClient::new(test_config(server.uri())).expect("client should build");
        let page = client
            .search("silent films", 1, 25)
            .await
            .expect("search should succeed");

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].title, "Nosferatu (1922)");
        assert_eq!(page.items[0].duration, 5640);
        assert_eq!(page.items[0].stats.as_ref().unwrap().plays, Some(12000));
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn search_without_next_page_reports_exhaustion() {
        let server = MockServer::start().await;

        let body = serde_json::json!({
            "data": [{"name": "Last", "link": "https://vimeo.com/1", "duration": 3000}],
            "paging": {"next": null}
        });

        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = VimeoClient::new(test_config(server.uri())).expect("client should build");
        let page = client.search("classics", 3, 25).await.expect("search");

        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn unauthorized_maps_to_auth_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = VimeoClient::new(test_config(server.uri())).expect("client should build");
        let error = client
            .search("classics", 1, 25)
            .await
            .expect_err("401 should fail");

        assert!(matches!(
            error,
            SearchError::Auth {
                status: StatusCode::UNAUTHORIZED
            }
        ));
    }

    #[tokio::test]
    async fn server_error_maps_to_transient() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = VimeoClient::new(test_config(server.uri())).expect("client should build");
        let error = client
            .search("classics", 1, 25)
            .await
            .expect_err("503 should fail");

        assert!(matches!(error, SearchError::Transient(_)));
    }

    #[tokio::test]
    async fn undecodable_body_maps_to_malformed() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/videos"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = VimeoClient::new(test_config(server.uri())).expect("client should build");
        let error = client
            .search("classics", 1, 25)
            .await
            .expect_err("bad body should fail");

        assert!(matches!(error, SearchError::Malformed(_)));
    }
}
