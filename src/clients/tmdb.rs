/// 外部メタデータカタログ（TMDb v3）クライアント。
///
/// v3 APIキーとv4ベアラートークンの両方に対応します（JWT形式なら
/// ベアラー、それ以外はクエリパラメータ）。
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::pipeline::verify::{CatalogDetails, CatalogMatch, MetadataCatalog};

/// TMDbクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct TmdbConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) total_timeout: Duration,
}

/// TMDbとの通信を管理するクライアント。
#[derive(Debug, Clone)]
pub(crate) struct TmdbClient {
    client: Client,
    base_url: Url,
    api_key: String,
    use_bearer: bool,
}

impl TmdbClient {
    /// 新しいTMDbクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: TmdbConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.total_timeout)
            .build()
            .context("failed to build tmdb HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid tmdb base URL")?;

        // v4トークンはJWT形式
        let use_bearer = config.api_key.starts_with("eyJ");

        Ok(Self {
            client,
            base_url,
            api_key: config.api_key,
            use_bearer,
        })
    }

    fn request(&self, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        if self.use_bearer {
            builder.bearer_auth(&self.api_key)
        } else {
            builder
        }
    }

    fn with_auth(&self, mut url: Url) -> Url {
        if !self.use_bearer {
            url.query_pairs_mut().append_pair("api_key", &self.api_key);
        }
        url
    }
}

#[async_trait]
impl MetadataCatalog for TmdbClient {
    async fn lookup(&self, title: &str, year_hint: Option<i32>) -> Result<Vec<CatalogMatch>> {
        let mut url = self
            .base_url
            .join("search/movie")
            .context("failed to build tmdb search URL")?;

        {
            let mut query_pairs = url.query_pairs_mut();
            query_pairs.append_pair("query", title);
            query_pairs.append_pair("include_adult", "false");
            if let Some(year) = year_hint {
                query_pairs.append_pair("year", &year.to_string());
            }
        }
        let url = self.with_auth(url);

        debug!(title, ?year_hint, "searching tmdb");

        let response: SearchResponse = self
            .request(url)
            .send()
            .await
            .context("tmdb search request failed")?
            .error_for_status()
            .context("tmdb search returned error status")?
            .json()
            .await
            .context("failed to deserialize tmdb search response")?;

        Ok(response
            .results
            .into_iter()
            .map(|result| CatalogMatch {
                id: result.id,
                release_year: parse_release_year(result.release_date.as_deref()),
                title: result.title,
            })
            .collect())
    }

    async fn details(&self, id: u64) -> Result<CatalogDetails> {
        let url = self
            .base_url
            .join(&format!("movie/{id}"))
            .context("failed to build tmdb details URL")?;
        let url = self.with_auth(url);

        let response: DetailsResponse = self
            .request(url)
            .send()
            .await
            .context("tmdb details request failed")?
            .error_for_status()
            .context("tmdb details returned error status")?
            .json()
            .await
            .context("failed to deserialize tmdb details response")?;

        Ok(CatalogDetails {
            release_year: parse_release_year(response.release_date.as_deref()),
            title: response.title,
            runtime_minutes: response.runtime,
            production_companies: response
                .production_companies
                .into_iter()
                .map(|company| company.name)
                .collect(),
        })
    }
}

/// "1942-11-26" 形式の公開日から年を取り出す。
fn parse_release_year(release_date: Option<&str>) -> Option<i32> {
    release_date?.get(..4)?.parse().ok()
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    release_date: Option<String>,
    #[serde(default)]
    runtime: Option<u32>,
    #[serde(default)]
    production_companies: Vec<Company>,
}

#[derive(Debug, Deserialize)]
struct Company {
    #[serde(default)]
    name: String,
}
