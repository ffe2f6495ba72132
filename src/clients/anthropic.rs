/// 分類オラクル（Anthropic Messages API互換）クライアント。
///
/// 候補のバッチを1回の往復で分類します。応答の1要素が不正でも
/// その候補だけを分類不能として返し、バッチ全体は潰しません。
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    pipeline::classify::{Classification, ClassificationOracle, ClassificationOrigin, Era, Genre},
    pipeline::fetch::CandidateRecord,
    schema::validate_classification_item,
    util::text::truncate_chars,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_RESPONSE_TOKENS: u32 = 2000;
/// プロンプトに含める説明文の上限（文字数）。
const PROMPT_DESCRIPTION_CHARS: usize = 300;

/// オラクルクライアントの設定。
#[derive(Debug, Clone)]
pub(crate) struct AnthropicConfig {
    pub(crate) base_url: String,
    pub(crate) api_key: String,
    pub(crate) model: Option<String>,
    pub(crate) total_timeout: Duration,
}

/// Messages APIを分類オラクルとして使うクライアント。
#[derive(Debug, Clone)]
pub(crate) struct AnthropicClient {
    client: Client,
    messages_url: Url,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    /// 新しいオラクルクライアントを作成する。
    ///
    /// # Errors
    /// URLのパースまたはHTTPクライアントの構築に失敗した場合はエラーを返します。
    pub(crate) fn new(config: AnthropicConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.total_timeout)
            .build()
            .context("failed to build oracle HTTP client")?;

        let base_url = Url::parse(&config.base_url).context("invalid oracle base URL")?;
        let messages_url = base_url
            .join("v1/messages")
            .context("failed to build oracle messages URL")?;

        Ok(Self {
            client,
            messages_url,
            api_key: config.api_key,
            model: config.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        })
    }

    /// バッチ分類用のプロンプトを構築する。
    fn build_prompt(batch: &[CandidateRecord]) -> String {
        let video_info: Vec<Value> = batch
            .iter()
            .map(|record| {
                serde_json::json!({
                    "title": record.title,
                    "description": truncate_chars(&record.description, PROMPT_DESCRIPTION_CHARS),
                    "upload_year": record.created_at.map(|t| t.format("%Y").to_string()),
                })
            })
            .collect();

        format!(
            "Analyze these videos and determine which are genuinely old/classic films (pre-1970) \
or compilations/restorations of old film content.\n\
For each video, provide:\n\
- is_old_movie: true/false (is this actually a classic/old film or restoration/compilation of old film footage?)\n\
- estimated_era: decade like \"1920s\", \"1940s\", or \"modern\" (based on the FILM CONTENT, not upload date)\n\
- genre: primary genre (horror, comedy, drama, western, sci-fi, etc.)\n\
- relevance_score: 1-10 (how relevant is this to someone searching for old movies?)\n\n\
Videos:\n{}\n\n\
Respond with ONLY a JSON array of objects, one per video, in the same order.\n\
Example format:\n\
[\n\
  {{\"is_old_movie\": true, \"estimated_era\": \"1920s\", \"genre\": \"comedy\", \"relevance_score\": 9}},\n\
  {{\"is_old_movie\": false, \"estimated_era\": \"modern\", \"genre\": \"documentary\", \"relevance_score\": 3}}\n\
]",
            serde_json::to_string_pretty(&video_info).unwrap_or_else(|_| "[]".to_string())
        )
    }

    /// 応答テキストから分類配列を取り出す。
    fn decode_response(text: &str, expected_len: usize) -> Result<Vec<Option<Classification>>> {
        // コードフェンス付きで返るモデルにも耐える
        let trimmed = text
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let value: Value = serde_json::from_str(trimmed)
            .map_err(|err| anyhow!("oracle response is not JSON: {err}"))?;

        let Some(items) = value.as_array() else {
            bail!("oracle response is not a JSON array");
        };

        if items.len() != expected_len {
            warn!(
                expected = expected_len,
                actual = items.len(),
                "oracle returned wrong number of classifications"
            );
        }

        Ok((0..expected_len)
            .map(|index| items.get(index).and_then(decode_item))
            .collect())
    }
}

/// 1要素をスキーマ検証してから分類に写す。不正なら `None`。
fn decode_item(item: &Value) -> Option<Classification> {
    if !validate_classification_item(item) {
        return None;
    }

    let raw: RawClassification = serde_json::from_value(item.clone()).ok()?;

    Some(Classification {
        is_classic: raw.is_old_movie,
        era: Era::parse(&raw.estimated_era),
        genre: Genre::parse(&raw.genre),
        relevance: raw.relevance_score,
        origin: ClassificationOrigin::Oracle,
    })
}

#[derive(Debug, Deserialize)]
struct RawClassification {
    is_old_movie: bool,
    estimated_era: String,
    genre: String,
    relevance_score: u8,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ClassificationOracle for AnthropicClient {
    async fn classify(&self, batch: &[CandidateRecord]) -> Result<Vec<Option<Classification>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_RESPONSE_TOKENS,
            messages: vec![Message {
                role: "user",
                content: Self::build_prompt(batch),
            }],
        };

        debug!(batch_len = batch.len(), model = %self.model, "dispatching classification batch");

        let response = self
            .client
            .post(self.messages_url.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await
            .context("oracle messages request failed")?
            .error_for_status()
            .context("oracle returned error status")?;

        let body: MessagesResponse = response
            .json()
            .await
            .context("failed to deserialize oracle response envelope")?;

        let text = body
            .content
            .first()
            .map(|block| block.text.as_str())
            .unwrap_or_default();

        Self::decode_response(text, batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(id: &str, title: &str) -> CandidateRecord {
        CandidateRecord {
            id: id.to_string(),
            title: title.to_string(),
            url: format!("https://vimeo.com/{id}"),
            description: "A classic feature".to_string(),
            duration_secs: 5400,
            created_at: None,
            views: 100,
            uploader: None,
            uploader_url: None,
        }
    }

    fn test_client(base_url: String) -> AnthropicClient {
        AnthropicClient::new(AnthropicConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: None,
            total_timeout: Duration::from_secs(10),
        })
        .expect("client should build")
    }

    fn envelope(text: &str) -> serde_json::Value {
        serde_json::json!({
            "content": [{"type": "text", "text": text}]
        })
    }

    #[tokio::test]
    async fn classify_maps_oracle_verdicts_in_order() {
        let server = MockServer::start().await;

        let oracle_text = r#"[
            {"is_old_movie": true, "estimated_era": "1920s", "genre": "comedy", "relevance_score": 9},
            {"is_old_movie": false, "estimated_era": "modern", "genre": "documentary", "relevance_score": 3}
        ]"#;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(oracle_text)))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let verdicts = client
            .classify(&[record("1", "The General"), record("2", "Drone Reel 2024")])
            .await
            .expect("classification should succeed");

        assert_eq!(verdicts.len(), 2);
        let first = verdicts[0].expect("first verdict present");
        assert!(first.is_classic);
        assert_eq!(first.era, Era::Decade(1920));
        assert_eq!(first.genre, Genre::Comedy);
        assert_eq!(first.relevance, 9);
        assert_eq!(first.origin, ClassificationOrigin::Oracle);

        let second = verdicts[1].expect("second verdict present");
        assert!(!second.is_classic);
        assert_eq!(second.era, Era::Modern);
    }

    #[tokio::test]
    async fn malformed_item_yields_none_for_that_candidate_only() {
        let server = MockServer::start().await;

        let oracle_text = r#"[
            {"is_old_movie": true, "estimated_era": "1940s", "genre": "noir", "relevance_score": 8},
            {"is_old_movie": "yes", "estimated_era": "1940s", "genre": "noir", "relevance_score": 8}
        ]"#;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(oracle_text)))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let verdicts = client
            .classify(&[record("1", "Laura"), record("2", "Gilda")])
            .await
            .expect("classification should succeed");

        assert!(verdicts[0].is_some());
        assert!(verdicts[1].is_none());
    }

    #[tokio::test]
    async fn short_response_marks_missing_tail_unclassified() {
        let server = MockServer::start().await;

        let oracle_text = r#"[
            {"is_old_movie": true, "estimated_era": "1930s", "genre": "horror", "relevance_score": 9}
        ]"#;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope(oracle_text)))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let verdicts = client
            .classify(&[record("1", "Dracula"), record("2", "Frankenstein")])
            .await
            .expect("classification should succeed");

        assert_eq!(verdicts.len(), 2);
        assert!(verdicts[0].is_some());
        assert!(verdicts[1].is_none());
    }

    #[tokio::test]
    async fn non_array_response_fails_the_batch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(envelope("cannot comply")))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let error = client
            .classify(&[record("1", "Metropolis")])
            .await
            .expect_err("prose response should fail the batch");

        assert!(error.to_string().contains("not JSON"));
    }

    #[tokio::test]
    async fn server_error_fails_the_batch() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529))
            .mount(&server)
            .await;

        let client = test_client(server.uri());
        let result = client.classify(&[record("1", "Metropolis")]).await;

        assert!(result.is_err());
    }

    #[test]
    fn decode_response_tolerates_code_fences() {
        let text = "```json\n[{\"is_old_movie\": true, \"estimated_era\": \"1950s\", \"genre\": \"western\", \"relevance_score\": 7}]\n```";

        let verdicts =
            AnthropicClient::decode_response(text, 1).expect("fenced response should decode");

        let verdict = verdicts[0].expect("verdict present");
        assert_eq!(verdict.era, Era::Decade(1950));
        assert_eq!(verdict.genre, Genre::Western);
    }

    #[test]
    fn build_prompt_mentions_every_candidate() {
        let prompt = AnthropicClient::build_prompt(&[
            record("1", "The Cabinet of Dr Caligari"),
            record("2", "Sunset Boulevard"),
        ]);

        assert!(prompt.contains("The Cabinet of Dr Caligari"));
        assert!(prompt.contains("Sunset Boulevard"));
        assert!(prompt.contains("JSON array"));
    }
}
