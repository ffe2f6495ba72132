//! Final scoring and ranking of verified candidates.
//!
//! The score is a weighted sum of monotonic components; ties keep the
//! deduplicator's first-seen order via a stable sort.

use serde::Serialize;
use tracing::debug;

use super::classify::Classification;
use super::fetch::CandidateRecord;
use super::verify::{VerificationResult, VerifiedCorpus};

/// 関連度成分の重み（0〜40点）。
const RELEVANCE_WEIGHT: f64 = 40.0;
/// 検証確信度に掛ける係数（0〜30点）。
const VERIFICATION_WEIGHT: f64 = 0.3;
/// 検証成立時の固定ボーナス。
const VERIFIED_BONUS: f64 = 10.0;
/// 未検証時の固定成分（ペナルティ）。
const UNVERIFIED_COMPONENT: f64 = 0.0;
/// 人気度成分の上限（点）。
const POPULARITY_CEILING: f64 = 10.0;
/// 人気度が飽和する再生数。
const VIEW_SATURATION: f64 = 1_000_000.0;

/// パイプラインの最終出力レコード。
///
/// 生成後は不変で、後段の表示層から書き換えられることはない。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRecord {
    #[serde(flatten)]
    pub record: CandidateRecord,
    pub classification: Classification,
    pub verification: Option<VerificationResult>,
    pub final_score: f64,
}

/// 最終スコアを計算する（0〜100、0.1刻み）。
///
/// 各成分は単調：関連度・検証確信度・再生数のどれが上がっても
/// スコアが下がることはない。再生数は対数正規化し、単発のバイラル
/// 動画が順位を支配しないようにする。
#[must_use]
pub fn final_score(
    record: &CandidateRecord,
    classification: &Classification,
    verification: Option<&VerificationResult>,
) -> f64 {
    let relevance_component =
        (f64::from(classification.relevance).clamp(0.0, 10.0) / 10.0) * RELEVANCE_WEIGHT;

    let verification_component = match verification {
        Some(verification) if verification.verified => {
            verification.confidence.clamp(0.0, 100.0) * VERIFICATION_WEIGHT + VERIFIED_BONUS
        }
        _ => UNVERIFIED_COMPONENT,
    };

    let duration_component = duration_points(record.duration_secs);
    let popularity_component = popularity_points(record.views);

    let score =
        relevance_component + verification_component + duration_component + popularity_component;

    // 0.1刻みに丸める（出力の安定性のため）
    (score * 10.0).round() / 10.0
}

/// 長編映画として自然な上映時間ほど高い点を与える。
fn duration_points(duration_secs: u64) -> f64 {
    let minutes = duration_secs as f64 / 60.0;
    if (70.0..=120.0).contains(&minutes) {
        10.0
    } else if (60.0..=150.0).contains(&minutes) {
        7.0
    } else if (45.0..=180.0).contains(&minutes) {
        4.0
    } else {
        0.0
    }
}

/// 再生数を対数で0〜10点に正規化する。
fn popularity_points(views: u64) -> f64 {
    let normalized = ((views as f64) + 1.0).ln() / (VIEW_SATURATION + 1.0).ln();
    (normalized * POPULARITY_CEILING).min(POPULARITY_CEILING)
}

/// 検証済みコーパスをスコア付けし、降順の安定ソートで並べる。
///
/// 同点は重複排除時の先着順を保つため、同一入力に対する再実行は
/// バイト単位で同一の並びを返す。
#[must_use]
pub fn score_and_rank(corpus: VerifiedCorpus) -> Vec<RankedRecord> {
    let mut ranked: Vec<RankedRecord> = corpus
        .records
        .into_iter()
        .map(|candidate| {
            let score = final_score(
                &candidate.record,
                &candidate.classification,
                candidate.verification.as_ref(),
            );
            RankedRecord {
                record: candidate.record,
                classification: candidate.classification,
                verification: candidate.verification,
                final_score: score,
            }
        })
        .collect();

    ranked.sort_by(|left, right| right.final_score.total_cmp(&left.final_score));

    debug!(records = ranked.len(), "scored and ranked");

    ranked
}
