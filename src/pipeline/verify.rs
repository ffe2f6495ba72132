use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::util::text::{extract_year_hint, title_similarity};

use super::classify::{ClassifiedCandidate, ClassifiedCorpus};

/// 照合を受理する確信度のしきい値（これを超えた場合のみ verified）。
pub const ACCEPTANCE_THRESHOLD: f64 = 70.0;

/// 候補タイトルとの最低類似度。これ未満の照合は詳細取得に進まない。
const MIN_TITLE_SIMILARITY: f64 = 0.6;

/// 実行時間照合の許容差（分）。
const RUNTIME_TOLERANCE_MINUTES: i64 = 10;

/// クラシック期の大手・主要インディペンデントスタジオ。
const CLASSIC_STUDIOS: &[&str] = &[
    "Metro-Goldwyn-Mayer",
    "MGM",
    "Paramount",
    "Warner Bros.",
    "Warner Brothers",
    "Universal",
    "20th Century Fox",
    "Twentieth Century Fox",
    "RKO",
    "Columbia",
    "United Artists",
    "Republic Pictures",
    "Monogram Pictures",
    "Allied Artists",
    "American International Pictures",
    "Selznick International Pictures",
    "The Criterion Collection",
    "British Film Institute",
    "Ealing Studios",
    "Hammer Film Productions",
    "Pathé",
    "Gaumont",
    "UFA",
    "Mosfilm",
    "Toho",
];

/// 外部カタログの検索結果1件。
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogMatch {
    pub id: u64,
    pub title: String,
    pub release_year: Option<i32>,
}

/// 外部カタログの作品詳細。
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogDetails {
    pub title: String,
    pub release_year: Option<i32>,
    pub runtime_minutes: Option<u32>,
    pub production_companies: Vec<String>,
}

/// 外部メタデータカタログの能力契約。
#[async_trait]
pub trait MetadataCatalog: Send + Sync {
    async fn lookup(&self, title: &str, year_hint: Option<i32>) -> Result<Vec<CatalogMatch>>;
    async fn details(&self, id: u64) -> Result<CatalogDetails>;
}

/// 候補1件の検証結果。
///
/// `verified = false` はエラーではなく「確信できる照合なし」。
/// 未検証の結果はメタデータを一切持たない（推測で埋めない）。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub verified: bool,
    pub confidence: f64,
    pub matched_title: Option<String>,
    pub release_year: Option<i32>,
    pub runtime_minutes: Option<u32>,
    pub production_companies: Vec<String>,
}

impl VerificationResult {
    #[must_use]
    pub fn unverified() -> Self {
        Self {
            verified: false,
            confidence: 0.0,
            matched_title: None,
            release_year: None,
            runtime_minutes: None,
            production_companies: Vec::new(),
        }
    }
}

/// 検証済みの候補。検証能力が無効な場合 `verification` は `None`。
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCandidate {
    pub record: crate::pipeline::fetch::CandidateRecord,
    pub classification: super::classify::Classification,
    pub verification: Option<VerificationResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedCorpus {
    pub records: Vec<VerifiedCandidate>,
}

/// 照合の確信度を計算する（0〜100）。
///
/// 各成分は単調：タイトル類似度が高いほど、推定年代と公開年の
/// 距離が近いほど、確信度が下がることはない。
#[must_use]
pub fn match_confidence(
    similarity: f64,
    year_distance: Option<i32>,
    classic_studio: bool,
    runtime_match: bool,
) -> f64 {
    let mut confidence = similarity.clamp(0.0, 1.0) * 40.0;

    confidence += match year_distance.map(i32::abs) {
        Some(0..=5) => 30.0,
        Some(6..=10) => 25.0,
        Some(11..=20) => 15.0,
        _ => 0.0,
    };

    if classic_studio {
        confidence += 20.0;
    }
    if runtime_match {
        confidence += 10.0;
    }

    confidence.min(100.0)
}

/// 制作会社リストからクラシックスタジオを照合する。
fn classic_studio_names(companies: &[String]) -> Vec<String> {
    companies
        .iter()
        .filter(|company| {
            let company = company.to_lowercase();
            CLASSIC_STUDIOS
                .iter()
                .any(|studio| company.contains(&studio.to_lowercase()))
        })
        .cloned()
        .collect()
}

/// 外部カタログに対して候補を検証するステージ。
///
/// 連続失敗が上限に達するとカタログ呼び出しを止め、残りの候補を
/// すべて未検証に劣化させる（無限リトライはしない）。
pub struct VerifyStage {
    catalog: Option<Arc<dyn MetadataCatalog>>,
    pacing: Duration,
    failure_limit: u32,
}

impl VerifyStage {
    pub fn new(
        catalog: Option<Arc<dyn MetadataCatalog>>,
        pacing: Duration,
        failure_limit: u32,
    ) -> Self {
        Self {
            catalog,
            pacing,
            failure_limit: failure_limit.max(1),
        }
    }

    pub async fn verify(&self, corpus: ClassifiedCorpus) -> VerifiedCorpus {
        let Some(catalog) = &self.catalog else {
            debug!(
                candidates = corpus.records.len(),
                "metadata catalog not configured, all candidates proceed unverified"
            );
            let records = corpus
                .records
                .into_iter()
                .map(|candidate| VerifiedCandidate {
                    record: candidate.record,
                    classification: candidate.classification,
                    verification: None,
                })
                .collect();
            return VerifiedCorpus { records };
        };

        let total = corpus.records.len();
        let mut records = Vec::with_capacity(total);
        let mut consecutive_failures = 0u32;
        let mut verified_count = 0usize;

        for (index, candidate) in corpus.records.into_iter().enumerate() {
            if consecutive_failures >= self.failure_limit {
                // カタログが長時間落ちていると判断し、残りは呼び出さない
                records.push(unverified(candidate));
                continue;
            }

            let outcome = self.verify_one(catalog.as_ref(), &candidate).await;

            let verification = match outcome {
                Ok(verification) => {
                    consecutive_failures = 0;
                    verification
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!(
                        id = %candidate.record.id,
                        consecutive_failures,
                        limit = self.failure_limit,
                        error = ?err,
                        "catalog unavailable for candidate, proceeding unverified"
                    );
                    if consecutive_failures >= self.failure_limit {
                        warn!(
                            "catalog failure limit reached, degrading remaining candidates to unverified"
                        );
                    }
                    VerificationResult::unverified()
                }
            };

            if verification.verified {
                verified_count += 1;
            }

            records.push(VerifiedCandidate {
                record: candidate.record,
                classification: candidate.classification,
                verification: Some(verification),
            });

            // カタログのレート制限への配慮
            if index + 1 < total && consecutive_failures < self.failure_limit {
                tokio::time::sleep(self.pacing).await;
            }
        }

        info!(total, verified = verified_count, "verification finished");

        VerifiedCorpus { records }
    }

    /// 1候補を照合する。カタログ呼び出しの失敗のみ `Err` を返す。
    async fn verify_one(
        &self,
        catalog: &dyn MetadataCatalog,
        candidate: &ClassifiedCandidate,
    ) -> Result<VerificationResult> {
        let record = &candidate.record;

        // 推定年：分類の年代中央値、なければタイトル・説明文の年ヒント
        let estimated_year = candidate
            .classification
            .era
            .midpoint_year()
            .or_else(|| extract_year_hint(&record.title))
            .or_else(|| extract_year_hint(&record.description));

        let matches = catalog.lookup(&record.title, estimated_year).await?;

        let best = matches
            .into_iter()
            .map(|entry| {
                let similarity = title_similarity(&record.title, &entry.title);
                (entry, similarity)
            })
            .max_by(|(_, left), (_, right)| left.total_cmp(right));

        let Some((best, similarity)) = best else {
            debug!(id = %record.id, "no catalog matches");
            return Ok(VerificationResult::unverified());
        };

        if similarity < MIN_TITLE_SIMILARITY {
            debug!(
                id = %record.id,
                similarity,
                "best catalog match below similarity floor"
            );
            return Ok(VerificationResult::unverified());
        }

        let details = catalog.details(best.id).await?;

        let year_distance = match (estimated_year, details.release_year) {
            (Some(estimate), Some(release)) => Some(release - estimate),
            _ => None,
        };

        let runtime_match = details.runtime_minutes.is_some_and(|runtime| {
            let candidate_minutes = (record.duration_secs / 60) as i64;
            (i64::from(runtime) - candidate_minutes).abs() <= RUNTIME_TOLERANCE_MINUTES
        });

        let matching_studios = classic_studio_names(&details.production_companies);

        let confidence = match_confidence(
            similarity,
            year_distance,
            !matching_studios.is_empty(),
            runtime_match,
        );

        if confidence <= ACCEPTANCE_THRESHOLD {
            debug!(
                id = %record.id,
                confidence,
                "catalog match below acceptance threshold"
            );
            return Ok(VerificationResult::unverified());
        }

        let production_companies = if matching_studios.is_empty() {
            details.production_companies.into_iter().take(3).collect()
        } else {
            matching_studios
        };

        Ok(VerificationResult {
            verified: true,
            confidence,
            matched_title: Some(details.title),
            release_year: details.release_year,
            runtime_minutes: details.runtime_minutes,
            production_companies,
        })
    }
}

fn unverified(candidate: ClassifiedCandidate) -> VerifiedCandidate {
    VerifiedCandidate {
        record: candidate.record,
        classification: candidate.classification,
        verification: Some(VerificationResult::unverified()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::classify::{Classification, ClassificationOrigin, Era, Genre};
    use crate::pipeline::fetch::CandidateRecord;
    use std::sync::Mutex;

    fn candidate(id: &str, title: &str, era: Era, duration_secs: u64) -> ClassifiedCandidate {
        ClassifiedCandidate {
            record: CandidateRecord {
                id: id.to_string(),
                title: title.to_string(),
                url: format!("https://vimeo.com/{id}"),
                description: String::new(),
                duration_secs,
                created_at: None,
                views: 0,
                uploader: None,
                uploader_url: None,
            },
            classification: Classification {
                is_classic: true,
                era,
                genre: Genre::Drama,
                relevance: 8,
                origin: ClassificationOrigin::Oracle,
            },
        }
    }

    fn corpus(candidates: Vec<ClassifiedCandidate>) -> ClassifiedCorpus {
        ClassifiedCorpus {
            records: candidates,
            excluded: 0,
        }
    }

    /// 固定の検索結果と詳細を返すモックカタログ。
    struct FixedCatalog {
        matches: Vec<CatalogMatch>,
        details: CatalogDetails,
        lookup_calls: Mutex<usize>,
    }

    impl FixedCatalog {
        fn new(matches: Vec<CatalogMatch>, details: CatalogDetails) -> Self {
            Self {
                matches,
                details,
                lookup_calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl MetadataCatalog for FixedCatalog {
        async fn lookup(&self, _title: &str, _year_hint: Option<i32>) -> Result<Vec<CatalogMatch>> {
            *self.lookup_calls.lock().expect("lock") += 1;
            Ok(self.matches.clone())
        }

        async fn details(&self, _id: u64) -> Result<CatalogDetails> {
            Ok(self.details.clone())
        }
    }

    struct UnavailableCatalog {
        lookup_calls: Mutex<usize>,
    }

    #[async_trait]
    impl MetadataCatalog for UnavailableCatalog {
        async fn lookup(&self, _title: &str, _year_hint: Option<i32>) -> Result<Vec<CatalogMatch>> {
            *self.lookup_calls.lock().expect("lock") += 1;
            Err(anyhow::anyhow!("catalog quota exhausted"))
        }

        async fn details(&self, _id: u64) -> Result<CatalogDetails> {
            Err(anyhow::anyhow!("catalog quota exhausted"))
        }
    }

    fn stage(catalog: Arc<dyn MetadataCatalog>) -> VerifyStage {
        VerifyStage::new(Some(catalog), Duration::from_millis(0), 3)
    }

    #[tokio::test]
    async fn strong_match_is_verified_with_metadata() {
        let catalog = Arc::new(FixedCatalog::new(
            vec![CatalogMatch {
                id: 42,
                title: "Casablanca".to_string(),
                release_year: Some(1942),
            }],
            CatalogDetails {
                title: "Casablanca".to_string(),
                release_year: Some(1942),
                runtime_minutes: Some(102),
                production_companies: vec!["Warner Bros.".to_string()],
            },
        ));

        let verified = stage(catalog)
            .verify(corpus(vec![candidate(
                "1",
                "Casablanca",
                Era::Decade(1940),
                102 * 60,
            )]))
            .await;

        let verification = verified.records[0]
            .verification
            .as_ref()
            .expect("verification attempted");
        assert!(verification.verified);
        assert!(verification.confidence > ACCEPTANCE_THRESHOLD);
        assert_eq!(verification.matched_title.as_deref(), Some("Casablanca"));
        assert_eq!(verification.release_year, Some(1942));
        assert_eq!(verification.production_companies, vec!["Warner Bros."]);
    }

    #[tokio::test]
    async fn weak_match_stays_unverified_with_empty_metadata() {
        // 類似度は通るが他の裏付けがなく、確信度がしきい値を超えない
        let catalog = Arc::new(FixedCatalog::new(
            vec![CatalogMatch {
                id: 7,
                title: "Casablanca".to_string(),
                release_year: None,
            }],
            CatalogDetails {
                title: "Casablanca".to_string(),
                release_year: None,
                runtime_minutes: None,
                production_companies: vec![],
            },
        ));

        let verified = stage(catalog)
            .verify(corpus(vec![candidate(
                "1",
                "Casablanca",
                Era::Unknown,
                90 * 60,
            )]))
            .await;

        let verification = verified.records[0]
            .verification
            .as_ref()
            .expect("verification attempted");
        assert!(!verification.verified);
        assert!(verification.matched_title.is_none());
        assert!(verification.release_year.is_none());
        assert!(verification.runtime_minutes.is_none());
        assert!(verification.production_companies.is_empty());
    }

    #[tokio::test]
    async fn dissimilar_titles_never_reach_details() {
        let catalog = Arc::new(FixedCatalog::new(
            vec![CatalogMatch {
                id: 7,
                title: "Completely Different Story".to_string(),
                release_year: Some(1940),
            }],
            CatalogDetails {
                title: "Completely Different Story".to_string(),
                release_year: Some(1940),
                runtime_minutes: Some(90),
                production_companies: vec!["MGM".to_string()],
            },
        ));

        let verified = stage(catalog)
            .verify(corpus(vec![candidate(
                "1",
                "Nosferatu",
                Era::Decade(1920),
                90 * 60,
            )]))
            .await;

        let verification = verified.records[0]
            .verification
            .as_ref()
            .expect("verification attempted");
        assert!(!verification.verified);
    }

    #[tokio::test]
    async fn catalog_unavailability_degrades_remaining_candidates() {
        let catalog = Arc::new(UnavailableCatalog {
            lookup_calls: Mutex::new(0),
        });
        let stage = VerifyStage::new(Some(Arc::clone(&catalog) as _), Duration::from_millis(0), 2);

        let verified = stage
            .verify(corpus(vec![
                candidate("1", "Laura", Era::Decade(1940), 5280),
                candidate("2", "Gilda", Era::Decade(1940), 6600),
                candidate("3", "Rebecca", Era::Decade(1940), 7800),
                candidate("4", "Notorious", Era::Decade(1940), 6060),
            ]))
            .await;

        assert_eq!(verified.records.len(), 4);
        assert!(verified
            .records
            .iter()
            .all(|r| !r.verification.as_ref().unwrap().verified));
        // 失敗上限(2)に達した後はカタログを呼ばない
        assert_eq!(*catalog.lookup_calls.lock().expect("lock"), 2);
    }

    #[tokio::test]
    async fn missing_capability_leaves_verification_absent() {
        let stage = VerifyStage::new(None, Duration::from_millis(0), 3);

        let verified = stage
            .verify(corpus(vec![candidate(
                "1",
                "Metropolis",
                Era::Decade(1920),
                9000,
            )]))
            .await;

        assert!(verified.records[0].verification.is_none());
    }

    #[test]
    fn confidence_components_add_up() {
        let confidence = match_confidence(1.0, Some(0), true, true);
        assert!((confidence - 100.0).abs() < f64::EPSILON);

        let confidence = match_confidence(0.8, Some(12), false, false);
        assert!((confidence - (0.8 * 40.0 + 15.0)).abs() < 1e-9);

        let confidence = match_confidence(0.0, None, false, false);
        assert!(confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn classic_studio_matching_is_case_insensitive() {
        let studios = classic_studio_names(&[
            "warner bros. pictures".to_string(),
            "Tiny Indie Collective".to_string(),
        ]);
        assert_eq!(studios, vec!["warner bros. pictures"]);
    }

    mod confidence_properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// 類似度が上がって確信度が下がることはない
            #[test]
            fn monotonic_in_similarity(
                low in 0.0f64..=1.0,
                delta in 0.0f64..=1.0,
                distance in proptest::option::of(-60i32..=60),
                studio in any::<bool>(),
                runtime in any::<bool>(),
            ) {
                let high = (low + delta).min(1.0);
                prop_assert!(
                    match_confidence(high, distance, studio, runtime)
                        >= match_confidence(low, distance, studio, runtime)
                );
            }

            /// 年距離が縮まって確信度が下がることはない
            #[test]
            fn monotonic_in_year_distance(
                similarity in 0.0f64..=1.0,
                near in 0i32..=60,
                extra in 0i32..=60,
                studio in any::<bool>(),
                runtime in any::<bool>(),
            ) {
                let far = near.saturating_add(extra);
                prop_assert!(
                    match_confidence(similarity, Some(near), studio, runtime)
                        >= match_confidence(similarity, Some(far), studio, runtime)
                );
            }

            /// 確信度は常に0〜100に収まる
            #[test]
            fn bounded(
                similarity in -1.0f64..=2.0,
                distance in proptest::option::of(-100i32..=100),
                studio in any::<bool>(),
                runtime in any::<bool>(),
            ) {
                let confidence = match_confidence(similarity, distance, studio, runtime);
                prop_assert!((0.0..=100.0).contains(&confidence));
            }
        }
    }
}
