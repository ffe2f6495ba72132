use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Serialize, Serializer};
use tracing::{debug, info, warn};

use super::dedup::DeduplicatedCorpus;
use super::fetch::CandidateRecord;

/// オラクル不在時に割り当てる中立の関連度。
pub const NEUTRAL_RELEVANCE: u8 = 5;

/// 作品の時代推定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Era {
    /// 年代（"1920s" なら `Decade(1920)`）
    Decade(u16),
    /// 現代の作品
    Modern,
    /// 不明（劣化モードや解釈不能な応答）
    Unknown,
}

impl Era {
    /// オラクルが返す時代ラベルを解釈する。
    #[must_use]
    pub fn parse(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if label == "modern" {
            return Self::Modern;
        }

        if let Some(decade) = label
            .strip_suffix('s')
            .and_then(|year| year.parse::<u16>().ok())
        {
            if (1880..=2020).contains(&decade) && decade % 10 == 0 {
                return Self::Decade(decade);
            }
        }

        Self::Unknown
    }

    /// 照合用の年代中央値（例: 1920s → 1925）。
    #[must_use]
    pub fn midpoint_year(&self) -> Option<i32> {
        match self {
            Self::Decade(decade) => Some(i32::from(*decade) + 5),
            Self::Modern | Self::Unknown => None,
        }
    }
}

impl fmt::Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decade(decade) => write!(f, "{decade}s"),
            Self::Modern => f.write_str("modern"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Era {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 限定語彙のジャンルラベル。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Genre {
    Horror,
    Comedy,
    Drama,
    Western,
    SciFi,
    Noir,
    Thriller,
    Romance,
    Documentary,
    Musical,
    Adventure,
    /// 語彙外のラベル
    Other,
    /// 不明（劣化モード）
    Unknown,
}

impl Genre {
    /// オラクルが返すジャンルラベルを限定語彙へ写像する。
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "horror" => Self::Horror,
            "comedy" => Self::Comedy,
            "drama" => Self::Drama,
            "western" => Self::Western,
            "sci-fi" | "scifi" | "science fiction" => Self::SciFi,
            "noir" | "film noir" => Self::Noir,
            "thriller" | "suspense" => Self::Thriller,
            "romance" => Self::Romance,
            "documentary" => Self::Documentary,
            "musical" => Self::Musical,
            "adventure" => Self::Adventure,
            "" => Self::Unknown,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Horror => "horror",
            Self::Comedy => "comedy",
            Self::Drama => "drama",
            Self::Western => "western",
            Self::SciFi => "sci-fi",
            Self::Noir => "film noir",
            Self::Thriller => "thriller",
            Self::Romance => "romance",
            Self::Documentary => "documentary",
            Self::Musical => "musical",
            Self::Adventure => "adventure",
            Self::Other => "other",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

impl Serialize for Genre {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 分類の出自。劣化モードの結果には関連度しきい値を適用しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationOrigin {
    Oracle,
    Heuristic,
}

/// 候補1件に対する分類結果。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub is_classic: bool,
    pub era: Era,
    pub genre: Genre,
    pub relevance: u8,
    pub origin: ClassificationOrigin,
}

impl Classification {
    /// オラクル不在時のヒューリスティック分類。
    ///
    /// カテゴリ該当は真と仮定し、時代・ジャンルは不明のまま、
    /// 関連度は中立値とする。
    #[must_use]
    pub fn heuristic() -> Self {
        Self {
            is_classic: true,
            era: Era::Unknown,
            genre: Genre::Unknown,
            relevance: NEUTRAL_RELEVANCE,
            origin: ClassificationOrigin::Heuristic,
        }
    }
}

/// 分類オラクルの能力契約。
///
/// バッチは転送の最適化にすぎない：返り値は入力と同順の
/// 候補ごとの結果で、解釈できなかった要素は `None`。
/// ある候補の分類が同じバッチの他の候補に依存してはならない。
#[async_trait]
pub trait ClassificationOracle: Send + Sync {
    async fn classify(&self, batch: &[CandidateRecord]) -> Result<Vec<Option<Classification>>>;
}

/// 分類済みの候補。
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedCandidate {
    pub record: CandidateRecord,
    pub classification: Classification,
}

/// 分類ステージの結果。
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedCorpus {
    pub records: Vec<ClassifiedCandidate>,
    /// 分類不能・カテゴリ外・しきい値未満で除外された件数
    pub excluded: usize,
}

/// オラクル（または不在時のヒューリスティック）で候補を分類するステージ。
pub struct ClassifyStage {
    oracle: Option<Arc<dyn ClassificationOracle>>,
    batch_size: usize,
    relevance_threshold: u8,
    max_concurrency: usize,
}

impl ClassifyStage {
    pub fn new(
        oracle: Option<Arc<dyn ClassificationOracle>>,
        batch_size: usize,
        relevance_threshold: u8,
        max_concurrency: usize,
    ) -> Self {
        Self {
            oracle,
            batch_size: batch_size.max(1),
            relevance_threshold,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// コーパス全体を分類し、生き残った候補のみを返す。
    pub async fn classify(&self, corpus: DeduplicatedCorpus) -> ClassifiedCorpus {
        let Some(oracle) = &self.oracle else {
            info!(
                candidates = corpus.records.len(),
                "classification oracle not configured, degrading to heuristic mode"
            );
            let records = corpus
                .records
                .into_iter()
                .map(|record| ClassifiedCandidate {
                    record,
                    classification: Classification::heuristic(),
                })
                .collect();
            return ClassifiedCorpus {
                records,
                excluded: 0,
            };
        };

        let batches: Vec<Vec<CandidateRecord>> = corpus
            .records
            .chunks(self.batch_size)
            .map(<[CandidateRecord]>::to_vec)
            .collect();
        let total_batches = batches.len();

        // バッチは同時実行されるが、結果はバッチ番号で並べ直すため
        // 出力順はスケジューリングに依存しない。
        let mut results: Vec<(usize, Vec<CandidateRecord>, Result<Vec<Option<Classification>>>)> =
            futures::stream::iter(batches.into_iter().enumerate().map(|(index, batch)| {
                let oracle = Arc::clone(oracle);
                async move {
                    let outcome = oracle.classify(&batch).await;
                    (index, batch, outcome)
                }
            }))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut records = Vec::new();
        let mut excluded = 0usize;

        for (index, batch, outcome) in results {
            match outcome {
                Ok(classifications) => {
                    let mut classifications = classifications.into_iter();
                    for record in batch {
                        // 短い応答の欠損分も分類不能として扱う
                        match classifications.next().flatten() {
                            Some(classification) => {
                                if self.survives(&classification) {
                                    records.push(ClassifiedCandidate {
                                        record,
                                        classification,
                                    });
                                } else {
                                    debug!(
                                        id = %record.id,
                                        relevance = classification.relevance,
                                        is_classic = classification.is_classic,
                                        "candidate excluded by classification"
                                    );
                                    excluded += 1;
                                }
                            }
                            None => {
                                warn!(id = %record.id, "candidate unclassifiable, excluding");
                                excluded += 1;
                            }
                        }
                    }
                }
                Err(err) => {
                    // バッチ全体の失敗はそのバッチのみヒューリスティックに
                    // 劣化させ、実行は継続する
                    warn!(
                        batch = index,
                        error = ?err,
                        "oracle batch failed, degrading batch to heuristic classification"
                    );
                    for record in batch {
                        records.push(ClassifiedCandidate {
                            record,
                            classification: Classification::heuristic(),
                        });
                    }
                }
            }
        }

        info!(
            batches = total_batches,
            survived = records.len(),
            excluded,
            threshold = self.relevance_threshold,
            "classification finished"
        );

        ClassifiedCorpus { records, excluded }
    }

    /// 分類結果が後段に進めるかを判定する。
    ///
    /// 関連度しきい値はオラクル由来のスコアにのみ適用する。
    fn survives(&self, classification: &Classification) -> bool {
        if !classification.is_classic {
            return false;
        }
        match classification.origin {
            ClassificationOrigin::Oracle => classification.relevance >= self.relevance_threshold,
            ClassificationOrigin::Heuristic => true,
        }
    }
}
