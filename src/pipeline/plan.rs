//! Query planner: the fixed, ordered set of search queries for one run.

/// クエリの意図グループ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    /// 年代ベース（"1920s movies" など）
    Era,
    /// スタイル・記述子ベース（"silent films" など）
    Style,
    /// ジャンルベース（"film noir" など）
    Genre,
    /// 一般（"public domain films" など）
    General,
}

/// ランク付けされた1クエリ。
///
/// ランクはマージ順を決める固定優先度で、実行スケジュールに
/// 依存しない決定的な出力順を保証する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedQuery {
    pub rank: usize,
    pub text: String,
    pub intent: QueryIntent,
}

/// 1回の実行で流すクエリ群。純粋データで失敗モードはない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPlan {
    queries: Vec<PlannedQuery>,
}

const ERA_QUERIES: &[&str] = &[
    "1920s movies",
    "1930s movies",
    "1940s movies",
    "1950s movies",
    "1960s movies",
];

const STYLE_QUERIES: &[&str] = &[
    "classic films",
    "silent movies",
    "silent films",
    "vintage cinema",
    "old movies",
    "black and white films",
];

const GENRE_QUERIES: &[&str] = &[
    "old horror movies",
    "film noir",
    "classic western",
    "vintage comedy",
    "old sci-fi films",
];

const GENERAL_QUERIES: &[&str] = &[
    "public domain films",
    "classic hollywood",
    "golden age cinema",
];

impl QueryPlan {
    /// 既定のクエリプランを構築する。
    #[must_use]
    pub fn built_in() -> Self {
        let groups: [(&[&str], QueryIntent); 4] = [
            (ERA_QUERIES, QueryIntent::Era),
            (STYLE_QUERIES, QueryIntent::Style),
            (GENRE_QUERIES, QueryIntent::Genre),
            (GENERAL_QUERIES, QueryIntent::General),
        ];

        let mut queries = Vec::new();
        for (texts, intent) in groups {
            for text in texts {
                queries.push(PlannedQuery {
                    rank: queries.len(),
                    text: (*text).to_string(),
                    intent,
                });
            }
        }

        Self { queries }
    }

    /// 上書きリストからプランを構築する。意図はすべてGeneral扱い。
    #[must_use]
    pub fn from_override(texts: &[String]) -> Self {
        let queries = texts
            .iter()
            .filter(|text| !text.trim().is_empty())
            .enumerate()
            .map(|(rank, text)| PlannedQuery {
                rank,
                text: text.trim().to_string(),
                intent: QueryIntent::General,
            })
            .collect();

        Self { queries }
    }

    #[must_use]
    pub fn queries(&self) -> &[PlannedQuery] {
        &self.queries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
