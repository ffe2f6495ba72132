use rustc_hash::FxHashSet;
use tracing::debug;

use super::fetch::{CandidateRecord, FetchedBatch};

/// ランク順にマージされた重複排除済みの候補集合。
#[derive(Debug, Clone, PartialEq)]
pub struct DeduplicatedCorpus {
    pub records: Vec<CandidateRecord>,
    pub duplicates_dropped: usize,
}

/// フェッチ結果をランク順にマージし、正規識別子で重複を落とす。
///
/// 最初に見えたレコードが勝ち、後続の同一識別子はフィールドの
/// 統合をせずそのまま捨てる。入力のランク順が決定的なら出力順も
/// 決定的になる。
#[must_use]
pub fn merge_batches(mut batches: Vec<FetchedBatch>) -> DeduplicatedCorpus {
    batches.sort_by_key(|batch| batch.rank);

    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut records = Vec::new();
    let mut duplicates_dropped = 0usize;

    for batch in batches {
        for record in batch.records {
            if seen.insert(record.id.clone()) {
                records.push(record);
            } else {
                duplicates_dropped += 1;
            }
        }
    }

    debug!(
        unique = records.len(),
        duplicates_dropped, "merged fetch batches"
    );

    DeduplicatedCorpus {
        records,
        duplicates_dropped,
    }
}

impl DeduplicatedCorpus {
    /// 既に重複排除済みの集合を再度マージする。冪等性の検証に使う。
    #[must_use]
    pub fn remerge(self) -> Self {
        merge_batches(vec![FetchedBatch {
            rank: 0,
            query: String::new(),
            records: self.records,
        }])
    }
}
