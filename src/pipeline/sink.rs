use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use super::score::RankedRecord;

/// 最終出力の受け口。
///
/// レコードは自己完結しており、パイプライン内部への参照を持たない。
pub trait OutputSink: Send + Sync {
    /// 順序付きのレコード列を永続化し、生成物のパスを返す。
    fn write(&self, records: &[RankedRecord]) -> Result<PathBuf>;
}

/// タイムスタンプ付きJSONファイルへ書き出すシンク。
pub struct JsonFileSink {
    output_dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl OutputSink for JsonFileSink {
    fn write(&self, records: &[RankedRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output directory {}", self.output_dir.display())
        })?;

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self
            .output_dir
            .join(format!("verified_classics_{timestamp}.json"));

        let body = serde_json::to_string_pretty(records)
            .context("failed to serialize ranked records")?;
        fs::write(&path, body)
            .with_context(|| format!("failed to write output artifact {}", path.display()))?;

        info!(path = %path.display(), records = records.len(), "output artifact written");

        Ok(path)
    }
}

/// 実行サマリ（時代別件数、検証率、平均スコア）をログに残す。
pub fn log_run_summary(records: &[RankedRecord]) {
    if records.is_empty() {
        info!("run produced no records");
        return;
    }

    let mut era_counts: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        *era_counts
            .entry(record.classification.era.to_string())
            .or_default() += 1;
    }

    let verified = records
        .iter()
        .filter(|record| {
            record
                .verification
                .as_ref()
                .is_some_and(|verification| verification.verified)
        })
        .count();

    let mean_score =
        records.iter().map(|record| record.final_score).sum::<f64>() / records.len() as f64;

    info!(
        records = records.len(),
        verified,
        mean_score,
        eras = ?era_counts,
        "run summary"
    );
}
