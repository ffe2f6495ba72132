//! Keyword pre-filter: cheap elimination of obvious non-movies before
//! any oracle round-trip is spent on them.

use tracing::debug;

use super::dedup::DeduplicatedCorpus;

/// 明らかに映画本編でないコンテンツを示すキーワード。
const BLACKLIST_KEYWORDS: &[&str] = &[
    "trailer",
    "teaser",
    "promo",
    "preview",
    "clip",
    "behind the scenes",
    "making of",
    "breakdown",
    "vfx",
    "test",
    "demo",
    "reel",
    "showreel",
    "recap",
    "review",
    "analysis",
    "essay",
    "critique",
    "supercut",
    "compilation",
    "montage",
    "tribute",
    "how to",
    "tutorial",
    "lesson",
    "workshop",
    "interview",
    "q&a",
    "panel",
    "discussion",
    "opener",
    "bumper",
    "ident",
    "intro",
    "campaign",
    "commercial",
];

/// タイトルまたは説明にブラックリスト語を含む候補を除外する。
#[must_use]
pub fn apply(corpus: DeduplicatedCorpus) -> DeduplicatedCorpus {
    let before = corpus.records.len();

    let records: Vec<_> = corpus
        .records
        .into_iter()
        .filter(|record| match blacklisted_keyword(&record.title, &record.description) {
            Some(keyword) => {
                debug!(
                    id = %record.id,
                    title = %record.title,
                    keyword,
                    "dropped by keyword pre-filter"
                );
                false
            }
            None => true,
        })
        .collect();

    debug!(before, after = records.len(), "keyword pre-filter applied");

    DeduplicatedCorpus {
        records,
        duplicates_dropped: corpus.duplicates_dropped,
    }
}

fn blacklisted_keyword(title: &str, description: &str) -> Option<&'static str> {
    let haystack = format!("{title} {description}").to_lowercase();

    // 単語キーワードは境界一致で照合する。部分文字列一致だと
    // "greatest" が "test" に引っかかる。
    BLACKLIST_KEYWORDS
        .iter()
        .find(|keyword| {
            if keyword.chars().any(|c| !c.is_alphanumeric()) {
                haystack.contains(*keyword)
            } else {
                haystack
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|word| word == **keyword)
            }
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::fetch::CandidateRecord;

    fn corpus(entries: &[(&str, &str, &str)]) -> DeduplicatedCorpus {
        DeduplicatedCorpus {
            records: entries
                .iter()
                .map(|(id, title, description)| CandidateRecord {
                    id: (*id).to_string(),
                    title: (*title).to_string(),
                    url: format!("https://vimeo.com/{id}"),
                    description: (*description).to_string(),
                    duration_secs: 5400,
                    created_at: None,
                    views: 0,
                    uploader: None,
                    uploader_url: None,
                })
                .collect(),
            duplicates_dropped: 0,
        }
    }

    #[test]
    fn drops_titles_with_blacklisted_keywords() {
        let filtered = apply(corpus(&[
            ("1", "Casablanca", "1942 drama"),
            ("2", "Casablanca Official Trailer", "coming soon"),
            ("3", "Nosferatu", "silent classic"),
        ]));

        let ids: Vec<&str> = filtered.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn drops_on_description_match_case_insensitively() {
        let filtered = apply(corpus(&[(
            "1",
            "Old Cinema Hour",
            "A SUPERCUT of golden age moments",
        )]));

        assert!(filtered.records.is_empty());
    }

    #[test]
    fn keeps_clean_records_untouched() {
        let filtered = apply(corpus(&[("1", "The General", "Buster Keaton feature")]));

        assert_eq!(filtered.records.len(), 1);
        assert_eq!(filtered.records[0].title, "The General");
    }

    #[test]
    fn word_keywords_match_on_boundaries_only() {
        // "greatest" は "test" に一致しない
        let filtered = apply(corpus(&[
            ("1", "The Greatest Show on Earth", "1952 circus drama"),
            ("2", "Camera test footage", "lens test"),
        ]));

        let ids: Vec<&str> = filtered.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn phrase_keywords_match_as_substrings() {
        let filtered = apply(corpus(&[(
            "1",
            "Metropolis: Behind the Scenes",
            "restoration featurette",
        )]));

        assert!(filtered.records.is_empty());
    }
}
