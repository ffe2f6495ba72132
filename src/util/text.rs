/// テキスト処理ユーティリティ。
///
/// タイトル正規化、タイトル類似度、年ヒント抽出を提供します。
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// タイトルを比較用に正規化する。
///
/// NFKC正規化、小文字化、前後空白の除去、先頭冠詞の除去を行います。
#[must_use]
pub(crate) fn normalize_title(title: &str) -> String {
    let mut normalized: String = title.nfkc().collect::<String>().to_lowercase();
    normalized = normalized.trim().to_string();

    for article in ["the ", "a ", "an "] {
        if let Some(stripped) = normalized.strip_prefix(article) {
            normalized = stripped.trim_start().to_string();
            break;
        }
    }

    normalized
}

/// 2つのタイトルの類似度を計算する（0.0〜1.0）。
#[must_use]
pub(crate) fn title_similarity(left: &str, right: &str) -> f64 {
    let left = normalize_title(left);
    let right = normalize_title(right);

    if left.is_empty() || right.is_empty() {
        return 0.0;
    }

    strsim::normalized_levenshtein(&left, &right)
}

static YEAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19[0-6][0-9])\b").expect("year pattern is valid"));

/// テキストから制作年のヒントを抽出する。
///
/// 1900〜1969の4桁年のうち最初に現れるものを返します。
#[must_use]
pub(crate) fn extract_year_hint(text: &str) -> Option<i32> {
    YEAR_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
}

/// 文字数上限でテキストを切り詰める（文字境界を保証）。
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_title_strips_leading_article_and_case() {
        assert_eq!(normalize_title("The Maltese Falcon"), "maltese falcon");
        assert_eq!(normalize_title("  A Night at the Opera "), "night at the opera");
        assert_eq!(normalize_title("An American in Paris"), "american in paris");
    }

    #[test]
    fn normalize_title_applies_nfkc() {
        // 全角英数は半角に正規化される
        assert_eq!(normalize_title("Ｍｅｔｒｏｐｏｌｉｓ"), "metropolis");
    }

    #[test]
    fn identical_titles_have_full_similarity() {
        let similarity = title_similarity("Casablanca", "casablanca");
        assert!((similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn article_variants_have_full_similarity() {
        let similarity = title_similarity("The General", "General");
        assert!((similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unrelated_titles_have_low_similarity() {
        assert!(title_similarity("Nosferatu", "Singin' in the Rain") < 0.5);
    }

    #[test]
    fn year_hint_finds_first_classic_year() {
        assert_eq!(extract_year_hint("Metropolis (1927) restored"), Some(1927));
        assert_eq!(extract_year_hint("uploaded 2019, filmed 1948"), Some(1948));
    }

    #[test]
    fn year_hint_ignores_modern_years() {
        assert_eq!(extract_year_hint("uploaded in 2020"), None);
        assert_eq!(extract_year_hint("no year here"), None);
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("abcdef", 3), "abc");
        assert_eq!(truncate_chars("短い説明文です", 3), "短い説");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
