/// 正規識別子の導出ユーティリティ。
///
/// 同じ動画がどの検索クエリから発見されても同一の識別子になるよう、
/// ソースURLのみから決定的に導出します。
use reqwest::Url;
use xxhash_rust::xxh3::xxh3_64;

/// ソースURLから正規識別子を導出する。
///
/// vimeo.com の動画リンクは数値IDをそのまま使用し、それ以外は
/// 正規化したURLのXXH3-64ハッシュを使用します。末尾スラッシュや
/// クエリパラメータの差異は識別子に影響しません。
#[must_use]
pub(crate) fn canonical_video_id(source_url: &str) -> String {
    let raw = source_url.trim();

    if let Ok(parsed) = Url::parse(raw) {
        if let Some(id) = vimeo_numeric_id(&parsed) {
            return format!("vimeo:{id}");
        }
        return hashed_id(&normalize_url(&parsed));
    }

    hashed_id(raw)
}

/// vimeo.comの動画リンクから数値IDを抽出する。
fn vimeo_numeric_id(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    if host != "vimeo.com" && !host.ends_with(".vimeo.com") {
        return None;
    }

    // パス中の最後の数値セグメントが動画ID（/channels/.../12345 形式に対応）
    url.path_segments()?
        .filter(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .next_back()
        .map(ToString::to_string)
}

/// URLを識別子導出用に正規化する。
///
/// スキームとホストは小文字化済み（Urlパーサの保証）、クエリと
/// フラグメントを落とし、末尾スラッシュを除去します。
fn normalize_url(url: &Url) -> String {
    let path = url.path().trim_end_matches('/');
    match url.port() {
        Some(port) => format!("{}://{}:{port}{path}", url.scheme(), url.host_str().unwrap_or("")),
        None => format!("{}://{}{path}", url.scheme(), url.host_str().unwrap_or("")),
    }
}

fn hashed_id(input: &str) -> String {
    format!("x64:{:016x}", xxh3_64(input.as_bytes()))
}
