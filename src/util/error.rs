/// エラー分類とリトライ判定ユーティリティ。
use anyhow::Error;
use reqwest::StatusCode;

use crate::clients::vimeo::SearchError;

/// エラーの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ErrorKind {
    /// リトライ可能なエラー（一時的なネットワークエラー、タイムアウトなど）
    Retryable,
    /// リトライ不可能なエラー（バリデーションエラー、不正なレスポンスなど）
    NonRetryable,
    /// 致命的なエラー（認証エラー、設定エラーなど）
    Fatal,
}

/// エラーを分類する。
#[must_use]
pub(crate) fn classify_error(error: &Error) -> ErrorKind {
    // 検索クライアントの型付きエラーを優先して判定
    if let Some(search_err) = error.downcast_ref::<SearchError>() {
        return match search_err {
            SearchError::Auth { .. } => ErrorKind::Fatal,
            SearchError::Transient(_) => ErrorKind::Retryable,
            SearchError::Malformed(_) => ErrorKind::NonRetryable,
        };
    }

    // HTTPエラーの判定
    if let Some(reqwest_err) = error.downcast_ref::<reqwest::Error>() {
        if reqwest_err.is_timeout() || reqwest_err.is_connect() {
            return ErrorKind::Retryable;
        }

        if let Some(status) = reqwest_err.status() {
            match status {
                // 5xxエラーまたは429はリトライ可能
                StatusCode::INTERNAL_SERVER_ERROR
                | StatusCode::BAD_GATEWAY
                | StatusCode::SERVICE_UNAVAILABLE
                | StatusCode::GATEWAY_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS => return ErrorKind::Retryable,
                // 4xxエラー（認証・認可以外）はリトライ不可能
                StatusCode::BAD_REQUEST
                | StatusCode::NOT_FOUND
                | StatusCode::UNPROCESSABLE_ENTITY => return ErrorKind::NonRetryable,
                // 認証・認可エラーは致命的
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return ErrorKind::Fatal,
                _ => {}
            }
        }
    }

    // デフォルトはリトライ不可能
    ErrorKind::NonRetryable
}

/// エラーが致命的かどうかを判定する。
#[must_use]
pub(crate) fn is_fatal(error: &Error) -> bool {
    matches!(classify_error(error), ErrorKind::Fatal)
}
