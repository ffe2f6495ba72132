use std::sync::OnceLock;

use anyhow::{Error, Result};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use super::structured_log::StructuredLogLayer;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Tracing サブスクライバを一度だけ初期化する。
///
/// fmtレイヤー（JSON）とStructuredLogLayerを重ねる。フィルタは
/// `RUST_LOG` 環境変数に従い、未設定なら `info`。
///
/// # Errors
/// サブスクライバの初期化に失敗した場合はエラーを返す。
pub fn init() -> Result<()> {
    if TRACING_INIT.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).json();
    let structured_layer = StructuredLogLayer;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(structured_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| Error::msg(e.to_string()))?;

    let _ = TRACING_INIT.set(());

    Ok(())
}
