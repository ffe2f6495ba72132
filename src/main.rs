use anyhow::Context;
use tracing::{error, info};

use cinescout_worker::{app::ComponentRegistry, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    std::panic::set_hook(Box::new(|panic_info| {
        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        let message = panic_info
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| {
                panic_info
                    .payload()
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
            })
            .unwrap_or("unknown panic payload");

        if let Some(location) = panic_info.location() {
            error!(
                thread = thread_name,
                file = location.file(),
                line = location.line(),
                column = location.column(),
                message,
                "panic occurred"
            );
        } else {
            error!(
                thread = thread_name,
                message, "panic occurred without location information"
            );
        }
    }));

    let config = Config::from_env().context("failed to load configuration")?;
    let registry = ComponentRegistry::build(config).context("failed to build component registry")?;

    let report = registry.run_once().await.context("pipeline run failed")?;

    match &report.artifact_path {
        Some(path) => info!(
            records = report.records_emitted,
            path = %path.display(),
            "run complete"
        ),
        None => info!(records = 0, "run complete with no output"),
    }

    info!(
        metrics = %registry.telemetry().render_prometheus(),
        "final metrics"
    );

    Ok(())
}
