use anyhow::Context;
use tracing::{error, info, warn};

use post_labeler::{app::ComponentRegistry, config::Config};

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
                    .map(String::as_str)
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

    // Tracing initialization is handled by Telemetry::new()
    let config = Config::from_env().context("failed to load configuration")?;
    let registry = ComponentRegistry::build(config).context("failed to build component registry")?;

    info!(
        input = %registry.config().input_path().display(),
        output = %registry.config().output_path().display(),
        checkpoint = %registry.config().checkpoint_path().display(),
        batch_size = registry.config().batch_size().get(),
        otel_enabled = registry.config().otel_exporter_endpoint().is_some(),
        "starting labeling job"
    );

    let result = registry.run().await;
    match &result {
        Ok(summary) => {
            let output = summary
                .output_path
                .as_deref()
                .unwrap_or(registry.config().output_path());
            info!(
                run_id = %summary.run_id,
                output = %output.display(),
                rows_labeled = summary.rows_labeled,
                rows_unlabeled = summary.rows_unlabeled,
                "output saved"
            );
        }
        Err(err) => {
            error!(error = %format!("{err:#}"), "labeling job failed");
        }
    }

    // 終了前に未送信のスパンを送り出す
    if let Err(err) = registry.telemetry().shutdown() {
        warn!(error = %format!("{err:#}"), "failed to flush traces");
    }

    result.map(|_| ())
}
