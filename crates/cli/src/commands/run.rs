use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use blueprint_engine::{BlueprintEngine, EscalationScheduler, LogNotifier, StaticRecordData};
use blueprint_storage::InMemoryStorage;
use serde::Deserialize;
use serde_json::Value;

use crate::config::read_engine_config;
use crate::{read_json, report_error, OutputFormat};

/// One entry of the `--records` file.
#[derive(Debug, Deserialize)]
struct TrackedRecord {
    blueprint_id: i64,
    record_id: i64,
    #[serde(default = "empty_object")]
    data: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

pub(crate) fn cmd_run(
    files: &[PathBuf],
    records: Option<&Path>,
    config: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) {
    let blueprints: Vec<(PathBuf, Value)> = files
        .iter()
        .map(|f| (f.clone(), read_json(f, output, quiet)))
        .collect();
    let tracked: Vec<TrackedRecord> = match records {
        Some(path) => match serde_json::from_value(read_json(path, output, quiet)) {
            Ok(r) => r,
            Err(e) => {
                report_error(
                    &format!("invalid records file '{}': {}", path.display(), e),
                    output,
                    quiet,
                );
                process::exit(1);
            }
        },
        None => Vec::new(),
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("failed to create tokio runtime: {}", e), output, quiet);
            process::exit(1);
        }
    };
    if let Err(e) = rt.block_on(host(blueprints, tracked, config, output, quiet)) {
        report_error(&e, output, quiet);
        process::exit(1);
    }
}

async fn host(
    blueprints: Vec<(PathBuf, Value)>,
    tracked: Vec<TrackedRecord>,
    config: Option<&Path>,
    output: OutputFormat,
    quiet: bool,
) -> Result<(), String> {
    let config = read_engine_config(config)?;
    let interval = config.tick_interval().map_err(|e| e.to_string())?;

    let storage = Arc::new(InMemoryStorage::new());
    let engine = Arc::new(
        BlueprintEngine::builder(storage)
            .config(&config)
            .map_err(|e| e.to_string())?
            .notifier(Arc::new(LogNotifier))
            .build(),
    );

    for (path, blueprint) in &blueprints {
        let id = engine
            .register_blueprint_config(blueprint)
            .await
            .map_err(|e| format!("invalid blueprint '{}': {}", path.display(), e))?;
        tracing::info!(blueprint_id = id, path = %path.display(), "blueprint registered");
    }

    let record_data = Arc::new(StaticRecordData::new());
    for record in &tracked {
        record_data.set(record.record_id, record.data.clone()).await;
        // First contact initializes the record state at the current time.
        let available = engine
            .list_available_transitions(record.blueprint_id, record.record_id, &record.data)
            .await
            .map_err(|e| format!("record {}: {}", record.record_id, e))?;
        tracing::info!(
            blueprint_id = record.blueprint_id,
            record_id = record.record_id,
            available = available.len(),
            "record tracked"
        );
    }

    if !quiet {
        match output {
            OutputFormat::Json => println!(
                "{}",
                serde_json::json!({
                    "blueprints": blueprints.len(),
                    "records": tracked.len(),
                    "tick_interval_secs": interval.as_secs(),
                })
            ),
            OutputFormat::Text => println!(
                "Hosting {} blueprint(s), {} record(s); escalation sweep every {}s. Press Ctrl-C to stop.",
                blueprints.len(),
                tracked.len(),
                interval.as_secs()
            ),
        }
    }

    let scheduler = EscalationScheduler::new(engine).with_record_data(record_data);
    scheduler.run(interval, shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl-C, shutting down"),
        _ = terminate => tracing::info!("received terminate signal, shutting down"),
    }
}
