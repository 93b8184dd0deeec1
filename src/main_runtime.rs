use botfleet::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Console plus optional daily-rolling file logging for the long-running
/// `run` command. `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},botfleet=debug", config.level))
    });

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so writability is checked first.
    let file_layer = config.dir.as_ref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir.display(),
                e
            );
            return None;
        }
        let test_path = log_dir.join(".botfleet_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "botfleet.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Flushes on drop; must live as long as the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir.display(),
                    e
                );
                None
            }
        }
    });

    let (json_layer, console_layer) = if config.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_target(true)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    let file_logging_enabled = file_layer.is_some();
    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(json_layer)
        .with(file_layer)
        .init();

    if let (true, Some(dir)) = (file_logging_enabled, config.dir.as_ref()) {
        eprintln!("Logging to: {}/botfleet.log", dir.display());
    }
}

/// Warnings only, for one-shot commands
pub fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
