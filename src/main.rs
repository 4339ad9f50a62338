use clap::Parser;
use sigil::cli::{self, output, Cli, Context, OutputMode};
use sigil::config::{AppConfig, LoggingConfig};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging);
    config.ensure_valid()?;

    if cli.command.needs_passphrase() {
        cli::ensure_passphrase(&mut config)?;
    }

    let ctx = Context::new(config, OutputMode::from_json_flag(cli.json))?;
    if let Err(e) = cli::run(cli.command, &ctx).await {
        error!("{:#}", e);
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sigil=debug", config.level)));

    // File logging only when SIGIL_LOG_DIR is set and writable.
    //
    // `tracing_appender::rolling::daily` panics if it cannot create the initial
    // file, so writability is checked first.
    let log_dir = std::env::var("SIGIL_LOG_DIR").ok();
    let file_layer = log_dir.as_deref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Could not create log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let probe = std::path::Path::new(dir).join(".sigil_write_test");
        if let Err(e) = std::fs::OpenOptions::new().create(true).append(true).open(&probe) {
            eprintln!("Warning: Could not write to log directory {} ({}), file logging disabled", dir, e);
            return None;
        }
        let _ = std::fs::remove_file(&probe);

        let (non_blocking, guard) =
            tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "sigil.log"));
        // The process is short-lived; keep the writer alive until exit.
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let (json_layer, text_layer) = if config.json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
}
