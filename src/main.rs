use chargeback_lib::clients::ClientFactory;
use chargeback_lib::config::ReportConfig;
use chargeback_lib::logger::{init_logging, LogLevel};
use chargeback_lib::pipeline::ReportPipeline;
use std::process::ExitCode;
use tracing::{error, info};

const CONFIG_ENV: &str = "CHARGEBACK_CONFIG";
const TOKEN_ENV: &str = "CHARGEBACK_ACCESS_TOKEN";
const LOG_LEVEL_ENV: &str = "CHARGEBACK_LOG_LEVEL";

fn load_config() -> chargeback_lib::ReportResult<ReportConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());

    match path {
        Some(path) => ReportConfig::from_file(path),
        None => Ok(ReportConfig::default()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chargeback: {}", e);
            return ExitCode::from(2);
        }
    };

    let level = match std::env::var(LOG_LEVEL_ENV) {
        Ok(raw) => match LogLevel::parse(&raw) {
            Some(level) => level,
            None => {
                eprintln!("chargeback: invalid {} '{}'", LOG_LEVEL_ENV, raw);
                return ExitCode::from(2);
            }
        },
        Err(_) => config.log_level,
    };
    init_logging(level);

    let token = std::env::var(TOKEN_ENV).ok();
    let clients = match ClientFactory::create(&config, token.as_deref()) {
        Ok(clients) => clients,
        Err(e) => {
            error!(target: "chargeback", "Cannot create clients: {}", e);
            return ExitCode::from(2);
        }
    };

    let pipeline = ReportPipeline::new(config, clients);
    match pipeline.run_once().await {
        Ok(outcome) if outcome.is_success() => {
            info!(
                target: "chargeback",
                run_id = %outcome.run_id,
                rows = outcome.metadata.get("row_count").map(String::as_str).unwrap_or("0"),
                bytes = outcome.metadata.get("published_bytes").map(String::as_str).unwrap_or("0"),
                "Report published in {:.2}s",
                outcome.result.total_duration.as_secs_f64()
            );
            ExitCode::SUCCESS
        }
        Ok(outcome) => {
            error!(
                target: "chargeback",
                run_id = %outcome.run_id,
                "Run failed: {}",
                outcome.state.error().unwrap_or("unknown error")
            );
            ExitCode::from(1)
        }
        Err(e) => {
            error!(target: "chargeback", "Run failed: {}", e);
            ExitCode::from(1)
        }
    }
}
