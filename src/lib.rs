pub mod types;
pub mod error;
pub mod config;
pub mod structure;
pub mod populate;
pub mod store;
pub mod claim;
pub mod advance;
pub mod validate;
pub mod tournament;
pub mod sim;

pub use advance::{AdvancementEngine, AdvancementResult};
pub use claim::MatchClaimGuard;
pub use config::EngineConfig;
pub use error::{BracketError, BracketResult};
pub use populate::{populate, PairingPolicy};
pub use store::{BracketStore, MemoryStore};
pub use structure::{plan, Topology};
pub use tournament::TournamentDesk;
pub use validate::validate_structure;

use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

// ── Logging ────────────────────────────────────────────────────────────

/// Installs the global fmt subscriber. `RUST_LOG` wins over `config.log_filter`.
/// With a log directory configured, output goes to a daily rolling file and the
/// returned guard must be kept alive until shutdown.
pub fn init_tracing(config: &EngineConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(dir) = config.log_dir.as_deref() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .ok();
        return None;
    };

    fs::create_dir_all(dir).ok();
    let file_appender = tracing_appender::rolling::daily(dir, "trivia-bracket.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init()
        .ok();
    Some(guard)
}
