mod cli;
mod commands;
mod config;

use std::process::ExitCode;

use clap::Parser;
use optrack_core::DomainError;
use optrack_ingest::IngestError;
use optrack_storage::StoreError;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match commands::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 bad input, 3 missing record, 4 lock contention, 5 corrupt store, 1 anything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(store) = cause.downcast_ref::<StoreError>() {
            return match store {
                StoreError::Domain(_) => 2,
                StoreError::NotFound { .. } => 3,
                StoreError::Busy { .. } => 4,
                StoreError::Corrupt { .. } => 5,
                StoreError::Io { .. } => 1,
            };
        }
        if cause.downcast_ref::<DomainError>().is_some() {
            return 2;
        }
        if let Some(IngestError::Malformed(_)) = cause.downcast_ref::<IngestError>() {
            return 2;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use optrack_core::RecordKind;
    use std::path::PathBuf;

    #[test]
    fn error_kinds_map_to_distinct_exit_codes() {
        let busy = anyhow::Error::from(StoreError::Busy {
            path: PathBuf::from("tasks.json.lock"),
            waited_ms: 2_000,
        });
        assert_eq!(exit_code(&busy), 4);

        let missing = anyhow::Error::from(StoreError::NotFound {
            kind: RecordKind::Task,
            id: 7,
        })
        .context("showing task");
        assert_eq!(exit_code(&missing), 3);

        let corrupt = anyhow::Error::from(StoreError::Corrupt {
            path: PathBuf::from("tasks.json"),
            reason: "expected value".into(),
        });
        assert_eq!(exit_code(&corrupt), 5);

        let invalid = anyhow::Error::from(DomainError::validation("name is required"));
        assert_eq!(exit_code(&invalid), 2);

        assert_eq!(exit_code(&anyhow::anyhow!("disk on fire")), 1);
    }
}
