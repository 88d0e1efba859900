//! Runs one engine command against the configured service

use std::sync::Arc;

use oc_core::{ConfigManager, ListEntry};
use oc_oss::{Command, Invocation, OssClient, Streams};
use tokio::io::AsyncWriteExt;

use super::{render, ConnectionArgs};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, ProgressBar};

/// Commands that drive the worker pool and get a progress bar
fn progress_label(command: Command) -> Option<&'static str> {
    match command {
        Command::UploadLargeFile => Some("Uploading parts"),
        Command::CopyLargeFile => Some("Copying parts"),
        Command::CopyBucket => Some("Copying objects"),
        Command::UploadFromDir => Some("Uploading files"),
        Command::Get => Some("Downloading ranges"),
        Command::DeleteAll => Some("Deleting batches"),
        _ => None,
    }
}

/// Execute an engine command
pub async fn execute(
    invocation: Invocation,
    connection: &ConnectionArgs,
    output: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output);

    let config = ConfigManager::new().and_then(|manager| manager.load()).and_then(|config| {
        config.resolve(
            connection.host.as_deref(),
            connection.id.as_deref(),
            connection.key.as_deref(),
        )
    });
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            formatter.error(&e.to_string());
            return ExitCode::from(&e);
        }
    };

    let mut client = match OssClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            formatter.error(&format!("Failed to create client: {e}"));
            return ExitCode::from(&e);
        }
    };

    let progress = progress_label(invocation.command).map(|label| ProgressBar::new(output, label));
    if let Some(bar) = &progress {
        client = client.with_progress(Arc::new(bar.clone()));
    }

    let mut stdout = tokio::io::stdout();
    let mut collected: Vec<ListEntry> = Vec::new();
    let mut on_entry = |entry: &ListEntry| {
        if formatter.is_json() {
            collected.push(entry.clone());
        } else {
            render::entry_line(&formatter, entry);
        }
    };

    let result = oc_oss::run(
        &client,
        &invocation,
        Streams {
            stdout: &mut stdout,
            on_entry: &mut on_entry,
        },
    )
    .await;

    if let Some(bar) = &progress {
        bar.clear();
    }
    if let Err(e) = stdout.flush().await {
        tracing::debug!(error = %e, "flushing stdout failed");
    }

    match result {
        Ok(outcome) => render::outcome(&formatter, &invocation, outcome, collected),
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from(&e)
        }
    }
}
