//! config command - Store the host and key pair
//!
//! `osscmd config --id=<id> --key=<secret> [--host=<host>]` writes the
//! config file; `--show` prints what is stored, without the secret.

use clap::Args;
use oc_core::{Config, ConfigManager, Credentials, Error, DEFAULT_HOST};
use serde::Serialize;

use super::ConnectionArgs;
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print the stored configuration instead of writing it
    #[arg(long)]
    pub show: bool,
}

#[derive(Debug, Serialize)]
struct ConfigOutput {
    path: String,
    host: String,
    access_id: Option<String>,
    part_size_min: u64,
    part_size_max: u64,
    thread_min: usize,
    thread_max: usize,
    max_retry_num: u32,
}

impl ConfigOutput {
    fn new(manager: &ConfigManager, config: &Config) -> Self {
        let credentials = config.credentials.as_ref();
        Self {
            path: manager.config_path().display().to_string(),
            host: credentials
                .map(|c| c.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            access_id: credentials.map(|c| c.access_id.clone()),
            part_size_min: config.tunables.part_size_min,
            part_size_max: config.tunables.part_size_max,
            thread_min: config.tunables.thread_min,
            thread_max: config.tunables.thread_max,
            max_retry_num: config.tunables.max_retry_num,
        }
    }
}

/// Execute the config command
pub fn execute(args: &ConfigArgs, connection: &ConnectionArgs, output: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output);
    let manager = match ConfigManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            formatter.error(&format!("Failed to locate config: {e}"));
            return ExitCode::from(&e);
        }
    };

    let result = if args.show {
        show(&manager, &formatter)
    } else {
        store(&manager, connection, &formatter)
    };

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::from(&e)
        }
    }
}

fn show(manager: &ConfigManager, formatter: &Formatter) -> oc_core::Result<()> {
    let config = manager.load()?;
    let output = ConfigOutput::new(manager, &config);
    if formatter.is_json() {
        formatter.json(&output);
        return Ok(());
    }

    formatter.println(&format!("config file: {}", output.path));
    formatter.println(&format!("host:        {}", output.host));
    formatter.println(&format!(
        "access id:   {}",
        output.access_id.as_deref().unwrap_or("(not set)")
    ));
    formatter.println(&format!(
        "part size:   {} .. {}",
        oc_core::format_size(output.part_size_min),
        oc_core::format_size(output.part_size_max)
    ));
    formatter.println(&format!(
        "threads:     {} .. {}",
        output.thread_min, output.thread_max
    ));
    formatter.println(&format!("retries:     {}", output.max_retry_num));
    Ok(())
}

fn store(
    manager: &ConfigManager,
    connection: &ConnectionArgs,
    formatter: &Formatter,
) -> oc_core::Result<()> {
    let credentials = new_credentials(manager.load()?.credentials, connection)?;
    manager.store_credentials(credentials)?;

    if formatter.is_json() {
        let config = manager.load()?;
        formatter.json(&ConfigOutput::new(manager, &config));
    } else {
        formatter.success(&format!(
            "Your configuration is saved into {}",
            manager.config_path().display()
        ));
    }
    Ok(())
}

/// Merge the flags over what is stored; id and key must end up present
fn new_credentials(
    stored: Option<Credentials>,
    connection: &ConnectionArgs,
) -> oc_core::Result<Credentials> {
    let given = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let host = given(&connection.host)
        .or_else(|| stored.as_ref().map(|c| c.host.clone()))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let access_id =
        given(&connection.id).or_else(|| stored.as_ref().map(|c| c.access_id.clone()));
    let access_secret =
        given(&connection.key).or_else(|| stored.as_ref().map(|c| c.access_secret.clone()));

    match (access_id, access_secret) {
        (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
            Ok(Credentials::new(host, id, secret))
        }
        _ => Err(Error::InvalidArgument(
            "config needs --id=<accessid> and --key=<accesskey>".into(),
        )),
    }
}
