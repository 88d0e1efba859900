//! Human-readable and JSON rendering of engine outcomes

use jiff::Timestamp;
use oc_core::{format_size, Aggregate, ListEntry, ListPage, ListSummary};
use oc_oss::{Invocation, Outcome};
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::Formatter;

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Serialize)]
struct ListAllOutput {
    entries: Vec<ListEntry>,
    #[serde(flatten)]
    summary: ListSummary,
}

#[derive(Debug, Serialize)]
struct AggregateOutput {
    command: String,
    #[serde(flatten)]
    aggregate: Aggregate,
    fail: u64,
}

fn date(ts: Option<Timestamp>) -> String {
    ts.map(|ts| ts.strftime(DATE_FORMAT).to_string())
        .unwrap_or_else(|| "-".repeat(19))
}

/// One listing line: date, size, path
pub fn entry_line(formatter: &Formatter, entry: &ListEntry) {
    formatter.println(&format_entry(formatter, entry));
}

fn format_entry(formatter: &Formatter, entry: &ListEntry) -> String {
    format!(
        "{} {:>10}  {}",
        formatter.dim(&date(entry.last_modified)),
        entry.size_human(),
        entry.key
    )
}

fn list_page(formatter: &Formatter, page: &ListPage) {
    for prefix in &page.common_prefixes {
        formatter.println(&format!(
            "{:>19} {:>10}  oss://{}/{}",
            "",
            "DIR",
            page.bucket,
            prefix
        ));
    }
    for entry in &page.entries {
        formatter.println(&format!(
            "{} {:>10}  oss://{}/{}",
            formatter.dim(&date(entry.last_modified)),
            entry.size_human(),
            page.bucket,
            entry.key
        ));
    }

    formatter.println(&format!(
        "\nObject Number is: {}",
        page.entries.len() + page.common_prefixes.len()
    ));
    if let Some(marker) = page.next_marker() {
        formatter.println(&format!("Next marker: {marker}"));
    }
}

/// Print `outcome`; a bulk run with failures turns into a general error
pub fn outcome(
    formatter: &Formatter,
    invocation: &Invocation,
    outcome: Outcome,
    collected: Vec<ListEntry>,
) -> ExitCode {
    if formatter.is_json() {
        return json(formatter, invocation, outcome, collected);
    }

    match outcome {
        Outcome::List(page) => list_page(formatter, &page),
        Outcome::ListAll(summary) => formatter.println(&format!(
            "\nObject Number is: {}, total size: {} ({} list requests)",
            summary.count,
            summary.total_size_human(),
            summary.pages
        )),
        Outcome::Put(put) => {
            formatter.success(&format!("Uploaded {}", put.location));
            if let Some(etag) = &put.etag {
                formatter.println(&format!("ETag: {etag}"));
            }
        }
        Outcome::Complete(done) => {
            formatter.success(&format!(
                "Completed {} ({} parts)",
                done.location, done.parts
            ));
            formatter.println(&format!("ETag: {}", done.etag));
        }
        Outcome::Copy(copy) => {
            formatter.success(&format!("Copied to oss://{}/{}", copy.bucket, copy.key));
            if let Some(etag) = &copy.etag {
                formatter.println(&format!("ETag: {etag}"));
            }
        }
        Outcome::Aggregate(aggregate) => return aggregate_lines(formatter, invocation, aggregate),
        Outcome::Download(download) => formatter.success(&format!(
            "Downloaded oss://{}/{} to {} ({})",
            download.bucket,
            download.key,
            download.local_file.display(),
            format_size(download.size)
        )),
        Outcome::Cat { .. } => {}
        Outcome::Meta(meta) => {
            for (name, value) in &meta.headers {
                formatter.println(&format!("{name}: {value}"));
            }
        }
        Outcome::Delete(delete) => {
            formatter.success(&format!("Deleted oss://{}/{}", delete.bucket, delete.key))
        }
    }
    ExitCode::Success
}

fn aggregate_lines(formatter: &Formatter, invocation: &Invocation, aggregate: Aggregate) -> ExitCode {
    let mut line = format!(
        "{}: total {}, finish {}",
        invocation.command, aggregate.total, aggregate.finish
    );
    if let Some(skip) = aggregate.skip {
        line.push_str(&format!(", skip {skip}"));
    }
    line.push_str(&format!(", fail {}", aggregate.fail()));
    formatter.println(&line);
    exit_for(formatter, aggregate)
}

fn exit_for(formatter: &Formatter, aggregate: Aggregate) -> ExitCode {
    if aggregate.fail() == 0 {
        return ExitCode::Success;
    }
    formatter.warning(&format!("{} items failed", aggregate.fail()));
    ExitCode::GeneralError
}

fn json(
    formatter: &Formatter,
    invocation: &Invocation,
    outcome: Outcome,
    collected: Vec<ListEntry>,
) -> ExitCode {
    match outcome {
        Outcome::List(page) => formatter.json(&page),
        Outcome::ListAll(summary) => formatter.json(&ListAllOutput {
            entries: collected,
            summary,
        }),
        Outcome::Put(put) => formatter.json(&put),
        Outcome::Complete(done) => formatter.json(&done),
        Outcome::Copy(copy) => formatter.json(&copy),
        Outcome::Aggregate(aggregate) => {
            formatter.json(&AggregateOutput {
                command: invocation.command.to_string(),
                aggregate,
                fail: aggregate.fail(),
            });
            return exit_for(formatter, aggregate);
        }
        Outcome::Download(download) => formatter.json(&download),
        // stdout already carries the object bytes
        Outcome::Cat { .. } => {}
        Outcome::Meta(meta) => formatter.json(&meta),
        Outcome::Delete(delete) => formatter.json(&delete),
    }
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputConfig;
    use oc_oss::Command;

    fn plain() -> Formatter {
        Formatter::new(OutputConfig {
            no_color: true,
            quiet: true,
            ..Default::default()
        })
    }

    fn invocation(command: Command) -> Invocation {
        Invocation::new(command, vec!["oss://b/".into()], Default::default())
    }

    #[test]
    fn test_entry_line_format() {
        let entry = ListEntry {
            key: "dir/a.txt".into(),
            last_modified: Some("2024-03-01T08:30:00Z".parse().unwrap()),
            etag: None,
            size: 2048,
            storage_class: None,
        };
        let line = format_entry(&plain(), &entry);
        assert!(line.starts_with("2024-03-01 08:30:00 "));
        assert!(line.contains("2 KiB"));
        assert!(line.ends_with("dir/a.txt"));
    }

    #[test]
    fn test_missing_date_is_placeholder() {
        assert_eq!(date(None).len(), 19);
    }

    #[test]
    fn test_aggregate_failures_exit_nonzero() {
        let ok = Aggregate {
            total: 3,
            finish: 2,
            skip: Some(1),
        };
        assert_eq!(
            outcome(&plain(), &invocation(Command::UploadFromDir), Outcome::Aggregate(ok), vec![]),
            ExitCode::Success
        );

        let failed = Aggregate {
            total: 3,
            finish: 1,
            skip: Some(1),
        };
        assert_eq!(
            outcome(
                &plain(),
                &invocation(Command::CopyBucket),
                Outcome::Aggregate(failed),
                vec![]
            ),
            ExitCode::GeneralError
        );
    }

    #[test]
    fn test_aggregate_json_carries_fail() {
        let aggregate = Aggregate {
            total: 5,
            finish: 3,
            skip: None,
        };
        let value = serde_json::to_value(AggregateOutput {
            command: Command::DeleteAll.to_string(),
            aggregate,
            fail: aggregate.fail(),
        })
        .unwrap();
        assert_eq!(value["command"], "deleteallobject");
        assert_eq!(value["total"], 5);
        assert_eq!(value["fail"], 2);
        assert!(value.get("skip").is_none());
    }
}
