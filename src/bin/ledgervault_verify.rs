// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Offline verification of audit chains in a RocksDB custody store.
//!
//! Usage:
//!   ledgervault-verify <db-path> [stream] [--from N] [--to N] [--json] [--record]
//!
//! Without a stream every stream in the store is verified. `--record`
//! appends an `integrity_check` event with each result. Exits with 1 if
//! any chain is invalid and 2 on usage or storage errors.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use ledgervault::audit::{AuditConfig, AuditTrail, IntegrityReport};
use ledgervault::identity::CallerIdentity;
use ledgervault::storage::{AuditStore, RocksStore};
use tracing_subscriber::EnvFilter;

const USAGE: &str =
    "usage: ledgervault-verify <db-path> [stream] [--from N] [--to N] [--json] [--record]";

struct Args {
    db_path: PathBuf,
    stream: Option<String>,
    from: Option<u64>,
    to: Option<u64>,
    json: bool,
    record: bool,
}

fn parse_height(flag: &str, value: Option<String>) -> Result<u64, String> {
    let value = value.ok_or_else(|| format!("{} needs a value", flag))?;
    value
        .parse()
        .map_err(|_| format!("{} expects a height, got {:?}", flag, value))
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut db_path = None;
    let mut stream = None;
    let mut from = None;
    let mut to = None;
    let mut json = false;
    let mut record = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--from" => from = Some(parse_height("--from", args.next())?),
            "--to" => to = Some(parse_height("--to", args.next())?),
            "--json" => json = true,
            "--record" => record = true,
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown flag {}", flag)),
            _ if db_path.is_none() => db_path = Some(PathBuf::from(arg)),
            _ if stream.is_none() => stream = Some(arg),
            _ => return Err(format!("unexpected argument {:?}", arg)),
        }
    }

    Ok(Args {
        db_path: db_path.ok_or_else(|| USAGE.to_string())?,
        stream,
        from,
        to,
        json,
        record,
    })
}

fn print_human(report: &IntegrityReport) {
    let status = if report.valid { "OK" } else { "INVALID" };
    println!("stream {}: {}", report.stream_id, status);
    println!("  events checked: {}", report.events_checked);
    if let Some(anchor) = report.anchor_height {
        println!("  anchored at checkpoint height {}", anchor);
    }
    if let Some(height) = report.first_invalid_height {
        println!("  first invalid height: {}", height);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    // Opening creates missing databases; never verify an empty new one by mistake
    if !args.db_path.is_dir() {
        eprintln!("no database at {}", args.db_path.display());
        return ExitCode::from(2);
    }
    let store = match RocksStore::open(&args.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("failed to open {}: {}", args.db_path.display(), e);
            return ExitCode::from(2);
        }
    };

    let streams = match &args.stream {
        Some(stream) => vec![stream.clone()],
        None => match store.streams() {
            Ok(streams) => streams,
            Err(e) => {
                eprintln!("failed to list streams: {}", e);
                return ExitCode::from(2);
            }
        },
    };

    let trail = AuditTrail::new(Arc::clone(&store), AuditConfig::default());
    let verifier = CallerIdentity::system("ledgervault-verify");
    let mut reports = Vec::with_capacity(streams.len());
    for stream in &streams {
        let report = match trail.verify_integrity(stream, args.from, args.to) {
            Ok(report) => report,
            Err(e) => {
                eprintln!("failed to verify {}: {}", stream, e);
                return ExitCode::from(2);
            }
        };
        if args.record {
            if let Err(e) = trail.record_integrity_check(stream, &verifier, &report).await {
                eprintln!("failed to record check of {}: {}", stream, e);
                return ExitCode::from(2);
            }
        }
        reports.push(report);
    }

    if args.json {
        match serde_json::to_string_pretty(&reports) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("failed to encode report: {}", e);
                return ExitCode::from(2);
            }
        }
    } else if reports.is_empty() {
        println!("no audit streams found");
    } else {
        for report in &reports {
            print_human(report);
        }
    }

    if reports.iter().all(|r| r.valid) {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}
