// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hdds-trace - Analyse RTPS discovery and conversations in a decoded capture.
//!
//! Usage:
//!   tshark -r capture.pcapng -V -Y rtps > capture.txt
//!   hdds-trace --file capture.txt
//!   hdds-trace --file capture.txt --domain 0 --show-conversations
//!   hdds-trace --file capture.txt --show-conversation-frames <writer>,<reader>

use clap::Parser;
use hdds_trace::{read_frames, report, Analysis, ReportConfig};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "hdds-trace")]
#[command(about = "Analyse RTPS discovery and writer/reader conversations in a tshark -V dump")]
#[command(version)]
struct Args {
    /// Decoded capture (output of `tshark -V`)
    #[arg(short, long)]
    file: PathBuf,

    /// Only report this DDS domain
    #[arg(short, long)]
    domain: Option<u16>,

    /// List participant GUIDs
    #[arg(long)]
    show_participants: bool,

    /// List every known endpoint
    #[arg(long)]
    show_endpoints: bool,

    /// List writer/reader conversations
    #[arg(long)]
    show_conversations: bool,

    /// List reliable endpoints without any conversation
    #[arg(long)]
    show_undiscovered: bool,

    /// List the discovery time of every conversation
    #[arg(long)]
    show_discovery_times: bool,

    /// Dump one conversation frame by frame ("<writer guid>,<reader guid>")
    #[arg(long, value_name = "WRITER,READER")]
    show_conversation_frames: Vec<String>,

    /// Print statistics as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup logging
    let filter = args.log_level.parse().unwrap_or(tracing::Level::WARN);
    tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    info!("HDDS Trace v{}", env!("CARGO_PKG_VERSION"));
    info!("Using file: {}", args.file.display());

    let raw = read_frames(&args.file)?;
    let analysis = Analysis::from_raw(&raw);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());

    if args.json {
        let stats = analysis.stats(args.domain);
        serde_json::to_writer_pretty(&mut out, &stats)?;
        writeln!(out)?;
    } else {
        let mut config = ReportConfig::new()
            .domain(args.domain)
            .show_participants(args.show_participants)
            .show_endpoints(args.show_endpoints)
            .show_conversations(args.show_conversations)
            .show_undiscovered(args.show_undiscovered)
            .show_discovery_times(args.show_discovery_times);
        for key in args.show_conversation_frames {
            config = config.conversation_frames(key);
        }
        report::write_report(&mut out, &analysis, &raw, &config)?;
    }

    out.flush()?;
    Ok(())
}
