// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Cat command - print messages in receive-time order.

use clap::Args;
use roboplay::io::{IteratorResult, MessageIteratorArgs};

use crate::common::{format_timestamp, open_inputs, parse_timestamp, payload_preview, topic_filter, Result};

/// Print messages from one or more recordings.
#[derive(Args, Clone, Debug)]
pub struct CatCmd {
    /// Input files or URLs; several are merged by receive time
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Comma-separated topics to print (all if omitted)
    #[arg(short, long)]
    topics: Option<String>,

    /// Regular expression selecting topics
    #[arg(long, conflicts_with = "topics")]
    regex: Option<String>,

    /// First receive time to print
    #[arg(long, value_parser = parse_timestamp)]
    start: Option<u64>,

    /// Last receive time to print
    #[arg(long, value_parser = parse_timestamp)]
    end: Option<u64>,

    /// Print from the end backwards
    #[arg(long)]
    reverse: bool,

    /// Stop after this many messages
    #[arg(short = 'n', long)]
    limit: Option<usize>,

    /// Print one JSON object per result
    #[arg(long)]
    json: bool,
}

impl CatCmd {
    pub fn run(self, no_worker: bool) -> Result<()> {
        let mut source = open_inputs(&self.inputs, no_worker)?;
        source.initialize()?;

        let mut args =
            MessageIteratorArgs::forward(topic_filter(self.topics.as_deref(), self.regex.as_deref())?);
        args.start = self.start;
        args.end = self.end;
        args.reverse = self.reverse;

        let limit = self.limit.unwrap_or(usize::MAX);
        let mut printed = 0;
        for result in source.message_iterator(args)? {
            if printed >= limit {
                break;
            }
            let result = result?;
            if self.json {
                println!("{}", serde_json::to_string(&result)?);
                printed += usize::from(result.as_message().is_some());
                continue;
            }
            match result {
                IteratorResult::MessageEvent(msg) => {
                    println!(
                        "{} {} [{}] {} bytes: {}",
                        format_timestamp(msg.receive_time),
                        msg.topic,
                        msg.schema_name,
                        msg.size_in_bytes,
                        payload_preview(&msg)
                    );
                    printed += 1;
                }
                IteratorResult::Alert { alert, .. } => {
                    eprintln!("[{:?}] {}", alert.severity, alert.message);
                }
                IteratorResult::Stamp(_) => {}
            }
        }

        source.terminate()?;
        Ok(())
    }
}
