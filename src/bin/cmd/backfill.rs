// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Backfill command - latest message per topic at a time.

use clap::Args;
use roboplay::io::GetBackfillMessagesArgs;

use crate::common::{format_timestamp, open_inputs, parse_timestamp, payload_preview, Result};

/// Print, per topic, the latest message at or before a time.
#[derive(Args, Clone, Debug)]
pub struct BackfillCmd {
    /// Input files or URLs
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Time to backfill at
    #[arg(long, value_parser = parse_timestamp)]
    time: u64,

    /// Comma-separated topics (all topics if omitted)
    #[arg(short, long)]
    topics: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

impl BackfillCmd {
    pub fn run(self, no_worker: bool) -> Result<()> {
        let mut source = open_inputs(&self.inputs, no_worker)?;
        let init = source.initialize()?;

        let topics = match &self.topics {
            Some(list) => list
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect(),
            None => init.topics.iter().map(|t| t.name.clone()).collect(),
        };
        let messages = source.get_backfill_messages(GetBackfillMessagesArgs {
            topics,
            time: self.time,
        })?;
        source.terminate()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&messages)?);
            return Ok(());
        }
        for msg in &messages {
            println!(
                "{} {} [{}]: {}",
                format_timestamp(msg.receive_time),
                msg.topic,
                msg.schema_name,
                payload_preview(msg)
            );
        }
        Ok(())
    }
}
