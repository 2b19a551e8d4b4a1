// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Info command - initialize a recording and print its summary.

use clap::Args;

use crate::common::{format_duration, format_timestamp, open_inputs, Result};

/// Show the summary of one or more recordings.
#[derive(Args, Clone, Debug)]
pub struct InfoCmd {
    /// Input files or URLs; several are combined into one
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl InfoCmd {
    pub fn run(self, no_worker: bool) -> Result<()> {
        let mut source = open_inputs(&self.inputs, no_worker)?;
        let init = source.initialize()?;
        source.terminate()?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&init)?);
            return Ok(());
        }

        println!("=== {} ===", init.name);
        if let Some(profile) = &init.profile {
            println!("Profile: {profile}");
        }
        println!("Start: {}", format_timestamp(init.start));
        println!("End: {}", format_timestamp(init.end));
        println!("Duration: {}", format_duration(init.duration()));
        println!("Messages: {}", init.message_count());

        if !init.metadata.is_empty() {
            println!();
            println!("Metadata:");
            for (key, value) in &init.metadata {
                println!("  {key}: {value}");
            }
        }

        println!();
        println!("Topics:");
        for topic in &init.topics {
            let count = init
                .topic_stats
                .get(&topic.name)
                .map_or(0, |s| s.num_messages);
            println!("  {} | {} | {} messages", topic.name, topic.schema_name, count);
        }

        if !init.alerts.is_empty() {
            println!();
            println!("Alerts:");
            for alert in &init.alerts {
                println!("  [{:?}] {}", alert.severity, alert.message);
                if let Some(tip) = &alert.tip {
                    println!("    tip: {tip}");
                }
            }
        }

        Ok(())
    }
}
