// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Play command - drive the player in real time and print what it emits.

use std::path::PathBuf;

use clap::Args;
use roboplay::player::{IterablePlayer, PlayerConfig, PlayerState, PlayerStateSnapshot};

use crate::common::{format_timestamp, open_inputs, parse_timestamp, payload_preview, ProgressBar, Result};

/// Play recordings through the player.
#[derive(Args, Clone, Debug)]
pub struct PlayCmd {
    /// Input files or URLs; several are combined into one
    #[arg(value_name = "FILE", required = true)]
    inputs: Vec<String>,

    /// Comma-separated topics to subscribe to (all if omitted)
    #[arg(short, long)]
    topics: Option<String>,

    /// Playback speed multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Seek here before playing
    #[arg(long, value_parser = parse_timestamp)]
    seek: Option<u64>,

    /// Play until this time and stop
    #[arg(long, value_parser = parse_timestamp)]
    until: Option<u64>,

    /// Player configuration file (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print each snapshot as JSON
    #[arg(long)]
    json: bool,
}

impl PlayCmd {
    pub fn run(self, no_worker: bool) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => PlayerConfig::load(path)?,
            None => PlayerConfig::default(),
        };
        if let Some(speed) = self.speed {
            config = config.with_speed(speed);
            config.validate()?;
        }

        let source = open_inputs(&self.inputs, no_worker)?;
        let mut player = IterablePlayer::new(source, config);
        if let Some(list) = &self.topics {
            player.set_subscriptions(list.split(',').map(str::trim).filter(|t| !t.is_empty()));
        }

        let json = self.json;
        let progress = ProgressBar::new(1000, "play");
        player.set_listener(move |snapshot| print_snapshot(snapshot, json, &progress));

        player.initialize()?;
        let (start, end) = player
            .initialization()
            .map(|init| (init.start, init.end))
            .unwrap_or_default();
        if self.topics.is_none() {
            let topics: Vec<String> = player
                .initialization()
                .map(|init| init.topics.iter().map(|t| t.name.clone()).collect())
                .unwrap_or_default();
            player.set_subscriptions(topics);
        }

        player.seek_playback(self.seek.unwrap_or(start))?;
        player.settle()?;

        match self.until {
            Some(until) => {
                player.play_until(until)?;
                player.settle()?;
            }
            None => {
                player.start_playback()?;
                while player.state() == PlayerState::Playing {
                    if let Some(wait) = player.next_wakeup() {
                        std::thread::sleep(wait);
                    }
                    player.tick();
                }
                if let Some(e) = player.error() {
                    return Err(e.clone().into());
                }
            }
        }

        tracing::debug!(
            context = "play",
            current = player.current_time(),
            end,
            "Playback finished"
        );
        player.close()?;
        Ok(())
    }
}

fn print_snapshot(snapshot: &PlayerStateSnapshot, json: bool, progress: &ProgressBar) {
    if json {
        match serde_json::to_string(snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => eprintln!("Failed to serialize snapshot: {e}"),
        }
        return;
    }

    if let Some(data) = &snapshot.active_data {
        let span = data.end_time.saturating_sub(data.start_time).max(1);
        let done = data.current_time.saturating_sub(data.start_time);
        progress.set_position((done as u128 * 1000 / span as u128) as u64);
        progress.set_message(format_timestamp(data.current_time));
    }
    for msg in snapshot.messages() {
        println!(
            "{} {} [{}]: {}",
            format_timestamp(msg.receive_time),
            msg.topic,
            msg.schema_name,
            payload_preview(msg)
        );
    }
    if snapshot.state.is_terminal() {
        progress.finish_with_message(format!("{}", snapshot.state));
    }
}
