// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! Format-specific source implementations.
//!
//! Each format provides an [`IterableSource`](crate::io::traits::IterableSource):
//! - [`mcap`] - MCAP with chunk indexes, or scanned when unindexed
//! - [`bag`] - ROS1 bag v2.0
//! - [`db3`] - rosbag2 SQLite storage
//! - [`ulog`] - PX4 ULog

pub mod bag;
pub mod db3;
pub mod mcap;
pub mod ulog;

pub use bag::BagIterableSource;
pub use db3::Db3IterableSource;
pub use mcap::McapIterableSource;
pub use ulog::ULogIterableSource;
