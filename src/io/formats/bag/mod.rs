// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! ROS1 bag format implementation.
//!
//! - Record parser over the mapped file, with a scan fallback for bags
//!   whose index section is missing
//! - Iterable source that decompresses chunks on demand

pub mod parser;
pub mod source;

pub use parser::{BagChunkInfo, BagConnection, BagHeader, BagIndex};
pub use source::BagIterableSource;
