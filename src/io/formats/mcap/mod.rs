// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP format implementation.
//!
//! The summary section is read with the `mcap` crate; chunks are located
//! from the chunk indexes and decompressed by this module so that message
//! payloads can be sliced from the mapped file without copying.

pub mod chunk;
pub mod constants;
pub mod source;

pub use source::{McapChannel, McapIterableSource};
