// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! PX4 ULog format implementation.

pub mod parser;
pub mod source;

pub use source::{ULogIterableSource, LOG_TOPIC};
