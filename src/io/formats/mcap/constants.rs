// SPDX-FileCopyrightText: 2026 ArcheBase
//
// SPDX-License-Identifier: MulanPSL-2.0

//! MCAP format constants.
//!
//! Opcodes and layout sizes as defined by the
//! [MCAP specification](https://mcap.dev/spec).

pub use crate::io::detection::MCAP_MAGIC;

/// Header record - must be first record after magic.
pub const OP_HEADER: u8 = 0x01;
/// Message record - contains message data.
pub const OP_MESSAGE: u8 = 0x05;
/// Chunk record - contains compressed messages.
pub const OP_CHUNK: u8 = 0x06;

/// Opcode (1) plus record length (8).
pub const RECORD_PREFIX_LEN: usize = 9;

/// Fixed part of a message record: channel id, sequence, log and publish time.
pub const MESSAGE_HEADER_LEN: usize = 2 + 4 + 8 + 8;

/// Offset of the uncompressed CRC inside a chunk record body.
pub const CHUNK_CRC_OFFSET: usize = 8 + 8 + 8;
