/*
 * PCAT Manager - Control Connection Buffers
 * Copyright (c) 2025 Dynamic Devices Ltd
 * All rights reserved.
 */

//! Per-connection byte buffers for the Unix control socket. Input is
//! framed by a single `0x00` byte; each complete object is parsed as JSON
//! and dispatched.

use std::collections::VecDeque;

/// Receive/send buffer cap before the overflow policy kicks in.
pub const BUF_CAP: usize = 2 * 1024 * 1024;
const INPUT_TRIM: usize = 1024 * 1024;

/// Opaque per-connection identity, assigned by the server on accept.
pub type ConnId = u64;

/// One accepted control-socket peer.
pub struct ClientConnection {
    pub id: ConnId,
    input: Vec<u8>,
    output: VecDeque<u8>,
    pub closed: bool,
}

impl ClientConnection {
    pub fn new(id: ConnId) -> Self {
        Self {
            id,
            input: Vec::new(),
            output: VecDeque::new(),
            closed: false,
        }
    }

    /// Append freshly-read bytes, applying the overflow policy: oversized
    /// input is trimmed by dropping the oldest 1 MiB.
    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);
        if self.input.len() > BUF_CAP {
            log::warn!("control connection {} input overflow; trimming oldest bytes", self.id);
            self.input.drain(..INPUT_TRIM);
        }
    }

    /// Pull out every complete NUL-delimited object currently buffered,
    /// leaving any trailing partial object in place.
    pub fn drain_complete_messages(&mut self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        while let Some(pos) = self.input.iter().position(|&b| b == 0) {
            let message: Vec<u8> = self.input.drain(..pos).collect();
            self.input.drain(..1); // drop the delimiter itself
            messages.push(message);
        }
        messages
    }

    /// Enqueue a reply object followed by its delimiter. Oversized output
    /// is reset to empty rather than trimmed.
    pub fn push_output(&mut self, bytes: &[u8]) {
        self.output.extend(bytes.iter().copied());
        self.output.push_back(0);
        if self.output.len() > BUF_CAP {
            log::warn!("control connection {} output overflow; resetting buffer", self.id);
            self.output.clear();
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.output.is_empty()
    }

    /// Copy up to `max` pending output bytes into a contiguous buffer
    /// without removing them (removal happens once the write succeeds).
    pub fn peek_output(&self, max: usize) -> Vec<u8> {
        self.output.iter().take(max).copied().collect()
    }

    pub fn consume_output(&mut self, n: usize) {
        self.output.drain(..n.min(self.output.len()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_exactly_one_nul_delimited_message() {
        let mut conn = ClientConnection::new(1);
        conn.push_input(b"{\"command\":\"pmu-status\"}\0partial");
        let messages = conn.drain_complete_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], b"{\"command\":\"pmu-status\"}");
        assert_eq!(conn.drain_complete_messages().len(), 0);
    }

    #[test]
    fn input_overflow_trims_oldest_megabyte() {
        let mut conn = ClientConnection::new(1);
        let chunk = vec![b'a'; BUF_CAP + 1024];
        conn.push_input(&chunk);
        assert!(conn.input.len() <= BUF_CAP);
    }

    #[test]
    fn output_overflow_resets_buffer() {
        let mut conn = ClientConnection::new(1);
        let chunk = vec![b'b'; BUF_CAP + 1];
        conn.push_output(&chunk);
        assert!(!conn.has_pending_output());
    }
}
