// Copyright (C) 2024, the quack authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright notice,
//       this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above copyright
//       notice, this list of conditions and the following disclaimer in the
//       documentation and/or other materials provided with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS
// IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO,
// THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR
// PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR
// CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL,
// EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO,
// PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
// PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF
// LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING
// NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS
// SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! In-memory frame types exchanged with the embedding session.
//!
//! Frame parsing and serialisation happen outside this crate; these types
//! are the contract with the external codec. [`AckFrame`] is what the
//! session's parser produces for an incoming acknowledgement, and
//! [`StopWaitingFrame`] is what the handler asks the session to attach to
//! the next outbound packet.

use std::time::Duration;

/// A retransmittable payload descriptor.
///
/// Opaque to the handler: it is carried alongside each sent packet so that
/// the retransmitter can re-encode the payload under a fresh packet number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Padding bytes.
    Padding {
        /// Number of padding bytes.
        len: usize,
    },

    /// A liveness probe.
    Ping,

    /// Stream payload data.
    Stream {
        /// The stream identifier.
        stream_id: u64,

        /// Offset of the data within the stream.
        offset: u64,

        /// Whether the frame ends the stream.
        fin: bool,

        /// The payload bytes.
        data: Vec<u8>,
    },
}

/// An inclusive interval of acknowledged packet numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AckRange {
    /// The lowest packet number in the range.
    pub first: u64,

    /// The highest packet number in the range.
    pub last: u64,
}

/// A decoded acknowledgement frame.
///
/// `ack_ranges` is present only when the frame reports gaps; it is sorted
/// descending by packet number and the ranges are disjoint. Without ranges
/// the frame acknowledges the single contiguous interval
/// `[lowest_acked, largest_acked]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AckFrame {
    /// The highest packet number acknowledged by the frame.
    pub largest_acked: u64,

    /// The lowest packet number covered by any range.
    pub lowest_acked: u64,

    /// Acknowledged ranges, sorted descending, empty when contiguous.
    pub ack_ranges: Vec<AckRange>,

    /// The peer-reported delay between receiving the largest acked packet
    /// and sending the ack.
    pub delay_time: Duration,
}

impl AckFrame {
    /// Returns whether the frame reports gaps between acknowledged ranges.
    pub fn has_missing_ranges(&self) -> bool {
        !self.ack_ranges.is_empty()
    }

    /// Returns whether the frame acknowledges the given packet number.
    pub fn covers(&self, pkt_num: u64) -> bool {
        if pkt_num < self.lowest_acked || pkt_num > self.largest_acked {
            return false;
        }

        if self.has_missing_ranges() {
            return self
                .ack_ranges
                .iter()
                .any(|r| pkt_num >= r.first && pkt_num <= r.last);
        }

        true
    }
}

/// A stop-waiting frame.
///
/// Tells the peer the least packet number it still needs to track, so it can
/// prune its received-packet state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StopWaitingFrame {
    /// The lowest packet number the peer may still receive.
    pub least_unacked: u64,
}
