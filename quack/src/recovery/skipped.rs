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

use std::collections::VecDeque;

use crate::frame::AckFrame;

/// Maximum number of intentionally skipped packet numbers remembered for
/// ack validation. The oldest entry is evicted when the bound is hit.
pub const MAX_TRACKED_SKIPPED_PACKETS: usize = 10;

/// Packet numbers that were intentionally never transmitted.
///
/// The sender leaves gaps in the packet number sequence so the peer's ack
/// pattern is non-predictable; a peer acknowledging one of these numbers is
/// committing a protocol violation. Insertion order equals ascending packet
/// number.
#[derive(Default)]
pub struct SkippedPackets {
    pkt_nums: VecDeque<u64>,
}

impl SkippedPackets {
    pub fn insert(&mut self, pkt_num: u64) {
        self.pkt_nums.push_back(pkt_num);

        if self.pkt_nums.len() > MAX_TRACKED_SKIPPED_PACKETS {
            self.pkt_nums.pop_front();
        }
    }

    /// Returns the first tracked number the frame claims to acknowledge.
    pub fn covered_by(&self, frame: &AckFrame) -> Option<u64> {
        self.pkt_nums.iter().find(|&&p| frame.covers(p)).copied()
    }

    /// Drops every entry at or below `largest_in_order_acked`: the peer can
    /// no longer reference them in a way the handler needs to police.
    pub fn garbage_collect(&mut self, largest_in_order_acked: u64) {
        while let Some(&front) = self.pkt_nums.front() {
            if front > largest_in_order_acked {
                break;
            }

            self.pkt_nums.pop_front();
        }
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.pkt_nums.iter()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.pkt_nums.len()
    }
}
