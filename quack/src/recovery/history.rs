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

use std::collections::BTreeMap;
use std::ops::Bound::Excluded;
use std::ops::Bound::Unbounded;

use super::Sent;

/// The ordered sequence of outstanding sent packets.
///
/// Records are keyed by packet number and only ever leave through the ack
/// path or the loss-declaration path.
#[derive(Default)]
pub struct PacketHistory {
    sent: BTreeMap<u64, Sent>,
}

impl PacketHistory {
    pub fn push_back(&mut self, pkt: Sent) {
        if let Some((&last, _)) = self.sent.last_key_value() {
            debug_assert!(last < pkt.pkt_num, "Packet numbers must increase");
        }

        self.sent.insert(pkt.pkt_num, pkt);
    }

    pub fn get(&self, pkt_num: u64) -> Option<&Sent> {
        self.sent.get(&pkt_num)
    }

    pub fn get_mut(&mut self, pkt_num: u64) -> Option<&mut Sent> {
        self.sent.get_mut(&pkt_num)
    }

    pub fn remove(&mut self, pkt_num: u64) -> Option<Sent> {
        self.sent.remove(&pkt_num)
    }

    /// Returns the packet number of the first record after `pkt_num`.
    pub fn next_after(&self, pkt_num: u64) -> Option<u64> {
        self.sent
            .range((Excluded(pkt_num), Unbounded))
            .next()
            .map(|(&num, _)| num)
    }

    /// Returns the lowest outstanding packet.
    pub fn front(&self) -> Option<&Sent> {
        self.sent.values().next()
    }

    /// Snapshot of the outstanding packet numbers in ascending order.
    ///
    /// The ack scan removes records while walking; iterating the snapshot
    /// keeps the successor position valid across removals.
    pub fn pkt_nums(&self) -> Vec<u64> {
        self.sent.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.sent.len()
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = &Sent> {
        self.sent.values()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }
}
