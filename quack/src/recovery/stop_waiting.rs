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

use crate::frame::StopWaitingFrame;

/// Tracks the least-unacked packet number advertised to the peer.
///
/// The advertised floor is the in-order watermark's successor: everything
/// below it is acked, abandoned for retransmission, or was intentionally
/// skipped, so the peer need not keep tracking it. A retransmitted packet
/// is re-sent under a fresh number, so abandoning one raises the floor too.
/// The manager keeps a high-water mark refreshed from both signals.
#[derive(Default)]
pub struct StopWaitingManager {
    next_frame: Option<StopWaitingFrame>,
}

impl StopWaitingManager {
    /// Refreshes the advertised floor after an ack was processed and the
    /// in-order watermark settled.
    pub fn received_ack(&mut self, largest_in_order_acked: u64) {
        self.refresh(largest_in_order_acked + 1);
    }

    /// Refreshes the advertised floor after `pkt_num` was abandoned and
    /// queued for retransmission.
    ///
    /// Strictly needed only for RTO retransmissions, where the in-order
    /// watermark stays behind the abandoned number. On fast retransmit the
    /// watermark advances past it in the same ack; the call is kept for
    /// symmetry.
    pub fn queued_retransmission(&mut self, pkt_num: u64) {
        self.refresh(pkt_num + 1);
    }

    /// Returns the frame to attach to the next outbound packet, if any.
    pub fn get_stop_waiting_frame(&self) -> Option<StopWaitingFrame> {
        self.next_frame
    }

    fn refresh(&mut self, least_unacked: u64) {
        if self
            .next_frame
            .map_or(true, |frame| least_unacked > frame.least_unacked)
        {
            self.next_frame = Some(StopWaitingFrame { least_unacked });
        }
    }
}
