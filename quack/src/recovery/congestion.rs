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

//! Contract with the pluggable congestion controller.
//!
//! The concrete algorithm (cubic, reno, ...) lives outside this crate; the
//! handler drives it through [`CongestionControl`] and never inspects its
//! internals. Controller callbacks must not re-enter the handler.

use std::fmt::Debug;

use std::time::Duration;
use std::time::Instant;

use super::rtt::RttStats;

/// Assumed maximum size of an outgoing datagram, used to size windows.
pub const MAX_DATAGRAM_SIZE: usize = 1460;

/// Congestion window to start a connection with.
pub const INITIAL_CONGESTION_WINDOW: usize = 32 * MAX_DATAGRAM_SIZE;

/// Congestion window ceiling for controllers that cap their window.
pub const DEFAULT_MAX_CONGESTION_WINDOW: usize = 107 * MAX_DATAGRAM_SIZE;

/// A packet reported to the controller as acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acked {
    /// The acknowledged packet number.
    pub pkt_num: u64,

    /// Payload length of the acknowledged packet.
    pub size: usize,
}

/// A packet reported to the controller as lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lost {
    /// The lost packet number.
    pub packet_number: u64,

    /// Payload length of the lost packet.
    pub bytes_lost: usize,
}

/// The send-side congestion control algorithm driven by the handler.
///
/// Implementations receive a shared [`RttStats`] reference wherever the
/// round-trip estimate feeds the algorithm.
pub trait CongestionControl: Debug {
    /// Inform that `bytes` were handed to the wire. `bytes_in_flight`
    /// already includes the packet. Called exactly once per accepted send.
    fn on_packet_sent(
        &mut self, now: Instant, bytes_in_flight: usize, pkt_num: u64,
        bytes: usize, is_retransmittable: bool, rtt_stats: &RttStats,
    );

    /// Indicates an update to the congestion state, caused either by an
    /// incoming ack or a retransmission timeout. `rtt_updated` indicates
    /// whether a new RTT sample has been taken; `acked_packets` and
    /// `lost_packets` are the full aggregate for the triggering event.
    fn on_congestion_event(
        &mut self, rtt_updated: bool, bytes_in_flight: usize,
        acked_packets: &[Acked], lost_packets: &[Lost], rtt_stats: &RttStats,
    );

    /// Called when an RTO fires. `packets_retransmitted` reports whether the
    /// timeout forced a packet into the retransmission queue.
    fn on_retransmission_timeout(&mut self, packets_retransmitted: bool);

    /// Returns the size of the current congestion window in bytes.
    fn congestion_window(&self) -> usize;

    /// Returns the retransmission timeout the controller currently
    /// recommends, or zero when it has no estimate yet.
    fn retransmission_delay(&self, rtt_stats: &RttStats) -> Duration;
}
