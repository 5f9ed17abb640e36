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

//! 🦆 Sent-packet tracking and loss recovery for a QUIC sender.
//!
//! quack implements the sender-side reliability machinery of a QUIC
//! endpoint: it tracks every outbound packet from the moment it is handed to
//! the wire until the peer acknowledges it, loss detection declares it lost
//! and queues it for retransmission, or its packet number is reported as
//! intentionally skipped. It is the authoritative source for what is in
//! flight, what must be retransmitted, and when the congestion controller is
//! consulted.
//!
//! The crate deliberately stops at the reliability layer: frame
//! parsing/serialisation, packet protection, the receive-side ack generator
//! and all I/O belong to the embedding session, which drives the handler from
//! its event loop. The congestion algorithm itself is also external and is
//! plugged in through the [`CongestionControl`] trait.
//!
//! ## Tracking sent packets
//!
//! The session hands every departing packet to the handler via
//! [`SentPacketHandler::on_sent()`]. Packet numbers must strictly increase,
//! but may leave intentional gaps; the numbers inside a gap are remembered so
//! that a peer acknowledging one of them can be caught cheating:
//!
//! ```
//! use std::time::Duration;
//! use std::time::Instant;
//!
//! use quack::CongestionControl;
//! use quack::Sent;
//! use quack::SentPacketHandler;
//!
//! # use quack::{Acked, Lost, RttStats};
//! # #[derive(Debug)]
//! # struct FixedWindow(usize);
//! #
//! # impl CongestionControl for FixedWindow {
//! #     fn on_packet_sent(
//! #         &mut self, _now: Instant, _bytes_in_flight: usize, _pkt_num: u64,
//! #         _bytes: usize, _is_retransmittable: bool, _rtt_stats: &RttStats,
//! #     ) {
//! #     }
//! #
//! #     fn on_congestion_event(
//! #         &mut self, _rtt_updated: bool, _bytes_in_flight: usize,
//! #         _acked_packets: &[Acked], _lost_packets: &[Lost],
//! #         _rtt_stats: &RttStats,
//! #     ) {
//! #     }
//! #
//! #     fn on_retransmission_timeout(&mut self, _packets_retransmitted: bool) {}
//! #
//! #     fn congestion_window(&self) -> usize {
//! #         self.0
//! #     }
//! #
//! #     fn retransmission_delay(&self, _rtt_stats: &RttStats) -> Duration {
//! #         Duration::ZERO
//! #     }
//! # }
//! #
//! let mut handler =
//!     SentPacketHandler::new(Box::new(FixedWindow(64 * 1024)));
//!
//! let now = Instant::now();
//!
//! let pkt = Sent::new(1, Default::default(), 1350);
//! handler.on_sent(pkt, now, "client")?;
//!
//! assert_eq!(handler.bytes_in_flight(), 1350);
//! # Ok::<(), quack::Error>(())
//! ```
//!
//! ## Processing acknowledgements
//!
//! Incoming ack frames are decoded by the session's parser and passed to
//! [`SentPacketHandler::on_ack()`] together with the packet number of the
//! packet that carried them. The handler classifies every tracked packet as
//! acked, missing or still outstanding, takes an RTT sample on the largest
//! acked packet, and reports the aggregate to the congestion controller in a
//! single batched event.
//!
//! ## Retransmissions
//!
//! Packets declared lost — either because enough acks reported them missing,
//! or because the retransmission timeout fired — are moved to a queue that
//! the session drains with [`SentPacketHandler::dequeue_retransmission()`].
//! A dequeued packet is re-encoded under a fresh packet number; the old
//! record is discarded.
//!
//! The handler never suspends and never arms a timer itself: the deadline
//! returned by [`SentPacketHandler::time_of_first_rto()`] is a pure function
//! of handler state that the session's wakeup scheduler polls.

#![warn(missing_docs)]
#![warn(unused_qualifications)]

#[macro_use]
extern crate log;

mod error;

pub mod frame;
pub mod recovery;

pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::error::WireErrorCode;

pub use crate::recovery::congestion::Acked;
pub use crate::recovery::congestion::CongestionControl;
pub use crate::recovery::congestion::Lost;
pub use crate::recovery::rtt::RttStats;
pub use crate::recovery::Sent;
pub use crate::recovery::SentPacketHandler;
