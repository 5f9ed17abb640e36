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

//! Sent-packet tracking, ack processing and loss detection.
//!
//! [`SentPacketHandler`] is the orchestrator: it owns the packet history,
//! the skipped-number set, the retransmission queue and the stop-waiting
//! state, consumes the RTT estimator and the congestion controller, and
//! exposes the reliability contract the session drives.

use std::cmp;
use std::fmt;

use std::time::Duration;
use std::time::Instant;

use smallvec::SmallVec;

use crate::frame;
use crate::frame::AckFrame;
use crate::frame::StopWaitingFrame;

use crate::Error;
use crate::Result;

pub mod congestion;
pub mod rtt;

mod history;
mod skipped;
mod stop_waiting;

pub use self::skipped::MAX_TRACKED_SKIPPED_PACKETS;

use self::congestion::Acked;
use self::congestion::CongestionControl;
use self::congestion::Lost;
use self::history::PacketHistory;
use self::rtt::RttStats;
use self::skipped::SkippedPackets;
use self::stop_waiting::StopWaitingManager;

// Loss Recovery
/// Number of missing reports a packet tolerates before fast retransmit
/// declares it lost.
pub const RETRANSMISSION_THRESHOLD: u8 = 3;

/// Upper bound on packets that are neither acked nor retransmitted before
/// the handler applies back-pressure.
pub const MAX_TRACKED_SENT_PACKETS: usize = 2000;

/// Retransmission timeout used while the congestion controller has no
/// estimate of its own.
pub const DEFAULT_RETRANSMISSION_TIME: Duration = Duration::from_millis(500);

/// Floor for the retransmission timeout.
pub const MIN_RETRANSMISSION_TIME: Duration = Duration::from_millis(200);

/// A sent packet tracked by the handler.
///
/// The packet number and payload length are fixed at creation; the send
/// time is stamped by the handler when the packet departs. The frame list
/// is opaque to the handler and is carried so the retransmitter can
/// re-encode the payload under a fresh packet number.
#[derive(Clone, Debug)]
pub struct Sent {
    pkt_num: u64,

    frames: SmallVec<[frame::Frame; 1]>,

    time_sent: Option<Instant>,

    size: usize,

    missing_reports: u8,

    // Set once a belated ack covering the packet was reported to the
    // congestion controller while the packet sat in the retransmission
    // queue.
    reported_acked: bool,
}

impl Sent {
    /// Creates a record for a packet about to be handed to the wire.
    pub fn new(
        pkt_num: u64, frames: SmallVec<[frame::Frame; 1]>, size: usize,
    ) -> Sent {
        Sent {
            pkt_num,
            frames,
            time_sent: None,
            size,
            missing_reports: 0,
            reported_acked: false,
        }
    }

    /// The packet number.
    pub fn pkt_num(&self) -> u64 {
        self.pkt_num
    }

    /// The payload length in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// When the packet was handed to the wire, once it has been.
    pub fn time_sent(&self) -> Option<Instant> {
        self.time_sent
    }

    /// The carried payload descriptors.
    pub fn frames(&self) -> &[frame::Frame] {
        &self.frames
    }

    /// Consumes the record, yielding the payload for re-encoding.
    pub fn into_frames(self) -> SmallVec<[frame::Frame; 1]> {
        self.frames
    }
}

/// Tracks every outbound packet until it is acked, declared lost, or its
/// number is reported as intentionally skipped.
///
/// All operations run on the session's event loop and never suspend. The
/// handler owns its collaborators exclusively; congestion-controller
/// callbacks must not re-enter it.
pub struct SentPacketHandler {
    last_sent_pkt_num: u64,
    last_sent_time: Option<Instant>,

    largest_acked: u64,
    largest_in_order_acked: u64,

    largest_received_packet_with_ack: u64,

    bytes_in_flight: usize,

    packet_history: PacketHistory,
    skipped_packets: SkippedPackets,
    retransmission_queue: Vec<Sent>,
    stop_waiting: StopWaitingManager,

    rtt_stats: RttStats,
    congestion: Box<dyn CongestionControl>,
}

impl SentPacketHandler {
    /// Creates a handler driving the given congestion controller.
    pub fn new(congestion: Box<dyn CongestionControl>) -> SentPacketHandler {
        SentPacketHandler {
            last_sent_pkt_num: 0,
            last_sent_time: None,

            largest_acked: 0,
            largest_in_order_acked: 0,

            largest_received_packet_with_ack: 0,

            bytes_in_flight: 0,

            packet_history: PacketHistory::default(),
            skipped_packets: SkippedPackets::default(),
            retransmission_queue: Vec::new(),
            stop_waiting: StopWaitingManager::default(),

            rtt_stats: RttStats::default(),
            congestion,
        }
    }

    /// Registers a packet handed to the wire.
    ///
    /// Packet numbers must strictly increase; numbers inside an intentional
    /// gap are remembered so a peer acknowledging one of them can be caught.
    /// The payload must be non-empty. On failure the handler state is
    /// unchanged.
    pub fn on_sent(
        &mut self, mut pkt: Sent, now: Instant, trace_id: &str,
    ) -> Result<()> {
        if pkt.pkt_num <= self.last_sent_pkt_num {
            return Err(Error::PacketNumberNotIncreasing);
        }

        if pkt.size == 0 {
            return Err(Error::EmptyPacket);
        }

        for p in self.last_sent_pkt_num + 1..pkt.pkt_num {
            self.skipped_packets.insert(p);
        }

        pkt.time_sent = Some(now);

        let pkt_num = pkt.pkt_num;
        let sent_bytes = pkt.size;

        self.last_sent_pkt_num = pkt_num;
        self.last_sent_time = Some(now);

        self.bytes_in_flight += sent_bytes;
        self.packet_history.push_back(pkt);

        self.congestion.on_packet_sent(
            now,
            self.bytes_in_flight,
            pkt_num,
            sent_bytes,
            true,
            &self.rtt_stats,
        );

        trace!("{trace_id} {self:?}");

        Ok(())
    }

    /// Processes a decoded ack frame received in packet `carrier_pkt_num`.
    ///
    /// Classifies every tracked packet as acked, missing or still
    /// outstanding, takes an RTT sample on the largest acked packet, and
    /// reports the aggregate to the congestion controller in a single
    /// batched event.
    pub fn on_ack(
        &mut self, ack_frame: &AckFrame, carrier_pkt_num: u64, now: Instant,
        trace_id: &str,
    ) -> Result<()> {
        if ack_frame.largest_acked > self.last_sent_pkt_num {
            return Err(Error::AckForUnsentPacket);
        }

        if carrier_pkt_num <= self.largest_received_packet_with_ack {
            return Err(Error::DuplicateOrOutOfOrderAck);
        }

        self.largest_received_packet_with_ack = carrier_pkt_num;

        // A repeated ack that doesn't exceed the in-order watermark is
        // stale but legal.
        if ack_frame.largest_acked <= self.largest_in_order_acked {
            return Ok(());
        }

        if let Some(p) = self.skipped_packets.covered_by(ack_frame) {
            trace!("{trace_id} ack covers skipped packet {p}");
            return Err(Error::AckForSkippedPacket);
        }

        self.largest_acked = ack_frame.largest_acked;

        let mut acked_packets: Vec<Acked> = Vec::new();
        let mut lost_packets: Vec<Lost> = Vec::new();

        let mut ack_range_index = 0;

        for pkt_num in self.packet_history.pkt_nums() {
            // Packets below the frame's coverage are missing.
            if pkt_num < ack_frame.lowest_acked {
                self.nack_packet(pkt_num, &mut lost_packets, trace_id);
                continue;
            }

            // The sample is taken even if the record is about to be
            // removed.
            if pkt_num == self.largest_acked {
                if let Some(time_sent) =
                    self.packet_history.get(pkt_num).and_then(|p| p.time_sent)
                {
                    self.rtt_stats.update_rtt(
                        now.saturating_duration_since(time_sent),
                        ack_frame.delay_time,
                        now,
                    );
                }
            }

            if pkt_num > ack_frame.largest_acked {
                break;
            }

            let acked = if ack_frame.has_missing_ranges() {
                // The ranges are sorted descending; the index walks them
                // rear-to-front as the scan ascends, never past the front
                // range.
                let ranges = &ack_frame.ack_ranges;

                while ack_range_index < ranges.len() - 1 &&
                    pkt_num > ranges[ranges.len() - 1 - ack_range_index].last
                {
                    ack_range_index += 1;
                }

                pkt_num >= ranges[ranges.len() - 1 - ack_range_index].first
            } else {
                true
            };

            if acked {
                if let Some(pkt) = self.ack_packet(pkt_num) {
                    trace!("{trace_id} packet newly acked {pkt_num}");

                    acked_packets.push(Acked {
                        pkt_num,
                        size: pkt.size,
                    });
                }
            } else {
                self.nack_packet(pkt_num, &mut lost_packets, trace_id);
            }
        }

        // A belated ack may cover packets already queued for
        // retransmission. They stay queued (the dequeuer discards them) but
        // the first frame covering one counts it as acked towards the
        // congestion controller; later frames must not replay those bytes.
        for pkt in &mut self.retransmission_queue {
            if !pkt.reported_acked && ack_frame.covers(pkt.pkt_num) {
                pkt.reported_acked = true;

                acked_packets.push(Acked {
                    pkt_num: pkt.pkt_num,
                    size: pkt.size,
                });
            }
        }

        self.skipped_packets
            .garbage_collect(self.largest_in_order_acked);

        self.stop_waiting.received_ack(self.largest_in_order_acked);

        self.congestion.on_congestion_event(
            true,
            self.bytes_in_flight,
            &acked_packets,
            &lost_packets,
            &self.rtt_stats,
        );

        trace!("{trace_id} {self:?}");

        Ok(())
    }

    /// Returns whether a packet is waiting for retransmission, forcing the
    /// lowest outstanding packet into the queue first if the retransmission
    /// timeout expired.
    ///
    /// The answer errs on the side of `true`: a belated ack does not remove
    /// an already queued packet, so the next dequeued record may be known
    /// acked and must be discarded by the caller.
    pub fn probably_has_retransmission(
        &mut self, now: Instant, trace_id: &str,
    ) -> bool {
        self.maybe_queue_rto(now, trace_id);

        !self.retransmission_queue.is_empty()
    }

    /// Pops the next packet to retransmit.
    ///
    /// Fast retransmit scans the history from the lowest number up, so
    /// draining the queue as a stack hands out the most recently nacked
    /// (highest-numbered) packet first, approximating the order the peer is
    /// missing.
    pub fn dequeue_retransmission(
        &mut self, now: Instant, trace_id: &str,
    ) -> Option<Sent> {
        if !self.probably_has_retransmission(now, trace_id) {
            return None;
        }

        self.retransmission_queue.pop()
    }

    /// Sum of payload lengths of packets sent but neither acked nor
    /// declared lost.
    pub fn bytes_in_flight(&self) -> usize {
        self.bytes_in_flight
    }

    /// The lowest packet number not yet known acked, lost or skipped.
    pub fn least_unacked(&self) -> u64 {
        self.largest_in_order_acked + 1
    }

    /// The highest packet number the peer acknowledged.
    pub fn largest_acked(&self) -> u64 {
        self.largest_acked
    }

    /// The stop-waiting frame to attach to the next outbound packet, if
    /// any.
    pub fn get_stop_waiting_frame(&self) -> Option<StopWaitingFrame> {
        self.stop_waiting.get_stop_waiting_frame()
    }

    /// Whether the congestion window admits more data.
    pub fn congestion_allows_sending(&self) -> bool {
        self.bytes_in_flight <= self.congestion.congestion_window()
    }

    /// Back-pressure probe: fails once the handler tracks more outstanding
    /// and queued packets than [`MAX_TRACKED_SENT_PACKETS`].
    pub fn check_for_error(&self) -> Result<()> {
        let tracked =
            self.retransmission_queue.len() + self.packet_history.len();

        if tracked > MAX_TRACKED_SENT_PACKETS {
            return Err(Error::TooManyTrackedSentPackets);
        }

        Ok(())
    }

    /// The deadline at which the retransmission timeout fires, or `None`
    /// while nothing was ever sent.
    ///
    /// The handler arms no timer of its own; the session's wakeup scheduler
    /// polls this deadline.
    pub fn time_of_first_rto(&self) -> Option<Instant> {
        Some(self.last_sent_time? + self.rto())
    }

    /// The path's RTT statistics.
    pub fn rtt_stats(&self) -> &RttStats {
        &self.rtt_stats
    }

    fn rto(&self) -> Duration {
        let mut rto = self.congestion.retransmission_delay(&self.rtt_stats);

        if rto.is_zero() {
            rto = DEFAULT_RETRANSMISSION_TIME;
        }

        cmp::max(rto, MIN_RETRANSMISSION_TIME)
    }

    /// Forces the lowest outstanding packet into the retransmission queue
    /// when the RTO deadline has passed. Exactly one packet per trip;
    /// subsequent calls re-evaluate the deadline.
    fn maybe_queue_rto(&mut self, now: Instant, trace_id: &str) {
        let fires_at = match self.time_of_first_rto() {
            Some(fires_at) => fires_at,
            None => return,
        };

        if now < fires_at {
            return;
        }

        let (pkt_num, sent_bytes) = match self.packet_history.front() {
            Some(pkt) => (pkt.pkt_num, pkt.size),
            None => return,
        };

        let lost_packets = [Lost {
            packet_number: pkt_num,
            bytes_lost: sent_bytes,
        }];

        // The loss is reported before the timeout notification; both
        // precede the queue insertion.
        self.congestion.on_congestion_event(
            false,
            self.bytes_in_flight,
            &[],
            &lost_packets,
            &self.rtt_stats,
        );

        self.congestion.on_retransmission_timeout(true);

        debug!("{trace_id} retransmission timeout, queueing packet {pkt_num}");

        self.queue_for_retransmission(pkt_num, trace_id);
    }

    /// Removes an acked packet from the history, crediting bytes in flight
    /// and advancing the in-order watermark over its immediate gap.
    fn ack_packet(&mut self, pkt_num: u64) -> Option<Sent> {
        let pkt = self.packet_history.remove(pkt_num)?;

        self.bytes_in_flight -= pkt.size;

        if self.largest_in_order_acked + 1 == pkt.pkt_num {
            self.largest_in_order_acked =
                match self.packet_history.next_after(pkt.pkt_num) {
                    Some(next) => next - 1,
                    None => pkt.pkt_num,
                };
        }

        Some(pkt)
    }

    /// Registers a missing report. The counter is monotonic per record;
    /// crossing [`RETRANSMISSION_THRESHOLD`] declares the packet lost.
    fn nack_packet(
        &mut self, pkt_num: u64, lost_packets: &mut Vec<Lost>, trace_id: &str,
    ) {
        let pkt = match self.packet_history.get_mut(pkt_num) {
            Some(pkt) => pkt,
            None => return,
        };

        pkt.missing_reports = pkt.missing_reports.saturating_add(1);

        if pkt.missing_reports > RETRANSMISSION_THRESHOLD {
            let bytes_lost = pkt.size;

            self.queue_for_retransmission(pkt_num, trace_id);

            lost_packets.push(Lost {
                packet_number: pkt_num,
                bytes_lost,
            });
        }
    }

    fn queue_for_retransmission(&mut self, pkt_num: u64, trace_id: &str) {
        let pkt = match self.packet_history.remove(pkt_num) {
            Some(pkt) => pkt,
            None => return,
        };

        debug!("{trace_id} queueing packet {pkt_num} for retransmission");

        self.bytes_in_flight -= pkt.size;

        // The queued packet no longer blocks the in-order watermark, which
        // may now advance up to the next outstanding packet but never past
        // the largest acked number.
        if self.largest_in_order_acked + 1 == pkt_num {
            let up_to = match self.packet_history.next_after(pkt_num) {
                Some(next) => next - 1,
                None => self.largest_acked,
            };

            self.largest_in_order_acked =
                cmp::min(up_to, self.largest_acked);
        }

        self.stop_waiting.queued_retransmission(pkt_num);

        self.retransmission_queue.push(pkt);
    }
}

impl fmt::Debug for SentPacketHandler {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "last_sent={} ", self.last_sent_pkt_num)?;
        write!(f, "largest_acked={} ", self.largest_acked)?;
        write!(f, "in_order_acked={} ", self.largest_in_order_acked)?;
        write!(f, "inflight={} ", self.bytes_in_flight)?;
        write!(f, "tracked={} ", self.packet_history.len())?;
        write!(f, "queued={} ", self.retransmission_queue.len())?;
        write!(f, "rtt={:?} ", self.rtt_stats.rtt())?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use smallvec::smallvec;

    use crate::frame::AckRange;
    use crate::frame::Frame;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum Call {
        PacketSent {
            pkt_num: u64,
            bytes: usize,
            bytes_in_flight: usize,
        },

        CongestionEvent {
            rtt_updated: bool,
            bytes_in_flight: usize,
            acked: Vec<Acked>,
            lost: Vec<Lost>,
        },

        RetransmissionTimeout {
            packets_retransmitted: bool,
        },
    }

    #[derive(Debug, Default)]
    struct CallLog {
        calls: Vec<Call>,
    }

    impl CallLog {
        fn congestion_events(&self) -> Vec<Call> {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::CongestionEvent { .. }))
                .cloned()
                .collect()
        }
    }

    #[derive(Debug)]
    struct MockCongestion {
        log: Rc<RefCell<CallLog>>,
        window: usize,
        delay: Duration,
    }

    impl CongestionControl for MockCongestion {
        fn on_packet_sent(
            &mut self, _now: Instant, bytes_in_flight: usize, pkt_num: u64,
            bytes: usize, _is_retransmittable: bool, _rtt_stats: &RttStats,
        ) {
            self.log.borrow_mut().calls.push(Call::PacketSent {
                pkt_num,
                bytes,
                bytes_in_flight,
            });
        }

        fn on_congestion_event(
            &mut self, rtt_updated: bool, bytes_in_flight: usize,
            acked_packets: &[Acked], lost_packets: &[Lost],
            _rtt_stats: &RttStats,
        ) {
            self.log.borrow_mut().calls.push(Call::CongestionEvent {
                rtt_updated,
                bytes_in_flight,
                acked: acked_packets.to_vec(),
                lost: lost_packets.to_vec(),
            });
        }

        fn on_retransmission_timeout(&mut self, packets_retransmitted: bool) {
            self.log.borrow_mut().calls.push(Call::RetransmissionTimeout {
                packets_retransmitted,
            });
        }

        fn congestion_window(&self) -> usize {
            self.window
        }

        fn retransmission_delay(&self, _rtt_stats: &RttStats) -> Duration {
            self.delay
        }
    }

    fn new_handler_with(
        window: usize, delay: Duration,
    ) -> (SentPacketHandler, Rc<RefCell<CallLog>>) {
        let log = Rc::new(RefCell::new(CallLog::default()));

        let handler = SentPacketHandler::new(Box::new(MockCongestion {
            log: Rc::clone(&log),
            window,
            delay,
        }));

        (handler, log)
    }

    fn new_handler() -> (SentPacketHandler, Rc<RefCell<CallLog>>) {
        new_handler_with(usize::MAX, Duration::ZERO)
    }

    fn send(
        handler: &mut SentPacketHandler, pkt_num: u64, size: usize,
        now: Instant,
    ) {
        let pkt = Sent::new(pkt_num, smallvec![Frame::Ping], size);
        handler.on_sent(pkt, now, "test").unwrap();
    }

    fn contiguous_ack(lowest: u64, largest: u64) -> AckFrame {
        AckFrame {
            largest_acked: largest,
            lowest_acked: lowest,
            ack_ranges: Vec::new(),
            delay_time: Duration::ZERO,
        }
    }

    fn ranged_ack(ranges: &[(u64, u64)]) -> AckFrame {
        AckFrame {
            largest_acked: ranges.first().unwrap().1,
            lowest_acked: ranges.last().unwrap().0,
            ack_ranges: ranges
                .iter()
                .map(|&(first, last)| AckRange { first, last })
                .collect(),
            delay_time: Duration::ZERO,
        }
    }

    fn check_invariants(handler: &SentPacketHandler) {
        let history_bytes: usize =
            handler.packet_history.iter().map(|p| p.size).sum();
        assert_eq!(handler.bytes_in_flight, history_bytes);

        for queued in &handler.retransmission_queue {
            assert!(handler.packet_history.get(queued.pkt_num).is_none());
        }

        assert!(
            handler.skipped_packets.len() <= MAX_TRACKED_SKIPPED_PACKETS
        );
    }

    #[test]
    fn happy_ack() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=3 {
            send(&mut handler, pkt_num, 100, now);
        }

        assert_eq!(handler.bytes_in_flight(), 300);

        let ack_time = now + Duration::from_millis(50);
        handler
            .on_ack(&contiguous_ack(1, 3), 4, ack_time, "test")
            .unwrap();

        assert!(handler.packet_history.is_empty());
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.largest_acked(), 3);
        assert_eq!(handler.least_unacked(), 4);

        assert_eq!(
            handler.rtt_stats().latest_rtt(),
            Duration::from_millis(50)
        );

        let events = log.borrow().congestion_events();
        assert_eq!(events, vec![Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 0,
            acked: vec![
                Acked { pkt_num: 1, size: 100 },
                Acked { pkt_num: 2, size: 100 },
                Acked { pkt_num: 3, size: 100 },
            ],
            lost: vec![],
        }]);

        check_invariants(&handler);
    }

    #[test]
    fn gap_then_fast_retransmit() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=5 {
            send(&mut handler, pkt_num, 100, now);
        }

        let frame = ranged_ack(&[(5, 5), (1, 3)]);

        handler
            .on_ack(&frame, 6, now + Duration::from_millis(10), "test")
            .unwrap();

        // Packet 4 took one missing report and is still outstanding.
        assert_eq!(handler.packet_history.pkt_nums(), vec![4]);
        assert_eq!(
            handler.packet_history.get(4).unwrap().missing_reports,
            1
        );
        assert_eq!(handler.bytes_in_flight(), 100);
        assert_eq!(handler.largest_in_order_acked, 3);
        assert_eq!(handler.largest_acked(), 5);

        // The advertised floor follows the in-order watermark, not the
        // largest acked number: packet 4 is still outstanding.
        assert_eq!(
            handler.get_stop_waiting_frame(),
            Some(StopWaitingFrame { least_unacked: 4 })
        );

        // Nack until the threshold is exceeded.
        let mut carrier = 7;
        for reports in 2..=RETRANSMISSION_THRESHOLD + 1 {
            handler
                .on_ack(&frame, carrier, now + Duration::from_millis(20), "test")
                .unwrap();

            if reports <= RETRANSMISSION_THRESHOLD {
                assert_eq!(
                    handler.packet_history.get(4).unwrap().missing_reports,
                    reports
                );
            }

            carrier += 1;
        }

        // Crossing the threshold moved packet 4 to the retransmission
        // queue.
        assert!(handler.packet_history.is_empty());
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.largest_in_order_acked, 5);
        assert_eq!(handler.retransmission_queue.len(), 1);
        assert_eq!(handler.retransmission_queue[0].pkt_num, 4);
        assert_eq!(
            handler.get_stop_waiting_frame(),
            Some(StopWaitingFrame { least_unacked: 6 })
        );

        let events = log.borrow().congestion_events();
        let last = events.last().unwrap();
        assert_eq!(last, &Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 0,
            acked: vec![],
            lost: vec![Lost {
                packet_number: 4,
                bytes_lost: 100,
            }],
        });

        // The queued packet is handed out for retransmission.
        let retransmit = handler
            .dequeue_retransmission(now + Duration::from_millis(30), "test")
            .unwrap();
        assert_eq!(retransmit.pkt_num(), 4);

        check_invariants(&handler);
    }

    #[test]
    fn ack_for_skipped_packet() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 10, 100, now);
        send(&mut handler, 12, 100, now);

        assert!(handler.skipped_packets.iter().any(|&p| p == 11));

        let err = handler
            .on_ack(&contiguous_ack(10, 12), 13, now, "test")
            .unwrap_err();

        assert_eq!(err, Error::AckForSkippedPacket);
        assert!(err.is_protocol_violation());

        // The frame was rejected before any history mutation.
        assert_eq!(handler.packet_history.len(), 2);
        assert_eq!(handler.bytes_in_flight(), 200);

        check_invariants(&handler);
    }

    #[test]
    fn duplicate_ack_is_rejected_and_leaves_state_unchanged() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=3 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&contiguous_ack(1, 3), 4, now, "test")
            .unwrap();

        let events_before = log.borrow().calls.len();
        let in_order_before = handler.largest_in_order_acked;

        let err = handler
            .on_ack(&contiguous_ack(1, 3), 4, now, "test")
            .unwrap_err();

        assert_eq!(err, Error::DuplicateOrOutOfOrderAck);
        assert_eq!(log.borrow().calls.len(), events_before);
        assert_eq!(handler.largest_in_order_acked, in_order_before);
        assert_eq!(handler.bytes_in_flight(), 0);

        // A lower carrier number is equally rejected.
        let err = handler
            .on_ack(&contiguous_ack(1, 3), 2, now, "test")
            .unwrap_err();
        assert_eq!(err, Error::DuplicateOrOutOfOrderAck);
    }

    #[test]
    fn stale_ack_only_records_the_carrier() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=3 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&contiguous_ack(1, 3), 4, now, "test")
            .unwrap();

        send(&mut handler, 4, 100, now);

        let events_before = log.borrow().congestion_events().len();

        // Largest acked does not exceed the in-order watermark: stale but
        // legal.
        handler
            .on_ack(&contiguous_ack(1, 2), 5, now, "test")
            .unwrap();

        assert_eq!(log.borrow().congestion_events().len(), events_before);
        assert_eq!(handler.largest_acked(), 3);
        assert_eq!(handler.bytes_in_flight(), 100);

        // ... but the carrier number was consumed.
        let err = handler
            .on_ack(&contiguous_ack(1, 4), 5, now, "test")
            .unwrap_err();
        assert_eq!(err, Error::DuplicateOrOutOfOrderAck);
    }

    #[test]
    fn ack_for_unsent_packet() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=3 {
            send(&mut handler, pkt_num, 100, now);
        }

        let err = handler
            .on_ack(&contiguous_ack(1, 4), 4, now, "test")
            .unwrap_err();

        assert_eq!(err, Error::AckForUnsentPacket);
        assert!(err.is_protocol_violation());
        assert_eq!(handler.bytes_in_flight(), 300);
    }

    #[test]
    fn packet_number_must_increase() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);

        let repeat = Sent::new(1, smallvec![Frame::Ping], 100);
        assert_eq!(
            handler.on_sent(repeat, now, "test"),
            Err(Error::PacketNumberNotIncreasing)
        );

        assert_eq!(handler.bytes_in_flight(), 100);
        assert_eq!(handler.packet_history.len(), 1);
    }

    #[test]
    fn empty_packet_is_rejected_without_side_effects() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        let empty = Sent::new(5, smallvec![Frame::Ping], 0);
        assert_eq!(
            handler.on_sent(empty, now, "test"),
            Err(Error::EmptyPacket)
        );

        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.skipped_packets.len(), 0);
        assert_eq!(handler.time_of_first_rto(), None);
        assert!(log.borrow().calls.is_empty());

        // The rejected number was not consumed.
        send(&mut handler, 5, 100, now);
        assert_eq!(handler.bytes_in_flight(), 100);
    }

    #[test]
    fn skipped_numbers_are_tracked_and_garbage_collected() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);
        send(&mut handler, 3, 100, now);

        assert_eq!(
            handler.skipped_packets.iter().copied().collect::<Vec<_>>(),
            vec![2]
        );

        // An ack around the gap is fine and prunes the skipped entry once
        // the watermark passes it.
        handler
            .on_ack(&ranged_ack(&[(3, 3), (1, 1)]), 4, now, "test")
            .unwrap();

        assert_eq!(handler.largest_in_order_acked, 3);
        assert_eq!(handler.skipped_packets.len(), 0);

        check_invariants(&handler);
    }

    #[test]
    fn skipped_set_is_bounded() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);

        // Skips 2..=12, three more than the set retains.
        send(&mut handler, 13, 100, now);

        assert_eq!(
            handler.skipped_packets.len(),
            MAX_TRACKED_SKIPPED_PACKETS
        );
        assert_eq!(handler.skipped_packets.iter().next(), Some(&3));
    }

    #[test]
    fn packets_below_lowest_acked_are_nacked() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=5 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&contiguous_ack(3, 5), 6, now, "test")
            .unwrap();

        assert_eq!(handler.packet_history.pkt_nums(), vec![1, 2]);
        assert_eq!(
            handler.packet_history.get(1).unwrap().missing_reports,
            1
        );
        assert_eq!(
            handler.packet_history.get(2).unwrap().missing_reports,
            1
        );

        // Nothing was acked in order, so the watermark stays put.
        assert_eq!(handler.largest_in_order_acked, 0);
        assert_eq!(handler.bytes_in_flight(), 200);

        let events = log.borrow().congestion_events();
        assert_eq!(events, vec![Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 200,
            acked: vec![
                Acked { pkt_num: 3, size: 100 },
                Acked { pkt_num: 4, size: 100 },
                Acked { pkt_num: 5, size: 100 },
            ],
            lost: vec![],
        }]);

        check_invariants(&handler);
    }

    #[test]
    fn rto_queues_the_lowest_outstanding_packet() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);

        // Controller reports no estimate, so the default applies.
        assert_eq!(
            handler.time_of_first_rto(),
            Some(now + DEFAULT_RETRANSMISSION_TIME)
        );

        // Nothing fires before the deadline.
        assert!(!handler.probably_has_retransmission(
            now + DEFAULT_RETRANSMISSION_TIME - Duration::from_millis(1),
            "test"
        ));
        assert_eq!(handler.bytes_in_flight(), 100);

        let after = now + DEFAULT_RETRANSMISSION_TIME + Duration::from_millis(1);
        assert!(handler.probably_has_retransmission(after, "test"));

        assert!(handler.packet_history.is_empty());
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.least_unacked(), 1);
        assert_eq!(
            handler.get_stop_waiting_frame(),
            Some(StopWaitingFrame { least_unacked: 2 })
        );

        // Loss first, then the timeout notification.
        let log_ref = log.borrow();
        let calls = &log_ref.calls;
        assert_eq!(&calls[calls.len() - 2..], &[
            Call::CongestionEvent {
                rtt_updated: false,
                bytes_in_flight: 100,
                acked: vec![],
                lost: vec![Lost {
                    packet_number: 1,
                    bytes_lost: 100,
                }],
            },
            Call::RetransmissionTimeout {
                packets_retransmitted: true,
            },
        ]);
        drop(log_ref);

        let retransmit = handler.dequeue_retransmission(after, "test").unwrap();
        assert_eq!(retransmit.pkt_num(), 1);
        assert_eq!(retransmit.size(), 100);

        check_invariants(&handler);
    }

    #[test]
    fn belated_ack_after_rto_reports_the_queued_packet_acked() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);

        let after = now + DEFAULT_RETRANSMISSION_TIME + Duration::from_millis(1);
        assert!(handler.probably_has_retransmission(after, "test"));

        handler
            .on_ack(&contiguous_ack(1, 1), 2, after, "test")
            .unwrap();

        // The packet does not re-enter the history; the queue keeps it and
        // the dequeuer is responsible for discarding it.
        assert!(handler.packet_history.is_empty());
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.retransmission_queue.len(), 1);

        let events = log.borrow().congestion_events();
        assert_eq!(events.last().unwrap(), &Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 0,
            acked: vec![Acked { pkt_num: 1, size: 100 }],
            lost: vec![],
        });

        // A later frame still covering the packet must not replay the
        // already-credited bytes.
        handler
            .on_ack(&contiguous_ack(1, 1), 3, after, "test")
            .unwrap();

        let events = log.borrow().congestion_events();
        assert_eq!(events.last().unwrap(), &Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 0,
            acked: vec![],
            lost: vec![],
        });
        assert_eq!(handler.retransmission_queue.len(), 1);

        let stale = handler.dequeue_retransmission(after, "test").unwrap();
        assert_eq!(stale.pkt_num(), 1);
    }

    #[test]
    fn rto_deadline_resets_on_new_send() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);

        let later = now + Duration::from_millis(100);
        send(&mut handler, 2, 100, later);

        assert_eq!(
            handler.time_of_first_rto(),
            Some(later + DEFAULT_RETRANSMISSION_TIME)
        );

        // The earlier deadline no longer fires.
        assert!(!handler.probably_has_retransmission(
            now + DEFAULT_RETRANSMISSION_TIME + Duration::from_millis(1),
            "test"
        ));
    }

    #[test]
    fn rto_duration_honours_controller_and_floor() {
        let now = Instant::now();

        // Below the floor: clamped up.
        let (mut handler, _log) =
            new_handler_with(usize::MAX, Duration::from_millis(50));
        send(&mut handler, 1, 100, now);
        assert_eq!(
            handler.time_of_first_rto(),
            Some(now + MIN_RETRANSMISSION_TIME)
        );

        // Above the floor: taken as-is.
        let (mut handler, _log) =
            new_handler_with(usize::MAX, Duration::from_secs(1));
        send(&mut handler, 1, 100, now);
        assert_eq!(
            handler.time_of_first_rto(),
            Some(now + Duration::from_secs(1))
        );
    }

    #[test]
    fn retransmissions_dequeue_in_lifo_order() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);
        send(&mut handler, 2, 100, now);

        let after = now + DEFAULT_RETRANSMISSION_TIME + Duration::from_millis(1);

        // One packet is queued per RTO trip.
        assert!(handler.probably_has_retransmission(after, "test"));
        assert_eq!(handler.retransmission_queue.len(), 1);

        assert!(handler.probably_has_retransmission(after, "test"));
        assert_eq!(handler.retransmission_queue.len(), 2);

        let first = handler.dequeue_retransmission(after, "test").unwrap();
        let second = handler.dequeue_retransmission(after, "test").unwrap();

        assert_eq!(first.pkt_num(), 2);
        assert_eq!(second.pkt_num(), 1);
        assert!(handler.dequeue_retransmission(after, "test").is_none());
    }

    #[test]
    fn congestion_gates_sending() {
        let (mut handler, _log) =
            new_handler_with(250, Duration::ZERO);
        let now = Instant::now();

        send(&mut handler, 1, 100, now);
        send(&mut handler, 2, 100, now);
        assert!(handler.congestion_allows_sending());

        send(&mut handler, 3, 100, now);
        assert!(!handler.congestion_allows_sending());
    }

    #[test]
    fn too_many_tracked_packets_signal_back_pressure() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=MAX_TRACKED_SENT_PACKETS as u64 {
            send(&mut handler, pkt_num, 10, now);
            assert_eq!(handler.check_for_error(), Ok(()));
        }

        send(&mut handler, MAX_TRACKED_SENT_PACKETS as u64 + 1, 10, now);
        assert_eq!(
            handler.check_for_error(),
            Err(Error::TooManyTrackedSentPackets)
        );
    }

    #[test]
    fn stop_waiting_follows_acks() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        assert_eq!(handler.get_stop_waiting_frame(), None);
        assert_eq!(handler.least_unacked(), 1);

        for pkt_num in 1..=3 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&contiguous_ack(1, 3), 4, now, "test")
            .unwrap();

        assert_eq!(handler.least_unacked(), 4);
        assert_eq!(
            handler.get_stop_waiting_frame(),
            Some(StopWaitingFrame { least_unacked: 4 })
        );
    }

    #[test]
    fn rtt_sample_is_taken_on_the_largest_acked_packet() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        send(&mut handler, 1, 100, now);
        send(&mut handler, 2, 100, now + Duration::from_millis(20));

        handler
            .on_ack(
                &contiguous_ack(1, 2),
                3,
                now + Duration::from_millis(120),
                "test",
            )
            .unwrap();

        // The sample comes from packet 2, sent 20ms in.
        assert_eq!(
            handler.rtt_stats().latest_rtt(),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn missing_reports_grow_until_the_packet_is_covered() {
        let (mut handler, _log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=4 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&ranged_ack(&[(3, 3), (1, 1)]), 5, now, "test")
            .unwrap();
        assert_eq!(
            handler.packet_history.get(2).unwrap().missing_reports,
            1
        );

        handler
            .on_ack(&contiguous_ack(3, 3), 6, now, "test")
            .unwrap();
        assert_eq!(
            handler.packet_history.get(2).unwrap().missing_reports,
            2
        );

        // A frame finally covering the packet removes the record outright;
        // the counter is never decremented.
        handler
            .on_ack(&ranged_ack(&[(4, 4), (1, 2)]), 7, now, "test")
            .unwrap();

        assert!(handler.packet_history.is_empty());
        assert_eq!(handler.bytes_in_flight(), 0);
        assert_eq!(handler.largest_in_order_acked, 4);
        assert!(handler.retransmission_queue.is_empty());

        check_invariants(&handler);
    }

    #[test]
    fn scan_handles_multiple_ranges() {
        let (mut handler, log) = new_handler();
        let now = Instant::now();

        for pkt_num in 1..=9 {
            send(&mut handler, pkt_num, 100, now);
        }

        handler
            .on_ack(&ranged_ack(&[(8, 9), (4, 5), (1, 2)]), 10, now, "test")
            .unwrap();

        // 3, 6 and 7 fall in the gaps and were nacked once.
        assert_eq!(handler.packet_history.pkt_nums(), vec![3, 6, 7]);
        for pkt_num in [3, 6, 7] {
            assert_eq!(
                handler.packet_history.get(pkt_num).unwrap().missing_reports,
                1
            );
        }

        assert_eq!(handler.largest_in_order_acked, 2);
        assert_eq!(handler.bytes_in_flight(), 300);

        let events = log.borrow().congestion_events();
        assert_eq!(events, vec![Call::CongestionEvent {
            rtt_updated: true,
            bytes_in_flight: 300,
            acked: vec![
                Acked { pkt_num: 1, size: 100 },
                Acked { pkt_num: 2, size: 100 },
                Acked { pkt_num: 4, size: 100 },
                Acked { pkt_num: 5, size: 100 },
                Acked { pkt_num: 8, size: 100 },
                Acked { pkt_num: 9, size: 100 },
            ],
            lost: vec![],
        }]);

        check_invariants(&handler);
    }
}
