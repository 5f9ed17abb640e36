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

use std::cmp;

use std::time::Duration;
use std::time::Instant;

pub(crate) const INITIAL_RTT: Duration = Duration::from_millis(333);

/// Round-trip time statistics for the path.
///
/// One sample is taken per processed ack frame, on the largest acked packet.
/// Congestion controllers receive a shared reference to consult the
/// estimate.
pub struct RttStats {
    latest_rtt: Duration,

    smoothed_rtt: Duration,

    rttvar: Duration,

    min_rtt: Duration,

    first_rtt_sample: Option<Instant>,
}

impl Default for RttStats {
    fn default() -> Self {
        RttStats {
            latest_rtt: Duration::ZERO,
            smoothed_rtt: INITIAL_RTT,
            rttvar: INITIAL_RTT / 2,
            min_rtt: Duration::ZERO,
            first_rtt_sample: None,
        }
    }
}

impl std::fmt::Debug for RttStats {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RttStats")
            .field("latest_rtt", &self.latest_rtt)
            .field("srtt", &self.smoothed_rtt)
            .field("minrtt", &self.min_rtt)
            .field("rttvar", &self.rttvar)
            .finish()
    }
}

impl RttStats {
    /// Folds a new sample into the estimate.
    ///
    /// `ack_delay` is the peer-reported time between receiving the packet
    /// and acknowledging it; it is subtracted only when plausible so a lying
    /// peer cannot drive the estimate below the observed minimum.
    pub fn update_rtt(
        &mut self, latest_rtt: Duration, mut ack_delay: Duration, now: Instant,
    ) {
        self.latest_rtt = latest_rtt;

        if self.first_rtt_sample.is_none() {
            self.min_rtt = latest_rtt;
            self.smoothed_rtt = latest_rtt;
            self.rttvar = latest_rtt / 2;
            self.first_rtt_sample = Some(now);
            return;
        }

        // min_rtt ignores acknowledgment delay.
        self.min_rtt = cmp::min(self.min_rtt, latest_rtt);

        // Adjust for acknowledgment delay if plausible.
        if latest_rtt < self.min_rtt + ack_delay {
            ack_delay = Duration::ZERO;
        }
        let adjusted_rtt = latest_rtt - ack_delay;

        self.rttvar = self.rttvar * 3 / 4 +
            Duration::from_nanos(
                self.smoothed_rtt
                    .as_nanos()
                    .abs_diff(adjusted_rtt.as_nanos()) as u64 /
                    4,
            );

        self.smoothed_rtt = self.smoothed_rtt * 7 / 8 + adjusted_rtt / 8;
    }

    /// The smoothed round-trip estimate.
    pub fn rtt(&self) -> Duration {
        self.smoothed_rtt
    }

    /// The most recent raw sample.
    pub fn latest_rtt(&self) -> Duration {
        self.latest_rtt
    }

    /// The lowest sample observed, or `None` before the first sample.
    pub fn min_rtt(&self) -> Option<Duration> {
        self.first_rtt_sample.map(|_| self.min_rtt)
    }

    /// The mean deviation of the estimate.
    pub fn rttvar(&self) -> Duration {
        self.rttvar
    }
}
