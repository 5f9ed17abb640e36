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

/// A specialized [`Result`] type for quack operations.
///
/// [`Result`]: https://doc.rust-lang.org/std/result/enum.Result.html
pub type Result<T> = std::result::Result<T, Error>;

/// A sent-packet handler error.
///
/// Local errors are reported to the caller as the operation result and do
/// not tear down the connection. Protocol-level errors (see
/// [`is_protocol_violation()`]) must be surfaced to the session, which tears
/// down the connection with the wire code returned by [`to_wire()`].
///
/// [`is_protocol_violation()`]: Error::is_protocol_violation
/// [`to_wire()`]: Error::to_wire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A packet with a packet number not exceeding an already sent one was
    /// handed to the handler. Caller bug.
    PacketNumberNotIncreasing,

    /// A packet with a zero-length payload was handed to the handler.
    EmptyPacket,

    /// An ack frame arrived in a packet whose number does not exceed that of
    /// a previously processed ack carrier. The frame is swallowed by the
    /// session without further processing.
    DuplicateOrOutOfOrderAck,

    /// The handler tracks too many packets that are neither acked nor queued
    /// for retransmission. Back-pressure signal: the caller should stop
    /// producing new packets.
    TooManyTrackedSentPackets,

    /// The peer acknowledged a packet number that was never sent.
    AckForUnsentPacket,

    /// The peer acknowledged a packet number that was intentionally skipped
    /// and never transmitted.
    AckForSkippedPacket,
}

/// gQUIC wire error codes surfaced by the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireErrorCode {
    /// The peer sent acknowledgement data that it could not have observed
    /// from a legitimate packet exchange.
    InvalidAckData = 0x9,
}

impl Error {
    /// Returns whether the error is a protocol violation that must tear down
    /// the connection, as opposed to a local error reported to the caller.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::AckForUnsentPacket | Error::AckForSkippedPacket
        )
    }

    /// Returns the wire error code to close the connection with, or `None`
    /// for local errors that don't terminate the connection.
    pub fn to_wire(self) -> Option<u64> {
        match self {
            Error::AckForUnsentPacket | Error::AckForSkippedPacket =>
                Some(WireErrorCode::InvalidAckData as u64),

            _ => None,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}
