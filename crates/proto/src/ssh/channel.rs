//! Runtime channel state (RFC 4254 Section 5).
//!
//! One [`Channel`] tracks both flow-control windows and the
//! open/EOF/close lifecycle for a single channel:
//!
//! - `remote_window` - bytes we may still send; never negative, and a
//!   send exceeding it is refused before it reaches the wire
//! - `local_window` - bytes we are willing to receive; decremented by
//!   the exact payload length of each delivered DATA and replenished
//!   only by our own WINDOW_ADJUST once it falls below half of the
//!   initial window
//!
//! Lifecycle: Opening → Open → (EofSent | EofRecv) → Closing → Closed.
//! Sending CLOSE forbids all further channel messages; the id is freed
//! when both sides have sent CLOSE.

use hawser_platform::{HawserError, HawserResult};

/// Channel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// OPEN sent, waiting for confirmation.
    Opening,
    /// Open in both directions.
    Open,
    /// We sent EOF; we still receive.
    EofSent,
    /// Peer sent EOF; we still send.
    EofRecv,
    /// CLOSE sent by at least one side.
    Closing,
    /// Both sides sent CLOSE; the local id is free.
    Closed,
}

/// A single multiplexed channel.
#[derive(Debug)]
pub struct Channel {
    local_id: u32,
    remote_id: u32,
    state: ChannelState,
    /// Bytes we are willing to receive before the next WINDOW_ADJUST.
    local_window: u32,
    local_window_initial: u32,
    local_max_packet: u32,
    /// Bytes the peer lets us send.
    remote_window: u32,
    remote_max_packet: u32,
    close_sent: bool,
    close_received: bool,
}

impl Channel {
    /// Creates a channel in Opening state, offering the given receive
    /// window.
    pub fn new(local_id: u32, local_window: u32, local_max_packet: u32) -> Self {
        Self {
            local_id,
            remote_id: 0,
            state: ChannelState::Opening,
            local_window,
            local_window_initial: local_window,
            local_max_packet,
            remote_window: 0,
            remote_max_packet: 0,
            close_sent: false,
            close_received: false,
        }
    }

    /// Completes the open handshake with the peer's parameters.
    pub fn confirm(&mut self, remote_id: u32, remote_window: u32, remote_max_packet: u32) {
        self.remote_id = remote_id;
        self.remote_window = remote_window;
        self.remote_max_packet = remote_max_packet;
        if self.state == ChannelState::Opening {
            self.state = ChannelState::Open;
        }
    }

    /// Returns the local channel id.
    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Returns the peer's channel id.
    pub fn remote_id(&self) -> u32 {
        self.remote_id
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Returns the send window remaining.
    pub fn remote_window(&self) -> u32 {
        self.remote_window
    }

    /// Returns the receive window remaining.
    pub fn local_window(&self) -> u32 {
        self.local_window
    }

    /// Returns the peer's maximum packet size.
    pub fn remote_max_packet(&self) -> u32 {
        self.remote_max_packet
    }

    /// Returns our maximum packet size.
    pub fn local_max_packet(&self) -> u32 {
        self.local_max_packet
    }

    /// Returns true while data may still be sent on this channel.
    pub fn can_send(&self) -> bool {
        matches!(self.state, ChannelState::Open | ChannelState::EofRecv)
    }

    /// Returns how many bytes of an intended `len`-byte write may go
    /// into the next DATA message: bounded by the remote window and
    /// the remote maximum packet size. Zero means the send must park
    /// until the peer adjusts the window.
    pub fn sendable(&self, len: usize) -> usize {
        len.min(self.remote_window as usize)
            .min(self.remote_max_packet as usize)
    }

    /// Consumes send window for an outgoing DATA of `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HawserError::Protocol`] if the send would overdraw
    /// the peer's window; callers must split or park instead.
    pub fn consume_send_window(&mut self, len: usize) -> HawserResult<()> {
        if len > self.remote_window as usize {
            return Err(HawserError::Protocol(format!(
                "Channel {}: send of {} bytes exceeds remote window {}",
                self.local_id, len, self.remote_window
            )));
        }
        self.remote_window -= len as u32;
        Ok(())
    }

    /// Credits send window from a received WINDOW_ADJUST.
    pub fn add_send_window(&mut self, bytes: u32) {
        self.remote_window = self.remote_window.saturating_add(bytes);
    }

    /// Accounts for an incoming DATA of `len` bytes against our
    /// receive window.
    ///
    /// # Errors
    ///
    /// Returns [`HawserError::Protocol`] if the peer overran the
    /// window we advertised; this is fatal to the session.
    pub fn note_received(&mut self, len: usize) -> HawserResult<()> {
        if len > self.local_window as usize {
            return Err(HawserError::Protocol(format!(
                "Channel {}: peer sent {} bytes into a window of {}",
                self.local_id, len, self.local_window
            )));
        }
        self.local_window -= len as u32;
        Ok(())
    }

    /// Returns the WINDOW_ADJUST credit due to the peer, if the
    /// receive window has fallen below half of its initial value.
    /// Updates the bookkeeping; the caller must actually send the
    /// adjust message.
    pub fn take_window_credit(&mut self) -> Option<u32> {
        if self.local_window >= self.local_window_initial / 2 {
            return None;
        }
        let credit = self.local_window_initial - self.local_window;
        self.local_window = self.local_window_initial;
        Some(credit)
    }

    /// Records that we sent EOF.
    pub fn mark_eof_sent(&mut self) {
        if self.state == ChannelState::Open {
            self.state = ChannelState::EofSent;
        }
    }

    /// Records that the peer sent EOF.
    pub fn mark_eof_received(&mut self) {
        if self.state == ChannelState::Open {
            self.state = ChannelState::EofRecv;
        }
    }

    /// Records that we sent CLOSE. No further messages may be sent on
    /// the channel afterwards.
    pub fn mark_close_sent(&mut self) {
        self.close_sent = true;
        self.state = if self.close_received {
            ChannelState::Closed
        } else {
            ChannelState::Closing
        };
    }

    /// Records that the peer sent CLOSE.
    pub fn mark_close_received(&mut self) {
        self.close_received = true;
        self.state = if self.close_sent {
            ChannelState::Closed
        } else {
            ChannelState::Closing
        };
    }

    /// Returns true once both sides have sent CLOSE.
    pub fn is_closed(&self) -> bool {
        self.state == ChannelState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_channel() -> Channel {
        let mut channel = Channel::new(1, 1000, 256);
        channel.confirm(7, 500, 128);
        channel
    }

    #[test]
    fn test_open_handshake() {
        let mut channel = Channel::new(0, 2048, 512);
        assert_eq!(channel.state(), ChannelState::Opening);

        channel.confirm(42, 4096, 1024);
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.remote_id(), 42);
        assert_eq!(channel.remote_window(), 4096);
    }

    #[test]
    fn test_send_window_never_overdrawn() {
        let mut channel = open_channel();

        channel.consume_send_window(400).unwrap();
        assert_eq!(channel.remote_window(), 100);

        // Exceeding the window is refused and leaves the window intact.
        assert!(channel.consume_send_window(101).is_err());
        assert_eq!(channel.remote_window(), 100);

        channel.consume_send_window(100).unwrap();
        assert_eq!(channel.remote_window(), 0);
    }

    #[test]
    fn test_sendable_respects_window_and_packet() {
        let channel = open_channel();
        // remote window 500, remote max packet 128
        assert_eq!(channel.sendable(1000), 128);
        assert_eq!(channel.sendable(64), 64);

        let mut drained = open_channel();
        drained.consume_send_window(500).unwrap();
        assert_eq!(drained.sendable(10), 0);
    }

    #[test]
    fn test_window_adjust_credits_sender() {
        let mut channel = open_channel();
        channel.consume_send_window(500).unwrap();
        channel.add_send_window(250);
        assert_eq!(channel.remote_window(), 250);
    }

    #[test]
    fn test_receive_window_accounting() {
        let mut channel = open_channel();

        channel.note_received(300).unwrap();
        assert_eq!(channel.local_window(), 700);

        // Above half of the initial 1000: no credit yet.
        assert_eq!(channel.take_window_credit(), None);

        channel.note_received(300).unwrap();
        assert_eq!(channel.local_window(), 400);

        // Below half: replenish to the initial window.
        assert_eq!(channel.take_window_credit(), Some(600));
        assert_eq!(channel.local_window(), 1000);
    }

    #[test]
    fn test_peer_window_overrun_is_error() {
        let mut channel = open_channel();
        channel.note_received(1000).unwrap();
        assert!(channel.note_received(1).is_err());
    }

    #[test]
    fn test_eof_transitions() {
        let mut channel = open_channel();
        channel.mark_eof_sent();
        assert_eq!(channel.state(), ChannelState::EofSent);
        assert!(!channel.can_send());

        let mut channel = open_channel();
        channel.mark_eof_received();
        assert_eq!(channel.state(), ChannelState::EofRecv);
        assert!(channel.can_send());
    }

    #[test]
    fn test_close_handshake_frees_channel() {
        // We close first.
        let mut channel = open_channel();
        channel.mark_close_sent();
        assert_eq!(channel.state(), ChannelState::Closing);
        assert!(!channel.is_closed());
        channel.mark_close_received();
        assert!(channel.is_closed());

        // Peer closes first.
        let mut channel = open_channel();
        channel.mark_close_received();
        assert_eq!(channel.state(), ChannelState::Closing);
        channel.mark_close_sent();
        assert!(channel.is_closed());
    }
}
