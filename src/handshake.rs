//! Initialization handshake.
//!
//! After `<EQ_>` the console walks through a fixed sequence, announcing one
//! piece of information per frame and waiting for the matching acknowledgement:
//!
//! ```text
//! EQ_OK
//! EP_SUPERWIGH   -> EP_OK
//! ER_1-20        -> ER_OK
//! EA_<mac>       -> EA_OK
//! ED_2100        -> ED_OK
//! EM_<marker>    -> EM_OK
//! ET_<equipment> -> ET_OK      (some consoles only)
//! Ez_1E          -> Ez_OK, CP_300
//! ```
//!
//! The console ignores acknowledgements that arrive too close together, so
//! every reply is followed by a pacing delay.

use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::{
    protocol::{parse_frame, Command, ParsedCommand},
    transport::{FrameLink, ReceiveOutcome},
    types::{DeviceInfo, TimeoutConfig},
};

/// Handshake progress; variants are ordered and the machine never moves back
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    /// `<EQ_>` not answered yet
    Start,
    /// Console accepted the init request
    InitAcknowledged,
    /// Password received and acknowledged
    PasswordAcknowledged,
    /// Resistance range received and acknowledged
    ResistanceAcknowledged,
    /// MAC address received and acknowledged
    MacAcknowledged,
    /// Wheel diameter received and acknowledged
    DiameterAcknowledged,
    /// Memory marker received and acknowledged
    MemoryAcknowledged,
    /// Equipment type / vendor received and acknowledged
    EquipmentAcknowledged,
    /// End of initialization acknowledged
    Complete,
    /// Console told to pause; ready for sport commands
    Paused,
}

impl HandshakeState {
    /// Nothing left to exchange
    #[must_use]
    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Complete | Self::Paused)
    }

    /// Transition that needs no inbound frame
    #[must_use]
    pub const fn follow_up(self) -> Option<(Self, Command)> {
        match self {
            Self::Complete => Some((Self::Paused, Command::Pause)),
            _ => None,
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::InitAcknowledged => "init acknowledged",
            Self::PasswordAcknowledged => "password acknowledged",
            Self::ResistanceAcknowledged => "resistance acknowledged",
            Self::MacAcknowledged => "mac acknowledged",
            Self::DiameterAcknowledged => "diameter acknowledged",
            Self::MemoryAcknowledged => "memory acknowledged",
            Self::EquipmentAcknowledged => "equipment acknowledged",
            Self::Complete => "complete",
            Self::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// Result of feeding one parsed frame to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// State after the frame
    pub next: HandshakeState,
    /// Acknowledgement to send, if any
    pub reply: Option<Command>,
}

/// Advance the handshake by one parsed frame
///
/// Announcements are acknowledged even when they arrive out of order, since the
/// console waits for the acknowledgement either way, but the state only ever
/// moves forward. Once finished, frames are no longer handshake business.
#[must_use]
pub fn transition(state: HandshakeState, parsed: &ParsedCommand) -> Transition {
    use HandshakeState as S;

    let stay = Transition {
        next: state,
        reply: None,
    };
    if state.is_finished() {
        return stay;
    }

    let (target, reply) = match parsed {
        ParsedCommand::InitAck => (S::InitAcknowledged, None),
        ParsedCommand::Password(_) => (S::PasswordAcknowledged, Some(Command::PasswordAck)),
        ParsedCommand::Resistance { .. } => {
            (S::ResistanceAcknowledged, Some(Command::ResistanceAck))
        }
        ParsedCommand::Mac(_) => (S::MacAcknowledged, Some(Command::MacAck)),
        ParsedCommand::Diameter(_) => (S::DiameterAcknowledged, Some(Command::DiameterAck)),
        ParsedCommand::Memory(_) => (S::MemoryAcknowledged, Some(Command::MemoryAck)),
        ParsedCommand::Equipment(_) => (S::EquipmentAcknowledged, Some(Command::EquipmentAck)),
        ParsedCommand::InitComplete => (S::Complete, Some(Command::InitCompleteAck)),
        _ => return stay,
    };

    if target < state {
        debug!("Late handshake frame {parsed:?} while {state}");
    }

    Transition {
        next: state.max(target),
        reply,
    }
}

/// Pacing the console needs after `command`
#[must_use]
pub fn pacing(command: &Command, timeouts: &TimeoutConfig) -> Duration {
    match command {
        Command::ResistanceAck => Duration::from_millis(timeouts.resistance_ack_delay_ms),
        Command::InitRequest => Duration::from_millis(timeouts.init_settle_ms),
        _ => Duration::from_millis(timeouts.ack_delay_ms),
    }
}

/// How initialization ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeOutcome {
    /// The console sent its end-of-init marker
    Completed,
    /// Polls ran out (or the link dropped) first; continuing anyway
    Degraded {
        /// Furthest state reached
        reached: HandshakeState,
    },
}

impl HandshakeOutcome {
    /// Whether the full sequence was seen
    #[must_use]
    pub const fn is_complete(self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Drives the handshake over a [`FrameLink`]
///
/// Collects the [`DeviceInfo`] announced along the way.
#[derive(Debug)]
pub struct Handshake {
    timeouts: TimeoutConfig,
    state: HandshakeState,
    device_info: DeviceInfo,
    polls: u32,
}

impl Handshake {
    /// Fresh handshake with default device info
    #[must_use]
    pub fn new(timeouts: TimeoutConfig) -> Self {
        Self {
            timeouts,
            state: HandshakeState::Start,
            device_info: DeviceInfo::default(),
            polls: 0,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Information collected so far
    #[must_use]
    pub const fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Polls used so far
    #[must_use]
    pub const fn polls(&self) -> u32 {
        self.polls
    }

    /// Whether the poll budget is spent
    #[must_use]
    pub const fn exhausted(&self) -> bool {
        self.polls >= self.timeouts.handshake_max_polls
    }

    async fn send_paced<L: FrameLink + ?Sized>(&self, link: &mut L, command: &Command) -> bool {
        let sent = link.send(command).await;
        sleep(pacing(command, &self.timeouts)).await;
        sent
    }

    /// Send the init request; `false` if the link refused it
    pub async fn begin<L: FrameLink + ?Sized>(&mut self, link: &mut L) -> bool {
        info!("=== Starting initialization ===");
        self.send_paced(link, &Command::InitRequest).await
    }

    /// Wait for one batch of frames and react to it
    ///
    /// Returns the outcome of the receive so callers can stop on a dead link.
    pub async fn poll<L: FrameLink + ?Sized>(&mut self, link: &mut L) -> ReceiveOutcome {
        self.polls += 1;

        let wait = Duration::from_millis(self.timeouts.handshake_poll_timeout_ms);
        let outcome = link.receive(wait).await;

        match &outcome {
            ReceiveOutcome::Frames(frames) => {
                for frame in frames {
                    let parsed = parse_frame(frame);
                    self.handle(link, &parsed).await;
                }
            }
            ReceiveOutcome::NoData => debug!("Timeout waiting for handshake frames..."),
            ReceiveOutcome::Disconnected => warn!("Link dropped during handshake"),
        }

        outcome
    }

    async fn handle<L: FrameLink + ?Sized>(&mut self, link: &mut L, parsed: &ParsedCommand) {
        self.device_info.apply(parsed);

        let step = transition(self.state, parsed);
        if step.next != self.state {
            debug!("Handshake: {} -> {}", self.state, step.next);
        }
        self.state = step.next;

        if let Some(reply) = step.reply {
            self.send_paced(link, &reply).await;
        }

        if let Some((next, command)) = self.state.follow_up() {
            self.send_paced(link, &command).await;
            self.state = next;
            info!("Init complete");
        }
    }

    /// Conclude: completed if the end marker was seen, degraded otherwise
    #[must_use]
    pub fn finish(&self) -> HandshakeOutcome {
        if self.state.is_finished() {
            HandshakeOutcome::Completed
        } else {
            warn!("Init incomplete ({}) but continuing...", self.state);
            HandshakeOutcome::Degraded {
                reached: self.state,
            }
        }
    }

    /// Run the whole exchange: init request, bounded polling, conclusion
    ///
    /// Returns `None` only if the init request could not be sent at all.
    pub async fn run<L: FrameLink + ?Sized>(&mut self, link: &mut L) -> Option<HandshakeOutcome> {
        if !self.begin(link).await {
            return None;
        }

        while !self.state.is_finished() && !self.exhausted() {
            if self.poll(link).await == ReceiveOutcome::Disconnected {
                break;
            }
        }

        Some(self.finish())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{codec::Frame, types::LinkStats};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    /// Link that replays canned reads and records what was sent
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedLink {
        pub reads: VecDeque<ReceiveOutcome>,
        pub sent: Vec<String>,
        pub connected: bool,
        pub stats: LinkStats,
    }

    impl ScriptedLink {
        pub(crate) fn new(reads: &[&str]) -> Self {
            let mut link = Self {
                connected: true,
                ..Self::default()
            };
            for read in reads {
                link.push_read(read);
            }
            link
        }

        pub(crate) fn push_read(&mut self, read: &str) {
            let mut codec = crate::codec::FrameCodec::new();
            let frames: Vec<Frame> = codec.push(read.as_bytes());
            self.reads.push_back(if frames.is_empty() {
                ReceiveOutcome::NoData
            } else {
                ReceiveOutcome::Frames(frames)
            });
        }
    }

    #[async_trait]
    impl FrameLink for ScriptedLink {
        async fn send(&mut self, command: &Command) -> bool {
            if !self.connected {
                return false;
            }
            self.sent.push(command.to_frame());
            self.stats.messages_sent += 1;
            true
        }

        async fn receive(&mut self, _wait: Duration) -> ReceiveOutcome {
            if !self.connected {
                return ReceiveOutcome::Disconnected;
            }
            let outcome = self.reads.pop_front().unwrap_or(ReceiveOutcome::NoData);
            if matches!(outcome, ReceiveOutcome::Frames(_)) {
                self.stats.messages_received += 1;
            }
            if outcome == ReceiveOutcome::Disconnected {
                self.connected = false;
            }
            outcome
        }

        async fn disconnect(&mut self) {
            if self.connected {
                self.sent.push(Command::Terminate.to_frame());
            }
            self.connected = false;
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn stats(&self) -> LinkStats {
            self.stats
        }
    }

    pub(crate) fn instant_timeouts() -> TimeoutConfig {
        TimeoutConfig {
            init_settle_ms: 0,
            ack_delay_ms: 0,
            resistance_ack_delay_ms: 0,
            handshake_poll_timeout_ms: 1,
            command_gap_ms: 0,
            telemetry_timeout_ms: 1,
            access_point_timeout_ms: 1,
            access_point_switch_timeout_ms: 1,
            ..TimeoutConfig::default()
        }
    }

    #[test]
    fn test_transition_sequence() {
        use HandshakeState as S;

        let steps = [
            (ParsedCommand::InitAck, S::InitAcknowledged, None),
            (
                ParsedCommand::Password("SUPERWIGH".to_string()),
                S::PasswordAcknowledged,
                Some(Command::PasswordAck),
            ),
            (
                ParsedCommand::Resistance { min: 1, max: 20 },
                S::ResistanceAcknowledged,
                Some(Command::ResistanceAck),
            ),
            (ParsedCommand::Mac(None), S::MacAcknowledged, Some(Command::MacAck)),
            (
                ParsedCommand::Diameter(21.0),
                S::DiameterAcknowledged,
                Some(Command::DiameterAck),
            ),
            (
                ParsedCommand::InitComplete,
                S::Complete,
                Some(Command::InitCompleteAck),
            ),
        ];

        let mut state = S::Start;
        for (parsed, expected_state, expected_reply) in steps {
            let step = transition(state, &parsed);
            assert_eq!(step.next, expected_state);
            assert_eq!(step.reply, expected_reply);
            state = step.next;
        }

        assert_eq!(state.follow_up(), Some((S::Paused, Command::Pause)));
    }

    #[test]
    fn test_transition_never_moves_back() {
        let step = transition(
            HandshakeState::MacAcknowledged,
            &ParsedCommand::Password("SUPERWIGH".to_string()),
        );
        assert_eq!(step.next, HandshakeState::MacAcknowledged);
        assert_eq!(step.reply, Some(Command::PasswordAck));
    }

    #[test]
    fn test_transition_ignores_frames_after_finish() {
        let step = transition(HandshakeState::Paused, &ParsedCommand::InitComplete);
        assert_eq!(step.next, HandshakeState::Paused);
        assert!(step.reply.is_none());

        let step = transition(HandshakeState::Start, &ParsedCommand::CpAck);
        assert_eq!(step.next, HandshakeState::Start);
        assert!(step.reply.is_none());
    }

    #[test]
    fn test_pacing() {
        let timeouts = TimeoutConfig::default();
        assert_eq!(
            pacing(&Command::ResistanceAck, &timeouts),
            Duration::from_millis(500)
        );
        assert_eq!(
            pacing(&Command::MacAck, &timeouts),
            Duration::from_millis(100)
        );
    }

    #[tokio::test]
    async fn test_full_handshake() {
        let mut link = ScriptedLink::new(&[
            "<EQ_OK><EP_SUPERWIGH>",
            "<ER_1-20>",
            "",
            "<EA_001122AABBCC\r\n><ED_2100>",
            "<EM_0><ET_Upright>",
            "<Ez_1E>",
        ]);
        let mut handshake = Handshake::new(instant_timeouts());

        let outcome = handshake.run(&mut link).await;

        assert_eq!(outcome, Some(HandshakeOutcome::Completed));
        assert_eq!(handshake.state(), HandshakeState::Paused);
        assert_eq!(
            link.sent,
            vec![
                "<EQ_>", "<EP_OK>", "<ER_OK>", "<EA_OK>", "<ED_OK>", "<EM_OK>", "<ET_OK>",
                "<Ez_OK>", "<CP_300>"
            ]
        );

        let info = handshake.device_info();
        assert_eq!(info.resistance_range(), Some((1, 20)));
        assert_eq!(info.mac_address.as_deref(), Some("00:11:22:AA:BB:CC"));
        assert_eq!(info.equipment.as_deref(), Some("Upright"));
    }

    #[tokio::test]
    async fn test_silent_console_degrades_after_poll_ceiling() {
        let mut link = ScriptedLink::new(&["<EQ_OK><EP_SUPERWIGH>"]);
        let mut handshake = Handshake::new(instant_timeouts());

        let outcome = handshake.run(&mut link).await;

        assert_eq!(
            outcome,
            Some(HandshakeOutcome::Degraded {
                reached: HandshakeState::PasswordAcknowledged
            })
        );
        assert_eq!(handshake.polls(), 10);
        assert_eq!(link.sent, vec!["<EQ_>", "<EP_OK>"]);
    }

    #[tokio::test]
    async fn test_dead_link_cannot_begin() {
        let mut link = ScriptedLink::default();
        let mut handshake = Handshake::new(instant_timeouts());
        assert_eq!(handshake.run(&mut link).await, None);
    }

    #[tokio::test]
    async fn test_link_drop_stops_polling() {
        let mut link = ScriptedLink::new(&["<EQ_OK>"]);
        link.reads.push_back(ReceiveOutcome::Disconnected);
        let mut handshake = Handshake::new(instant_timeouts());

        let outcome = handshake.run(&mut link).await;

        assert_eq!(handshake.polls(), 2);
        assert!(!outcome.is_some_and(HandshakeOutcome::is_complete));
    }
}
