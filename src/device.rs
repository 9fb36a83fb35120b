use crate::{
    error::{BikeError, Result},
    handshake::{Handshake, HandshakeOutcome},
    program::{LevelGovernor, SportProgram},
    protocol::{parse_frame, AccessPointStep, Command, ParsedCommand},
    telemetry::{decode_sport_data, OdometerState},
    transport::{FrameLink, ReceiveOutcome, Transport},
    types::{BikeStatus, ConnectionParams, DeviceInfo, LinkStats, Telemetry, TimeoutConfig},
};
use std::{
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

/// Everything other tasks may want to look at, behind one lock
#[derive(Debug, Default)]
struct SessionState {
    connected: bool,
    initialized: bool,
    telemetry: Telemetry,
    odometer: OdometerState,
    device_info: DeviceInfo,
    stats: LinkStats,
}

impl SessionState {
    fn snapshot(&self) -> BikeStatus {
        BikeStatus {
            connected: self.connected,
            initialized: self.initialized,
            telemetry: self.telemetry.clone(),
            device_info: self.device_info.clone(),
            stats: self.stats,
        }
    }

    fn clear_accumulators(&mut self) {
        self.telemetry.distance_km = 0.0;
        self.telemetry.calories_kcal = 0.0;
        self.odometer.clear();
    }
}

/// Cloneable read-only view of a [`BikeDevice`] session
///
/// Snapshots are whole records taken under the session lock, so a reader never
/// sees a half-decoded sport frame.
#[derive(Debug, Clone)]
pub struct StatusHandle {
    state: Arc<Mutex<SessionState>>,
}

impl StatusHandle {
    /// Current status
    pub async fn snapshot(&self) -> BikeStatus {
        self.state.lock().await.snapshot()
    }

    /// Current status, from a thread that is not running async code
    ///
    /// # Panics
    ///
    /// Panics if called from within an async execution context.
    #[must_use]
    pub fn blocking_snapshot(&self) -> BikeStatus {
        self.state.blocking_lock().snapshot()
    }
}

/// Main interface to an iSuper bike console
///
/// `BikeDevice` owns the link to the console and is the only writer on it.
/// Sport data, device information and connection flags live in one shared
/// record that other tasks read through a [`StatusHandle`].
///
/// # Examples
///
/// ```no_run
/// use isuper_bike::{BikeDevice, ConnectionParams, TimeoutConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut bike = BikeDevice::new(ConnectionParams::default(), TimeoutConfig::default());
///     bike.connect_and_initialize().await?;
///
///     bike.start_sport().await?;
///     bike.set_level(8).await?;
///
///     if bike.update_data().await? {
///         let status = bike.get_status().await;
///         println!("{} rpm, {:.1} km/h", status.telemetry.rpm, status.telemetry.speed_kmh);
///     }
///
///     bike.disconnect().await;
///     Ok(())
/// }
/// ```
pub struct BikeDevice<L = Transport> {
    link: L,
    timeouts: TimeoutConfig,
    state: Arc<Mutex<SessionState>>,
}

impl BikeDevice<Transport> {
    /// Create an unconnected device for the given controller
    #[must_use]
    pub fn new(params: ConnectionParams, timeouts: TimeoutConfig) -> Self {
        let link = Transport::new(params, timeouts.clone());
        Self::with_link(link, timeouts)
    }

    /// Open the TCP connection, waking the console between attempts
    ///
    /// A new connection starts with fresh device information and odometer.
    pub async fn connect(&mut self) -> bool {
        let connected = self.link.connect().await;

        {
            let mut state = self.state.lock().await;
            if connected {
                state.device_info = DeviceInfo::default();
                state.odometer.clear();
            }
            state.connected = connected;
            state.initialized = false;
            state.stats = self.link.stats();
        }

        if !connected {
            error!(
                "Could not connect to {}:{}",
                self.link.params().address,
                self.link.params().port
            );
        }
        connected
    }

    /// Drop the current connection (if any) and connect again
    pub async fn reconnect(&mut self) -> bool {
        info!("Reconnecting...");
        self.disconnect().await;
        self.connect().await
    }

    /// Connect and run the initialization handshake
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::ConnectionFailed`] if no connection could be made,
    /// or any error from [`Self::initialize`].
    pub async fn connect_and_initialize(&mut self) -> Result<HandshakeOutcome> {
        if !self.connect().await {
            let params = self.link.params();
            return Err(BikeError::ConnectionFailed(format!(
                "{}:{}",
                params.address, params.port
            )));
        }
        self.initialize().await
    }
}

impl<L: FrameLink> BikeDevice<L> {
    /// Wrap an existing link
    pub fn with_link(link: L, timeouts: TimeoutConfig) -> Self {
        let state = SessionState {
            connected: link.is_connected(),
            stats: link.stats(),
            ..SessionState::default()
        };
        Self {
            link,
            timeouts,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Handle for reading status from other tasks
    #[must_use]
    pub fn status_handle(&self) -> StatusHandle {
        StatusHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Current status snapshot
    pub async fn get_status(&self) -> BikeStatus {
        self.state.lock().await.snapshot()
    }

    /// Whether the link is up
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Timing configuration
    #[must_use]
    pub const fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// The underlying link
    #[must_use]
    pub const fn link(&self) -> &L {
        &self.link
    }

    async fn sync_link_state(&self) {
        let mut state = self.state.lock().await;
        state.connected = self.link.is_connected();
        state.stats = self.link.stats();
        if !state.connected {
            state.initialized = false;
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.link.is_connected() {
            Ok(())
        } else {
            Err(BikeError::Disconnected)
        }
    }

    async fn send(&mut self, command: &Command) -> Result<()> {
        self.ensure_connected()?;
        let sent = self.link.send(command).await;
        self.sync_link_state().await;
        if sent {
            Ok(())
        } else {
            Err(BikeError::Disconnected)
        }
    }

    /// Run the initialization handshake
    ///
    /// Device information is published after every poll. A console that never
    /// sends its end-of-init marker still leaves the session initialized; the
    /// outcome says which case happened.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the link is down before the
    /// handshake starts or drops while it runs.
    pub async fn initialize(&mut self) -> Result<HandshakeOutcome> {
        self.ensure_connected()?;

        let mut handshake = Handshake::new(self.timeouts.clone());
        if !handshake.begin(&mut self.link).await {
            self.sync_link_state().await;
            return Err(BikeError::Disconnected);
        }

        while !handshake.state().is_finished() && !handshake.exhausted() {
            let outcome = handshake.poll(&mut self.link).await;
            self.state.lock().await.device_info = handshake.device_info().clone();
            if outcome == ReceiveOutcome::Disconnected {
                break;
            }
        }

        let outcome = handshake.finish();
        self.sync_link_state().await;
        self.ensure_connected()?;

        self.state.lock().await.initialized = true;
        info!("=== Initialization done ({outcome:?}) ===");
        Ok(outcome)
    }

    /// Select sport mode and start the workout
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if either frame could not be sent.
    pub async fn start_sport(&mut self) -> Result<()> {
        info!("Starting sport mode");
        self.send(&Command::SelectSportMode).await?;
        sleep(Duration::from_millis(self.timeouts.command_gap_ms)).await;
        self.send(&Command::Run).await
    }

    /// Pause the workout
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the frame could not be sent.
    pub async fn pause_sport(&mut self) -> Result<()> {
        info!("Pausing sport mode");
        self.send(&Command::Pause).await
    }

    /// Set the resistance level within the range the console reported
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the frame could not be sent.
    pub async fn set_level(&mut self, level: i32) -> Result<()> {
        let (min, max) = {
            let state = self.state.lock().await;
            (state.device_info.resistance_min, state.device_info.resistance_max)
        };
        if max <= 0 {
            warn!("Resistance range unknown, level {level} will be clamped to the minimum");
        }
        self.set_level_in_range(level, min, max).await
    }

    /// Set the resistance level within an explicit range
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the frame could not be sent.
    pub async fn set_level_in_range(&mut self, level: i32, min: i32, max: i32) -> Result<()> {
        let command = Command::set_level(level, min, max);
        debug!("Level {level} -> {command}");
        self.send(&command).await
    }

    /// Clear accumulated data on the console and locally
    ///
    /// Local distance, calories and odometer are reset even if the console
    /// cannot be reached.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the frame could not be sent.
    pub async fn clear_data(&mut self) -> Result<()> {
        self.state.lock().await.clear_accumulators();
        info!("Cleared accumulated data");
        self.send(&Command::ClearData).await
    }

    /// Request and decode one round of sport data
    ///
    /// Returns `Ok(true)` if a sport frame was decoded, `Ok(false)` if nothing
    /// usable arrived within the telemetry timeout.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the link is down or drops.
    pub async fn update_data(&mut self) -> Result<bool> {
        self.send(&Command::SelectSportMode).await?;

        let wait = Duration::from_millis(self.timeouts.telemetry_timeout_ms);
        let frames = match self.link.receive(wait).await {
            ReceiveOutcome::Frames(frames) => frames,
            ReceiveOutcome::NoData => return Ok(false),
            ReceiveOutcome::Disconnected => {
                self.sync_link_state().await;
                return Err(BikeError::Disconnected);
            }
        };

        let mut updated = false;
        {
            let mut state = self.state.lock().await;
            let SessionState {
                telemetry,
                odometer,
                device_info,
                ..
            } = &mut *state;

            for frame in &frames {
                match parse_frame(frame) {
                    ParsedCommand::SportData(payload) => {
                        let report = decode_sport_data(
                            &payload,
                            telemetry,
                            odometer,
                            device_info.wheel_diameter_inches,
                            SystemTime::now(),
                        );
                        updated |= report.is_success();
                    }
                    ParsedCommand::Unknown { .. } => {}
                    other => {
                        if !device_info.apply(&other) {
                            debug!("Ignoring {other:?} while polling");
                        }
                    }
                }
            }
        }

        if updated && !self.link.send(&Command::SportDataAck).await {
            warn!("Sport data acknowledgement not delivered");
        }
        self.sync_link_state().await;

        Ok(updated)
    }

    /// Wait for the console to echo an access point step
    async fn await_access_point_ack(
        &mut self,
        step: AccessPointStep,
        wait: Duration,
    ) -> Result<bool> {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }

            match self.link.receive(remaining).await {
                ReceiveOutcome::Frames(frames) => {
                    let acked = frames
                        .iter()
                        .any(|f| parse_frame(f) == ParsedCommand::AccessPointAck(step));
                    if acked {
                        return Ok(true);
                    }
                }
                ReceiveOutcome::NoData => {}
                ReceiveOutcome::Disconnected => {
                    self.sync_link_state().await;
                    return Err(BikeError::Disconnected);
                }
            }
        }
    }

    /// Switch the console's Wi-Fi module to access point mode
    ///
    /// Sends the SSID, the passphrase and the switch command in turn. Missing
    /// echoes for the first two are tolerated; the switch has to be confirmed.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidParameters`] if either value is empty or
    /// contains a frame delimiter, [`BikeError::AccessPoint`] if the console
    /// does not confirm the switch, or [`BikeError::Disconnected`].
    pub async fn configure_access_point(&mut self, ssid: &str, password: &str) -> Result<()> {
        for (name, value) in [("SSID", ssid), ("password", password)] {
            if value.is_empty() {
                return Err(BikeError::InvalidParameters(format!("{name} must not be empty")));
            }
            if value.contains(['<', '>']) {
                return Err(BikeError::InvalidParameters(format!(
                    "{name} must not contain '<' or '>'"
                )));
            }
        }

        info!("Configuring access point mode (SSID {ssid})");
        let short = Duration::from_millis(self.timeouts.access_point_timeout_ms);
        let long = Duration::from_millis(self.timeouts.access_point_switch_timeout_ms);

        self.send(&Command::AccessPointSsid(ssid.to_string())).await?;
        if !self.await_access_point_ack(AccessPointStep::Ssid, short).await? {
            warn!("No SSID confirmation, continuing");
        }

        self.send(&Command::AccessPointKey(password.to_string())).await?;
        if !self.await_access_point_ack(AccessPointStep::Key, short).await? {
            warn!("No password confirmation, continuing");
        }

        self.send(&Command::AccessPointSwitch).await?;
        if !self.await_access_point_ack(AccessPointStep::Switch, long).await? {
            return Err(BikeError::AccessPoint(
                "console did not confirm the switch".to_string(),
            ));
        }

        info!("Access point mode configured");
        Ok(())
    }

    /// Drive the bike from a running program
    ///
    /// The program level is clamped to the console's resistance range first.
    /// Returns the level sent, if the governor decided a change was due.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::Disconnected`] if the level could not be sent.
    pub async fn apply_program(
        &mut self,
        program: &mut SportProgram,
        governor: &mut LevelGovernor,
        now: Instant,
    ) -> Result<Option<u32>> {
        let (bike_level, range) = {
            let state = self.state.lock().await;
            (state.telemetry.level, state.device_info.resistance_range())
        };
        // compare what will actually be sent, not the raw program level
        let desired = program.current_level_at(now).map(|level| match range {
            Some((min, max)) => level
                .max(u32::try_from(min).unwrap_or(0))
                .min(u32::try_from(max).unwrap_or(0)),
            None => level,
        });

        let Some(level) = governor.poll(now, desired, bike_level) else {
            return Ok(None);
        };

        info!("Program {}: level {bike_level} -> {level}", program.name());
        self.set_level(i32::try_from(level).unwrap_or(i32::MAX)).await?;
        Ok(Some(level))
    }

    /// Tell the console we are leaving and close the link
    pub async fn disconnect(&mut self) {
        self.link.disconnect().await;
        let mut state = self.state.lock().await;
        state.connected = false;
        state.initialized = false;
        state.stats = self.link.stats();
    }
}
