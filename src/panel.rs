// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation of src/texecom.cpp

use std::time::{Duration, Instant};

use chrono::{Datelike, Local, Timelike};
use tracing::{debug, error, info, warn};

use crate::alarm::{AlarmState, AlarmTracker};
use crate::config::{ArmMode, PanelOptions};
use crate::error::{Result, TexecomError};
use crate::event::{EventSink, PanelEvent};
use crate::framer::{Frame, FrameKind, LinkFramer};
use crate::protocol::{self, Classified, Command, Key};
use crate::scheduler::{CommandScheduler, Deadline};
use crate::sequencer::{ActiveTask, ArmStage, DisarmStage, PinEntry, TaskResult};
use crate::signals::{NoSignals, SignalSource, SignalWatcher, StatusSignals};
use crate::simple::{ActiveProtocol, SimpleSession};
use crate::store::CodeStore;
use crate::transport::PanelPort;

/// Time budget for a full arm sequence.
const ARM_TIMEOUT: Duration = Duration::from_secs(15);

/// Time budget for a disarm sequence. Shorter than arm on purpose: a
/// disarm that drags on usually races an entry timer.
const DISARM_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the panel may sit in Arming before we re-check; exit timers
/// never run this long.
const ARMING_STUCK_TIMEOUT: Duration = Duration::from_secs(45);

/// Longest access code a Premier panel accepts.
const MAX_CODE_LENGTH: usize = 8;

/// UDL codes are exactly this long.
const UDL_CODE_LENGTH: usize = 6;

/// Driver for a Texecom Premier panel wired up through its com port.
///
/// The panel offers no command API for arming, so the driver works the
/// keypad instead: it emulates a Crestron touchscreen, typing keystrokes
/// and reading the LCD text back, and confirms everything it believes
/// against the panel's wired status outputs. A secondary "Simple"
/// protocol handles the few things the keypad cannot (identity, time
/// sync, direct arm commands), authenticated with the site's UDL code.
///
/// Everything runs inside [`poll`](Texecom::poll), which the host calls
/// on a short cadence (10 ms works well) with a monotonic timestamp.
/// There is no internal concurrency: waiting is stored deadlines, writes
/// are fire-and-forget, and acknowledgement only ever arrives as later
/// serial traffic.
///
/// # Example
///
/// ```no_run
/// use std::time::{Duration, Instant};
/// use texecom_serial_bridge::{PanelOptions, SerialLink, Texecom};
///
/// fn main() -> anyhow::Result<()> {
///     let port = SerialLink::open("/dev/ttyS1")?;
///     let options = PanelOptions::builder()
///         .idle_text("The Cooper's")
///         .users(["system", "Kevin"])
///         .build();
///     let mut panel = Texecom::new(port, options, Vec::new());
///
///     panel.disarm("1234", Instant::now())?;
///     loop {
///         panel.poll(Instant::now())?;
///         for event in panel.drain_events() {
///             println!("{:?}", event);
///         }
///         std::thread::sleep(Duration::from_millis(10));
///     }
/// }
/// ```
pub struct Texecom<P: PanelPort, H: EventSink> {
    port: P,
    events: H,
    options: PanelOptions,
    idle_banner: Vec<u8>,
    signals: Box<dyn SignalSource + Send>,
    store: Option<Box<dyn CodeStore + Send>>,
    udl_code: String,
    framer: LinkFramer,
    alarm: AlarmTracker,
    task: Option<ActiveTask>,
    task_deadline: Deadline,
    pin: PinEntry,
    scheduler: CommandScheduler,
    simple: SimpleSession,
    watcher: SignalWatcher,
    bootstrapped: bool,
}

impl<P: PanelPort, H: EventSink> Texecom<P, H> {
    /// Create a driver over `port`, delivering notifications to `events`.
    pub fn new(port: P, options: PanelOptions, events: H) -> Self {
        let idle_banner = format!("\"  {}", options.idle_text).into_bytes();
        Texecom {
            port,
            events,
            idle_banner,
            options,
            signals: Box::new(NoSignals),
            store: None,
            udl_code: String::new(),
            framer: LinkFramer::new(),
            alarm: AlarmTracker::new(),
            task: None,
            task_deadline: Deadline::default(),
            pin: PinEntry::default(),
            scheduler: CommandScheduler::new(),
            simple: SimpleSession::new(),
            watcher: SignalWatcher::new(),
            bootstrapped: false,
        }
    }

    /// Attach a source for the panel's wired status outputs.
    pub fn with_signals(mut self, source: impl SignalSource + Send + 'static) -> Self {
        self.signals = Box::new(source);
        self
    }

    /// Attach a store for the UDL code and load whatever it holds.
    pub fn with_code_store(mut self, store: impl CodeStore + Send + 'static) -> Self {
        let mut store = Box::new(store);
        match store.load() {
            Ok(Some(code)) => {
                info!("UDL code loaded from store");
                self.udl_code = code;
            }
            Ok(None) => info!("No UDL code stored yet"),
            Err(e) => warn!("Failed to load UDL code: {}", e),
        }
        self.store = Some(store);
        self
    }

    pub fn alarm_state(&self) -> AlarmState {
        self.alarm.state()
    }

    pub fn triggered_zone(&self) -> Option<u16> {
        self.alarm.triggered_zone()
    }

    pub fn active_task(&self) -> Option<ActiveTask> {
        self.task
    }

    pub fn active_protocol(&self) -> ActiveProtocol {
        self.simple.active()
    }

    /// Replace the UDL code, persisting it if a store is attached.
    pub fn set_udl_code(&mut self, code: &str) -> Result<()> {
        if code.len() != UDL_CODE_LENGTH {
            warn!("Rejected UDL code of length {}", code.len());
            return Err(TexecomError::InvalidCodeLength { len: code.len() });
        }
        self.udl_code.clear();
        self.udl_code.push_str(code);
        if let Some(store) = &mut self.store {
            store.save(code)?;
            info!("UDL code updated and persisted");
        } else {
            info!("UDL code updated (no store attached, not persisted)");
        }
        Ok(())
    }

    /// Start an arm sequence with the given user code.
    ///
    /// Returns `Ok(false)` if a task is already running or the code is too
    /// long; the sequence itself completes (or aborts) asynchronously
    /// across later polls.
    pub fn arm(&mut self, code: &str, mode: ArmMode, now: Instant) -> Result<bool> {
        if self.task.is_some() {
            info!("ARMING: Request already in progress");
            return Ok(false);
        }
        if code.len() > MAX_CODE_LENGTH {
            warn!("ARMING: Access code too long");
            return Ok(false);
        }
        self.pin.set_code(code);
        self.scheduler.reset_attempts();
        self.task = Some(ActiveTask::Arm {
            mode,
            stage: ArmStage::Start,
        });
        self.arm_task(TaskResult::None, now)?;
        Ok(true)
    }

    /// Start a disarm sequence with the given user code.
    ///
    /// Same contract as [`arm`](Texecom::arm).
    pub fn disarm(&mut self, code: &str, now: Instant) -> Result<bool> {
        if self.task.is_some() {
            info!("DISARMING: Request already in progress");
            return Ok(false);
        }
        if code.len() > MAX_CODE_LENGTH {
            warn!("DISARMING: Access code too long");
            return Ok(false);
        }
        self.pin.set_code(code);
        self.scheduler.reset_attempts();
        self.task = Some(ActiveTask::Disarm {
            stage: DisarmStage::Start,
        });
        self.disarm_task(TaskResult::None, now)?;
        Ok(true)
    }

    /// Diagnostic console: a small fixed command vocabulary, mostly for
    /// exercising the Simple protocol. The empty string starts a Simple
    /// login; `T` followed by anything but `?` syncs the panel clock to
    /// local time.
    pub fn send_test(&mut self, text: &str, now: Instant) -> Result<()> {
        if text.is_empty() {
            if self.simple.active() != ActiveProtocol::Simple {
                info!("Simple protocol login required first");
                self.simple.begin_login();
            } else {
                info!("Simple protocol session already valid");
            }
        } else if text == "STATUS" {
            self.request(Command::ArmedState, now)?;
        } else if text == "LOGOUT" {
            self.simple.begin_logout();
            self.port.write_all(protocol::SIMPLE_LOGOUT)?;
        } else if text == "IDENTITY" {
            self.port.write_all(protocol::SIMPLE_IDENTITY)?;
        } else if text == "FULL-ARM" {
            self.port.write_all(&protocol::simple_full_arm())?;
        } else if text == "PART-ARM" {
            self.port.write_all(&protocol::simple_part_arm())?;
        } else if let Some(rest) = text.strip_prefix('T') {
            if rest == "?" {
                self.port.write_all(protocol::SIMPLE_TIME_QUERY)?;
            } else {
                let local = Local::now();
                let frame = protocol::simple_time_sync(
                    local.day() as u8,
                    local.month() as u8,
                    (local.year() - 2000).clamp(0, 255) as u8,
                    local.hour() as u8,
                    local.minute() as u8,
                );
                self.port.write_all(&frame)?;
            }
        }
        Ok(())
    }

    /// Advance the driver. Drains the serial link (processing at most one
    /// message per call), pumps PIN entry, fires due timers, and scans the
    /// wired status outputs.
    pub fn poll(&mut self, now: Instant) -> Result<()> {
        if !self.bootstrapped {
            self.bootstrapped = true;
            self.check_signals(now);
            // Without a definite signal, assume disarmed until told otherwise.
            if self.alarm.state() == AlarmState::Unknown {
                self.alarm.update_state(
                    AlarmState::Disarmed,
                    now,
                    &mut self.scheduler,
                    &mut self.events,
                );
            }
        }

        let mut frame = None;
        while let Some(byte) = self.port.read_byte()? {
            if let Some(done) = self.framer.push(byte, now) {
                frame = Some(done);
                break;
            }
        }
        if frame.is_none() {
            frame = self.framer.poll_stale(now);
        }
        if let Some(frame) = frame {
            if frame.kind == FrameKind::Line {
                self.scheduler.reset_incomplete_retries();
            }
            self.handle_message(&frame, now)?;
        }

        // Paced PIN entry.
        if let Some(step) = self.pin.poll(now) {
            if let Some(digit) = step.digit {
                self.send_key(Key::Digit(digit))?;
            }
            if step.complete && self.task.is_some() {
                self.process_result(TaskResult::LoginComplete, now)?;
            }
        }

        // A panel stuck in Arming means we missed the settle message.
        if self.task.is_none()
            && self.alarm.state() == AlarmState::Arming
            && self.alarm.unchanged_for(ARMING_STUCK_TIMEOUT, now)
        {
            info!("Arming state outlived the exit timer, re-checking arm state");
            self.alarm.touch(now);
            self.request(Command::ArmedState, now)?;
        }

        if let Some(command) = self.scheduler.take_due(now) {
            self.request(command, now)?;
        }

        if self.task_deadline.due(now) {
            self.process_result(TaskResult::Timeout, now)?;
        }

        // Screen requests are lossy; retry a stalled one, up to the budget.
        if self.task.is_some_and(|t| t.awaits_screen())
            && !self.framer.is_buffering()
            && !self.scheduler.delayed_pending()
            && self.scheduler.stall_due(now)
        {
            info!("No reply to screen request, retrying");
            self.scheduler.note_stall_attempt();
            self.request(Command::ScreenState, now)?;
        }

        if self.simple.login_frame_due(now) {
            debug!("Sending Simple protocol login");
            self.simple.note_login_sent(now);
            let login = protocol::simple_login(&self.udl_code);
            self.port.write_all(&login)?;
        }

        if self.simple.auto_logout_due(now) {
            info!("Simple protocol idle too long, logging out");
            self.simple.note_auto_logout();
            self.port.write_all(protocol::SIMPLE_LOGOUT)?;
        }

        self.check_signals(now);
        Ok(())
    }

    fn handle_message(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let message = frame.data.as_slice();
        debug!("Message received: {}", String::from_utf8_lossy(message));
        match protocol::classify(message, &self.idle_banner) {
            Classified::ZoneUpdate { zone, digit } => {
                self.alarm.update_zone(zone, digit, &mut self.events);
            }
            Classified::Login { user_index, tag } => {
                let method = if tag { "tag" } else { "code" };
                match self.options.users.get(usize::from(user_index)) {
                    Some(name) => info!("User logged in with {}: {}", method, name),
                    None => info!(
                        "User logged in with {}: index {} not in user directory",
                        method, user_index
                    ),
                }
                if self.task.is_some() {
                    self.process_result(TaskResult::LoginConfirmed, now)?;
                }
            }
            Classified::Task(result) => {
                if self.task.is_some() {
                    self.process_result(result, now)?;
                }
            }
            Classified::WelcomeBack => {
                if self.awaiting_confirm_prompt() {
                    self.scheduler
                        .delay(Command::ScreenState, Duration::from_millis(500), now);
                }
            }
            Classified::ZoneActiveReject => {
                info!("Failed to arm: a zone was active while arming");
                self.request(Command::ArmedState, now)?;
            }
            Classified::SimpleOk => self.simple.handle_ok(now),
            Classified::SimpleError => self.simple.handle_error(),
            Classified::Recognized => {}
            Classified::Unknown => self.handle_unknown(frame, now)?,
        }
        Ok(())
    }

    fn awaiting_confirm_prompt(&self) -> bool {
        matches!(
            self.task,
            Some(ActiveTask::Arm {
                stage: ArmStage::WaitForArmPrompt,
                ..
            }) | Some(ActiveTask::Disarm {
                stage: DisarmStage::WaitForDisarmPrompt,
            })
        )
    }

    fn handle_unknown(&mut self, frame: &Frame, now: Instant) -> Result<()> {
        let message = frame.data.as_slice();
        if message.first() == Some(&b'"') {
            warn!(
                "Unknown Crestron message: {}",
                String::from_utf8_lossy(message)
            );
        } else {
            warn!(
                "Unknown non-Crestron message: {}",
                String::from_utf8_lossy(message)
            );
            if message.first().is_some_and(|&b| !(64..=126).contains(&b)) {
                debug!("Raw bytes: {:?}", message);
            }
        }
        let Some(task) = self.task else {
            return Ok(());
        };
        if !frame.is_complete() {
            // Probably our reply, mangled. Re-ask rather than abort.
            if self.scheduler.next_incomplete_retry() {
                if task.awaits_arm_state() {
                    info!("Incomplete message, retrying arm state request");
                    self.request(Command::ArmedState, now)?;
                } else if task.awaits_screen() {
                    info!("Incomplete message, retrying screen request");
                    self.request(Command::ScreenState, now)?;
                }
            } else {
                warn!("Incomplete message retry budget exhausted");
            }
        } else {
            self.process_result(TaskResult::UnknownMessage, now)?;
        }
        Ok(())
    }

    fn request(&mut self, command: Command, now: Instant) -> Result<()> {
        debug!("Requesting {}", command.as_str());
        self.port.write_all(command.wire())?;
        self.scheduler.note_command_sent(now);
        Ok(())
    }

    fn send_key(&mut self, key: Key) -> Result<()> {
        self.port.write_all(key.wire().as_bytes())
    }

    fn process_result(&mut self, result: TaskResult, now: Instant) -> Result<()> {
        if result == TaskResult::Timeout {
            info!("Task timed out");
        }
        match self.task {
            Some(ActiveTask::Arm { .. }) => self.arm_task(result, now),
            Some(ActiveTask::Disarm { .. }) => self.disarm_task(result, now),
            None => Ok(()),
        }
    }

    fn set_arm_stage(&mut self, stage: ArmStage) {
        if let Some(ActiveTask::Arm { mode, .. }) = self.task {
            self.task = Some(ActiveTask::Arm { mode, stage });
        }
    }

    fn set_disarm_stage(&mut self, stage: DisarmStage) {
        self.task = Some(ActiveTask::Disarm { stage });
    }

    fn disarm_task(&mut self, result: TaskResult, now: Instant) -> Result<()> {
        let Some(ActiveTask::Disarm { stage }) = self.task else {
            return Ok(());
        };
        match stage {
            DisarmStage::Start => {
                info!("DISARMING: Starting disarm process");
                self.task_deadline.set(now + DISARM_TIMEOUT);
                self.set_disarm_stage(DisarmStage::ConfirmArmed);
                self.request(Command::ArmedState, now)?;
            }
            DisarmStage::ConfirmArmed => match result {
                TaskResult::IsArmed => {
                    info!("DISARMING: Confirmed armed. Confirming idle screen");
                    self.set_disarm_stage(DisarmStage::ConfirmIdleScreen);
                    self.request(Command::ScreenState, now)?;
                }
                TaskResult::IsDisarmed => {
                    info!("DISARMING: System already disarmed. Aborting");
                    self.abort_task(now)?;
                }
                _ => self.abort_task(now)?,
            },
            DisarmStage::ConfirmIdleScreen => match result {
                TaskResult::ScreenIdle
                | TaskResult::ScreenPartArmed
                | TaskResult::ScreenFullArmed
                | TaskResult::ScreenAreaEntry => {
                    info!("DISARMING: Idle screen confirmed. Starting login process");
                    self.set_disarm_stage(DisarmStage::Login);
                    self.pin.begin();
                }
                _ => {
                    info!("DISARMING: Screen is not idle. Aborting");
                    self.abort_task(now)?;
                }
            },
            DisarmStage::Login => match result {
                TaskResult::LoginComplete => {
                    info!("DISARMING: Login complete. Awaiting confirmed login");
                    self.set_disarm_stage(DisarmStage::LoginWait);
                }
                _ => {
                    info!("DISARMING: Login failed. Aborting");
                    self.abort_task(now)?;
                }
            },
            DisarmStage::LoginWait => match result {
                TaskResult::LoginConfirmed => {
                    if self.alarm.state() != AlarmState::Pending {
                        info!("DISARMING: Login confirmed. Waiting for disarm prompt");
                        self.set_disarm_stage(DisarmStage::WaitForDisarmPrompt);
                        self.scheduler
                            .delay(Command::ScreenState, Duration::from_millis(500), now);
                    } else {
                        // Mid-entry the panel disarms straight off the code;
                        // no prompt will ever be shown.
                        info!("DISARMING: Login confirmed. Waiting for disarm confirmation");
                        self.set_disarm_stage(DisarmStage::DisarmRequested);
                    }
                }
                _ => {
                    info!("DISARMING: Login failed to confirm. Aborting");
                    self.abort_task(now)?;
                }
            },
            DisarmStage::WaitForDisarmPrompt => match result {
                TaskResult::DisarmPrompt => {
                    info!("DISARMING: Disarm prompt confirmed, disarming");
                    if !self.options.debug_mode {
                        self.send_key(Key::Yes)?;
                    }
                    self.set_disarm_stage(DisarmStage::DisarmRequested);
                }
                _ => {
                    info!("DISARMING: Unexpected result at WaitForDisarmPrompt. Aborting");
                    self.abort_task(now)?;
                }
            },
            DisarmStage::DisarmRequested => match result {
                TaskResult::IsDisarmed => {
                    info!("DISARMING: Disarm confirmed");
                    self.task = None;
                    self.pin.clear();
                    self.task_deadline.clear();
                }
                _ => {
                    info!("DISARMING: Unexpected result at DisarmRequested. Aborting");
                    self.abort_task(now)?;
                }
            },
        }
        Ok(())
    }

    fn arm_task(&mut self, result: TaskResult, now: Instant) -> Result<()> {
        let Some(ActiveTask::Arm { mode, stage }) = self.task else {
            return Ok(());
        };
        match stage {
            ArmStage::Start => {
                match mode {
                    ArmMode::Full => info!("ARMING: Starting full arm process"),
                    ArmMode::Night => info!("ARMING: Starting night arm process"),
                }
                self.task_deadline.set(now + ARM_TIMEOUT);
                self.set_arm_stage(ArmStage::ConfirmDisarmed);
                info!("ARMING: Requesting arm state");
                self.request(Command::ArmedState, now)?;
            }
            ArmStage::ConfirmDisarmed => match result {
                TaskResult::IsDisarmed => {
                    info!("ARMING: Confirmed disarmed. Confirming idle screen");
                    self.set_arm_stage(ArmStage::ConfirmIdleScreen);
                    self.request(Command::ScreenState, now)?;
                }
                TaskResult::IsArmed => {
                    info!("ARMING: System already armed. Aborting");
                    self.abort_task(now)?;
                }
                _ => self.abort_task(now)?,
            },
            ArmStage::ConfirmIdleScreen => match result {
                // Arming insists on a clean idle screen; anything else on
                // the display means the panel is mid-something.
                TaskResult::ScreenIdle => {
                    info!("ARMING: Idle screen confirmed. Starting login process");
                    self.set_arm_stage(ArmStage::Login);
                    self.pin.begin();
                }
                _ => {
                    info!("ARMING: Screen is not idle. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::Login => match result {
                TaskResult::LoginComplete => {
                    info!("ARMING: Login complete. Awaiting confirmed login");
                    self.set_arm_stage(ArmStage::LoginWait);
                }
                _ => {
                    info!("ARMING: Login failed. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::LoginWait => match result {
                TaskResult::LoginConfirmed => {
                    info!("ARMING: Login confirmed. Waiting for arm prompt");
                    self.set_arm_stage(ArmStage::WaitForArmPrompt);
                    self.scheduler
                        .delay(Command::ScreenState, Duration::from_millis(500), now);
                }
                _ => {
                    info!("ARMING: Login failed to confirm. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::WaitForArmPrompt => match result {
                TaskResult::FullArmPrompt => match mode {
                    ArmMode::Full => {
                        info!("ARMING: Full arm prompt confirmed, completing full arm");
                        if !self.options.debug_mode {
                            self.send_key(Key::Yes)?;
                        }
                        self.set_arm_stage(ArmStage::ArmRequested);
                    }
                    ArmMode::Night => {
                        info!("ARMING: Full arm prompt confirmed, waiting for part arm prompt");
                        self.set_arm_stage(ArmStage::WaitForPartArmPrompt);
                        self.send_key(Key::Down)?;
                        self.scheduler
                            .delay(Command::ScreenState, Duration::from_millis(500), now);
                    }
                },
                _ => {
                    info!("ARMING: Unexpected result at WaitForArmPrompt. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::WaitForPartArmPrompt => match result {
                TaskResult::PartArmPrompt => {
                    info!("ARMING: Part arm prompt confirmed, waiting for night arm prompt");
                    self.set_arm_stage(ArmStage::WaitForNightArmPrompt);
                    self.send_key(Key::Yes)?;
                    self.scheduler
                        .delay(Command::ScreenState, Duration::from_millis(500), now);
                }
                _ => {
                    info!("ARMING: Unexpected result at WaitForPartArmPrompt. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::WaitForNightArmPrompt => match result {
                TaskResult::NightArmPrompt => {
                    info!("ARMING: Night arm prompt confirmed, completing night arm");
                    if !self.options.debug_mode {
                        self.send_key(Key::Yes)?;
                    }
                    self.set_arm_stage(ArmStage::ArmRequested);
                }
                _ => {
                    info!("ARMING: Unexpected result at WaitForNightArmPrompt. Aborting");
                    self.abort_task(now)?;
                }
            },
            ArmStage::ArmRequested => match result {
                TaskResult::IsArming => {
                    info!("ARMING: Arm confirmed");
                    self.task = None;
                    self.pin.clear();
                    self.task_deadline.clear();
                    // Let the exit timer settle, then see what mode we ended in.
                    self.scheduler
                        .delay(Command::ScreenState, Duration::from_millis(2500), now);
                }
                _ => {
                    info!("ARMING: Unexpected result at ArmRequested. Aborting");
                    self.abort_task(now)?;
                }
            },
        }
        Ok(())
    }

    /// Tear the task down and resynchronize: one cancel keystroke, every
    /// transient cleared, then a fresh arm-state request.
    fn abort_task(&mut self, now: Instant) -> Result<()> {
        info!("Aborting task");
        self.task = None;
        self.send_key(Key::Reset)?;
        self.scheduler.clear_delayed();
        self.pin.clear();
        self.task_deadline.clear();
        self.request(Command::ArmedState, now)?;
        self.scheduler.clear_last_command();
        self.scheduler.reset_attempts();
        Ok(())
    }

    fn check_signals(&mut self, now: Instant) {
        let levels = self.signals.read();
        let changed = self.watcher.scan(levels);
        if changed.is_empty() {
            return;
        }
        for flag in changed.iter() {
            let asserted = levels.contains(flag);
            if flag == StatusSignals::FULL_ARMED {
                if asserted {
                    self.update_alarm(AlarmState::ArmedAway, now);
                } else {
                    self.update_alarm(AlarmState::Disarmed, now);
                }
            } else if flag == StatusSignals::PART_ARMED {
                if asserted {
                    self.update_alarm(AlarmState::ArmedHome, now);
                } else {
                    self.update_alarm(AlarmState::Disarmed, now);
                }
            } else if flag == StatusSignals::ENTRY {
                if asserted {
                    self.update_alarm(AlarmState::Pending, now);
                }
            } else if flag == StatusSignals::EXITING {
                if asserted {
                    self.update_alarm(AlarmState::Pending, now);
                }
            } else if flag == StatusSignals::TRIGGERED {
                if asserted {
                    self.update_alarm(AlarmState::Triggered, now);
                }
            } else if flag == StatusSignals::AREA_READY {
                self.events
                    .handle(PanelEvent::ReadyChanged { ready: asserted });
            } else if flag == StatusSignals::FAULT_PRESENT {
                if asserted {
                    error!("Panel is reporting a fault");
                    self.events.handle(PanelEvent::Message {
                        text: "Alarm is reporting a fault".to_string(),
                    });
                } else {
                    info!("Panel fault resolved");
                    self.events.handle(PanelEvent::Message {
                        text: "Alarm fault is resolved".to_string(),
                    });
                }
            } else if flag == StatusSignals::ARM_FAILED && asserted {
                error!("Panel failed to arm");
                self.events.handle(PanelEvent::Message {
                    text: "Alarm failed to arm".to_string(),
                });
            }
        }
    }

    fn update_alarm(&mut self, state: AlarmState, now: Instant) {
        self.alarm
            .update_state(state, now, &mut self.scheduler, &mut self.events);
    }
}

impl<P: PanelPort> Texecom<P, Vec<PanelEvent>> {
    /// Take the events accumulated since the last call. Only available
    /// when the driver buffers events in a `Vec`; channel-backed sinks
    /// deliver as they go.
    pub fn drain_events(&mut self) -> Vec<PanelEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::store::MemoryCodeStore;

    #[derive(Debug, Default)]
    struct TestPort {
        rx: VecDeque<u8>,
        tx: Vec<u8>,
    }

    impl PanelPort for TestPort {
        fn read_byte(&mut self) -> Result<Option<u8>> {
            Ok(self.rx.pop_front())
        }

        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.tx.extend_from_slice(data);
            Ok(())
        }
    }

    #[derive(Clone)]
    struct SharedSignals(Arc<Mutex<StatusSignals>>);

    impl SharedSignals {
        fn new() -> Self {
            SharedSignals(Arc::new(Mutex::new(StatusSignals::empty())))
        }

        fn set(&self, levels: StatusSignals) {
            *self.0.lock().unwrap() = levels;
        }
    }

    impl SignalSource for SharedSignals {
        fn read(&mut self) -> StatusSignals {
            *self.0.lock().unwrap()
        }
    }

    type TestPanel = Texecom<TestPort, Vec<PanelEvent>>;

    fn panel() -> TestPanel {
        Texecom::new(TestPort::default(), PanelOptions::default(), Vec::new())
    }

    /// First poll runs the startup signal scan; flush its artifacts.
    fn boot(panel: &mut TestPanel, now: Instant) {
        panel.poll(now).unwrap();
        panel.events.clear();
        panel.port.tx.clear();
    }

    /// Queue one line from the panel and run a poll to process it.
    fn feed_line(panel: &mut TestPanel, line: &[u8], now: Instant) {
        panel.port.rx.extend(line.iter().copied());
        panel.port.rx.push_back(b'\r');
        panel.poll(now).unwrap();
    }

    fn sent(panel: &TestPanel) -> String {
        String::from_utf8_lossy(&panel.port.tx).into_owned()
    }

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    fn disarm_stage(panel: &TestPanel) -> Option<DisarmStage> {
        match panel.active_task() {
            Some(ActiveTask::Disarm { stage }) => Some(stage),
            _ => None,
        }
    }

    fn arm_stage(panel: &TestPanel) -> Option<ArmStage> {
        match panel.active_task() {
            Some(ActiveTask::Arm { stage, .. }) => Some(stage),
            _ => None,
        }
    }

    #[test]
    fn test_bootstrap_defaults_to_disarmed() {
        let t0 = Instant::now();
        let mut p = panel();
        p.poll(t0).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Disarmed);
        assert!(matches!(
            p.events[0],
            PanelEvent::AlarmStateChanged {
                state: AlarmState::Disarmed
            }
        ));
        p.events.clear();
        p.poll(t0 + Duration::from_millis(10)).unwrap();
        assert!(p.events.is_empty());
    }

    #[test]
    fn test_full_disarm_sequence() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.disarm("1234", t0).unwrap());
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmArmed));
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);
        p.port.tx.clear();

        feed_line(&mut p, b"\"Y001", t0);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmIdleScreen));
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);
        p.port.tx.clear();

        // Disarm accepts an armed screen, and keys the first digit in the
        // same cycle the login starts.
        feed_line(&mut p, b"\"Area FULL ARMED 01:23.45", t0);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::Login));
        assert_eq!(count(&sent(&p), "KEY1"), 1);

        p.poll(t0 + Duration::from_millis(501)).unwrap();
        p.poll(t0 + Duration::from_millis(1002)).unwrap();
        p.poll(t0 + Duration::from_millis(1503)).unwrap();
        let tx = sent(&p);
        assert_eq!(count(&tx, "KEY2"), 1);
        assert_eq!(count(&tx, "KEY3"), 1);
        assert_eq!(count(&tx, "KEY4"), 1);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::LoginWait));
        p.port.tx.clear();

        let t1 = t0 + Duration::from_millis(1600);
        feed_line(&mut p, b"\"U0011", t1);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::WaitForDisarmPrompt));

        // The 500 ms delayed screen request fires on its own.
        p.poll(t1 + Duration::from_millis(501)).unwrap();
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);
        p.port.tx.clear();

        let t2 = t1 + Duration::from_millis(600);
        feed_line(&mut p, b"\"Do you want to  Disarm System?  Y/N", t2);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::DisarmRequested));
        assert_eq!(count(&sent(&p), "KEYY"), 1);

        feed_line(&mut p, b"\"N001", t2 + Duration::from_millis(100));
        assert_eq!(p.active_task(), None);
        assert!(p.pin.code_is_empty());
        assert!(!p.task_deadline.is_set());
    }

    #[test]
    fn test_disarm_skips_prompt_when_entry_running() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);
        p.alarm
            .update_state(AlarmState::Pending, t0, &mut p.scheduler, &mut p.events);

        assert!(p.disarm("1", t0).unwrap());
        feed_line(&mut p, b"\"Y001", t0);
        feed_line(&mut p, b"\"  The Cooper's  01:23.45", t0);
        // Single-digit code: login completed within the same poll.
        assert_eq!(disarm_stage(&p), Some(DisarmStage::LoginWait));

        feed_line(&mut p, b"\"U0011", t0);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::DisarmRequested));

        feed_line(&mut p, b"\"N001", t0);
        assert_eq!(p.active_task(), None);
        assert!(p.pin.code_is_empty());
        // The prompt was skipped, so no confirm keystroke ever went out.
        assert_eq!(count(&sent(&p), "KEYY"), 0);
    }

    #[test]
    fn test_night_arm_full_chain() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.arm("1", ArmMode::Night, t0).unwrap());
        assert_eq!(arm_stage(&p), Some(ArmStage::ConfirmDisarmed));

        feed_line(&mut p, b"\"N001", t0);
        assert_eq!(arm_stage(&p), Some(ArmStage::ConfirmIdleScreen));

        feed_line(&mut p, b"\"  The Cooper's  01:23.45", t0);
        assert_eq!(arm_stage(&p), Some(ArmStage::LoginWait));

        let t1 = t0 + Duration::from_millis(200);
        feed_line(&mut p, b"\"U0011", t1);
        assert_eq!(arm_stage(&p), Some(ArmStage::WaitForArmPrompt));
        p.port.tx.clear();

        // Delayed screen request, then the full-arm prompt appears; night
        // mode scrolls past it.
        p.poll(t1 + Duration::from_millis(501)).unwrap();
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);
        let t2 = t1 + Duration::from_millis(700);
        feed_line(&mut p, b"\"Do you want to  Arm System?     Y/N", t2);
        assert_eq!(arm_stage(&p), Some(ArmStage::WaitForPartArmPrompt));
        assert_eq!(count(&sent(&p), "KEYD"), 1);

        let t3 = t2 + Duration::from_millis(600);
        p.poll(t3).unwrap();
        feed_line(&mut p, b"\"Do you want to  Part Arm System?Y/N", t3);
        assert_eq!(arm_stage(&p), Some(ArmStage::WaitForNightArmPrompt));
        assert_eq!(count(&sent(&p), "KEYY"), 1);

        let t4 = t3 + Duration::from_millis(600);
        p.poll(t4).unwrap();
        feed_line(&mut p, b"\"Do you want:-   Night Arm       Y/N", t4);
        assert_eq!(arm_stage(&p), Some(ArmStage::ArmRequested));
        assert_eq!(count(&sent(&p), "KEYY"), 2);
        p.port.tx.clear();

        feed_line(&mut p, b"\"X0001", t4 + Duration::from_millis(100));
        assert_eq!(p.active_task(), None);
        assert!(p.pin.code_is_empty());

        // Success schedules a screen check for after the exit timer settles.
        p.poll(t4 + Duration::from_millis(2700)).unwrap();
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);
    }

    #[test]
    fn test_arm_outcome_readable_without_signals() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.arm("1", ArmMode::Night, t0).unwrap());
        feed_line(&mut p, b"\"N001", t0);
        feed_line(&mut p, b"\"  The Cooper's  01:23.45", t0);
        let t1 = t0 + Duration::from_millis(200);
        feed_line(&mut p, b"\"U0011", t1);
        let t2 = t1 + Duration::from_millis(700);
        feed_line(&mut p, b"\"Do you want to  Arm System?     Y/N", t2);
        let t3 = t2 + Duration::from_millis(600);
        feed_line(&mut p, b"\"Do you want to  Part Arm System?Y/N", t3);
        let t4 = t3 + Duration::from_millis(600);
        feed_line(&mut p, b"\"Do you want:-   Night Arm       Y/N", t4);

        // A host without wired signals sees completion through the task:
        // the confirm stage is visible before the acknowledgement arrives.
        assert_eq!(arm_stage(&p), Some(ArmStage::ArmRequested));
        feed_line(&mut p, b"\"X0001", t4 + Duration::from_millis(100));
        assert_eq!(p.active_task(), None);

        // The alarm state itself never follows from serial traffic; it
        // stays where the startup scan settled it, long after success.
        for secs in [3, 10, 20] {
            p.poll(t4 + Duration::from_secs(secs)).unwrap();
            assert_eq!(p.alarm_state(), AlarmState::Disarmed);
        }
    }

    #[test]
    fn test_arm_insists_on_idle_screen() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.arm("1234", ArmMode::Full, t0).unwrap());
        feed_line(&mut p, b"\"N001", t0);
        assert_eq!(arm_stage(&p), Some(ArmStage::ConfirmIdleScreen));
        p.port.tx.clear();

        // A part-armed screen satisfies disarm, but never arm.
        feed_line(&mut p, b"\"Part Armed      01:23.45", t0);
        assert_eq!(p.active_task(), None);
        let tx = sent(&p);
        assert_eq!(count(&tx, "KEYR"), 1);
        assert_eq!(count(&tx, "ASTATUS"), 1);
    }

    #[test]
    fn test_accepted_disarm_transitions() {
        let t0 = Instant::now();
        let table: &[(DisarmStage, TaskResult, DisarmStage)] = &[
            (
                DisarmStage::ConfirmArmed,
                TaskResult::IsArmed,
                DisarmStage::ConfirmIdleScreen,
            ),
            (
                DisarmStage::ConfirmIdleScreen,
                TaskResult::ScreenIdle,
                DisarmStage::Login,
            ),
            (
                DisarmStage::ConfirmIdleScreen,
                TaskResult::ScreenPartArmed,
                DisarmStage::Login,
            ),
            (
                DisarmStage::ConfirmIdleScreen,
                TaskResult::ScreenFullArmed,
                DisarmStage::Login,
            ),
            (
                DisarmStage::ConfirmIdleScreen,
                TaskResult::ScreenAreaEntry,
                DisarmStage::Login,
            ),
            (
                DisarmStage::Login,
                TaskResult::LoginComplete,
                DisarmStage::LoginWait,
            ),
            (
                DisarmStage::LoginWait,
                TaskResult::LoginConfirmed,
                DisarmStage::WaitForDisarmPrompt,
            ),
            (
                DisarmStage::WaitForDisarmPrompt,
                TaskResult::DisarmPrompt,
                DisarmStage::DisarmRequested,
            ),
        ];
        for &(stage, result, expected) in table {
            let mut p = panel();
            boot(&mut p, t0);
            p.task = Some(ActiveTask::Disarm { stage });
            p.process_result(result, t0).unwrap();
            assert_eq!(disarm_stage(&p), Some(expected), "{stage:?} + {result:?}");
        }
    }

    #[test]
    fn test_unexpected_results_abort_disarm() {
        let t0 = Instant::now();
        let stages = [
            DisarmStage::ConfirmArmed,
            DisarmStage::ConfirmIdleScreen,
            DisarmStage::Login,
            DisarmStage::LoginWait,
            DisarmStage::WaitForDisarmPrompt,
            DisarmStage::DisarmRequested,
        ];
        let results = [
            TaskResult::Timeout,
            TaskResult::IsArming,
            TaskResult::ScreenAreaExit,
            TaskResult::FullArmPrompt,
            TaskResult::UnknownMessage,
        ];
        for stage in stages {
            for result in results {
                let mut p = panel();
                boot(&mut p, t0);
                p.task = Some(ActiveTask::Disarm { stage });
                p.process_result(result, t0).unwrap();
                assert_eq!(p.active_task(), None, "{stage:?} + {result:?}");
                assert!(
                    sent(&p).contains("KEYR"),
                    "no cancel for {stage:?} + {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_unexpected_results_abort_arm() {
        let t0 = Instant::now();
        let stages = [
            ArmStage::ConfirmDisarmed,
            ArmStage::ConfirmIdleScreen,
            ArmStage::Login,
            ArmStage::LoginWait,
            ArmStage::WaitForArmPrompt,
            ArmStage::WaitForPartArmPrompt,
            ArmStage::WaitForNightArmPrompt,
            ArmStage::ArmRequested,
        ];
        let results = [
            TaskResult::Timeout,
            TaskResult::UnknownMessage,
            TaskResult::DisarmPrompt,
            TaskResult::ScreenAreaEntry,
        ];
        for stage in stages {
            for result in results {
                let mut p = panel();
                boot(&mut p, t0);
                p.task = Some(ActiveTask::Arm {
                    mode: ArmMode::Night,
                    stage,
                });
                p.process_result(result, t0).unwrap();
                assert_eq!(p.active_task(), None, "{stage:?} + {result:?}");
                assert!(
                    sent(&p).contains("KEYR"),
                    "no cancel for {stage:?} + {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_second_task_rejected_while_active() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.disarm("1234", t0).unwrap());
        assert!(!p.arm("9999", ArmMode::Full, t0).unwrap());
        assert!(!p.disarm("9999", t0).unwrap());
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmArmed));

        // The stored code must be the original one: drive to login and
        // watch which digit goes out.
        feed_line(&mut p, b"\"Y001", t0);
        feed_line(&mut p, b"\"  The Cooper's  01:23.45", t0);
        let tx = sent(&p);
        assert_eq!(count(&tx, "KEY1"), 1);
        assert_eq!(count(&tx, "KEY9"), 0);
    }

    #[test]
    fn test_abort_postconditions() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        p.task = Some(ActiveTask::Disarm {
            stage: DisarmStage::LoginWait,
        });
        p.pin.set_code("1234");
        p.pin.begin();
        p.task_deadline.set(t0 + DISARM_TIMEOUT);
        p.scheduler
            .delay(Command::ScreenState, Duration::from_millis(500), t0);

        p.process_result(TaskResult::UnknownMessage, t0).unwrap();

        assert_eq!(p.active_task(), None);
        assert!(p.pin.code_is_empty());
        assert!(!p.pin.is_active());
        assert!(!p.scheduler.delayed_pending());
        assert!(!p.task_deadline.is_set());
        let tx = sent(&p);
        assert_eq!(count(&tx, "KEYR"), 1);
        assert_eq!(count(&tx, "ASTATUS"), 1);
    }

    #[test]
    fn test_task_time_budgets() {
        let t0 = Instant::now();

        let mut p = panel();
        boot(&mut p, t0);
        assert!(p.arm("12", ArmMode::Full, t0).unwrap());
        p.poll(t0 + Duration::from_secs(15)).unwrap();
        assert!(p.active_task().is_some());
        p.poll(t0 + Duration::from_millis(15_001)).unwrap();
        assert_eq!(p.active_task(), None);
        assert!(sent(&p).contains("KEYR"));

        let mut p = panel();
        boot(&mut p, t0);
        assert!(p.disarm("12", t0).unwrap());
        p.poll(t0 + Duration::from_secs(10)).unwrap();
        assert!(p.active_task().is_some());
        p.poll(t0 + Duration::from_millis(10_001)).unwrap();
        assert_eq!(p.active_task(), None);
    }

    #[test]
    fn test_stalled_screen_request_retries() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.disarm("1234", t0).unwrap());
        feed_line(&mut p, b"\"Y001", t0);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmIdleScreen));
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);

        // No reply: three retries two seconds apart, then give up and let
        // the task timeout handle it.
        p.poll(t0 + Duration::from_millis(2001)).unwrap();
        p.poll(t0 + Duration::from_millis(4002)).unwrap();
        p.poll(t0 + Duration::from_millis(6003)).unwrap();
        p.poll(t0 + Duration::from_millis(8004)).unwrap();
        assert_eq!(count(&sent(&p), "LSTATUS"), 4);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmIdleScreen));
    }

    #[test]
    fn test_incomplete_message_bounded_retry() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);
        p.task = Some(ActiveTask::Disarm {
            stage: DisarmStage::ConfirmArmed,
        });

        // Three garbled partials re-ask for arm state; the fourth is dropped.
        for i in 0..4u64 {
            let at = t0 + Duration::from_millis(i * 400);
            p.port.rx.extend(b"garbled".iter().copied());
            p.poll(at).unwrap();
            p.poll(at + Duration::from_millis(101)).unwrap();
        }
        assert_eq!(count(&sent(&p), "ASTATUS"), 3);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::ConfirmArmed));
        p.port.tx.clear();

        // A terminated line resets the budget but, being complete and
        // unknown, aborts the task instead.
        feed_line(&mut p, b"garbled again", t0 + Duration::from_secs(2));
        assert_eq!(p.active_task(), None);
        let tx = sent(&p);
        assert_eq!(count(&tx, "KEYR"), 1);
        assert_eq!(count(&tx, "ASTATUS"), 1);
    }

    #[test]
    fn test_zone_active_reject_rechecks_status() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        // Without a task.
        feed_line(&mut p, b"Zone 012 Active Landing PIR", t0);
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);
        p.port.tx.clear();

        // With a task: status is re-checked and the stage left alone.
        p.task = Some(ActiveTask::Arm {
            mode: ArmMode::Full,
            stage: ArmStage::WaitForArmPrompt,
        });
        feed_line(&mut p, b"Zone 012 Active Landing PIR", t0);
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);
        assert_eq!(arm_stage(&p), Some(ArmStage::WaitForArmPrompt));
    }

    #[test]
    fn test_welcome_back_rerequests_screen() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        p.task = Some(ActiveTask::Arm {
            mode: ArmMode::Full,
            stage: ArmStage::WaitForArmPrompt,
        });
        feed_line(&mut p, b"\"  Welcome Back Kevin", t0);
        assert_eq!(arm_stage(&p), Some(ArmStage::WaitForArmPrompt));
        assert!(p.scheduler.delayed_pending());

        p.poll(t0 + Duration::from_millis(501)).unwrap();
        assert_eq!(count(&sent(&p), "LSTATUS"), 1);

        // Outside the prompt-wait stages the greeting is ignored.
        let mut p = panel();
        boot(&mut p, t0);
        p.task = Some(ActiveTask::Disarm {
            stage: DisarmStage::Login,
        });
        feed_line(&mut p, b"\"  Welcome Back Kevin", t0);
        assert!(!p.scheduler.delayed_pending());
    }

    #[test]
    fn test_simple_login_and_auto_logout() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);
        p.set_udl_code("123456").unwrap();

        p.send_test("", t0).unwrap();
        p.poll(t0).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 1);

        // Resent every 500 ms until acknowledged.
        p.poll(t0 + Duration::from_millis(200)).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 1);
        p.poll(t0 + Duration::from_millis(501)).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 2);

        let t1 = t0 + Duration::from_millis(600);
        feed_line(&mut p, b"OK", t1);
        assert_eq!(p.active_protocol(), ActiveProtocol::Simple);
        p.poll(t1 + Duration::from_millis(100)).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 2);

        // Thirty quiet seconds: exactly one automatic logout.
        p.poll(t1 + Duration::from_secs(30)).unwrap();
        assert_eq!(count(&sent(&p), "\\H/"), 0);
        p.poll(t1 + Duration::from_millis(30_001)).unwrap();
        assert_eq!(count(&sent(&p), "\\H/"), 1);
        p.poll(t1 + Duration::from_secs(40)).unwrap();
        assert_eq!(count(&sent(&p), "\\H/"), 1);

        feed_line(&mut p, b"OK", t1 + Duration::from_secs(41));
        assert_eq!(p.active_protocol(), ActiveProtocol::Crestron);
    }

    #[test]
    fn test_simple_login_rejection() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);
        p.set_udl_code("123456").unwrap();

        p.send_test("", t0).unwrap();
        p.poll(t0).unwrap();
        feed_line(&mut p, b"ERROR", t0 + Duration::from_millis(100));
        assert_eq!(p.active_protocol(), ActiveProtocol::Crestron);

        // Abandoned: no more login frames.
        p.poll(t0 + Duration::from_secs(2)).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 1);
    }

    #[test]
    fn test_send_test_vocabulary() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        p.send_test("STATUS", t0).unwrap();
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);

        p.port.tx.clear();
        p.send_test("IDENTITY", t0).unwrap();
        assert_eq!(p.port.tx, b"\\I/");

        p.port.tx.clear();
        p.send_test("T?", t0).unwrap();
        assert_eq!(p.port.tx, b"\\T?/");

        p.port.tx.clear();
        p.send_test("FULL-ARM", t0).unwrap();
        assert_eq!(p.port.tx, vec![b'\\', b'A', 1, b'/']);

        p.port.tx.clear();
        p.send_test("PART-ARM", t0).unwrap();
        assert_eq!(p.port.tx, vec![b'\\', b'Y', 1, b'/']);

        p.port.tx.clear();
        p.send_test("LOGOUT", t0).unwrap();
        assert_eq!(p.port.tx, b"\\H/");
    }

    #[test]
    fn test_udl_code_store_and_validation() {
        let t0 = Instant::now();
        let mut seeded = MemoryCodeStore::new();
        seeded.save("987654").unwrap();
        let mut p = Texecom::new(TestPort::default(), PanelOptions::default(), Vec::new())
            .with_code_store(seeded);
        boot(&mut p, t0);

        // The stored code authenticates the Simple login.
        p.send_test("", t0).unwrap();
        p.poll(t0).unwrap();
        assert_eq!(count(&sent(&p), "\\W987654/"), 1);

        assert!(matches!(
            p.set_udl_code("12345"),
            Err(TexecomError::InvalidCodeLength { len: 5 })
        ));
        assert!(p.set_udl_code("123456").is_ok());

        // The next login frame carries the new code.
        p.poll(t0 + Duration::from_millis(501)).unwrap();
        assert_eq!(count(&sent(&p), "\\W123456/"), 1);
    }

    #[test]
    fn test_debug_mode_withholds_confirm_keystrokes() {
        let t0 = Instant::now();
        let options = PanelOptions::builder().debug_mode(true).build();
        let mut p = Texecom::new(TestPort::default(), options, Vec::new());
        boot(&mut p, t0);

        // Disarm confirm suppressed, stage still advances.
        p.task = Some(ActiveTask::Disarm {
            stage: DisarmStage::WaitForDisarmPrompt,
        });
        feed_line(&mut p, b"\"Do you want to  Disarm System?  Y/N", t0);
        assert_eq!(disarm_stage(&p), Some(DisarmStage::DisarmRequested));
        assert_eq!(count(&sent(&p), "KEYY"), 0);

        // Navigation keystrokes still go out in debug mode.
        p.task = Some(ActiveTask::Arm {
            mode: ArmMode::Night,
            stage: ArmStage::WaitForArmPrompt,
        });
        feed_line(&mut p, b"\"Do you want to  Arm System?     Y/N", t0);
        assert_eq!(count(&sent(&p), "KEYD"), 1);

        feed_line(
            &mut p,
            b"\"Do you want to  Part Arm System?Y/N",
            t0 + Duration::from_millis(600),
        );
        assert_eq!(count(&sent(&p), "KEYY"), 1);

        // The final night-arm confirm is suppressed again.
        feed_line(
            &mut p,
            b"\"Do you want:-   Night Arm       Y/N",
            t0 + Duration::from_millis(1200),
        );
        assert_eq!(arm_stage(&p), Some(ArmStage::ArmRequested));
        assert_eq!(count(&sent(&p), "KEYY"), 1);
    }

    #[test]
    fn test_signals_drive_alarm_state() {
        let t0 = Instant::now();
        let signals = SharedSignals::new();
        signals.set(StatusSignals::FULL_ARMED);
        let mut p = Texecom::new(TestPort::default(), PanelOptions::default(), Vec::new())
            .with_signals(signals.clone());

        // Asserted at startup: no Disarmed bootstrap, straight to armed.
        p.poll(t0).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::ArmedAway);

        signals.set(StatusSignals::empty());
        p.poll(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Disarmed);

        signals.set(StatusSignals::ENTRY);
        p.poll(t0 + Duration::from_millis(20)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Pending);

        signals.set(StatusSignals::ENTRY | StatusSignals::TRIGGERED);
        p.poll(t0 + Duration::from_millis(30)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Triggered);
    }

    #[test]
    fn test_triggered_zone_follows_alarm_cycle() {
        let t0 = Instant::now();
        let signals = SharedSignals::new();
        let mut p = Texecom::new(TestPort::default(), PanelOptions::default(), Vec::new())
            .with_signals(signals.clone());
        boot(&mut p, t0);
        assert_eq!(p.triggered_zone(), None);

        signals.set(StatusSignals::FULL_ARMED);
        p.poll(t0 + Duration::from_millis(10)).unwrap();
        signals.set(StatusSignals::FULL_ARMED | StatusSignals::ENTRY);
        p.poll(t0 + Duration::from_millis(20)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Pending);

        // The first zone to open during entry is remembered as the culprit.
        feed_line(&mut p, b"\"Z0051", t0 + Duration::from_millis(30));
        assert_eq!(p.triggered_zone(), Some(5));

        signals.set(StatusSignals::FULL_ARMED | StatusSignals::ENTRY | StatusSignals::TRIGGERED);
        p.poll(t0 + Duration::from_millis(40)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Triggered);
        assert!(p
            .events
            .iter()
            .any(|e| matches!(e, PanelEvent::AlarmTriggered { zone: 5 })));
        assert_eq!(p.triggered_zone(), Some(5));

        // Disarming forgets the zone.
        signals.set(StatusSignals::empty());
        p.poll(t0 + Duration::from_millis(50)).unwrap();
        assert_eq!(p.alarm_state(), AlarmState::Disarmed);
        assert_eq!(p.triggered_zone(), None);
    }

    #[test]
    fn test_fault_and_ready_signal_events() {
        let t0 = Instant::now();
        let signals = SharedSignals::new();
        let mut p = Texecom::new(TestPort::default(), PanelOptions::default(), Vec::new())
            .with_signals(signals.clone());
        boot(&mut p, t0);

        signals.set(StatusSignals::AREA_READY);
        p.poll(t0 + Duration::from_millis(10)).unwrap();
        assert!(matches!(
            p.events.last(),
            Some(PanelEvent::ReadyChanged { ready: true })
        ));

        signals.set(StatusSignals::AREA_READY | StatusSignals::FAULT_PRESENT);
        p.poll(t0 + Duration::from_millis(20)).unwrap();
        assert!(matches!(
            p.events.last(),
            Some(PanelEvent::Message { text }) if text == "Alarm is reporting a fault"
        ));

        signals.set(StatusSignals::AREA_READY);
        p.poll(t0 + Duration::from_millis(30)).unwrap();
        assert!(matches!(
            p.events.last(),
            Some(PanelEvent::Message { text }) if text == "Alarm fault is resolved"
        ));

        signals.set(StatusSignals::AREA_READY | StatusSignals::ARM_FAILED);
        p.poll(t0 + Duration::from_millis(40)).unwrap();
        assert!(matches!(
            p.events.last(),
            Some(PanelEvent::Message { text }) if text == "Alarm failed to arm"
        ));
    }

    #[test]
    fn test_stuck_arming_recheck() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);
        p.alarm
            .update_state(AlarmState::Arming, t0, &mut p.scheduler, &mut p.events);
        p.port.tx.clear();

        p.poll(t0 + Duration::from_millis(44_999)).unwrap();
        assert_eq!(count(&sent(&p), "ASTATUS"), 0);
        p.poll(t0 + Duration::from_millis(45_001)).unwrap();
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);
        // The clock restarted; no repeat until another window passes.
        p.poll(t0 + Duration::from_millis(45_002)).unwrap();
        assert_eq!(count(&sent(&p), "ASTATUS"), 1);
        p.poll(t0 + Duration::from_millis(90_003)).unwrap();
        assert_eq!(count(&sent(&p), "ASTATUS"), 2);
    }

    #[test]
    fn test_one_message_per_poll() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        p.port.rx.extend(b"\"Z0051\r\"Z0060\r".iter().copied());
        p.poll(t0).unwrap();
        assert_eq!(p.events.len(), 1);
        p.poll(t0 + Duration::from_millis(10)).unwrap();
        assert_eq!(p.events.len(), 2);
        assert!(matches!(
            p.events[0],
            PanelEvent::ZoneStateChanged { zone: 5, .. }
        ));
        assert!(matches!(
            p.events[1],
            PanelEvent::ZoneStateChanged { zone: 6, .. }
        ));
    }

    #[test]
    fn test_results_ignored_without_task() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        feed_line(&mut p, b"\"U0011", t0);
        feed_line(&mut p, b"\"Do you want to  Disarm System?  Y/N", t0);
        feed_line(&mut p, b"\"Y001", t0);
        assert_eq!(p.active_task(), None);
        assert_eq!(sent(&p), "");
    }

    #[test]
    fn test_disarm_aborts_when_already_disarmed() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(p.disarm("1234", t0).unwrap());
        feed_line(&mut p, b"\"N001", t0);
        assert_eq!(p.active_task(), None);
        assert!(sent(&p).contains("KEYR"));
    }

    #[test]
    fn test_oversized_code_rejected() {
        let t0 = Instant::now();
        let mut p = panel();
        boot(&mut p, t0);

        assert!(!p.disarm("123456789", t0).unwrap());
        assert!(!p.arm("123456789", ArmMode::Full, t0).unwrap());
        assert_eq!(p.active_task(), None);
        assert_eq!(sent(&p), "");
    }
}
