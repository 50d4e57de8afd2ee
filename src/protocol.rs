// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

//! Message signatures and wire encodings for the two protocols the panel
//! speaks on its com port: the Crestron keypad protocol (quote-prefixed
//! screen/status traffic plus `KEY` frames) and the Simple protocol
//! (`\..../` frames guarded by the UDL code).

use crate::sequencer::TaskResult;

// Status / update messages, all quote-prefixed by the panel.
const MSG_ZONE_UPDATE: &[u8] = b"\"Z0";
const MSG_ARM_UPDATE: &[u8] = b"\"A0";
const MSG_DISARM_UPDATE: &[u8] = b"\"D0";
const MSG_ENTRY_UPDATE: &[u8] = b"\"E0";
const MSG_ARMING_UPDATE: &[u8] = b"\"X0";
const MSG_INTRUDER_UPDATE: &[u8] = b"\"L0";
const MSG_USER_PIN_LOGIN: &[u8] = b"\"U0";
const MSG_USER_TAG_LOGIN: &[u8] = b"\"T0";
const MSG_REPLY_DISARMED: &[u8] = b"\"N";
const MSG_REPLY_ARMED: &[u8] = b"\"Y";

// Screen contents, matched as prefixes of an LCD dump.
const MSG_WELCOME_BACK: &[u8] = b"\"  Welcome Back";
const MSG_SCREEN_IDLE_PART_ARMED: &[u8] = b"\" * PART ARMED *";
const MSG_SCREEN_ARMED_PART: &[u8] = b"\"Part";
const MSG_SCREEN_ARMED_NIGHT: &[u8] = b"\"Night";
const MSG_SCREEN_ARMED_FULL: &[u8] = b"\"Area FULL ARMED";
const MSG_SCREEN_QUESTION_FULL_ARM: &[u8] = b"\"Do you want to  Arm System?";
const MSG_SCREEN_QUESTION_PART_ARM: &[u8] = b"\"Do you want to  Part Arm System?";
const MSG_SCREEN_QUESTION_NIGHT_ARM: &[u8] = b"\"Do you want:-   Night Arm";
const MSG_SCREEN_QUESTION_DISARM: &[u8] = b"\"Do you want to  Disarm System?";
const MSG_SCREEN_AREA_IN_ENTRY: &[u8] = b"\"Area in Entry";
const MSG_SCREEN_AREA_IN_EXIT: &[u8] = b"\"Area in Exit";

/// Status requests sent on the keypad channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `ASTATUS`: ask whether the area is armed.
    ArmedState,
    /// `LSTATUS`: ask for the current LCD contents.
    ScreenState,
}

impl Command {
    pub(crate) fn wire(&self) -> &'static [u8] {
        match self {
            Command::ArmedState => b"ASTATUS\r\n",
            Command::ScreenState => b"LSTATUS\r\n",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::ArmedState => "ASTATUS",
            Command::ScreenState => "LSTATUS",
        }
    }
}

/// Keypad keystrokes, sent as `KEY<x>` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Key {
    /// Confirm whatever the screen is asking.
    Yes,
    /// Scroll down one menu entry.
    Down,
    /// Back out to the idle screen.
    Reset,
    /// One digit of an access code.
    Digit(char),
}

impl Key {
    pub fn wire(&self) -> String {
        match self {
            Key::Yes => "KEYY\r\n".to_string(),
            Key::Down => "KEYD\r\n".to_string(),
            Key::Reset => "KEYR\r\n".to_string(),
            Key::Digit(d) => format!("KEY{d}\r\n"),
        }
    }
}

// Simple protocol frames. These are sent bare, no line terminator.
pub(crate) const SIMPLE_LOGOUT: &[u8] = b"\\H/";
pub(crate) const SIMPLE_IDENTITY: &[u8] = b"\\I/";
pub(crate) const SIMPLE_TIME_QUERY: &[u8] = b"\\T?/";

pub(crate) fn simple_login(udl_code: &str) -> Vec<u8> {
    format!("\\W{udl_code}/").into_bytes()
}

pub(crate) fn simple_full_arm() -> Vec<u8> {
    vec![b'\\', b'A', 1, b'/']
}

pub(crate) fn simple_part_arm() -> Vec<u8> {
    vec![b'\\', b'Y', 1, b'/']
}

/// Set the panel clock. Fields are raw bytes; the year is offset from 2000.
pub(crate) fn simple_time_sync(day: u8, month: u8, year: u8, hour: u8, minute: u8) -> Vec<u8> {
    vec![b'\\', b'T', day, month, year, hour, minute, b'/']
}

/// What a framed message means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Classified {
    /// Direct zone update, applied regardless of task state.
    ZoneUpdate { zone: u16, digit: u8 },
    /// A user keyed their PIN or presented a tag at a real keypad.
    Login { user_index: u8, tag: bool },
    /// Result for the active task sequencer.
    Task(TaskResult),
    /// Greeting screen shown mid-sequence; worth a screen re-request.
    WelcomeBack,
    /// The panel refused to arm because a zone is open.
    ZoneActiveReject,
    /// Simple protocol acknowledgement.
    SimpleOk,
    /// Simple protocol failure.
    SimpleError,
    /// Recognized traffic that carries no actionable signal.
    Recognized,
    Unknown,
}

fn starts_with(message: &[u8], prefix: &[u8]) -> bool {
    message.len() >= prefix.len() && &message[..prefix.len()] == prefix
}

/// Zone number from bytes 3-5 of a zone update, with `atoi` semantics:
/// leading whitespace skipped, parse stops at the first non-digit.
pub(crate) fn parse_zone_number(message: &[u8]) -> u16 {
    message[2..5]
        .iter()
        .skip_while(|b| b.is_ascii_whitespace())
        .take_while(|b| b.is_ascii_digit())
        .fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0'))
}

/// Match a completed message against the signature table. At most one
/// outcome applies; earlier rows win.
pub(crate) fn classify(message: &[u8], idle_banner: &[u8]) -> Classified {
    let len = message.len();

    if len == 6 && starts_with(message, MSG_ZONE_UPDATE) {
        return Classified::ZoneUpdate {
            zone: parse_zone_number(message),
            digit: message[5].wrapping_sub(b'0'),
        };
    }
    if len >= 6 && starts_with(message, MSG_ARM_UPDATE) {
        return Classified::Recognized;
    }
    if len >= 6 && starts_with(message, MSG_DISARM_UPDATE) {
        return Classified::Task(TaskResult::IsDisarmed);
    }
    if len == 6 && starts_with(message, MSG_ENTRY_UPDATE) {
        return Classified::Recognized;
    }
    if len == 6 && starts_with(message, MSG_ARMING_UPDATE) {
        return Classified::Task(TaskResult::IsArming);
    }
    if len == 6 && starts_with(message, MSG_INTRUDER_UPDATE) {
        return Classified::Recognized;
    }
    if len == 6
        && (starts_with(message, MSG_USER_PIN_LOGIN) || starts_with(message, MSG_USER_TAG_LOGIN))
    {
        return Classified::Login {
            user_index: message[4].wrapping_sub(b'0'),
            tag: starts_with(message, MSG_USER_TAG_LOGIN),
        };
    }
    if len == 5 && starts_with(message, MSG_REPLY_DISARMED) {
        return Classified::Task(TaskResult::IsDisarmed);
    }
    if len == 5 && starts_with(message, MSG_REPLY_ARMED) {
        return Classified::Task(TaskResult::IsArmed);
    }
    if starts_with(message, MSG_SCREEN_ARMED_PART)
        || starts_with(message, MSG_SCREEN_ARMED_NIGHT)
        || starts_with(message, MSG_SCREEN_IDLE_PART_ARMED)
    {
        return Classified::Task(TaskResult::ScreenPartArmed);
    }
    if starts_with(message, MSG_SCREEN_ARMED_FULL) {
        return Classified::Task(TaskResult::ScreenFullArmed);
    }
    if idle_banner.len() > 3 && starts_with(message, idle_banner) {
        return Classified::Task(TaskResult::ScreenIdle);
    }
    // Strictly longer: the greeting always carries a second display line.
    if len > MSG_WELCOME_BACK.len() && starts_with(message, MSG_WELCOME_BACK) {
        return Classified::WelcomeBack;
    }
    if starts_with(message, MSG_SCREEN_QUESTION_FULL_ARM) {
        return Classified::Task(TaskResult::FullArmPrompt);
    }
    if starts_with(message, MSG_SCREEN_QUESTION_PART_ARM) {
        return Classified::Task(TaskResult::PartArmPrompt);
    }
    if starts_with(message, MSG_SCREEN_QUESTION_NIGHT_ARM) {
        return Classified::Task(TaskResult::NightArmPrompt);
    }
    if starts_with(message, MSG_SCREEN_QUESTION_DISARM) {
        return Classified::Task(TaskResult::DisarmPrompt);
    }
    if starts_with(message, MSG_SCREEN_AREA_IN_ENTRY) {
        return Classified::Task(TaskResult::ScreenAreaEntry);
    }
    if starts_with(message, MSG_SCREEN_AREA_IN_EXIT) {
        return Classified::Task(TaskResult::ScreenAreaExit);
    }
    if len >= 17
        && starts_with(message, b"Zone")
        && message.windows(6).position(|w| w == b"Active") == Some(9)
    {
        return Classified::ZoneActiveReject;
    }
    if message == b"OK" {
        return Classified::SimpleOk;
    }
    if message == b"ERROR" {
        return Classified::SimpleError;
    }
    Classified::Unknown
}
