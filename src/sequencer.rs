// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

use std::time::{Duration, Instant};

use crate::config::ArmMode;

/// Pacing between keyed PIN digits.
const PIN_ENTRY_DELAY: Duration = Duration::from_millis(500);

/// Stages of the disarm sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisarmStage {
    Start,
    ConfirmArmed,
    ConfirmIdleScreen,
    Login,
    LoginWait,
    WaitForDisarmPrompt,
    DisarmRequested,
}

/// Stages of the arm sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmStage {
    Start,
    ConfirmDisarmed,
    ConfirmIdleScreen,
    Login,
    LoginWait,
    WaitForArmPrompt,
    WaitForPartArmPrompt,
    WaitForNightArmPrompt,
    ArmRequested,
}

/// The task currently driving the keypad, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveTask {
    Arm { mode: ArmMode, stage: ArmStage },
    Disarm { stage: DisarmStage },
}

impl ActiveTask {
    /// Stages that sit waiting on a screen reply; these qualify for the
    /// stalled-command retry and for screen re-requests after an
    /// incomplete message.
    pub(crate) fn awaits_screen(&self) -> bool {
        match self {
            ActiveTask::Arm { stage, .. } => matches!(
                stage,
                ArmStage::ConfirmIdleScreen
                    | ArmStage::WaitForArmPrompt
                    | ArmStage::WaitForPartArmPrompt
                    | ArmStage::WaitForNightArmPrompt
            ),
            ActiveTask::Disarm { stage } => matches!(
                stage,
                DisarmStage::ConfirmIdleScreen | DisarmStage::WaitForDisarmPrompt
            ),
        }
    }

    /// Stages waiting on an arm-state reply, for the same retry path.
    pub(crate) fn awaits_arm_state(&self) -> bool {
        matches!(
            self,
            ActiveTask::Arm {
                stage: ArmStage::ConfirmDisarmed,
                ..
            } | ActiveTask::Disarm {
                stage: DisarmStage::ConfirmArmed
            }
        )
    }
}

/// The event vocabulary fed into stage transitions. Produced per poll
/// cycle by the classifier, or synthesized when a task exceeds its time
/// budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskResult {
    None,
    Timeout,
    IsArmed,
    IsDisarmed,
    IsArming,
    ScreenIdle,
    ScreenPartArmed,
    ScreenFullArmed,
    ScreenAreaEntry,
    ScreenAreaExit,
    FullArmPrompt,
    PartArmPrompt,
    NightArmPrompt,
    DisarmPrompt,
    LoginComplete,
    LoginConfirmed,
    UnknownMessage,
}

/// One step of paced PIN entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PinStep {
    /// Digit to key now, if any.
    pub digit: Option<char>,
    /// All digits sent; login keying is finished.
    pub complete: bool,
}

/// Keys the stored access code one digit at a time, 500 ms apart, so the
/// panel's keypad buffer is never outrun.
#[derive(Debug, Default)]
pub(crate) struct PinEntry {
    code: String,
    position: usize,
    next_entry: Option<Instant>,
    active: bool,
}

impl PinEntry {
    /// Store the code to key later. Resets the cursor.
    pub fn set_code(&mut self, code: &str) {
        self.code.clear();
        self.code.push_str(code);
        self.position = 0;
    }

    /// Start keying on the next poll.
    pub fn begin(&mut self) {
        self.active = true;
    }

    /// Forget the code and stop keying.
    pub fn clear(&mut self) {
        self.code.clear();
        self.position = 0;
        self.next_entry = None;
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn code_is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// Advance keying if a digit is due.
    pub fn poll(&mut self, now: Instant) -> Option<PinStep> {
        if !self.active {
            return None;
        }
        if self.next_entry.is_some_and(|at| now <= at) {
            return None;
        }
        let digit = self.code.as_bytes().get(self.position).map(|&b| b as char);
        if digit.is_some() {
            self.position += 1;
        }
        if self.position >= self.code.len() {
            self.position = 0;
            self.next_entry = None;
            self.active = false;
            Some(PinStep {
                digit,
                complete: true,
            })
        } else {
            self.next_entry = Some(now + PIN_ENTRY_DELAY);
            Some(PinStep {
                digit,
                complete: false,
            })
        }
    }
}
