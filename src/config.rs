// MIT License - Copyright (c) 2019 Kevin Cooper
// Rust translation

/// Arm mode for arm requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmMode {
    /// Full/away arm
    Full,
    /// Night arm (reached through the part-arm menu)
    Night,
}

impl ArmMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmMode::Full => "FULL",
            ArmMode::Night => "NIGHT",
        }
    }
}

/// Options for driving a Texecom panel through its keypad protocol.
#[derive(Debug, Clone)]
pub struct PanelOptions {
    /// First line of the keypad's idle screen, as programmed into the panel.
    /// Used to recognize when the panel is sitting at the idle display.
    pub idle_text: String,
    /// Display names for panel users, indexed by the panel's user number.
    /// Used only for attribution in log output.
    pub users: Vec<String>,
    /// When set, the final confirm keystroke of an arm/disarm sequence is
    /// withheld so sequences can be exercised against a live panel without
    /// changing its state. Navigation keystrokes are still sent.
    pub debug_mode: bool,
}

impl Default for PanelOptions {
    fn default() -> Self {
        Self {
            idle_text: "The Cooper's".to_string(),
            users: Vec::new(),
            debug_mode: false,
        }
    }
}

impl PanelOptions {
    /// Create a new options builder starting from defaults.
    pub fn builder() -> PanelOptionsBuilder {
        PanelOptionsBuilder::default()
    }
}

/// Builder for PanelOptions.
#[derive(Debug, Clone, Default)]
pub struct PanelOptionsBuilder {
    options: PanelOptions,
}

impl PanelOptionsBuilder {
    pub fn idle_text(mut self, text: impl Into<String>) -> Self {
        self.options.idle_text = text.into();
        self
    }

    pub fn users<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.users = users.into_iter().map(Into::into).collect();
        self
    }

    pub fn debug_mode(mut self, debug: bool) -> Self {
        self.options.debug_mode = debug;
        self
    }

    pub fn build(self) -> PanelOptions {
        self.options
    }
}
