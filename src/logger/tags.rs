/// Log tags identify the subsystem that produced a message
///
/// Each tag maps to a `--debug-<key>` flag for targeted debug output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Config,
    State,
    Feed,
    Signal,
    Stops,
    Execution,
    Broker,
    Journal,
    Shutdown,
}

impl LogTag {
    /// Key used for `--debug-<key>` matching and file output
    pub fn to_debug_key(&self) -> &'static str {
        match self {
            LogTag::System => "system",
            LogTag::Config => "config",
            LogTag::State => "state",
            LogTag::Feed => "feed",
            LogTag::Signal => "signal",
            LogTag::Stops => "stops",
            LogTag::Execution => "execution",
            LogTag::Broker => "broker",
            LogTag::Journal => "journal",
            LogTag::Shutdown => "shutdown",
        }
    }

    /// Uppercase form for the console/file prefix
    pub fn to_plain_string(&self) -> &'static str {
        match self {
            LogTag::System => "SYSTEM",
            LogTag::Config => "CONFIG",
            LogTag::State => "STATE",
            LogTag::Feed => "FEED",
            LogTag::Signal => "SIGNAL",
            LogTag::Stops => "STOPS",
            LogTag::Execution => "EXEC",
            LogTag::Broker => "BROKER",
            LogTag::Journal => "JOURNAL",
            LogTag::Shutdown => "SHUTDOWN",
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}
