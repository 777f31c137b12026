use std::fmt;

/// Channel prefix shared by the start command, the data sink and the
/// tool meisters.
pub const DEFAULT_CHANNEL_PREFIX: &str = "tool-meister-chan";

/// Key under which the data sink records the operational state reported by
/// every tool meister once start-up completes.
pub const DEFAULT_TM_DATA_KEY: &str = "tool-meister-data-key";

// ---------------------------------------------------------------------------
// ChannelSuffix
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelSuffix {
    /// Data sink → client acknowledgements.
    ToClient,
    /// Client → data sink commands.
    FromClient,
    /// Data sink → tool meisters commands.
    ToTms,
    /// Tool meisters → data sink reports.
    FromTms,
    /// Remote log records, consumed by the data sink.
    ToLogging,
}

impl ChannelSuffix {
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelSuffix::ToClient => "to-client",
            ChannelSuffix::FromClient => "from-client",
            ChannelSuffix::ToTms => "to-tms",
            ChannelSuffix::FromTms => "from-tms",
            ChannelSuffix::ToLogging => "to-logging",
        }
    }
}

impl fmt::Display for ChannelSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A logical pub/sub address, `<prefix>-<suffix>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Channel {
    prefix: String,
    suffix: ChannelSuffix,
}

impl Channel {
    pub fn new(prefix: impl Into<String>, suffix: ChannelSuffix) -> Self {
        Self {
            prefix: prefix.into(),
            suffix,
        }
    }

    pub fn name(&self) -> String {
        format!("{}-{}", self.prefix, self.suffix)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.prefix, self.suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_join_prefix_and_suffix() {
        let chan = Channel::new(DEFAULT_CHANNEL_PREFIX, ChannelSuffix::ToClient);
        assert_eq!(chan.name(), "tool-meister-chan-to-client");
        assert_eq!(
            Channel::new("p", ChannelSuffix::FromTms).to_string(),
            "p-from-tms"
        );
    }

    #[test]
    fn suffix_strings_are_stable() {
        assert_eq!(ChannelSuffix::FromClient.as_str(), "from-client");
        assert_eq!(ChannelSuffix::ToTms.as_str(), "to-tms");
        assert_eq!(ChannelSuffix::ToLogging.as_str(), "to-logging");
    }
}
