//! CAN bus baud rates selectable for the charger link

/// Supported bus speeds, in the order they are offered for selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BaudRate {
    /// 1 Mbps
    Mbps1,
    /// 500 kbps
    #[default]
    Kbps500,
    /// 250 kbps
    Kbps250,
    /// 125 kbps
    Kbps125,
}

impl BaudRate {
    /// All rates, indexed by selection index
    pub const ALL: [BaudRate; 4] = [
        BaudRate::Mbps1,
        BaudRate::Kbps500,
        BaudRate::Kbps250,
        BaudRate::Kbps125,
    ];

    /// Rate for a selection index, if the index is valid
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Selection index of this rate
    pub fn index(self) -> usize {
        match self {
            BaudRate::Mbps1 => 0,
            BaudRate::Kbps500 => 1,
            BaudRate::Kbps250 => 2,
            BaudRate::Kbps125 => 3,
        }
    }

    /// Bitrate in bits per second
    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudRate::Mbps1 => 1_000_000,
            BaudRate::Kbps500 => 500_000,
            BaudRate::Kbps250 => 250_000,
            BaudRate::Kbps125 => 125_000,
        }
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BaudRate::Mbps1 => write!(f, "1 Mbps"),
            BaudRate::Kbps500 => write!(f, "500 kbps"),
            BaudRate::Kbps250 => write!(f, "250 kbps"),
            BaudRate::Kbps125 => write!(f, "125 kbps"),
        }
    }
}

/// Resolve a selection index to a bitrate; unknown indices fall back to 500 kbps
pub fn resolve_baud(index: usize) -> u32 {
    BaudRate::from_index(index)
        .unwrap_or_default()
        .bits_per_second()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_baud() {
        assert_eq!(resolve_baud(0), 1_000_000);
        assert_eq!(resolve_baud(1), 500_000);
        assert_eq!(resolve_baud(2), 250_000);
        assert_eq!(resolve_baud(3), 125_000);
        assert_eq!(resolve_baud(4), 500_000);
        assert_eq!(resolve_baud(usize::MAX), 500_000);
    }

    #[test]
    fn test_index_round_trip() {
        for (i, rate) in BaudRate::ALL.iter().enumerate() {
            assert_eq!(rate.index(), i);
            assert_eq!(BaudRate::from_index(i), Some(*rate));
        }
        assert_eq!(BaudRate::from_index(4), None);
    }
}
