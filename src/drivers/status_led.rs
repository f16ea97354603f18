//! Status LED indicator — pattern *selection* only.
//!
//! The lifecycle FSM maps each state to one pattern 1:1; the waveform/GPIO
//! rendering itself lives outside this core and consumes the selected
//! pattern. The indicator deduplicates selections so re-entering the same
//! state does not restart an animation.

use log::info;

/// The closed set of indicator patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    /// Degraded / transitional.
    Blink,
    /// Actively connecting.
    Pulse,
    /// Healthy steady state.
    Cruise,
    /// Critical fault.
    Sos,
}

impl LedPattern {
    pub fn name(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Blink => "blink",
            Self::Pulse => "pulse",
            Self::Cruise => "cruise",
            Self::Sos => "sos",
        }
    }
}

pub struct LedIndicator {
    current: LedPattern,
}

impl LedIndicator {
    pub fn new() -> Self {
        Self {
            current: LedPattern::Off,
        }
    }

    /// Select a pattern. Re-selecting the current pattern is a no-op.
    pub fn play(&mut self, pattern: LedPattern) {
        if pattern == self.current {
            return;
        }
        info!("LED: pattern '{}'", pattern.name());
        self.current = pattern;
        self.platform_apply(pattern);
    }

    pub fn current(&self) -> LedPattern {
        self.current
    }

    #[cfg(target_os = "espidf")]
    fn platform_apply(&mut self, _pattern: LedPattern) {
        // The pattern renderer task watches the selection via a shared
        // atomic; this driver only publishes the choice.
    }

    #[cfg(not(target_os = "espidf"))]
    fn platform_apply(&mut self, _pattern: LedPattern) {}
}

impl Default for LedIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_off_and_tracks_selection() {
        let mut led = LedIndicator::new();
        assert_eq!(led.current(), LedPattern::Off);
        led.play(LedPattern::Cruise);
        assert_eq!(led.current(), LedPattern::Cruise);
        led.play(LedPattern::Cruise); // no-op
        assert_eq!(led.current(), LedPattern::Cruise);
    }
}
