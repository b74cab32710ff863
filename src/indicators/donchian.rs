use crate::indicators::{Extremum, RollingWindow, WindowError};
use crate::models::Tick;

/// Donchian channel bands for one instrument
///
/// Recomputed in full on every tick; a state is never partially stale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub upper: f64,
    pub lower: f64,
    pub mid: f64,
    pub high_period: usize,
    pub low_period: usize,
    /// True once both windows have reached capacity
    pub warm: bool,
}

/// Where the last price sits relative to the bands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Either window is still below capacity - not a tradable signal
    Warming,
    Breakout,
    Breakdown,
    Inside,
}

impl ChannelState {
    /// Classify a price against the bands
    ///
    /// A price sitting exactly on a band counts as the boundary event
    /// (`Breakout`/`Breakdown`), never `Inside` - entries trigger on the
    /// touch, not one tick past it.
    pub fn classify(&self, price: f64) -> Classification {
        if !self.warm {
            Classification::Warming
        } else if price >= self.upper {
            Classification::Breakout
        } else if price <= self.lower {
            Classification::Breakdown
        } else {
            Classification::Inside
        }
    }
}

/// Channel signal engine: a max window over period highs and a min window
/// over period lows, independently sized
#[derive(Debug, Clone)]
pub struct DonchianChannel {
    highs: RollingWindow,
    lows: RollingWindow,
}

impl DonchianChannel {
    pub const DEFAULT_HIGH_PERIOD: usize = 50;
    pub const DEFAULT_LOW_PERIOD: usize = 40;

    pub fn new(high_period: usize, low_period: usize) -> Result<Self, WindowError> {
        Ok(Self {
            highs: RollingWindow::new(high_period, Extremum::Max)?,
            lows: RollingWindow::new(low_period, Extremum::Min)?,
        })
    }

    /// Fold one tick into both windows and return the fresh band state
    pub fn update(&mut self, tick: &Tick) -> ChannelState {
        self.highs.push(tick.period_high());
        self.lows.push(tick.period_low());

        // Both windows are non-empty after the push
        let upper = self.highs.extremum().unwrap_or(tick.price);
        let lower = self.lows.extremum().unwrap_or(tick.price);

        ChannelState {
            upper,
            lower,
            mid: (upper + lower) / 2.0,
            high_period: self.highs.capacity(),
            low_period: self.lows.capacity(),
            warm: self.highs.is_full() && self.lows.is_full(),
        }
    }
}
