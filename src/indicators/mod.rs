// Channel indicator module
// Rolling extremum windows and the Donchian band engine built on them

pub mod donchian;
pub mod rolling_window;

pub use donchian::{ChannelState, Classification, DonchianChannel};
pub use rolling_window::{Extremum, RollingWindow, WindowError};
