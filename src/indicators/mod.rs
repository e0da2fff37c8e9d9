// Technical indicator calculations
pub mod breakout;
pub mod moving_average;
pub mod rsi;

pub use breakout::calculate_breakout_target;
pub use moving_average::calculate_sma;
pub use rsi::calculate_rsi;
