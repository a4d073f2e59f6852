pub mod click_velocity;
pub mod escalator;
pub mod gate;
pub mod rate_limiter;
