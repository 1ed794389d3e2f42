pub mod fake;
pub mod fan;
pub mod power;
pub mod shutdown;
