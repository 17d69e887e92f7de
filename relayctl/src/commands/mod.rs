pub mod control;
pub mod serve;
