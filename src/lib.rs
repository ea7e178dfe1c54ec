// Motion control and mode arbitration for a four-wheel mecanum robot

pub mod arbiter;
pub mod config;
pub mod context;
pub mod hal;
pub mod keypad;
pub mod line;
pub mod messages;
pub mod motor;
pub mod nav;
pub mod runtime;
