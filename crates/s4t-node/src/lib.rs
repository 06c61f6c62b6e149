//! S4T nodes: the board that samples and sends readings, and the gateway
//! that verifies them and writes them to a time-series store.

#![forbid(unsafe_code)]

pub mod config;
pub mod handlers;
pub mod sensor;
pub mod sink;

pub use handlers::{Board, Gateway};
pub use sensor::{RandomSensor, Sensor};
pub use sink::{InfluxSink, LogSink, Point, Sink};
