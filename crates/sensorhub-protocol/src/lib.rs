//! sensorhub Protocol - Wire formats for the sensor hub
//!
//! This crate provides parsing of the delimited text emitted by live
//! sensors, and the JSON frame delivered to every subscriber.

pub mod message;
pub mod parse;

pub use message::{decode_reading, encode_reading, InboundPreview, ProtocolError};
pub use parse::{parse_sample, SampleError, SAMPLE_DELIMITER};
