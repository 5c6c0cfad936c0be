//! Sensor data acquisition module
//!
//! Handles the serial link to the distance sensor: endpoint parsing, the
//! RFC 2217 telnet codec, line framing, and parsing of distance samples.

pub mod backoff;
pub mod endpoint;
pub mod link;
pub mod sample_parser;
pub mod telnet;

pub use backoff::ReconnectBackoff;
pub use endpoint::{Endpoint, Transport};
pub use link::{LinkError, LinkEvent, LinkStats, SerialLink};
pub use sample_parser::{parse_distance, InvalidSampleFormat};
pub use telnet::TelnetFilter;
