//! Serial frame format and published message shapes

pub mod envelope;
pub mod frame;
pub mod topics;

pub use envelope::{SensorEnvelope, DEFAULT_SENSOR_ID};
pub use frame::{parse, ParseError, RawLine, ReadingPair};
pub use topics::{Channel, TopicTable};

impl ReadingPair {
    /// Token carried for a produced channel; `None` for channels a frame never fills
    pub fn token(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Water => Some(&self.water),
            Channel::Temperature => Some(&self.temperature),
            Channel::Solar => None,
        }
    }
}
