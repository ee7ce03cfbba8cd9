//! Logical channels and their broker topics

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named publish destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Water,
    Temperature,
    /// Declared for forward compatibility; the frame format has no solar field
    Solar,
}

impl Channel {
    /// Channels populated from each frame, in publish order
    pub const PRODUCED: [Channel; 2] = [Channel::Water, Channel::Temperature];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Water => "water",
            Channel::Temperature => "temperature",
            Channel::Solar => "solar",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel to topic mapping, `[topics]` in the config file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicTable {
    #[serde(default = "default_water_topic")]
    pub water: String,
    #[serde(default = "default_temperature_topic")]
    pub temperature: String,
    /// Never published to
    #[serde(default = "default_solar_topic")]
    pub solar: String,
}

fn default_water_topic() -> String {
    "ripple-water".to_string()
}

fn default_temperature_topic() -> String {
    "ripple-temperature".to_string()
}

fn default_solar_topic() -> String {
    "ripple-solar".to_string()
}

impl Default for TopicTable {
    fn default() -> Self {
        Self {
            water: default_water_topic(),
            temperature: default_temperature_topic(),
            solar: default_solar_topic(),
        }
    }
}

impl TopicTable {
    pub fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Water => &self.water,
            Channel::Temperature => &self.temperature,
            Channel::Solar => &self.solar,
        }
    }

    /// Check that every topic is a usable MQTT publish topic and distinct
    pub fn validate(&self) -> Result<(), String> {
        let all = [
            (Channel::Water, &self.water),
            (Channel::Temperature, &self.temperature),
            (Channel::Solar, &self.solar),
        ];

        for (channel, topic) in all {
            if topic.is_empty() {
                return Err(format!("topic for channel '{channel}' must not be empty"));
            }
            if topic.contains('+') || topic.contains('#') {
                return Err(format!(
                    "topic '{topic}' for channel '{channel}' must not contain wildcards"
                ));
            }
        }

        for (i, (channel, topic)) in all.iter().enumerate() {
            if let Some((other, _)) = all[i + 1..].iter().find(|(_, t)| t == topic) {
                return Err(format!(
                    "channels '{channel}' and '{other}' share topic '{topic}'"
                ));
            }
        }

        Ok(())
    }
}
