use serde::de::Error as SerdeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::{event::Event, event::EventType, time::TimestampMillis};

// Where a new subscription starts reading from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FirstEvent {
    Oldest,
    Newest,
    At(u64),
}

impl Default for FirstEvent {
    fn default() -> Self {
        FirstEvent::Oldest
    }
}

// "oldest" | "newest" | <sequence number>
impl Serialize for FirstEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FirstEvent::Oldest => serializer.serialize_str("oldest"),
            FirstEvent::Newest => serializer.serialize_str("newest"),
            FirstEvent::At(sequence) => serializer.serialize_u64(*sequence),
        }
    }
}

impl<'de> Deserialize<'de> for FirstEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(s) if s == "oldest" => Ok(FirstEvent::Oldest),
            Value::String(s) if s == "newest" => Ok(FirstEvent::Newest),
            Value::Number(n) => n
                .as_u64()
                .map(FirstEvent::At)
                .ok_or_else(|| SerdeError::custom("first_event sequence must be a u64")),
            other => Err(SerdeError::custom(format!(
                "invalid first_event: {}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryOptions {
    pub base_millis: u64,
    pub factor: f64,
    pub cap_millis: u64,
    pub max_attempts: u32,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            base_millis: 250,
            factor: 2.0,
            cap_millis: 30_000,
            max_attempts: 5,
        }
    }
}

impl RetryOptions {
    // Exponential backoff delay for the given zero-based attempt
    pub fn delay_millis(&self, attempt: u32) -> u64 {
        let delay = self.base_millis as f64 * self.factor.powi(attempt as i32);
        (delay as u64).min(self.cap_millis)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    #[serde(default)]
    pub first_event: FirstEvent,
    pub read_ahead: u16,
    #[serde(default)]
    pub retry: RetryOptions,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            first_event: FirstEvent::Oldest,
            read_ahead: 16,
            retry: RetryOptions::default(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<EventType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    // Matched against the referenced message header, when the event has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl SubscriptionFilter {
    // The part of the filter that is decidable from the event row alone
    pub fn matches_event(&self, event: &Event) -> bool {
        if let Some(types) = &self.types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(topic) = &self.topic {
            if event.topic.as_deref() != Some(topic.as_str()) {
                return false;
            }
        }
        true
    }

    // Author/tag constraints require loading the referenced message
    pub fn needs_message(&self) -> bool {
        self.author.is_some() || self.tag.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub namespace: String,
    pub name: String,
    // Transport the deliveries go out on, resolved by name at dispatch
    pub transport: String,
    #[serde(default)]
    pub filter: SubscriptionFilter,
    #[serde(default)]
    pub options: SubscriptionOptions,
    pub created: TimestampMillis,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_event_serde() {
        assert_eq!(
            serde_json::to_string(&FirstEvent::Oldest).unwrap(),
            "\"oldest\""
        );
        assert_eq!(serde_json::to_string(&FirstEvent::At(42)).unwrap(), "42");
        let parsed: FirstEvent = serde_json::from_str("\"newest\"").unwrap();
        assert_eq!(parsed, FirstEvent::Newest);
        let parsed: FirstEvent = serde_json::from_str("7").unwrap();
        assert_eq!(parsed, FirstEvent::At(7));
    }

    #[test]
    fn test_backoff_capped() {
        let retry = RetryOptions {
            base_millis: 100,
            factor: 2.0,
            cap_millis: 500,
            max_attempts: 10,
        };
        assert_eq!(retry.delay_millis(0), 100);
        assert_eq!(retry.delay_millis(1), 200);
        assert_eq!(retry.delay_millis(2), 400);
        assert_eq!(retry.delay_millis(3), 500);
        assert_eq!(retry.delay_millis(9), 500);
    }

    #[test]
    fn test_filter_on_type_and_topic() {
        let filter = SubscriptionFilter {
            types: Some(vec![EventType::MessageConfirmed]),
            topic: Some("orders".into()),
            author: None,
            tag: None,
        };
        let mut event = Event::new(
            "ns1".into(),
            EventType::MessageConfirmed,
            Uuid::new_v4(),
            None,
            Some("orders".into()),
            1,
        );
        assert!(filter.matches_event(&event));
        event.topic = Some("other".into());
        assert!(!filter.matches_event(&event));
        event.topic = Some("orders".into());
        event.event_type = EventType::OperationFailed;
        assert!(!filter.matches_event(&event));
    }
}
