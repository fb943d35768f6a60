use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::HostError;

pub type HostId = u64;

/// Opaque instruction understood by the remote surface. The core never inspects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDescriptor {
    pub name: String,
    #[serde(default = "empty_params")]
    pub params: Value,
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: empty_params(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.params.is_object() {
            self.params = empty_params();
        }
        if let Value::Object(map) = &mut self.params {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCommand {
    pub seq: u64,
    #[serde(flatten)]
    pub action: ActionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostEvent {
    Ready,
    Observation { seq: u64, present: bool },
    StateCleared,
    Log { message: String },
    Fault { message: String },
}

/// An isolated, untrusted remote surface. Commands are fire-and-forget; everything the host
/// has to say arrives on the event stream.
#[async_trait]
pub trait ExecutionHost: Send + Sync {
    fn id(&self) -> HostId;

    async fn load(&self, target: &str) -> Result<(), HostError>;

    async fn send(&self, command: HostCommand) -> Result<(), HostError>;

    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;

    async fn destroy(&self) -> Result<(), HostError>;
}

#[async_trait]
pub trait HostFactory: Send + Sync {
    async fn create(&self, id: HostId) -> Result<Box<dyn ExecutionHost>, HostError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_wire_shape_is_flat() {
        let command = HostCommand {
            seq: 3,
            action: ActionDescriptor::new("order.field")
                .with_param("field", "size")
                .with_param("value", 0.1),
        };
        assert_eq!(
            serde_json::to_value(&command).unwrap(),
            json!({ "seq": 3, "name": "order.field", "params": { "field": "size", "value": 0.1 } })
        );
    }

    #[test]
    fn test_events_decode_from_tagged_json() {
        let event: HostEvent =
            serde_json::from_str(r#"{ "type": "observation", "seq": 9, "present": true }"#)
                .unwrap();
        assert_eq!(event, HostEvent::Observation { seq: 9, present: true });

        let event: HostEvent = serde_json::from_str(r#"{ "type": "state_cleared" }"#).unwrap();
        assert_eq!(event, HostEvent::StateCleared);
    }
}
