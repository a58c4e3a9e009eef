//! JSON Envelope Codec
//!
//! [`MessageSchema`] implementation for JSON feeds. Field and discriminator
//! names come from [`EnvelopeFields`] and [`MessageTypes`], so protocol
//! variants are configuration.

use serde_json::{Map, Value};

use super::messages::{EnvelopeFields, MessageTypes};
use crate::application::ports::{CodecError, InboundMessage, MessageSchema, OutboundMessage};
use crate::domain::streaming::Symbol;

/// JSON envelope schema.
#[derive(Debug, Clone, Default)]
pub struct JsonEnvelopeSchema {
    fields: EnvelopeFields,
    types: MessageTypes,
}

impl JsonEnvelopeSchema {
    /// Create a schema with custom names.
    #[must_use]
    pub const fn new(fields: EnvelopeFields, types: MessageTypes) -> Self {
        Self { fields, types }
    }

    /// Field names in use.
    #[must_use]
    pub const fn fields(&self) -> &EnvelopeFields {
        &self.fields
    }

    fn symbols(&self, obj: &Map<String, Value>) -> Vec<Symbol> {
        obj.get(&self.fields.symbols)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn message(&self, obj: &Map<String, Value>) -> Option<String> {
        obj.get(&self.fields.message)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }

    fn symbol_array(symbols: &[Symbol]) -> Value {
        Value::Array(symbols.iter().cloned().map(Value::String).collect())
    }
}

impl MessageSchema for JsonEnvelopeSchema {
    fn decode(&self, raw: &str) -> Result<InboundMessage, CodecError> {
        let value: Value =
            serde_json::from_str(raw.trim()).map_err(|e| CodecError::Malformed(e.to_string()))?;

        let Value::Object(obj) = value else {
            let preview: String = raw.trim().chars().take(50).collect();
            return Err(CodecError::Malformed(format!(
                "expected JSON object, got: {preview}"
            )));
        };

        let kind = obj
            .get(&self.fields.inbound_type)
            .and_then(Value::as_str)
            .ok_or_else(|| CodecError::MissingDiscriminator(self.fields.inbound_type.clone()))?;

        let t = &self.types;
        let message = if kind == t.market_data {
            InboundMessage::MarketData {
                symbol: obj
                    .get(&self.fields.symbol)
                    .and_then(Value::as_str)
                    .map(ToString::to_string),
                data: obj.get(&self.fields.data).cloned().unwrap_or(Value::Null),
                timestamp: obj.get(&self.fields.timestamp).cloned(),
            }
        } else if kind == t.subscription_confirmed {
            InboundMessage::SubscriptionConfirmed {
                symbols: self.symbols(&obj),
            }
        } else if kind == t.subscription_denied {
            InboundMessage::SubscriptionDenied {
                symbols: self.symbols(&obj),
                message: self.message(&obj),
            }
        } else if kind == t.unsubscribe_confirmed {
            InboundMessage::UnsubscribeConfirmed {
                symbols: self.symbols(&obj),
            }
        } else if kind == t.pong {
            InboundMessage::Pong {
                timestamp: obj.get(&self.fields.timestamp).cloned(),
            }
        } else if kind == t.error {
            InboundMessage::Error {
                message: self
                    .message(&obj)
                    .unwrap_or_else(|| "unspecified server error".to_string()),
            }
        } else {
            InboundMessage::Unknown {
                kind: kind.to_string(),
            }
        };

        Ok(message)
    }

    fn encode(&self, message: &OutboundMessage) -> Result<String, CodecError> {
        let f = &self.fields;
        let mut obj = Map::new();

        match message {
            OutboundMessage::Subscribe { symbols, channels } => {
                obj.insert(f.outbound_type.clone(), Value::from(self.types.subscribe.as_str()));
                obj.insert(f.symbols.clone(), Self::symbol_array(symbols));
                obj.insert(
                    f.channels.clone(),
                    Value::Array(channels.iter().cloned().map(Value::String).collect()),
                );
            }
            OutboundMessage::Unsubscribe { symbols } => {
                obj.insert(
                    f.outbound_type.clone(),
                    Value::from(self.types.unsubscribe.as_str()),
                );
                obj.insert(f.symbols.clone(), Self::symbol_array(symbols));
            }
            OutboundMessage::Ping { timestamp } => {
                obj.insert(f.outbound_type.clone(), Value::from(self.types.ping.as_str()));
                obj.insert(f.timestamp.clone(), Value::from(*timestamp));
            }
        }

        serde_json::to_string(&Value::Object(obj)).map_err(|e| CodecError::Encode(e.to_string()))
    }
}
