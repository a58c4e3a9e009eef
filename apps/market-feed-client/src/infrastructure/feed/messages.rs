//! Feed Wire Vocabulary
//!
//! Field and type names of the JSON envelope. Feeds that speak the same
//! protocol with different names are handled by changing these values, not
//! by writing another client.
//!
//! # Default Envelope
//!
//! Inbound frames carry a `type` discriminator:
//!
//! ```json
//! {"type":"market_data_update","symbol":"AAPL","data":{"price":150.25},"timestamp":1700000000000}
//! {"type":"subscription_confirmed","symbols":["AAPL"]}
//! {"type":"subscription_denied","symbols":["FAKE"],"message":"unknown symbol"}
//! {"type":"unsubscribe_confirmed","symbols":["AAPL"]}
//! {"type":"pong","timestamp":1700000000000}
//! {"type":"error","message":"rate limited"}
//! ```
//!
//! Outbound frames carry an `action` discriminator:
//!
//! ```json
//! {"action":"subscribe","symbols":["AAPL"],"channels":["quotes"]}
//! {"action":"unsubscribe","symbols":["AAPL"]}
//! {"action":"ping","timestamp":1700000000000}
//! ```

use serde::{Deserialize, Serialize};

/// Envelope field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeFields {
    /// Discriminator on inbound frames.
    pub inbound_type: String,
    /// Discriminator on outbound frames.
    pub outbound_type: String,
    /// Single symbol on data frames.
    pub symbol: String,
    /// Symbol list on subscription frames.
    pub symbols: String,
    /// Payload on data frames.
    pub data: String,
    /// Channel list on subscribe frames.
    pub channels: String,
    /// Epoch timestamp (seconds or milliseconds).
    pub timestamp: String,
    /// Human-readable message on error and denial frames.
    pub message: String,
}

impl Default for EnvelopeFields {
    fn default() -> Self {
        Self {
            inbound_type: "type".to_string(),
            outbound_type: "action".to_string(),
            symbol: "symbol".to_string(),
            symbols: "symbols".to_string(),
            data: "data".to_string(),
            channels: "channels".to_string(),
            timestamp: "timestamp".to_string(),
            message: "message".to_string(),
        }
    }
}

/// Discriminator values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageTypes {
    /// Market data update.
    pub market_data: String,
    /// Subscription accepted.
    pub subscription_confirmed: String,
    /// Subscription refused.
    pub subscription_denied: String,
    /// Unsubscribe accepted.
    pub unsubscribe_confirmed: String,
    /// Heartbeat reply.
    pub pong: String,
    /// Server error.
    pub error: String,
    /// Outbound subscribe.
    pub subscribe: String,
    /// Outbound unsubscribe.
    pub unsubscribe: String,
    /// Outbound heartbeat.
    pub ping: String,
}

impl Default for MessageTypes {
    fn default() -> Self {
        Self {
            market_data: "market_data_update".to_string(),
            subscription_confirmed: "subscription_confirmed".to_string(),
            subscription_denied: "subscription_denied".to_string(),
            unsubscribe_confirmed: "unsubscribe_confirmed".to_string(),
            pong: "pong".to_string(),
            error: "error".to_string(),
            subscribe: "subscribe".to_string(),
            unsubscribe: "unsubscribe".to_string(),
            ping: "ping".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_overrides_keep_defaults() {
        let fields: EnvelopeFields =
            serde_json::from_str(r#"{"inbound_type":"T","symbol":"S"}"#).unwrap();
        assert_eq!(fields.inbound_type, "T");
        assert_eq!(fields.symbol, "S");
        assert_eq!(fields.data, "data");
        assert_eq!(fields.outbound_type, "action");
    }

    #[test]
    fn default_types_match_protocol() {
        let types = MessageTypes::default();
        assert_eq!(types.market_data, "market_data_update");
        assert_eq!(types.ping, "ping");
    }
}
