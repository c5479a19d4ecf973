//! Message types exchanged with the price server
//!
//! Inbound messages are delivered to subscription handlers as
//! [`InboundMessage`]; outbound bodies are [`MessageBody`] values that are
//! either passed through as text or JSON-encoded at publish time.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{ClientError, ClientResult};

/// Frame headers as seen by callers (name -> value)
pub type Headers = BTreeMap<String, String>;

/// A message delivered on a subscribed destination
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Destination the server published on
    pub destination: String,
    /// Transport subscription id the server matched
    pub subscription: String,
    pub message_id: Option<String>,
    pub headers: Headers,
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new<D: Into<String>, B: Into<String>>(destination: D, body: B) -> Self {
        Self {
            destination: destination.into(),
            subscription: String::new(),
            message_id: None,
            headers: Headers::new(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    /// Decode the body as JSON into `T`
    ///
    /// # Examples
    /// ```
    /// use tickerlink::protocol::{EtfPriceUpdate, InboundMessage};
    ///
    /// let message = InboundMessage::new(
    ///     "/topic/etf/069500/price",
    ///     r#"{"etfCode":"069500","price":35120.0,"dayOverDayRate":0.42,"volume":1200}"#,
    /// );
    /// let update: EtfPriceUpdate = message.json().unwrap();
    /// assert_eq!(update.etf_code, "069500");
    /// ```
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_str(&self.body).map_err(ClientError::from)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Outbound message body
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBody {
    /// Sent as-is
    Text(String),
    /// Encoded with serde_json on publish
    Json(Value),
}

impl MessageBody {
    /// Build a JSON body from any serializable value
    pub fn json<T: Serialize>(value: &T) -> ClientResult<Self> {
        Ok(MessageBody::Json(serde_json::to_value(value)?))
    }

    /// Wire payload for this body
    pub fn encode(&self) -> ClientResult<String> {
        match self {
            MessageBody::Text(text) => Ok(text.clone()),
            MessageBody::Json(value) => Ok(serde_json::to_string(value)?),
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, MessageBody::Json(_))
    }
}

impl From<String> for MessageBody {
    fn from(text: String) -> Self {
        MessageBody::Text(text)
    }
}

impl From<&str> for MessageBody {
    fn from(text: &str) -> Self {
        MessageBody::Text(text.to_string())
    }
}

impl From<Value> for MessageBody {
    fn from(value: Value) -> Self {
        MessageBody::Json(value)
    }
}

/// Real-time ETF price update published on `/topic/etf/{code}/price`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EtfPriceUpdate {
    pub etf_code: String,
    pub price: f64,
    pub day_over_day_rate: f64,
    pub volume: u64,
}

/// Real-time stock quote published on `/topic/stocks/{code}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StockPrice {
    pub stock_code: String,
    pub current_price: f64,
    /// Sign code for the day-over-day move as sent by the exchange feed
    pub day_over_day_sign: String,
    pub day_over_day_change: f64,
    pub day_over_day_rate: f64,
    pub accumulated_volume: u64,
}
