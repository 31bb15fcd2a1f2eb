use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use crate::error::{Error, Result, ValidationError};
use crate::types::exchange::Exchange;
use crate::types::symbol::Symbol;

/// One price observation for a symbol from one exchange at one instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub exchange: Exchange,
    pub symbol: Symbol,
    pub price: f64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl PriceTick {
    pub fn new(exchange: Exchange, symbol: Symbol, price: f64, timestamp: DateTime<Utc>) -> Self {
        PriceTick { exchange, symbol, price, timestamp }
    }

    /// Decode one line of the exchange feed. Whatever `exchange` the payload
    /// carries is replaced by the identity of the source that read it.
    pub fn from_wire(line: &[u8], exchange: Exchange) -> Result<Self> {
        let wire: WireTick = serde_json::from_slice(line)
            .map_err(|e| Error::Decode(e.to_string()))?;

        Ok(PriceTick {
            exchange,
            symbol: wire.symbol,
            price: wire.price,
            timestamp: wire.timestamp.unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        if !self.symbol.is_valid() {
            return Err(ValidationError::InvalidSymbol);
        }
        if !self.exchange.is_source() {
            return Err(ValidationError::InvalidExchange(self.exchange));
        }
        // NaN fails this comparison too
        if !(self.price >= 0.0) {
            return Err(ValidationError::NegativePrice(self.price));
        }
        if self.timestamp.timestamp_millis() == 0 {
            return Err(ValidationError::ZeroTimestamp);
        }
        Ok(())
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

impl fmt::Display for PriceTick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} = {:.4} @ {}",
            self.exchange,
            self.symbol,
            self.price,
            self.timestamp.to_rfc3339()
        )
    }
}

#[derive(Deserialize)]
struct WireTick {
    symbol: Symbol,
    price: f64,
    #[serde(default, deserialize_with = "deserialize_optional_timestamp")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl WireTimestamp {
    fn into_datetime(self) -> std::result::Result<DateTime<Utc>, String> {
        match self {
            WireTimestamp::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| format!("timestamp out of range: {}", ms)),
            WireTimestamp::Fractional(ms) => DateTime::from_timestamp_millis(ms as i64)
                .ok_or_else(|| format!("timestamp out of range: {}", ms)),
            WireTimestamp::Text(text) => DateTime::parse_from_rfc3339(text.trim_matches('"'))
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| format!("invalid timestamp format: {}", e)),
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    WireTimestamp::deserialize(deserializer)?
        .into_datetime()
        .map_err(serde::de::Error::custom)
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<WireTimestamp>::deserialize(deserializer)? {
        Some(raw) => raw.into_datetime().map(Some).map_err(serde::de::Error::custom),
        None => Ok(None),
    }
}
