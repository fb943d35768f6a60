use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use common::models::{Direction, Signal, SourceTag};

use crate::error::IntakeError;
use crate::traits::RemoteResponse;

/// Epoch values above this are milliseconds, below are seconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawId {
    Number(i64),
    Text(String),
}

impl RawId {
    fn to_id_string(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawNumber {
    Number(f64),
    Text(String),
}

impl RawNumber {
    fn value(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) if s.trim().is_empty() => None,
            Self::Text(s) => s.trim().parse::<f64>().ok(),
        };
        // Backends use 0 for "not set".
        value.filter(|v| v.is_finite() && *v != 0.0)
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum RawTimestamp {
    Epoch(i64),
    Fractional(f64),
    Text(String),
}

impl RawTimestamp {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(n) => from_epoch(*n),
            Self::Fractional(f) if f.is_finite() && *f > 0.0 => {
                let millis = if *f >= EPOCH_MILLIS_CUTOFF as f64 {
                    *f as i64
                } else {
                    (*f * 1000.0) as i64
                };
                Utc.timestamp_millis_opt(millis).single()
            }
            Self::Fractional(_) => None,
            Self::Text(s) => parse_text_timestamp(s.trim()),
        }
    }
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value >= EPOCH_MILLIS_CUTOFF {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

fn parse_text_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(n) = raw.parse::<i64>() {
        return from_epoch(n);
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    debug!("Unparseable signal timestamp: {}", raw);
    None
}

#[derive(Deserialize, Debug, Clone)]
pub struct SignalResponse {
    pub id: Option<RawId>,
    #[serde(alias = "symbol", alias = "pair")]
    pub instrument: Option<String>,
    #[serde(alias = "type", alias = "side", alias = "action")]
    pub direction: Option<String>,
    #[serde(alias = "entry", alias = "price", alias = "entryPrice")]
    pub entry_price: Option<RawNumber>,
    #[serde(alias = "tp", alias = "takeProfit")]
    pub take_profit: Option<RawNumber>,
    #[serde(alias = "sl", alias = "stopLoss")]
    pub stop_loss: Option<RawNumber>,
    #[serde(alias = "created_at", alias = "timestamp", alias = "issuedAt")]
    pub issued_at: Option<RawTimestamp>,
    #[serde(alias = "updated_at", alias = "lastUpdatedAt")]
    pub last_updated_at: Option<RawTimestamp>,
}

/// Shapes signal backends answer with: a bare list, a wrapped list, or a single object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum SignalEnvelope {
    List(Vec<SignalResponse>),
    Wrapped {
        #[serde(alias = "data")]
        signals: Vec<SignalResponse>,
    },
    Single(SignalResponse),
}

impl SignalEnvelope {
    pub fn into_responses(self) -> Vec<SignalResponse> {
        match self {
            Self::List(list) | Self::Wrapped { signals: list } => list,
            Self::Single(one) => vec![one],
        }
    }
}

impl RemoteResponse<Signal> for SignalResponse {
    fn to_model(&self, source: SourceTag) -> Result<Signal, IntakeError> {
        let id = self
            .id
            .as_ref()
            .map(RawId::to_id_string)
            .filter(|id| !id.is_empty())
            .ok_or(IntakeError::MissingField("id"))?;

        let instrument = self
            .instrument
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(IntakeError::MissingField("instrument"))?
            .to_string();

        let raw_direction = self
            .direction
            .as_deref()
            .ok_or(IntakeError::MissingField("direction"))?;
        let direction = raw_direction
            .parse::<Direction>()
            .map_err(|_| IntakeError::InvalidField {
                field: "direction",
                value: raw_direction.to_string(),
            })?;

        Ok(Signal {
            id,
            instrument,
            direction,
            entry_price: self.entry_price.as_ref().and_then(RawNumber::value),
            take_profit: self.take_profit.as_ref().and_then(RawNumber::value),
            stop_loss: self.stop_loss.as_ref().and_then(RawNumber::value),
            issued_at: self.issued_at.as_ref().and_then(RawTimestamp::to_datetime),
            last_updated_at: self
                .last_updated_at
                .as_ref()
                .and_then(RawTimestamp::to_datetime),
            source,
        })
    }
}

/// Decodes one text frame or HTTP body into signals. Malformed entries are returned as errors
/// alongside the good ones so a single bad record never hides the rest.
pub fn decode_signals(
    body: &str,
    source: SourceTag,
) -> Result<Vec<Result<Signal, IntakeError>>, IntakeError> {
    let envelope: SignalEnvelope = serde_json::from_str(body)?;
    Ok(envelope
        .into_responses()
        .iter()
        .map(|r| r.to_model(source))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_numeric_and_aliased_fields() {
        let body = r#"[{
            "id": 42,
            "symbol": "EURUSD",
            "type": "buy",
            "entry": "1.0850",
            "tp": 1.0900,
            "sl": "",
            "created_at": "2026-05-04T09:30:00Z",
            "updated_at": 1777887005000
        }]"#;

        let signals = decode_signals(body, SourceTag::Foreground).unwrap();
        let signal = signals[0].as_ref().unwrap();

        assert_eq!(signal.id, "42");
        assert_eq!(signal.instrument, "EURUSD");
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.entry_price, Some(1.085));
        assert_eq!(signal.take_profit, Some(1.09));
        assert_eq!(signal.stop_loss, None);
        assert_eq!(
            signal.issued_at,
            Some(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap())
        );
        assert_eq!(
            signal.last_updated_at,
            Utc.timestamp_millis_opt(1_777_887_005_000).single()
        );
        assert_eq!(signal.source, SourceTag::Foreground);
    }

    #[test]
    fn test_wrapped_and_single_envelopes() {
        let wrapped = r#"{ "signals": [
            { "id": "a", "pair": "XAUUSD", "side": "SELL", "timestamp": 1777887000 },
            { "id": "b", "pair": "XAUUSD", "side": "short", "timestamp": "1777887000" }
        ] }"#;
        let decoded = decode_signals(wrapped, SourceTag::Background).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|s| s.as_ref().unwrap().direction == Direction::Sell));

        let single = r#"{ "id": "c", "instrument": "GBPUSD", "direction": "long",
                          "issuedAt": "2026-05-04 09:30:00" }"#;
        let decoded = decode_signals(single, SourceTag::Push).unwrap();
        let signal = decoded[0].as_ref().unwrap();
        assert_eq!(
            signal.issued_at,
            Some(Utc.with_ymd_and_hms(2026, 5, 4, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn test_bad_records_do_not_hide_good_ones() {
        let body = r#"[
            { "id": "ok", "symbol": "EURUSD", "type": "BUY", "created_at": "2026-05-04T09:30:00Z" },
            { "id": "bad", "symbol": "EURUSD", "type": "HOLD" },
            { "symbol": "EURUSD", "type": "SELL" }
        ]"#;
        let decoded = decode_signals(body, SourceTag::Foreground).unwrap();
        assert!(decoded[0].is_ok());
        assert!(matches!(
            decoded[1],
            Err(IntakeError::InvalidField { field: "direction", .. })
        ));
        assert!(matches!(decoded[2], Err(IntakeError::MissingField("id"))));
    }

    #[test]
    fn test_garbage_timestamp_becomes_absent() {
        let body = r#"{ "id": 7, "symbol": "EURUSD", "type": "BUY", "created_at": "yesterday" }"#;
        let decoded = decode_signals(body, SourceTag::Push).unwrap();
        let signal = decoded[0].as_ref().unwrap();
        assert_eq!(signal.issued_at, None);
        assert_eq!(signal.freshest_timestamp(), None);
    }
}
