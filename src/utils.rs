//! Identifier and timestamp helpers shared across record types.

use crate::error::EngineError;
use bech32::Bech32m;
use chrono::{DateTime, TimeZone, Utc};
use uuid7::uuid7;

/// Mint a fresh record id: a uuid7 rendered through bech32 so every id
/// carries its entity prefix ("req_", "cust_", "pro_", ...).
pub fn new_id(hrp: &str) -> Result<String, EngineError> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|err| EngineError::Storage(format!("bad id prefix {hrp:?}: {err}")))?;
    bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|err| EngineError::Storage(format!("id encoding failed: {err}")))
}

/// UTC instant persisted as nanoseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "timestamp out of the nanosecond-representable range",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::now();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: TimeStamp = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn ids_carry_their_prefix() {
        let id = new_id("req_").unwrap();
        assert!(id.starts_with("req_1"));
    }
}
