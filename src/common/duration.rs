use std::time::Duration;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::digit1;
use nom::IResult;

/// Parses a Prometheus-style duration literal: `500ms`, `30s`, `5m`, `1h30m`,
/// `2d`, `1w`. Units must appear in descending order and the total must be
/// greater than zero.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    match duration(s) {
        Ok(("", d)) if !d.is_zero() => Ok(d),
        Ok(("", _)) => Err(format!("duration must be greater than 0: {:?}", s)),
        Ok((rest, _)) => Err(format!("trailing input {:?} in duration {:?}", rest, s)),
        Err(_) => Err(format!("invalid duration literal: {:?}", s)),
    }
}

/// Renders a duration the way [`parse_duration`] reads it; used when echoing
/// configuration back in logs and serialized payloads.
pub fn format_duration(d: Duration) -> String {
    let mut millis = d.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit_millis, suffix) in UNITS {
        if millis >= *unit_millis {
            let n = millis / unit_millis;
            millis %= unit_millis;
            out.push_str(&n.to_string());
            out.push_str(suffix);
        }
    }
    out
}

const UNITS: &[(u64, &str)] = &[
    (7 * 24 * 60 * 60 * 1000, "w"),
    (24 * 60 * 60 * 1000, "d"),
    (60 * 60 * 1000, "h"),
    (60 * 1000, "m"),
    (1000, "s"),
    (1, "ms"),
];

fn duration(input: &str) -> IResult<&str, Duration> {
    let (mut rest, mut total) = segment(input)?;
    let mut last_unit = unit_of(input, rest);
    loop {
        match segment(rest) {
            Ok((next, more)) => {
                let unit = unit_of(rest, next);
                // units must strictly descend, e.g. "1h30m" but not "30m1h"
                if unit >= last_unit {
                    return Err(nom::Err::Error(nom::error::Error::new(
                        rest,
                        nom::error::ErrorKind::Verify,
                    )));
                }
                last_unit = unit;
                total += more;
                rest = next;
            }
            Err(_) => return Ok((rest, total)),
        }
    }
}

fn segment(input: &str) -> IResult<&str, Duration> {
    let (rest, count) = digit1(input)?;
    let (rest, unit) = alt((
        tag("ms"),
        tag("w"),
        tag("d"),
        tag("h"),
        tag("m"),
        tag("s"),
    ))(rest)?;
    let count: u64 = count
        .parse()
        .map_err(|_| nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit)))?;
    let unit_millis = UNITS
        .iter()
        .find(|(_, suffix)| *suffix == unit)
        .map(|(m, _)| *m)
        .unwrap();
    Ok((rest, Duration::from_millis(count * unit_millis)))
}

// The unit weight of the segment consumed between `before` and `after`.
fn unit_of(before: &str, after: &str) -> u64 {
    let consumed = &before[..before.len() - after.len()];
    let suffix: String = consumed.chars().skip_while(|c| c.is_ascii_digit()).collect();
    UNITS
        .iter()
        .find(|(_, s)| *s == suffix)
        .map(|(m, _)| *m)
        .unwrap_or(0)
}

/// Serde adapter for `Duration` fields holding literals like `"30s"`.
pub mod serde_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        super::parse_duration(&s).map_err(de::Error::custom)
    }
}

/// Serde adapter for optional duration fields; absent or `null` maps to `None`.
pub mod serde_opt_duration {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => ser.serialize_some(&super::format_duration(*d)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let s: Option<String> = Option::deserialize(de)?;
        match s {
            Some(s) => super::parse_duration(&s).map(Some).map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}
