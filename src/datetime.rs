//! Wire date-time values.
//!
//! A [`DateTime`] stores signed seconds since 1970-01-01T00:00:00 UTC plus a
//! nanosecond fraction, a declared [`Accuracy`], and an optional UTC offset
//! counted in 15-minute units. The wire payload is `u8 options, i8 offset,
//! i64 seconds, u32 nanos` with the multi-byte integers big-endian. The low
//! five option bits carry the accuracy; bit 5 flags the presence of the
//! offset. Whether an offset is present is decided by that flag alone, so an
//! offset of zero with the flag set means "UTC with a known offset" while a
//! clear flag means "no offset at all".

use std::cmp;
use std::convert::TryFrom;
use std::fmt;

use byteorder::{BigEndian, ReadBytesExt};

const MAX_NANOSEC: u32 = 999_999_999;
const OFFSET_FLAG: u8 = 0x20;
const ACCURACY_MASK: u8 = 0x1f;
const QUARTER_HOUR_MINS: i32 = 15;
const MAX_OFFSET_QUARTERS: i32 = 96;
const SECS_PER_DAY: i64 = 86_400;

/// Byte length of the encoded payload.
pub const ENCODED_SIZE: usize = 14;

/// How much of a [`DateTime`] is meaningful. Coarser accuracies keep the
/// full seconds value but render truncated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Accuracy {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Century,
}

impl Accuracy {
    /// The wire encoding of this accuracy.
    pub fn as_u8(self) -> u8 {
        match self {
            Accuracy::Nanosecond => 0,
            Accuracy::Microsecond => 1,
            Accuracy::Millisecond => 2,
            Accuracy::Second => 3,
            Accuracy::Minute => 4,
            Accuracy::Hour => 5,
            Accuracy::Day => 6,
            Accuracy::Month => 7,
            Accuracy::Year => 8,
            Accuracy::Century => 9,
        }
    }

    /// Decode a wire accuracy. Returns `None` for unassigned values.
    pub fn from_u8(v: u8) -> Option<Accuracy> {
        match v {
            0 => Some(Accuracy::Nanosecond),
            1 => Some(Accuracy::Microsecond),
            2 => Some(Accuracy::Millisecond),
            3 => Some(Accuracy::Second),
            4 => Some(Accuracy::Minute),
            5 => Some(Accuracy::Hour),
            6 => Some(Accuracy::Day),
            7 => Some(Accuracy::Month),
            8 => Some(Accuracy::Year),
            9 => Some(Accuracy::Century),
            _ => None,
        }
    }
}

/// A point in time with declared accuracy and an optional UTC offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DateTime {
    secs: i64,
    nanos: u32,
    accuracy: Accuracy,
    offset_quarters: Option<i8>,
}

impl DateTime {
    /// Construct from raw epoch seconds, a nanosecond fraction, an accuracy,
    /// and an optional offset in minutes. Fails if nanoseconds reach one
    /// billion, or if the offset is not a multiple of 15 minutes within
    /// +/-24 hours.
    pub fn new(
        secs: i64,
        nanos: u32,
        accuracy: Accuracy,
        offset_minutes: Option<i32>,
    ) -> Option<DateTime> {
        if nanos > MAX_NANOSEC {
            return None;
        }
        let offset_quarters = match offset_minutes {
            None => None,
            Some(mins) => {
                if mins % QUARTER_HOUR_MINS != 0 {
                    return None;
                }
                let quarters = mins / QUARTER_HOUR_MINS;
                if quarters.abs() > MAX_OFFSET_QUARTERS {
                    return None;
                }
                Some(quarters as i8)
            }
        };
        Some(DateTime {
            secs,
            nanos,
            accuracy,
            offset_quarters,
        })
    }

    /// Construct from raw epoch seconds and nanoseconds, at nanosecond
    /// accuracy with no offset.
    pub fn from_epoch(secs: i64, nanos: u32) -> Option<DateTime> {
        DateTime::new(secs, nanos, Accuracy::Nanosecond, None)
    }

    /// Construct a UTC instant from civil date and time components. The
    /// result carries a zero offset with the offset flag set, at nanosecond
    /// accuracy.
    pub fn from_civil_utc(
        year: i64,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
        nanos: u32,
    ) -> Option<DateTime> {
        if month < 1 || month > 12 || day < 1 || day > 31 {
            return None;
        }
        if hour > 23 || min > 59 || sec > 59 {
            return None;
        }
        let days = days_from_civil(year, month, day);
        let secs = days * SECS_PER_DAY + (hour as i64) * 3600 + (min as i64) * 60 + sec as i64;
        DateTime::new(secs, nanos, Accuracy::Nanosecond, Some(0))
    }

    /// Replace the accuracy.
    pub fn with_accuracy(mut self, accuracy: Accuracy) -> DateTime {
        self.accuracy = accuracy;
        self
    }

    /// Replace the offset. Fails on the same conditions as [`new`](Self::new).
    pub fn with_offset_minutes(self, offset_minutes: Option<i32>) -> Option<DateTime> {
        DateTime::new(self.secs, self.nanos, self.accuracy, offset_minutes)
    }

    /// Signed seconds since the 1970-01-01T00:00:00 UTC epoch.
    pub fn secs(&self) -> i64 {
        self.secs
    }

    /// Nanoseconds past the seconds count.
    pub fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// The declared accuracy.
    pub fn accuracy(&self) -> Accuracy {
        self.accuracy
    }

    /// The offset in minutes, if one is carried.
    pub fn offset_minutes(&self) -> Option<i32> {
        self.offset_quarters
            .map(|q| q as i32 * QUARTER_HOUR_MINS)
    }

    /// Encode onto a byte vector: options, offset, seconds, nanoseconds.
    pub fn encode_vec(&self, vec: &mut Vec<u8>) {
        let mut options = self.accuracy.as_u8();
        if self.offset_quarters.is_some() {
            options |= OFFSET_FLAG;
        }
        vec.reserve(ENCODED_SIZE);
        vec.push(options);
        vec.push(self.offset_quarters.unwrap_or(0) as u8);
        vec.extend_from_slice(&self.secs.to_be_bytes());
        vec.extend_from_slice(&self.nanos.to_be_bytes());
    }

    /// Convert into a byte vector. For extending an existing vector, see
    /// [`encode_vec`](Self::encode_vec).
    pub fn as_vec(&self) -> Vec<u8> {
        let mut v = Vec::new();
        self.encode_vec(&mut v);
        v
    }
}

impl TryFrom<&[u8]> for DateTime {
    type Error = String;
    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != ENCODED_SIZE {
            return Err(format!(
                "not a recognized DateTime length ({} bytes)",
                value.len()
            ));
        }
        let mut raw = value;
        let options = raw.read_u8().unwrap();
        let offset_raw = raw.read_i8().unwrap();
        let secs = raw.read_i64::<BigEndian>().unwrap();
        let nanos = raw.read_u32::<BigEndian>().unwrap();
        let accuracy = Accuracy::from_u8(options & ACCURACY_MASK)
            .ok_or_else(|| format!("unassigned accuracy value {}", options & ACCURACY_MASK))?;
        if nanos > MAX_NANOSEC {
            return Err(format!("nanoseconds out of range ({})", nanos));
        }
        let offset_quarters = if options & OFFSET_FLAG != 0 {
            if (offset_raw as i32).abs() > MAX_OFFSET_QUARTERS {
                return Err(format!("offset out of range ({} quarter-hours)", offset_raw));
            }
            Some(offset_raw)
        } else {
            None
        };
        Ok(DateTime {
            secs,
            nanos,
            accuracy,
            offset_quarters,
        })
    }
}

impl cmp::Ord for DateTime {
    fn cmp(&self, other: &DateTime) -> cmp::Ordering {
        match self.secs.cmp(&other.secs) {
            cmp::Ordering::Equal => self.nanos.cmp(&other.nanos),
            other => other,
        }
    }
}

impl cmp::PartialOrd for DateTime {
    fn partial_cmp(&self, other: &DateTime) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for DateTime {
    /// Renders in RFC 3339 style, truncated to the declared accuracy, with
    /// the offset suffix when one is carried (`Z` for zero).
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let days = self.secs.div_euclid(SECS_PER_DAY);
        let tod = self.secs.rem_euclid(SECS_PER_DAY);
        let (year, month, day) = civil_from_days(days);
        let hour = tod / 3600;
        let min = (tod / 60) % 60;
        let sec = tod % 60;

        match self.accuracy {
            Accuracy::Century => write!(f, "{:04}", year - year.rem_euclid(100))?,
            Accuracy::Year => write!(f, "{:04}", year)?,
            Accuracy::Month => write!(f, "{:04}-{:02}", year, month)?,
            Accuracy::Day => write!(f, "{:04}-{:02}-{:02}", year, month, day)?,
            Accuracy::Hour => write!(f, "{:04}-{:02}-{:02}T{:02}", year, month, day, hour)?,
            Accuracy::Minute => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}",
                year, month, day, hour, min
            )?,
            Accuracy::Second => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                year, month, day, hour, min, sec
            )?,
            Accuracy::Millisecond => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
                year,
                month,
                day,
                hour,
                min,
                sec,
                self.nanos / 1_000_000
            )?,
            Accuracy::Microsecond => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:06}",
                year,
                month,
                day,
                hour,
                min,
                sec,
                self.nanos / 1_000
            )?,
            Accuracy::Nanosecond => write!(
                f,
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}",
                year, month, day, hour, min, sec, self.nanos
            )?,
        }

        if self.accuracy <= Accuracy::Hour {
            match self.offset_minutes() {
                Some(0) => write!(f, "Z")?,
                Some(mins) => {
                    let sign = if mins < 0 { '-' } else { '+' };
                    let mins = mins.abs();
                    write!(f, "{}{:02}:{:02}", sign, mins / 60, mins % 60)?;
                }
                None => {}
            }
        }
        Ok(())
    }
}

/// Days since 1970-01-01 for a civil date (proleptic Gregorian).
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (month as i64 + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day as i64 - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

/// Civil date for a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    (if m <= 2 { y + 1 } else { y }, m as u32, d as u32)
}
