//! Timestamp model and normalization.
//!
//! Every raw timestamp a format adapter encounters is converted here into
//! a canonical UTC instant that keeps its provenance: which epoch
//! convention the source used, which device-timezone offset applies to
//! local rendering, and how much the value should be trusted.
//!
//! Mobile artifact stores disagree wildly on epochs: iOS Core Data uses
//! seconds (sometimes REAL) since 2001-01-01, modern sms.db uses
//! nanoseconds since 2001, Android content providers use Java
//! milliseconds since 1970, and Chromium-family history databases use
//! microseconds since 1601. Adapters declare the tag per field; nothing
//! in this module guesses.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Seconds between 1970-01-01T00:00:00Z and 2001-01-01T00:00:00Z.
pub const COCOA_EPOCH_OFFSET: i64 = 978_307_200;

/// Seconds between 1601-01-01T00:00:00Z and 1970-01-01T00:00:00Z.
pub const FILETIME_EPOCH_OFFSET: i64 = 11_644_473_600;

/// Instants before this (2000-01-01T00:00:00Z) are outside the sane
/// forensic window and get flagged, not rejected.
const SANE_WINDOW_START: i64 = 946_684_800;

/// Allowed clock skew past the run's reference instant, in seconds.
const SANE_WINDOW_SKEW: i64 = 48 * 3600;

/// Epoch/unit convention a raw timestamp value was expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceEpoch {
    /// Seconds since 1970-01-01T00:00:00Z
    UnixSeconds,
    /// Milliseconds since 1970-01-01T00:00:00Z
    UnixMillis,
    /// Milliseconds since 1970-01-01T00:00:00Z, as written by Android
    /// content providers (same arithmetic as UnixMillis, distinct
    /// provenance tag)
    JavaMillis,
    /// Seconds since 2001-01-01T00:00:00Z (Core Data / CFAbsoluteTime)
    CocoaSeconds,
    /// Nanoseconds since 2001-01-01T00:00:00Z (modern iOS sms.db)
    CocoaNanos,
    /// 100 ns ticks since 1601-01-01T00:00:00Z
    WindowsFiletime,
    /// Microseconds since 1601-01-01T00:00:00Z (Chromium history)
    WebkitMicros,
    /// Source convention could not be determined; interpreted as Unix
    /// seconds and always flagged inferred
    Unknown,
}

/// How much a normalized timestamp should be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeConfidence {
    /// In-window value with a known device offset
    Exact,
    /// Value outside the sane forensic window, or an unknown epoch tag;
    /// kept visible rather than rejected
    Inferred,
    /// No device-timezone evidence; local rendering falls back to UTC
    Unavailable,
}

/// Canonical timestamp: a UTC instant plus provenance.
///
/// Local time is always *derived* from `utc` and `offset`; it is never
/// stored independently, so the two renderings cannot drift apart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Canonical UTC instant (whole-second resolution, see truncation rule)
    pub utc: DateTime<Utc>,
    /// Epoch convention of the raw source value
    pub epoch: SourceEpoch,
    /// Device-timezone offset in seconds east of UTC, if known
    pub offset_seconds: Option<i32>,
    /// Trust level for this value
    pub confidence: TimeConfidence,
}

impl Timestamp {
    /// Device-timezone offset used for local rendering, if known.
    pub fn offset(&self) -> Option<FixedOffset> {
        self.offset_seconds.and_then(FixedOffset::east_opt)
    }

    /// Render in device-local time, falling back to UTC (+00:00) when no
    /// offset is known. Consumers can tell the fallback apart via
    /// `confidence == Unavailable` and `offset_seconds.is_none()`.
    pub fn local(&self) -> DateTime<FixedOffset> {
        match self.offset() {
            Some(offset) => self.utc.with_timezone(&offset),
            None => self.utc.fixed_offset(),
        }
    }

    /// True when the instant fell outside the sane forensic window.
    pub fn implausible(&self) -> bool {
        self.confidence == TimeConfidence::Inferred
    }
}

/// Raw timestamp value as read from a source column.
///
/// iOS Core Data stores REAL columns (fractional cocoa seconds) next to
/// INTEGER ones; both arrive here without precision loss. FILETIME ticks
/// and cocoa nanoseconds exceed the exact range of f64, so integer
/// sources must stay integers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawTime {
    Int(i64),
    Real(f64),
}

impl From<i64> for RawTime {
    fn from(v: i64) -> Self {
        RawTime::Int(v)
    }
}

impl From<f64> for RawTime {
    fn from(v: f64) -> Self {
        RawTime::Real(v)
    }
}

impl std::fmt::Display for RawTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTime::Int(v) => write!(f, "{v}"),
            RawTime::Real(v) => write!(f, "{v}"),
        }
    }
}

/// Converts raw source values into canonical [`Timestamp`]s.
///
/// Carries the run's device-offset hint and reference clock so that a
/// whole pipeline run normalizes against one consistent view of "now".
#[derive(Debug, Clone)]
pub struct TimeNormalizer {
    device_offset: Option<FixedOffset>,
    reference: DateTime<Utc>,
}

impl TimeNormalizer {
    /// Normalizer anchored at the current wall clock.
    pub fn new(device_offset: Option<FixedOffset>) -> Self {
        Self {
            device_offset,
            reference: Utc::now(),
        }
    }

    /// Normalizer with an explicit reference instant (deterministic runs
    /// and tests).
    pub fn with_reference(device_offset: Option<FixedOffset>, reference: DateTime<Utc>) -> Self {
        Self {
            device_offset,
            reference,
        }
    }

    /// Device-timezone offset this run resolves local time against.
    pub fn device_offset(&self) -> Option<FixedOffset> {
        self.device_offset
    }

    /// Convert a raw value in the declared epoch into a canonical
    /// timestamp.
    ///
    /// Sub-second precision is truncated toward negative infinity, never
    /// rounded, so repeated runs produce identical instants. Values
    /// outside the sane forensic window come back flagged
    /// `Inferred`, not rejected: an implausible timestamp is itself
    /// evidence and must stay visible.
    pub fn normalize(&self, raw: impl Into<RawTime>, epoch: SourceEpoch) -> Timestamp {
        let raw = raw.into();
        let unix_secs = to_unix_seconds(raw, epoch);

        let utc = DateTime::<Utc>::from_timestamp(unix_secs, 0)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        let in_window = unix_secs >= SANE_WINDOW_START
            && unix_secs <= self.reference.timestamp() + SANE_WINDOW_SKEW;

        let confidence = if !in_window || epoch == SourceEpoch::Unknown {
            TimeConfidence::Inferred
        } else if self.device_offset.is_some() {
            TimeConfidence::Exact
        } else {
            TimeConfidence::Unavailable
        };

        Timestamp {
            utc,
            epoch,
            offset_seconds: self.device_offset.map(|o| o.local_minus_utc()),
            confidence,
        }
    }
}

/// Whole seconds since the Unix epoch for a raw value in the given
/// convention. Floor division throughout; wide intermediates keep
/// FILETIME ticks and cocoa nanoseconds exact.
fn to_unix_seconds(raw: RawTime, epoch: SourceEpoch) -> i64 {
    let raw_int = match raw {
        RawTime::Int(v) => v,
        // Non-finite REALs normalize to the Unix epoch, which the
        // plausibility window flags
        RawTime::Real(f) if !f.is_finite() => return 0,
        RawTime::Real(f) => f.floor() as i64,
    };

    match epoch {
        SourceEpoch::UnixSeconds | SourceEpoch::Unknown => raw_int,
        SourceEpoch::UnixMillis | SourceEpoch::JavaMillis => raw_int.div_euclid(1000),
        SourceEpoch::CocoaSeconds => COCOA_EPOCH_OFFSET.saturating_add(raw_int),
        SourceEpoch::CocoaNanos => {
            COCOA_EPOCH_OFFSET.saturating_add(raw_int.div_euclid(1_000_000_000))
        }
        SourceEpoch::WindowsFiletime => {
            raw_int.div_euclid(10_000_000) - FILETIME_EPOCH_OFFSET
        }
        SourceEpoch::WebkitMicros => raw_int.div_euclid(1_000_000) - FILETIME_EPOCH_OFFSET,
    }
}

/// Encode a UTC instant as a raw value in the given epoch convention.
///
/// Inverse of normalization at whole-second resolution; used by fixture
/// builders and the round-trip tests.
pub fn to_raw(instant: DateTime<Utc>, epoch: SourceEpoch) -> i64 {
    let secs = instant.timestamp();
    match epoch {
        SourceEpoch::UnixSeconds | SourceEpoch::Unknown => secs,
        SourceEpoch::UnixMillis | SourceEpoch::JavaMillis => secs * 1000,
        SourceEpoch::CocoaSeconds => secs - COCOA_EPOCH_OFFSET,
        SourceEpoch::CocoaNanos => (secs - COCOA_EPOCH_OFFSET) * 1_000_000_000,
        SourceEpoch::WindowsFiletime => (secs + FILETIME_EPOCH_OFFSET) * 10_000_000,
        SourceEpoch::WebkitMicros => (secs + FILETIME_EPOCH_OFFSET) * 1_000_000,
    }
}
