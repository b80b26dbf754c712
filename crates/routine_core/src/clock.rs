use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use parking_lot::Mutex;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A calendar date together with the instant its local day ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Day {
    pub date: NaiveDate,
    pub end: DateTime<Utc>,
}

impl Day {
    /// Resolves `date` to 23:59:59.999 in `tz`.
    pub fn in_zone<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Self {
        let local_end = date
            .and_hms_milli_opt(23, 59, 59, 999)
            .expect("23:59:59.999 is a valid time of day");
        let end = last_existing(local_end, |local| {
            tz.from_local_datetime(local)
                .latest()
                .map(|instant| instant.with_timezone(&Utc))
        })
        .unwrap_or_else(|| {
            let offset = tz.offset_from_utc_datetime(&local_end).fix();
            let utc_end = local_end
                .checked_sub_signed(Duration::seconds(offset.local_minus_utc().into()))
                .unwrap_or(local_end);
            Utc.from_utc_datetime(&utc_end)
        });
        Self { date, end }
    }

    /// Entities without a creation time are treated as always present.
    pub fn includes(&self, created_at: Option<DateTime<Utc>>) -> bool {
        created_at.map_or(true, |created| created <= self.end)
    }
}

/// Steps back from `local_end` until the wall-clock time exists, so a day whose
/// last minutes fall into a DST gap ends right before the gap.
fn last_existing(
    local_end: NaiveDateTime,
    resolve: impl Fn(&NaiveDateTime) -> Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    (0..=24 * 4)
        .filter_map(|step| local_end.checked_sub_signed(Duration::minutes(15 * step)))
        .find_map(|candidate| resolve(&candidate))
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate;
    fn day(&self, date: NaiveDate) -> Day;

    fn today(&self) -> NaiveDate {
        self.local_date(self.now())
    }
}

/// Wall clock in the machine's local zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&Local).date_naive()
    }

    fn day(&self, date: NaiveDate) -> Day {
        Day::in_zone(date, &Local)
    }
}

/// Manually driven clock at a fixed UTC offset.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    pub fn utc(now: DateTime<Utc>) -> Self {
        Self::new(now, FixedOffset::east_opt(0).expect("zero offset is valid"))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    fn day(&self, date: NaiveDate) -> Day {
        Day::in_zone(date, &self.offset)
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).ok()
}
