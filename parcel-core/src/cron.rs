//! Five-field crontab parsing and the lazy firing-instant generator. Each
//! field expands against its own explicit range (minute 0-59, hour 0-23,
//! day-of-week 0-6, day-of-month 1-31, month-of-year 1-12), so a step like
//! `*/15` on a field whose minimum isn't zero still starts from that minimum
//! rather than from zero.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use regex::Regex;

use crate::error::ConfigError;

/// Expands a single crontab field (`"*/15"`, `"1-5"`, `"3,7,9"`, ...) into a
/// sorted, distinct list of integers within `[min, max]`.
struct FieldParser {
    min: i64,
    max: i64,
}

impl FieldParser {
    fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn parse(&self, spec: &str) -> Result<Vec<i64>, ConfigError> {
        let mut acc = std::collections::BTreeSet::new();
        for part in spec.split(',') {
            if part.is_empty() {
                return Err(ConfigError::InvalidCron("empty sub-part".to_string()));
            }
            for v in self.parse_part(part)? {
                acc.insert(v);
            }
        }
        Ok(acc.into_iter().collect())
    }

    fn parse_part(&self, part: &str) -> Result<Vec<i64>, ConfigError> {
        let range_steps = Regex::new(r"^(\d+)-(\d+)/(\d+)$").unwrap();
        let range = Regex::new(r"^(\d+)-(\d+)$").unwrap();
        let star_steps = Regex::new(r"^\*/(\d+)$").unwrap();
        let star = Regex::new(r"^\*$").unwrap();
        let number = Regex::new(r"^(\d+)$").unwrap();

        if let Some(caps) = range_steps.captures(part) {
            let fr = self.number(&caps[1])?;
            let to = self.number(&caps[2])?;
            let step: usize = caps[3].parse().map_err(|_| ConfigError::InvalidCron("empty step".to_string()))?;
            if step == 0 {
                return Err(ConfigError::InvalidCron("empty step".to_string()));
            }
            if to < fr {
                return Err(ConfigError::InvalidCron(format!("reversed range: {part}")));
            }
            Ok((fr..=to).step_by(step).collect())
        } else if let Some(caps) = range.captures(part) {
            let fr = self.number(&caps[1])?;
            let to = self.number(&caps[2])?;
            if to < fr {
                return Err(ConfigError::InvalidCron(format!("reversed range: {part}")));
            }
            Ok((fr..=to).collect())
        } else if let Some(caps) = star_steps.captures(part) {
            let step: usize = caps[1].parse().map_err(|_| ConfigError::InvalidCron("empty step".to_string()))?;
            if step == 0 {
                return Err(ConfigError::InvalidCron("empty step".to_string()));
            }
            Ok((self.min..=self.max).step_by(step).collect())
        } else if star.is_match(part) {
            Ok((self.min..=self.max).collect())
        } else if let Some(caps) = number.captures(part) {
            let n = self.number(&caps[1])?;
            Ok(vec![n])
        } else {
            Err(ConfigError::InvalidCron(format!("invalid filter: {part}")))
        }
    }

    fn number(&self, s: &str) -> Result<i64, ConfigError> {
        let n: i64 = s
            .parse()
            .map_err(|_| ConfigError::InvalidCron(format!("invalid number: {s}")))?;
        if n > self.max || n < self.min {
            return Err(ConfigError::InvalidCron(format!(
                "{n} out of range {}-{}",
                self.min, self.max
            )));
        }
        Ok(n)
    }
}

/// A parsed five-field crontab expression, ready to generate firing instants.
#[derive(Debug, Clone)]
pub struct Crontab {
    minute: Vec<i64>,
    hour: Vec<i64>,
    day_of_month: Vec<i64>,
    month_of_year: Vec<i64>,
    /// Parsed for validation but not used to filter firings. A documented
    /// limitation, not an oversight.
    #[allow(dead_code)]
    day_of_week: Vec<i64>,
}

impl Crontab {
    pub fn parse(
        minute: &str,
        hour: &str,
        day_of_month: &str,
        month_of_year: &str,
        day_of_week: &str,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            minute: FieldParser::new(0, 59).parse(minute)?,
            hour: FieldParser::new(0, 23).parse(hour)?,
            day_of_week: FieldParser::new(0, 6).parse(day_of_week)?,
            day_of_month: FieldParser::new(1, 31).parse(day_of_month)?,
            month_of_year: FieldParser::new(1, 12).parse(month_of_year)?,
        })
    }

    /// Every N minutes, every hour, every day. Convenience constructor used by
    /// tests and by schedule config shorthand.
    pub fn every_minutes(n: u32) -> Result<Self, ConfigError> {
        Self::parse(&format!("*/{n}"), "*", "*", "*", "*")
    }

    /// Produces the lazy, non-decreasing sequence of firing instants from
    /// `from` onward, rewinding to the start of the current minute first so a
    /// `from` that already matches is included.
    pub fn start(&self, from: DateTime<Utc>) -> CronIter<'_> {
        let start_month = from.month() as i64;
        let start_day = from.day() as i64;
        let start_hour = from.hour() as i64;
        let start_minute = from.minute() as i64;

        let sets: [&[i64]; 4] = [
            &self.month_of_year,
            &self.day_of_month,
            &self.hour,
            &self.minute,
        ];
        let vals = [start_month, start_day, start_hour, start_minute];

        let (exhausted, indices) = rewind(&vals, &sets);
        let (year, indices) = if exhausted {
            (from.year() + 1, vec![0, 0, 0, 0])
        } else {
            (from.year(), indices)
        };

        CronIter {
            cron: self,
            year,
            mi: indices[0],
            di: indices[1],
            hi: indices[2],
            mni: indices[3],
        }
    }
}

/// Finds the starting pointer into each field's set for the given start values,
/// carrying into coarser fields when a finer field's set is exhausted without a
/// match. Returns `(exhausted, indices)`; `exhausted` is true only when even the
/// coarsest field (`sets[0]`) cannot satisfy `vals[0]`, meaning the caller must
/// roll over to the next year.
fn rewind(vals: &[i64], sets: &[&[i64]]) -> (bool, Vec<usize>) {
    if sets.is_empty() || vals.is_empty() {
        return (false, vec![]);
    }
    let val = vals[0];
    let set = sets[0];
    for (i, &v) in set.iter().enumerate() {
        if v > val {
            let mut idx = vec![i];
            idx.extend(std::iter::repeat(0).take(sets.len() - 1));
            return (false, idx);
        } else if v == val {
            let (deeper_exhausted, deeper_idx) = rewind(&vals[1..], &sets[1..]);
            if deeper_exhausted {
                if i + 1 < set.len() {
                    let mut idx = vec![i + 1];
                    idx.extend(std::iter::repeat(0).take(sets.len() - 1));
                    return (false, idx);
                } else {
                    return (true, vec![0; sets.len()]);
                }
            } else {
                let mut idx = vec![i];
                idx.extend(deeper_idx);
                return (false, idx);
            }
        }
    }
    (true, vec![0; sets.len()])
}

fn days_in_month(year: i32, month: i64) -> i64 {
    let next_month = if month == 12 {
        Utc.with_ymd_and_hms(year + 1, 1, 1, 0, 0, 0).single()
    } else {
        Utc.with_ymd_and_hms(year, month as u32 + 1, 1, 0, 0, 0).single()
    };
    let this_month = Utc.with_ymd_and_hms(year, month as u32, 1, 0, 0, 0).single();
    match (next_month, this_month) {
        (Some(next), Some(this)) => (next - this).num_days(),
        _ => 31,
    }
}

/// The infinite, non-decreasing sequence of firing instants for a `Crontab`.
pub struct CronIter<'a> {
    cron: &'a Crontab,
    year: i32,
    mi: usize,
    di: usize,
    hi: usize,
    mni: usize,
}

impl<'a> Iterator for CronIter<'a> {
    type Item = DateTime<Utc>;

    fn next(&mut self) -> Option<DateTime<Utc>> {
        loop {
            if self.mi >= self.cron.month_of_year.len() {
                self.mi = 0;
                self.year += 1;
                continue;
            }
            let month = self.cron.month_of_year[self.mi];
            let max_day = days_in_month(self.year, month);

            if self.di >= self.cron.day_of_month.len() || self.cron.day_of_month[self.di] > max_day {
                self.mi += 1;
                self.di = 0;
                self.hi = 0;
                self.mni = 0;
                continue;
            }
            let day = self.cron.day_of_month[self.di];

            if self.hi >= self.cron.hour.len() {
                self.di += 1;
                self.hi = 0;
                self.mni = 0;
                continue;
            }
            let hour = self.cron.hour[self.hi];

            if self.mni >= self.cron.minute.len() {
                self.hi += 1;
                self.mni = 0;
                continue;
            }
            let minute = self.cron.minute[self.mni];

            let result = Utc
                .with_ymd_and_hms(self.year, month as u32, day as u32, hour as u32, minute as u32, 0)
                .single();
            self.mni += 1;
            if let Some(dt) = result {
                return Some(dt);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_slash_15_yields_quarter_hours() {
        let cron = Crontab::every_minutes(15).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 7, 27, 10, 0, 0).unwrap();
        let minutes: Vec<_> = cron.start(start).take(8).map(|dt| dt.minute()).collect();
        assert_eq!(minutes, vec![0, 15, 30, 45, 0, 15, 30, 45]);
    }

    #[test]
    fn sequence_is_non_decreasing_and_matches_fields() {
        let cron = Crontab::parse("0,30", "9-17", "*", "*", "*").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let mut last = start;
        for dt in cron.start(start).take(50) {
            assert!(dt >= last);
            assert!((9..=17).contains(&dt.hour()));
            assert!(dt.minute() == 0 || dt.minute() == 30);
            last = dt;
        }
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = FieldParser::new(0, 59).parse("5-2").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCron(_)));
    }

    #[test]
    fn out_of_range_value_is_rejected() {
        let err = FieldParser::new(0, 59).parse("60").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCron(_)));
    }

    #[test]
    fn empty_subpart_is_rejected() {
        let err = FieldParser::new(0, 59).parse("5,,10").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCron(_)));
    }

    #[test]
    fn rewind_picks_up_later_the_same_day() {
        let cron = Crontab::parse("0", "14", "*", "*", "*").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 7, 27, 9, 30, 0).unwrap();
        let next = cron.start(start).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 27, 14, 0, 0).unwrap());
    }

    #[test]
    fn rewind_carries_into_next_day_when_hour_passed() {
        let cron = Crontab::parse("0", "8", "*", "*", "*").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 7, 27, 9, 30, 0).unwrap();
        let next = cron.start(start).next().unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 7, 28, 8, 0, 0).unwrap());
    }

    #[test]
    fn skips_months_with_no_valid_day() {
        let cron = Crontab::parse("0", "0", "31", "*", "*").unwrap();
        let start = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
        let next = cron.start(start).next().unwrap();
        // April has no 31st; the next firing must fall in May.
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 5, 31, 0, 0, 0).unwrap());
    }
}
