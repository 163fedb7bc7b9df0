//! Calendar date/time handler (`datahora`).
//!
//! Civil-calendar arithmetic is explicit (day numbers counted from year 1,
//! day 1) so that script-visible results never depend on the host's
//! timezone database; `chrono` is only used to seed `agora` from the wall
//! clock.

use std::{cell::RefCell, rc::Rc};

use chrono::{Datelike, Local, Timelike};

use crate::{heap::ObjId, intern::StringId, value::Value};

/// Days before each month in a non-leap year.
const MONTH_DAYS: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];

#[must_use]
pub fn is_leap(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

#[must_use]
pub fn month_len(year: i64, month: i64) -> i64 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// Day count since year 1, day 1 (which is day number 1).
#[must_use]
pub fn day_number(year: i64, month: i64, day: i64) -> i64 {
    let y = year - 1;
    let leap_adjust = i64::from(month >= 3 && is_leap(year));
    MONTH_DAYS[(month - 1).clamp(0, 11) as usize] + leap_adjust + day + (1461 * y) / 4 - y / 100
        + y / 400
}

/// Inverse of [`day_number`]: reconstructs (year, month, day).
#[must_use]
pub fn date_from_number(n: i64) -> (i64, i64, i64) {
    let n = n.max(1);
    // first estimate, then settle by comparison
    let mut year = (n * 400) / 146_097 + 1;
    while day_number(year, 1, 1) > n {
        year -= 1;
    }
    while day_number(year + 1, 1, 1) <= n {
        year += 1;
    }
    let day_of_year = n - day_number(year, 1, 1) + 1;
    let mut month = 1;
    while month < 12 {
        let next_start = MONTH_DAYS[month as usize] + i64::from(month + 1 >= 3 && is_leap(year)) + 1;
        if day_of_year < next_start {
            break;
        }
        month += 1;
    }
    let day = day_of_year - (MONTH_DAYS[(month - 1) as usize] + i64::from(month >= 3 && is_leap(year)));
    (year, month, day)
}

#[derive(Debug)]
pub struct DataHora {
    pub owner: ObjId,
    pub field: StringId,
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub min: i64,
    pub sec: i64,
}

impl DataHora {
    #[must_use]
    pub fn new(owner: ObjId, field: StringId) -> Self {
        let mut d = Self {
            owner,
            field,
            year: 1,
            month: 1,
            day: 1,
            hour: 0,
            min: 0,
            sec: 0,
        };
        d.set_now();
        d
    }

    pub fn set_now(&mut self) {
        let now = Local::now();
        self.year = i64::from(now.year());
        self.month = i64::from(now.month());
        self.day = i64::from(now.day());
        self.hour = i64::from(now.hour());
        self.min = i64::from(now.minute());
        self.sec = i64::from(now.second());
    }

    /// Clamps day to the current month's length (after year/month edits).
    fn clamp_day(&mut self) {
        self.day = self.day.clamp(1, month_len(self.year, self.month));
    }

    pub fn set_year(&mut self, v: i64) {
        self.year = v.clamp(1, 9999);
        self.clamp_day();
    }

    pub fn set_month(&mut self, v: i64) {
        self.month = v.clamp(1, 12);
        self.clamp_day();
    }

    pub fn set_day(&mut self, v: i64) {
        self.day = v.clamp(1, month_len(self.year, self.month));
    }

    #[must_use]
    pub fn number(&self) -> i64 {
        day_number(self.year, self.month, self.day)
    }

    pub fn set_number(&mut self, n: i64) {
        let (y, m, d) = date_from_number(n);
        self.year = y.clamp(1, 9999);
        self.month = m;
        self.day = d;
    }

    /// 0 = Sunday.
    #[must_use]
    pub fn weekday(&self) -> i64 {
        (self.number() + 1).rem_euclid(7)
    }

    pub fn next_day(&mut self) {
        self.set_number(self.number() + 1);
    }

    pub fn prev_day(&mut self) {
        self.set_number((self.number() - 1).max(1));
    }

    /// `YYYYMMDDHHMMSS`.
    #[must_use]
    pub fn format(&self) -> String {
        format!(
            "{:04}{:02}{:02}{:02}{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.min, self.sec
        )
    }

    /// Parses `YYYYMMDDHHMMSS` (shorter input fills from the left; bad
    /// input leaves the value unchanged).
    pub fn parse(&mut self, text: &str) -> bool {
        let digits: Vec<u8> = text.bytes().filter(u8::is_ascii_digit).collect();
        if digits.len() < 8 {
            return false;
        }
        let num = |range: std::ops::Range<usize>| -> i64 {
            digits[range]
                .iter()
                .fold(0i64, |acc, b| acc * 10 + i64::from(b - b'0'))
        };
        self.year = num(0..4).clamp(1, 9999);
        self.month = num(4..6).clamp(1, 12);
        self.day = num(6..8);
        self.clamp_day();
        self.hour = if digits.len() >= 10 { num(8..10).clamp(0, 23) } else { 0 };
        self.min = if digits.len() >= 12 { num(10..12).clamp(0, 59) } else { 0 };
        self.sec = if digits.len() >= 14 { num(12..14).clamp(0, 59) } else { 0 };
        true
    }
}

pub(super) fn member_set(state: &Rc<RefCell<DataHora>>, name: &str, value: &Value) -> bool {
    let mut s = state.borrow_mut();
    match name {
        "ano" => s.set_year(value.to_i64()),
        "mes" => s.set_month(value.to_i64()),
        "dia" => s.set_day(value.to_i64()),
        "hora" => s.hour = value.to_i64().clamp(0, 23),
        "min" => s.min = value.to_i64().clamp(0, 59),
        "seg" => s.sec = value.to_i64().clamp(0, 59),
        "datanum" => s.set_number(value.to_i64()),
        _ => return false,
    }
    true
}

pub(super) fn op(state: &Rc<RefCell<DataHora>>, name: &str, args: &[Value]) -> Option<Value> {
    let mut s = state.borrow_mut();
    let out = match name {
        "ano" => Value::Int(s.year),
        "mes" => Value::Int(s.month),
        "dia" => Value::Int(s.day),
        "hora" => Value::Int(s.hour),
        "min" => Value::Int(s.min),
        "seg" => Value::Int(s.sec),
        "datanum" => Value::Int(s.number()),
        "numdata" => {
            let n = args.first().map_or(0, Value::to_i64);
            s.set_number(n);
            Value::Int(1)
        }
        "diasem" => Value::Int(s.weekday()),
        "maisdia" => {
            s.next_day();
            Value::Int(s.number())
        }
        "menosdia" => {
            s.prev_day();
            Value::Int(s.number())
        }
        "texto" => Value::from(s.format()),
        "mudar" => {
            let text = args.first().map(Value::to_text).unwrap_or_default();
            Value::Int(i64::from(s.parse(&text)))
        }
        "agora" => {
            s.set_now();
            Value::Int(1)
        }
        _ => return None,
    };
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leap_rule() {
        assert!(is_leap(2024));
        assert!(!is_leap(1900));
        assert!(is_leap(2000));
        assert!(!is_leap(2023));
    }

    #[test]
    fn day_number_starts_at_one() {
        assert_eq!(day_number(1, 1, 1), 1);
        assert_eq!(day_number(1, 1, 2), 2);
        assert_eq!(day_number(2, 1, 1), 366);
    }

    #[test]
    fn number_round_trips() {
        for &(y, m, d) in &[
            (1, 1, 1),
            (1999, 12, 31),
            (2000, 2, 29),
            (2024, 2, 28),
            (2024, 3, 1),
            (9999, 12, 31),
        ] {
            let n = day_number(y, m, d);
            assert_eq!(date_from_number(n), (y, m, d), "round trip for {y}-{m}-{d}");
        }
    }

    #[test]
    fn leap_february_next_day() {
        let mut d = DataHora::new(ObjId::NONE, StringId::from_index(0));
        d.year = 2024;
        d.month = 2;
        d.day = 28;
        d.next_day();
        d.next_day();
        assert_eq!((d.year, d.month, d.day), (2024, 3, 1));
    }

    #[test]
    fn day_clamps_to_month_length() {
        let mut d = DataHora::new(ObjId::NONE, StringId::from_index(0));
        d.year = 2023;
        d.month = 1;
        d.day = 31;
        d.set_month(2);
        assert_eq!(d.day, 28);
    }

    #[test]
    fn weekday_follows_the_day_number() {
        let mut d = DataHora::new(ObjId::NONE, StringId::from_index(0));
        d.year = 1;
        d.month = 1;
        d.day = 1;
        assert_eq!(d.weekday(), 2);
        d.next_day();
        assert_eq!(d.weekday(), 3);
    }

    #[test]
    fn format_and_parse_round_trip() {
        let mut d = DataHora::new(ObjId::NONE, StringId::from_index(0));
        d.year = 2024;
        d.month = 7;
        d.day = 15;
        d.hour = 13;
        d.min = 5;
        d.sec = 59;
        let text = d.format();
        assert_eq!(text, "20240715130559");
        let mut e = DataHora::new(ObjId::NONE, StringId::from_index(0));
        assert!(e.parse(&text));
        assert_eq!((e.year, e.month, e.day, e.hour, e.min, e.sec), (2024, 7, 15, 13, 5, 59));
    }
}
