//! LIST / MLSD entry parser.
//!
//! Supports four line formats, tried in this fixed order:
//! 1. **Unix-style** (`ls -l`): `-rwxr-xr-x 1 owner group 1234 Jan  1 12:00 file.txt`
//! 2. **MS-DOS / IIS-style**: `01-01-26  12:00AM       1234 file.txt`
//! 3. **Hosted** (Unix layout without the link count):
//!    `-rw-r--r-- owner group 1234 Jan  1 12:00 file.txt`
//! 4. **MLSD facts** (RFC 3659): `type=file;size=1234;modify=20260101120000; file.txt`
//!
//! The first parser that accepts the line wins. When none does, the caller
//! only ever sees `unsupported entry format`.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use lazy_static::lazy_static;
use regex::Regex;

use crate::ftp::error::{FtpError, FtpResult};
use crate::ftp::types::{Entry, EntryType};

/// Timezone and clock used to resolve listing timestamps.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub location: FixedOffset,
    /// Reference time for Unix entries that omit the year.
    pub now: DateTime<FixedOffset>,
}

impl ParseContext {
    pub fn new(location: FixedOffset) -> Self {
        Self {
            location,
            now: Utc::now().with_timezone(&location),
        }
    }

    pub fn at(location: FixedOffset, now: DateTime<FixedOffset>) -> Self {
        Self {
            location,
            now: now.with_timezone(&location),
        }
    }
}

type EntryParser = fn(&str, &ParseContext) -> FtpResult<Entry>;

const PARSERS: [(&str, EntryParser); 4] = [
    ("unix", parse_unix),
    ("dos", parse_dos),
    ("hosted", parse_hosted),
    ("mlsd", parse_mlsd),
];

/// Parse one listing line. `location` is required.
pub fn parse_entry(line: &str, location: Option<FixedOffset>) -> FtpResult<Entry> {
    if line.trim().is_empty() {
        return Err(FtpError::invalid_argument("listing line is blank"));
    }
    let location =
        location.ok_or_else(|| FtpError::invalid_argument("listing location is not set"))?;
    parse_entry_at(line, &ParseContext::new(location))
}

/// Parse one listing line against an explicit context.
pub fn parse_entry_at(line: &str, ctx: &ParseContext) -> FtpResult<Entry> {
    let line = line.trim();
    if line.is_empty() {
        return Err(FtpError::invalid_argument("listing line is blank"));
    }
    for (name, parser) in PARSERS {
        match parser(line, ctx) {
            Ok(entry) => return Ok(entry),
            Err(e) => log::trace!("[ftp] {} parser declined '{}': {}", name, line, e),
        }
    }
    Err(FtpError::internal("unsupported entry format"))
}

// ─── Unix-style parser ───────────────────────────────────────────────

/// ```text
/// drwxr-xr-x   2 user group  4096 Jan  1 12:00 dirname
/// -rw-r--r--   1 user group  1234 Jan  1  2025 file.txt
/// lrwxrwxrwx   1 user group    42 Jan  1 12:00 link -> target
/// ```
fn parse_unix(line: &str, ctx: &ParseContext) -> FtpResult<Entry> {
    parse_ls_style(line, ctx, true)
}

/// Same as Unix-style, minus the hard-link column.
fn parse_hosted(line: &str, ctx: &ParseContext) -> FtpResult<Entry> {
    parse_ls_style(line, ctx, false)
}

fn parse_ls_style(line: &str, ctx: &ParseContext, with_links: bool) -> FtpResult<Entry> {
    let count = if with_links { 8 } else { 7 };
    let (fields, rest) = split_fields(line, count)
        .ok_or_else(|| FtpError::internal("too few fields for an ls-style entry"))?;
    let mut fields = fields.into_iter();
    let mut next = || fields.next().unwrap_or_default();

    let mode = next();
    let mut chars = mode.chars();
    let entry_type = match chars.next() {
        Some('-') => EntryType::File,
        Some('d') => EntryType::Directory,
        Some('l') => EntryType::SymbolicLink,
        other => {
            return Err(FtpError::unknown(format!(
                "unrecognized entry type '{}'",
                other.unwrap_or(' ')
            )))
        }
    };
    let permissions = chars.as_str().to_string();

    let num_hard_links = if with_links {
        parse_number(next(), "link count")?
    } else {
        0
    };
    let owner_user = next().to_string();
    let owner_group = next().to_string();
    let size_in_bytes = parse_number(next(), "size")?;
    let (month, day, time_or_year) = (next(), next(), next());
    let modified = parse_ls_date(month, day, time_or_year, ctx)?;

    let (name, link_name) = match entry_type {
        EntryType::SymbolicLink => match rest.split_once("->") {
            Some((name, target)) => (name.trim().to_string(), Some(target.trim().to_string())),
            None => (rest.to_string(), None),
        },
        _ => (rest.to_string(), None),
    };
    if name.is_empty() {
        return Err(FtpError::internal("entry has no name"));
    }

    Ok(Entry {
        entry_type,
        permissions,
        name,
        link_name,
        owner_user,
        owner_group,
        num_hard_links,
        size_in_bytes,
        last_modification_date: Some(modified),
    })
}

/// Slack for server clock skew before a yearless date counts as future.
const FUTURE_TOLERANCE_HOURS: i64 = 24;

/// `Jan 1 12:00` (year inferred) or `Jan 1 2025` (midnight).
fn parse_ls_date(
    month: &str,
    day: &str,
    time_or_year: &str,
    ctx: &ParseContext,
) -> FtpResult<DateTime<FixedOffset>> {
    let month = parse_month(month)?;
    let day: u32 = parse_number(day, "day")?;

    if let Some((hour, minute)) = time_or_year.split_once(':') {
        let (hour, minute) = (parse_number(hour, "hour")?, parse_number(minute, "minute")?);
        let time = NaiveTime::from_hms_opt(hour, minute, 0)
            .ok_or_else(|| FtpError::internal(format!("invalid time '{}'", time_or_year)))?;
        let this_year = ctx.now.year();
        let candidate = local_datetime(this_year, month, day, time, ctx)?;
        if candidate > ctx.now + Duration::hours(FUTURE_TOLERANCE_HOURS) {
            local_datetime(this_year - 1, month, day, time, ctx)
        } else {
            Ok(candidate)
        }
    } else {
        let year: i32 = parse_number(time_or_year, "year")?;
        let midnight = NaiveTime::from_hms_opt(0, 0, 0)
            .ok_or_else(|| FtpError::internal("invalid midnight"))?;
        local_datetime(year, month, day, midnight, ctx)
    }
}

fn local_datetime(
    year: i32,
    month: u32,
    day: u32,
    time: NaiveTime,
    ctx: &ParseContext,
) -> FtpResult<DateTime<FixedOffset>> {
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| {
        FtpError::internal(format!("invalid date {}-{:02}-{:02}", year, month, day))
    })?;
    in_location(date.and_time(time), ctx)
}

fn in_location(naive: NaiveDateTime, ctx: &ParseContext) -> FtpResult<DateTime<FixedOffset>> {
    ctx.location
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| FtpError::internal(format!("ambiguous local time {}", naive)))
}

fn parse_month(s: &str) -> FtpResult<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    MONTHS
        .iter()
        .position(|m| m.eq_ignore_ascii_case(s))
        .map(|i| i as u32 + 1)
        .ok_or_else(|| FtpError::internal(format!("invalid month '{}'", s)))
}

// ─── MS-DOS-style parser ─────────────────────────────────────────────

lazy_static! {
    static ref DOS_LINE: Regex = Regex::new(
        r"(?x)
        ^(\d{2}-\d{2}-(?:\d{4}|\d{2}))\s+   # date
        (\d{1,2}:\d{2}\s?(?:[AaPp][Mm])?)\s+ # time
        (<DIR>|\d+)\s+                       # size or <DIR>
        (.+)$                                # name
        "
    )
    .unwrap();
}

/// ```text
/// 01-01-26  12:00AM       1234 file.txt
/// 01-01-2026  12:00PM      <DIR> Directory Name
/// ```
fn parse_dos(line: &str, ctx: &ParseContext) -> FtpResult<Entry> {
    let caps = DOS_LINE
        .captures(line)
        .ok_or_else(|| FtpError::internal("not an MS-DOS style entry"))?;

    let date_str = &caps[1];
    let date_fmt = if date_str.len() == 10 { "%m-%d-%Y" } else { "%m-%d-%y" };
    let date = NaiveDate::parse_from_str(date_str, date_fmt)
        .map_err(|e| FtpError::internal_with(format!("invalid date '{}'", date_str), e))?;

    let time_str: String = caps[2].split_whitespace().collect::<String>().to_ascii_uppercase();
    let time_fmt = if time_str.ends_with('M') { "%I:%M%p" } else { "%H:%M" };
    let time = NaiveTime::parse_from_str(&time_str, time_fmt)
        .map_err(|e| FtpError::internal_with(format!("invalid time '{}'", time_str), e))?;

    let (entry_type, size_in_bytes) = match &caps[3] {
        "<DIR>" => (EntryType::Directory, 0),
        size => (EntryType::File, parse_number(size, "size")?),
    };

    Ok(Entry {
        entry_type,
        permissions: String::new(),
        name: caps[4].trim().to_string(),
        link_name: None,
        owner_user: String::new(),
        owner_group: String::new(),
        num_hard_links: 0,
        size_in_bytes,
        last_modification_date: Some(in_location(date.and_time(time), ctx)?),
    })
}

// ─── MLSD parser ─────────────────────────────────────────────────────

/// `fact1=val1;fact2=val2; filename`. Only `type`, `size`, `modify` and
/// `perm` are accepted; any other fact rejects the line.
fn parse_mlsd(line: &str, ctx: &ParseContext) -> FtpResult<Entry> {
    let (facts, name) = line
        .split_once(' ')
        .ok_or_else(|| FtpError::internal("MLSD entry has no name"))?;
    if name.is_empty() {
        return Err(FtpError::internal("MLSD entry has no name"));
    }

    let mut entry_type = None;
    let mut size_in_bytes = 0;
    let mut modified = None;
    let mut permissions = String::new();

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact
            .split_once('=')
            .ok_or_else(|| FtpError::internal(format!("malformed fact '{}'", fact)))?;
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                entry_type = Some(match value.to_ascii_lowercase().as_str() {
                    "file" => EntryType::File,
                    "dir" | "cdir" | "pdir" => EntryType::Directory,
                    _ => {
                        return Err(FtpError::unknown(format!(
                            "unrecognized entry type '{}'",
                            value
                        )))
                    }
                })
            }
            "size" => size_in_bytes = parse_number(value, "size")?,
            "modify" => modified = Some(parse_mlsd_time(value, ctx)?),
            "perm" => permissions = value.to_string(),
            _ => return Err(FtpError::internal(format!("unknown fact '{}'", key))),
        }
    }

    let entry_type = entry_type.ok_or_else(|| FtpError::internal("MLSD entry has no type fact"))?;

    Ok(Entry {
        entry_type,
        permissions,
        name: name.to_string(),
        link_name: None,
        owner_user: String::new(),
        owner_group: String::new(),
        num_hard_links: 0,
        size_in_bytes,
        last_modification_date: modified,
    })
}

/// `YYYYMMDDhhmmss[.fraction]`; the fraction is ignored.
pub(crate) fn parse_mlsd_time(value: &str, ctx: &ParseContext) -> FtpResult<DateTime<FixedOffset>> {
    let base = value.split_once('.').map_or(value, |(base, _)| base);
    if base.len() != 14 || !base.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FtpError::internal(format!("invalid timestamp '{}'", value)));
    }
    let naive = NaiveDateTime::parse_from_str(base, "%Y%m%d%H%M%S")
        .map_err(|e| FtpError::internal_with(format!("invalid timestamp '{}'", value), e))?;
    in_location(naive, ctx)
}

// ─── Helpers ─────────────────────────────────────────────────────────

/// Split off `n` whitespace-separated fields; the remainder (with inner
/// spacing kept) is returned as the last element.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::with_capacity(n);
    let mut rest = line.trim_start();
    for _ in 0..n {
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }
    if rest.is_empty() {
        return None;
    }
    Some((fields, rest))
}

fn parse_number<T: std::str::FromStr>(s: &str, what: &str) -> FtpResult<T> {
    s.parse::<T>()
        .map_err(|_| FtpError::internal(format!("invalid {} '{}'", what, s)))
}
