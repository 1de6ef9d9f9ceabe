//! Text-mode SMS listing (`+CMGL`) parsing.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::Serialize;

/// One message as reported by `AT+CMGL`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub index: u32,
    /// `REC UNREAD`, `REC READ`, `STO UNSENT` or `STO SENT`.
    pub status: String,
    pub sender: String,
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub body: String,
}

/// A listing plus the raw modem text it was parsed from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageListing {
    pub messages: Vec<StoredMessage>,
    pub raw: String,
}

impl MessageListing {
    pub fn parse(raw: &str) -> Self {
        let mut messages: Vec<StoredMessage> = Vec::new();
        let mut body: Vec<&str> = Vec::new();

        for line in raw.lines().map(|l| l.trim_end_matches('\r')) {
            if let Some(header) = line.strip_prefix("+CMGL:") {
                flush_body(&mut messages, &mut body);
                if let Some(msg) = parse_header(header) {
                    messages.push(msg);
                }
            } else if line.trim() == "OK" {
                flush_body(&mut messages, &mut body);
            } else if !messages.is_empty() {
                body.push(line);
            }
        }
        flush_body(&mut messages, &mut body);

        Self {
            messages,
            raw: raw.to_string(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn flush_body(messages: &mut [StoredMessage], body: &mut Vec<&str>) {
    if let Some(last) = messages.last_mut() {
        if last.body.is_empty() {
            last.body = body.join("\n").trim().to_string();
        }
    }
    body.clear();
}

/// `1,"REC READ","+15551234567","","24/05/01,12:30:00+08"`
fn parse_header(header: &str) -> Option<StoredMessage> {
    let fields = split_quoted(header.trim());
    let index = fields.first()?.parse().ok()?;
    let status = fields.get(1)?.clone();
    let sender = fields.get(2).cloned().unwrap_or_default();
    let timestamp = fields.get(4).and_then(|ts| parse_timestamp(ts));
    Some(StoredMessage {
        index,
        status,
        sender,
        timestamp,
        body: String::new(),
    })
}

/// Split on commas that are outside double quotes and strip the quotes.
fn split_quoted(input: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

/// Service-centre timestamp `yy/MM/dd,hh:mm:ss±zz`, zone in quarter hours.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<FixedOffset>> {
    let (date, rest) = ts.trim().split_once(',')?;
    if rest.len() < 9 {
        return None;
    }
    let (time, zone) = rest.split_at(8);
    let date = NaiveDate::parse_from_str(&format!("20{date}"), "%Y/%m/%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S").ok()?;
    let quarters: i32 = zone.parse().ok()?;
    let offset = FixedOffset::east_opt(quarters * 15 * 60)?;
    date.and_time(time).and_local_timezone(offset).single()
}
