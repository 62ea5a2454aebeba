//! Free-text capture parser.
//!
//! Turns a line like `call bob #work @office :todo ^2025-06-20` into an
//! [`Item`]. Tokens are whitespace separated:
//!
//! - `#tag` adds a (lower-cased) tag
//! - `@place` adds a place
//! - `:status` sets the status (first one wins) and makes the item a task
//! - `^YYYY-MM-DD` sets the due date (first one wins)
//! - the first `http://` or `https://` token becomes the link
//!
//! Everything else is content.

use std::sync::LazyLock;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;

use crate::model::{Item, ItemType, DATE_FORMAT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid date format: {0}")]
    InvalidDate(String),
    #[error("nothing to capture")]
    Empty,
}

/// One structured token: a sigil followed by a value, or a URL
static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<sigil>[#@:^])(?P<value>\S+)|(?P<link>https?://\S+))$").unwrap()
});

/// Parse captured text into an item stamped with the current time
pub fn parse(input: &str) -> Result<Item, ParseError> {
    parse_at(input, Utc::now())
}

/// Parse captured text into an item captured at `now`
pub fn parse_at(input: &str, now: DateTime<Utc>) -> Result<Item, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut item = Item::new(now);
    let mut content: Vec<&str> = Vec::new();

    for token in input.split_whitespace() {
        let Some(caps) = TOKEN_RE.captures(token) else {
            content.push(token);
            continue;
        };

        if let Some(link) = caps.name("link") {
            if item.link.is_empty() {
                item.link = link.as_str().to_string();
            } else {
                content.push(token);
            }
            continue;
        }

        let value = &caps["value"];
        match &caps["sigil"] {
            "#" => item.tags.push(value.to_lowercase()),
            "@" => item.places.push(value.to_string()),
            ":" if item.status.is_empty() => item.status = value.to_string(),
            "^" if item.due_date.is_none() => item.due_date = Some(parse_due_date(value)?),
            _ => content.push(token),
        }
    }

    item.content = content.join(" ");
    item.item_type = if !item.status.is_empty() {
        ItemType::Task
    } else if !item.link.is_empty() {
        ItemType::Link
    } else {
        ItemType::Note
    };

    Ok(item)
}

/// Parse a `YYYY-MM-DD` date as local midnight, returned in UTC
pub fn parse_due_date(value: &str) -> Result<DateTime<Utc>, ParseError> {
    let date = NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| ParseError::InvalidDate(value.to_string()))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| ParseError::InvalidDate(value.to_string()))?;
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .ok_or_else(|| ParseError::InvalidDate(value.to_string()))
}
