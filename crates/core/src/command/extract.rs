//! Regex parameter extraction for each command intent.
//!
//! Extractors never fail on unrecognized text; they fall back to the documented defaults. The one
//! mandatory field is the reply body, which surfaces as [`ExtractError::MissingReplyMessage`].

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Hard upper bound on tickets handed out by a single assign command.
pub const MAX_ASSIGN_COUNT: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssignParams {
    pub requested_count: u32,
    pub search_term: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatsParams {
    pub hours_ago: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseParams {
    pub days_threshold: Option<u32>,
    pub search_term: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyParams {
    pub search_term: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("reply command is missing a message body")]
    MissingReplyMessage,
}

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("static regex compile")
}

static COUNT_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\b(\d+)\s+tickets?\b"));

static ASSIGN_STRIP_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bgive me\b",
        r"(?i)\bassign\b",
        r"(?i)\bfind\b",
        r"(?i)\bget\b",
        r"(?i)\b\d+\s+tickets?\b",
        r"(?i)\btickets?\b",
        r"(?i)\bto respond to\b",
        r"(?i)\babout\b",
        r"(?i)\bregarding\b",
    ]
    .into_iter()
    .map(pattern)
    .collect()
});

static DAYS_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\b(\d+)\s+days?\b"));
static HOURS_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\b(\d+)\s+hours?\b"));

static OLDER_THAN_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\bolder than (\d+) days?\b"));
static DAYS_OLD_RE: Lazy<Regex> = Lazy::new(|| pattern(r"(?i)\b(\d+) days? old\b"));

static CLOSE_TERM_RES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        pattern(r"(?i)\babout\s+(.+?)(?:\s+older\b|\s*$)"),
        pattern(r"(?i)\bregarding\s+(.+?)(?:\s+older\b|\s*$)"),
    ]
});

static REPLY_TERM_RES: Lazy<[Regex; 2]> = Lazy::new(|| {
    [
        pattern(r"(?i)\babout\s+(.+?)(?:\s+saying\b|\s+with\b|\s*$)"),
        pattern(r"(?i)\bregarding\s+(.+?)(?:\s+saying\b|\s+with\b|\s*$)"),
    ]
});

static REPLY_MESSAGE_RES: Lazy<[Regex; 2]> =
    Lazy::new(|| [pattern(r"(?is)\bsaying\s+(.+)$"), pattern(r"(?is)\bwith\s+(.+)$")]);

pub fn extract_assign(text: &str) -> AssignParams {
    let requested_count = COUNT_RE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|count| count.as_str().parse::<u32>().ok())
        .unwrap_or(1)
        .clamp(1, MAX_ASSIGN_COUNT);

    let mut residual = text.to_owned();
    for strip in ASSIGN_STRIP_RES.iter() {
        residual = strip.replace(&residual, " ").into_owned();
    }

    AssignParams { requested_count, search_term: non_empty(&collapse_whitespace(&residual)) }
}

pub fn extract_stats(text: &str, default_hours: u32) -> StatsParams {
    let days = first_number(&DAYS_RE, text);
    let hours = first_number(&HOURS_RE, text);

    let hours_ago = match (days, hours) {
        (Some(days), _) => days.saturating_mul(24),
        (None, Some(hours)) => hours,
        (None, None) => default_hours,
    };

    StatsParams { hours_ago }
}

pub fn extract_close(text: &str) -> CloseParams {
    let days_threshold =
        first_number(&OLDER_THAN_RE, text).or_else(|| first_number(&DAYS_OLD_RE, text));

    CloseParams { days_threshold, search_term: first_capture(CLOSE_TERM_RES.iter(), text) }
}

pub fn extract_reply(text: &str) -> Result<ReplyParams, ExtractError> {
    let message = first_capture(REPLY_MESSAGE_RES.iter(), text)
        .ok_or(ExtractError::MissingReplyMessage)?;

    Ok(ReplyParams { search_term: first_capture(REPLY_TERM_RES.iter(), text), message })
}

fn first_number(regex: &Regex, text: &str) -> Option<u32> {
    regex.captures(text)?.get(1)?.as_str().parse::<u32>().ok()
}

fn first_capture<'a>(patterns: impl Iterator<Item = &'a Regex>, text: &str) -> Option<String> {
    patterns
        .filter_map(|regex| regex.captures(text))
        .filter_map(|captures| captures.get(1).map(|value| value.as_str().trim().to_owned()))
        .find(|value| !value.is_empty())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        extract_assign, extract_close, extract_reply, extract_stats, ExtractError, MAX_ASSIGN_COUNT,
    };

    #[test]
    fn assign_extracts_count_and_residual_search_term() {
        let params = extract_assign("give me 3 tickets about billing");
        assert_eq!(params.requested_count, 3);
        assert_eq!(params.search_term.as_deref(), Some("billing"));
    }

    #[test]
    fn assign_defaults_to_one_ticket_without_filter() {
        let params = extract_assign("give me tickets");
        assert_eq!(params.requested_count, 1);
        assert_eq!(params.search_term, None);
    }

    #[test]
    fn assign_caps_requested_count() {
        assert_eq!(extract_assign("assign 40 tickets").requested_count, MAX_ASSIGN_COUNT);
        assert_eq!(extract_assign("assign 0 tickets").requested_count, 1);
    }

    #[test]
    fn assign_strips_directive_phrases_in_any_order() {
        let params = extract_assign("find 2 tickets to respond to regarding refund delays");
        assert_eq!(params.requested_count, 2);
        assert_eq!(params.search_term.as_deref(), Some("refund delays"));

        let params = extract_assign("about shipping, get 4 tickets");
        assert_eq!(params.search_term.as_deref(), Some("shipping,"));
    }

    #[test]
    fn assign_keeps_words_that_merely_contain_directives() {
        let params = extract_assign("get 1 ticket about target forgetting");
        assert_eq!(params.search_term.as_deref(), Some("target forgetting"));
    }

    #[test]
    fn stats_prefers_days_over_hours() {
        assert_eq!(extract_stats("stats for 2 days and 5 hours", 24).hours_ago, 48);
        assert_eq!(extract_stats("metrics for the last 6 hours", 24).hours_ago, 6);
        assert_eq!(extract_stats("show me metrics", 24).hours_ago, 24);
        assert_eq!(extract_stats("show me metrics", 12).hours_ago, 12);
    }

    #[test]
    fn close_extracts_threshold_and_term() {
        let params = extract_close("close all open tickets older than 10 days about refunds");
        assert_eq!(params.days_threshold, Some(10));
        assert_eq!(params.search_term.as_deref(), Some("refunds"));

        let params = extract_close("close tickets about password reset older than 3 days");
        assert_eq!(params.days_threshold, Some(3));
        assert_eq!(params.search_term.as_deref(), Some("password reset"));

        let params = extract_close("close tickets regarding spam that are 7 days old");
        assert_eq!(params.days_threshold, Some(7));
        assert_eq!(params.search_term.as_deref(), Some("spam that are 7 days old"));
    }

    #[test]
    fn close_without_age_phrase_has_no_date_filter() {
        let params = extract_close("close all");
        assert_eq!(params.days_threshold, None);
        assert_eq!(params.search_term, None);
    }

    #[test]
    fn reply_requires_message_body() {
        assert_eq!(
            extract_reply("reply to tickets about verification"),
            Err(ExtractError::MissingReplyMessage)
        );
    }

    #[test]
    fn reply_extracts_term_and_message() {
        let params = extract_reply(
            "reply to all tickets about verification saying This issue has been resolved!",
        )
        .expect("reply params");
        assert_eq!(params.search_term.as_deref(), Some("verification"));
        assert_eq!(params.message, "This issue has been resolved!");

        let params = extract_reply("respond to tickets regarding outage with We are on it")
            .expect("reply params");
        assert_eq!(params.search_term.as_deref(), Some("outage"));
        assert_eq!(params.message, "We are on it");
    }
}
