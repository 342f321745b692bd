//! Ordered command interpretation for free-text mentions.
//!
//! Each [`CommandRule`] pairs a predicate with an extractor. The interpreter walks its rules in
//! registration order and the first predicate that matches decides the command; text matching no
//! rule is treated as a request for help.

pub mod extract;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use extract::{
    AssignParams, CloseParams, ExtractError, ReplyParams, StatsParams, MAX_ASSIGN_COUNT,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Help,
    Assign,
    Stats,
    Close,
    Reply,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Help => "help",
            Self::Assign => "assign",
            Self::Stats => "stats",
            Self::Close => "close",
            Self::Reply => "reply",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Assign(AssignParams),
    Stats(StatsParams),
    Close(CloseParams),
    Reply(ReplyParams),
}

impl Command {
    pub fn intent(&self) -> Intent {
        match self {
            Self::Help => Intent::Help,
            Self::Assign(_) => Intent::Assign,
            Self::Stats(_) => Intent::Stats,
            Self::Close(_) => Intent::Close,
            Self::Reply(_) => Intent::Reply,
        }
    }
}

/// Deployment-level fallbacks used by extractors when the text is silent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandDefaults {
    pub stats_default_hours: u32,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self { stats_default_hours: 24 }
    }
}

pub trait CommandRule: Send + Sync {
    fn intent(&self) -> Intent;
    fn matches(&self, text: &str) -> bool;
    fn extract(&self, text: &str, defaults: &CommandDefaults) -> Result<Command, ExtractError>;
}

type Extractor = fn(&str, &CommandDefaults) -> Result<Command, ExtractError>;

/// A rule whose predicate is "any of these patterns matches".
pub struct PatternRule {
    intent: Intent,
    patterns: &'static Lazy<Vec<Regex>>,
    extractor: Extractor,
}

impl PatternRule {
    pub fn help() -> Self {
        Self { intent: Intent::Help, patterns: &HELP_PATTERNS, extractor: |_, _| Ok(Command::Help) }
    }

    pub fn assign() -> Self {
        Self {
            intent: Intent::Assign,
            patterns: &ASSIGN_PATTERNS,
            extractor: |text, _| Ok(Command::Assign(extract::extract_assign(text))),
        }
    }

    pub fn stats() -> Self {
        Self {
            intent: Intent::Stats,
            patterns: &STATS_PATTERNS,
            extractor: |text, defaults| {
                Ok(Command::Stats(extract::extract_stats(text, defaults.stats_default_hours)))
            },
        }
    }

    pub fn close() -> Self {
        Self {
            intent: Intent::Close,
            patterns: &CLOSE_PATTERNS,
            extractor: |text, _| Ok(Command::Close(extract::extract_close(text))),
        }
    }

    pub fn reply() -> Self {
        Self {
            intent: Intent::Reply,
            patterns: &REPLY_PATTERNS,
            extractor: |text, _| extract::extract_reply(text).map(Command::Reply),
        }
    }
}

impl CommandRule for PatternRule {
    fn intent(&self) -> Intent {
        self.intent
    }

    fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(text))
    }

    fn extract(&self, text: &str, defaults: &CommandDefaults) -> Result<Command, ExtractError> {
        (self.extractor)(text, defaults)
    }
}

fn compile(sources: &[&str]) -> Vec<Regex> {
    sources.iter().map(|source| Regex::new(source).expect("static regex compile")).collect()
}

static HELP_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\bhelp\b",
        r"(?i)\bhow to\b",
        r"(?i)\bwhat can you do\b",
        r"(?i)\bcommands\b",
        r"(?i)\busage\b",
        r"(?i)\bguide\b",
    ])
});

static ASSIGN_PATTERNS: Lazy<Vec<Regex>> =
    Lazy::new(|| compile(&[r"(?i)\b(?:give me|assign|find|get)\s+(?:\d+\s+)?tickets?\b"]));

static STATS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\bhow many tickets\b",
        r"(?i)\bticket stats\b",
        r"(?i)\bstatistics\b",
        r"(?i)\bmetrics\b",
        r"(?i)\bperformance\b",
    ])
});

static CLOSE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\bclose\s+(?:\w+\s+)?tickets?\b",
        r"(?i)\bclose all\b",
        r"(?i)\bmark\s+(?:\w+\s+)?as closed\b",
    ])
});

static REPLY_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)\b(?:reply|respond) to\s+(?:\w+\s+)?tickets?\b",
        r"(?i)\bsend\s+(?:\w+\s+)?message\b",
    ])
});

pub struct CommandInterpreter {
    rules: Vec<Box<dyn CommandRule>>,
    defaults: CommandDefaults,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new(CommandDefaults::default())
    }
}

impl CommandInterpreter {
    /// Builds the standard rule set in priority order: help, assign, stats, close, reply.
    pub fn new(defaults: CommandDefaults) -> Self {
        let rules: Vec<Box<dyn CommandRule>> = vec![
            Box::new(PatternRule::help()),
            Box::new(PatternRule::assign()),
            Box::new(PatternRule::stats()),
            Box::new(PatternRule::close()),
            Box::new(PatternRule::reply()),
        ];
        Self::with_rules(rules, defaults)
    }

    pub fn with_rules(rules: Vec<Box<dyn CommandRule>>, defaults: CommandDefaults) -> Self {
        Self { rules, defaults }
    }

    /// Appends a rule with the lowest priority.
    pub fn push_rule(&mut self, rule: Box<dyn CommandRule>) {
        self.rules.push(rule);
    }

    pub fn defaults(&self) -> &CommandDefaults {
        &self.defaults
    }

    pub fn classify(&self, text: &str) -> Intent {
        self.matching_rule(text).map(|rule| rule.intent()).unwrap_or(Intent::Help)
    }

    pub fn interpret(&self, text: &str) -> Result<Command, ExtractError> {
        match self.matching_rule(text) {
            Some(rule) => rule.extract(text, &self.defaults),
            None => Ok(Command::Help),
        }
    }

    fn matching_rule(&self, text: &str) -> Option<&dyn CommandRule> {
        self.rules.iter().find(|rule| rule.matches(text)).map(|rule| &**rule)
    }
}
