use tracing::warn;

use super::raw::{RawCaptures, RawPattern};
use crate::regex::{CompiledRegex, EndPattern};

/// Index of a pattern in its grammar's pattern arena
pub type PatternId = usize;

/// Capture scopes of a rule, sorted by group number
pub type CaptureScopes = Vec<(usize, String)>;

#[derive(Debug)]
pub struct MatchRule {
    pub name: Option<String>,
    /// `None` if the pattern failed to compile; the rule is then skipped
    pub regex: Option<CompiledRegex>,
    pub captures: CaptureScopes,
}

#[derive(Debug)]
pub struct BlockRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: Option<CompiledRegex>,
    pub end: EndPattern,
    pub begin_captures: CaptureScopes,
    pub end_captures: CaptureScopes,
    pub patterns: Vec<PatternId>,
    pub apply_end_pattern_last: bool,
}

/// Where an `include` points
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IncludeTarget {
    /// `$self`: the top-level patterns of the grammar declaring the include
    SelfRef,
    /// `$base`: the top-level patterns of the document's grammar
    Base,
    /// `#key`: a repository entry of the declaring grammar
    Repository(String),
    /// `scope.name` or `scope.name#key`: another grammar
    External { scope: String, key: Option<String> },
}

impl IncludeTarget {
    pub fn parse(include: &str) -> Self {
        match include {
            "$self" => Self::SelfRef,
            "$base" => Self::Base,
            _ => match include.split_once('#') {
                Some(("", key)) => Self::Repository(key.to_string()),
                Some((scope, key)) => Self::External {
                    scope: scope.to_string(),
                    key: Some(key.to_string()),
                },
                None => Self::External {
                    scope: include.to_string(),
                    key: None,
                },
            },
        }
    }
}

#[derive(Debug)]
pub enum Pattern {
    Match(MatchRule),
    Block(BlockRule),
    Include(IncludeTarget),
    /// Only nested patterns, like most repository entries
    Group(Vec<PatternId>),
}

/// Flattens raw patterns into an arena
#[derive(Default)]
pub(super) struct PatternArena {
    pub patterns: Vec<Pattern>,
}

impl PatternArena {
    fn push(&mut self, pattern: Pattern) -> PatternId {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub fn add_group(&mut self, raws: &[RawPattern]) -> PatternId {
        let children = self.add_all(raws);
        self.push(Pattern::Group(children))
    }

    fn add_all(&mut self, raws: &[RawPattern]) -> Vec<PatternId> {
        raws.iter()
            .filter(|raw| !raw.disabled)
            .map(|raw| self.add(raw))
            .collect()
    }

    pub fn add(&mut self, raw: &RawPattern) -> PatternId {
        if raw.disabled {
            return self.push(Pattern::Group(Vec::new()));
        }

        if let Some(include) = &raw.include {
            return self.push(Pattern::Include(IncludeTarget::parse(include)));
        }

        if let Some(source) = &raw.match_ {
            return self.push(Pattern::Match(MatchRule {
                name: raw.name.clone(),
                regex: CompiledRegex::compile(source),
                captures: capture_scopes(&raw.captures),
            }));
        }

        if let Some(begin) = &raw.begin {
            let begin_captures = if raw.begin_captures.is_empty() {
                &raw.captures
            } else {
                &raw.begin_captures
            };

            let Some(end) = &raw.end else {
                // begin/while is matched line by line; without line state it
                // degrades to highlighting the begin match alone
                if raw.while_.is_some() {
                    warn!(begin = %begin, "begin/while rule treated as a match rule");
                } else {
                    warn!(begin = %begin, "begin rule without end treated as a match rule");
                }
                return self.push(Pattern::Match(MatchRule {
                    name: raw.name.clone(),
                    regex: CompiledRegex::compile(begin),
                    captures: capture_scopes(begin_captures),
                }));
            };

            let end_captures = if raw.end_captures.is_empty() {
                &raw.captures
            } else {
                &raw.end_captures
            };
            let begin_captures = capture_scopes(begin_captures);
            let end_captures = capture_scopes(end_captures);
            let patterns = self.add_all(&raw.patterns);

            return self.push(Pattern::Block(BlockRule {
                name: raw.name.clone(),
                content_name: raw.content_name.clone(),
                begin: CompiledRegex::compile(begin),
                end: EndPattern::new(end),
                begin_captures,
                end_captures,
                patterns,
                apply_end_pattern_last: raw.apply_end_pattern_last,
            }));
        }

        let children = self.add_all(&raw.patterns);
        self.push(Pattern::Group(children))
    }
}

fn capture_scopes(raw: &RawCaptures) -> CaptureScopes {
    let mut scopes: CaptureScopes = raw
        .iter()
        .filter_map(|(key, capture)| {
            let index = key.parse().ok()?;
            let name = capture.name.clone()?;
            Some((index, name))
        })
        .collect();
    scopes.sort();
    scopes
}
