//! Scope selectors and how well they match a scope path
//!
//! A selector like `source.php string.quoted` is a list of segments, each a
//! dot-separated scope prefix. It matches a path such as
//! `source.php meta.embedded string.quoted.double` when every segment
//! prefix-matches some path entry, in order, with the last selector segment
//! taken as deep as possible. Path entries may be skipped, selector segments
//! may not.

use std::cmp::Ordering;

/// How well a selector matches a scope path.
///
/// `Invalid` means no match. `Empty` comes from an empty selector, which
/// matches every path but loses to any real match. `Valid` holds one score
/// per path entry: the number of dot components matched there. Two valid
/// ranks compare entry by entry starting from the deepest.
#[derive(Debug, Clone, Eq)]
pub enum Rank {
    Invalid,
    Empty,
    Valid(Vec<usize>),
}

impl Rank {
    pub fn is_valid(&self) -> bool {
        !matches!(self, Rank::Invalid)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Rank::Empty)
    }

    fn class(&self) -> u8 {
        match self {
            Rank::Invalid => 0,
            Rank::Empty => 1,
            Rank::Valid(_) => 2,
        }
    }
}

impl Ord for Rank {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Rank::Valid(a), Rank::Valid(b)) => {
                let depth = a.len().max(b.len());
                for i in (0..depth).rev() {
                    let x = a.get(i).copied().unwrap_or(0);
                    let y = b.get(i).copied().unwrap_or(0);
                    match x.cmp(&y) {
                        Ordering::Equal => continue,
                        ord => return ord,
                    }
                }
                Ordering::Equal
            }
            _ => self.class().cmp(&other.class()),
        }
    }
}

impl PartialOrd for Rank {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Rank {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

/// One scope name split into its dot components
type Segment = Vec<String>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Alternative {
    left: bool,
    include: Vec<Segment>,
    exclude: Vec<Vec<Segment>>,
}

/// A parsed scope selector.
///
/// Alternatives are separated by `,` or `|` and the best one wins. Within an
/// alternative, `-` starts an exclusion: `source.js -comment` matches
/// JavaScript outside comments. An `L:` or `R:` prefix marks which side of
/// the local patterns an injection goes to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScopeSelector {
    source: String,
    alternatives: Vec<Alternative>,
}

impl ScopeSelector {
    pub fn parse(source: &str) -> Self {
        let alternatives = source
            .split([',', '|'])
            .map(str::trim)
            .filter(|alt| !alt.is_empty())
            .map(parse_alternative)
            .collect();

        Self {
            source: source.to_string(),
            alternatives,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.alternatives.is_empty()
    }

    /// True if any alternative carries the `L:` prefix
    pub fn is_left(&self) -> bool {
        self.alternatives.iter().any(|alt| alt.left)
    }

    /// Rank against a space-separated scope path
    pub fn rank(&self, path: &str) -> Rank {
        let path: Vec<&str> = path.split_whitespace().collect();
        self.rank_path(&path)
    }

    /// Rank against a path given outermost scope first
    pub fn rank_path<S: AsRef<str>>(&self, path: &[S]) -> Rank {
        if self.alternatives.is_empty() {
            return Rank::Empty;
        }
        let path: Vec<Vec<&str>> = path
            .iter()
            .map(|scope| scope.as_ref().split('.').collect())
            .collect();

        self.alternatives
            .iter()
            .map(|alt| rank_alternative(alt, &path))
            .max()
            .unwrap_or(Rank::Invalid)
    }

    pub fn matches<S: AsRef<str>>(&self, path: &[S]) -> bool {
        self.rank_path(path).is_valid()
    }
}

fn parse_alternative(source: &str) -> Alternative {
    let (left, body) = match source.split_at_checked(2) {
        Some(("L:", rest)) => (true, rest),
        Some(("R:" | "B:", rest)) => (false, rest),
        _ => (false, source),
    };

    let mut include = Vec::new();
    let mut exclude: Vec<Vec<Segment>> = Vec::new();
    for token in body.split_whitespace() {
        let token = token.trim_matches(|c| c == '(' || c == ')');
        if let Some(rest) = token.strip_prefix('-') {
            let mut group = Vec::new();
            if !rest.is_empty() {
                group.push(split_segment(rest));
            }
            exclude.push(group);
        } else if token.is_empty() {
            continue;
        } else if let Some(current) = exclude.last_mut() {
            current.push(split_segment(token));
        } else {
            include.push(split_segment(token));
        }
    }

    Alternative {
        left,
        include,
        exclude,
    }
}

fn split_segment(scope: &str) -> Segment {
    scope.split('.').map(str::to_string).collect()
}

fn rank_alternative(alt: &Alternative, path: &[Vec<&str>]) -> Rank {
    let excluded = alt
        .exclude
        .iter()
        .filter(|e| !e.is_empty())
        .any(|e| matches!(rank_segments(e, path), Rank::Valid(_)));
    if excluded {
        return Rank::Invalid;
    }
    rank_segments(&alt.include, path)
}

fn rank_segments(selector: &[Segment], path: &[Vec<&str>]) -> Rank {
    if selector.is_empty() {
        return Rank::Empty;
    }

    let mut scores = vec![0; path.len()];
    let mut limit = path.len();
    for segment in selector.iter().rev() {
        let Some(index) = (0..limit).rev().find(|&i| is_prefix(segment, &path[i])) else {
            return Rank::Invalid;
        };
        scores[index] = segment.len();
        limit = index;
    }
    Rank::Valid(scores)
}

fn is_prefix(selector: &[String], scope: &[&str]) -> bool {
    selector.len() <= scope.len() && selector.iter().zip(scope).all(|(s, p)| s == p)
}
