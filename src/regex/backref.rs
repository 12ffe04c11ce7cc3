use std::sync::Arc;

use super::{Captures, CompiledRegex, escape};

/// The `end` pattern of a begin/end rule.
///
/// End patterns may refer back to groups captured by the begin match, like
/// heredoc terminators or matching quote characters. Those are substituted
/// with the escaped captured text once per block, after the begin match.
#[derive(Debug)]
pub struct EndPattern {
    source: String,
    has_backrefs: bool,
    compiled: Option<Arc<CompiledRegex>>,
}

impl EndPattern {
    pub fn new(source: &str) -> Self {
        let has_backrefs = find_backrefs(source);
        let compiled = if has_backrefs {
            None
        } else {
            CompiledRegex::compile(source).map(Arc::new)
        };
        Self {
            source: source.to_string(),
            has_backrefs,
            compiled,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn has_backrefs(&self) -> bool {
        self.has_backrefs
    }

    /// True if the pattern can never compile. Patterns with backrefs are
    /// only known after resolving.
    pub fn is_invalid(&self) -> bool {
        !self.has_backrefs && self.compiled.is_none()
    }

    /// Resolve against the begin match found in `text`
    pub fn resolve(&self, text: &str, begin: &Captures) -> Option<Arc<CompiledRegex>> {
        if !self.has_backrefs {
            return self.compiled.clone();
        }
        let resolved = substitute(&self.source, |index| {
            begin
                .get(index)
                .and_then(|r| text.get(r.start..r.end))
                .map(escape)
                .unwrap_or_default()
        });
        CompiledRegex::compile(&resolved).map(Arc::new)
    }
}

fn find_backrefs(source: &str) -> bool {
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(d) if d.is_ascii_digit() => return true,
                _ => {}
            }
        }
    }
    false
}

/// Replace every `\N` in `source` with `lookup(N)`. Escaped backslashes are
/// left alone so `\\1` stays a literal backslash followed by `1`.
fn substitute(source: &str, lookup: impl Fn(usize) -> String) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(d);
                    chars.next();
                }
                let index = digits.parse().unwrap_or(0);
                out.push_str(&lookup(index));
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
                chars.next();
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    #[test]
    fn plain_end_pattern_compiles_once() {
        let end = EndPattern::new(r"\*/");
        assert!(!end.has_backrefs());
        let caps = Captures::new(vec![Some(Region::new(0, 2))]);
        let a = end.resolve("/*", &caps).unwrap();
        let b = end.resolve("/*", &caps).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn backrefs_take_begin_captures() {
        let text = "<<EOS";
        let begin = super::super::compile(r"<<(\w+)").unwrap();
        let caps = begin.find_first_submatch_from(text, 0).unwrap();
        let end = EndPattern::new(r"^\1$");
        assert!(end.has_backrefs());
        let resolved = end.resolve(text, &caps).unwrap();
        assert_eq!(resolved.source(), "^EOS$");
    }

    #[test]
    fn captured_text_is_escaped() {
        let text = "q(";
        let begin = super::super::compile(r"q(.)").unwrap();
        let caps = begin.find_first_submatch_from(text, 0).unwrap();
        let resolved = EndPattern::new(r"\1").resolve(text, &caps).unwrap();
        assert_eq!(resolved.source(), r"\(");
        assert!(resolved.find_first_submatch_from("a(b", 0).is_some());
    }

    #[test]
    fn escaped_backslash_is_not_a_backref() {
        assert!(!find_backrefs(r"\\"));
        assert_eq!(substitute(r"\\1", |_| "X".to_string()), r"\\1");
        assert_eq!(substitute(r"a\2b", |i| i.to_string()), "a2b");
    }

    #[test]
    fn missing_group_becomes_empty() {
        let caps = Captures::new(vec![Some(Region::new(0, 1))]);
        let resolved = EndPattern::new(r"x\3y").resolve("a", &caps).unwrap();
        assert_eq!(resolved.source(), "xy");
    }
}
