use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::document::Document;
use crate::grammar::{Grammar, GrammarRegistry};
use crate::parser::{Parser, TokenTree};

/// A finished background parse
pub struct ParsedTree {
    /// Document revision the text was taken from
    pub revision: u64,
    pub tree: TokenTree,
    pub elapsed: Duration,
}

/// Runs full parses on tokio's blocking pool.
///
/// Every parse is tagged with the document revision it was scheduled for.
/// Only the newest revision is handed back; anything older has been
/// superseded by an edit and is dropped once it finishes.
pub struct ParseScheduler {
    registry: Arc<GrammarRegistry>,
    latest: Option<u64>,
    tasks: Vec<(u64, JoinHandle<ParsedTree>)>,
}

impl ParseScheduler {
    pub fn new(registry: Arc<GrammarRegistry>) -> Self {
        Self {
            registry,
            latest: None,
            tasks: Vec::new(),
        }
    }

    pub fn schedule(&mut self, grammar: Arc<Grammar>, text: String, revision: u64) {
        let registry = Arc::clone(&self.registry);
        let handle = tokio::task::spawn_blocking(move || {
            let started = Instant::now();
            let tree = Parser::new(registry, grammar).parse(&text);
            ParsedTree {
                revision,
                tree,
                elapsed: started.elapsed(),
            }
        });
        self.latest = Some(self.latest.map_or(revision, |latest| latest.max(revision)));
        self.tasks.push((revision, handle));
        debug!(revision, in_flight = self.tasks.len(), "scheduled full parse");
    }

    /// Parse the document's current text
    pub fn schedule_document(&mut self, document: &Document, grammar: Arc<Grammar>) {
        self.schedule(grammar, document.text(), document.revision());
    }

    /// Parses still running or not yet collected
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_latest(&self, revision: u64) -> bool {
        self.latest == Some(revision)
    }

    /// Collect finished parses without waiting. Returns the newest
    /// revision's tree if it is among them.
    pub fn drain_finished(&mut self) -> Option<ParsedTree> {
        let latest = self.latest;
        let mut newest = None;
        self.tasks.retain_mut(|(revision, handle)| {
            if !handle.is_finished() {
                return true;
            }
            match handle.now_or_never() {
                None => true,
                Some(Ok(parsed)) if Some(parsed.revision) == latest => {
                    debug!(revision = parsed.revision, elapsed = ?parsed.elapsed, "full parse finished");
                    newest = Some(parsed);
                    false
                }
                Some(Ok(_)) => {
                    debug!(revision = *revision, "dropping stale parse");
                    false
                }
                Some(Err(e)) => {
                    error!("parse task failed: {}", e);
                    false
                }
            }
        });
        newest
    }

    /// Wait for the newest scheduled parse. Older parses are abandoned.
    pub async fn finish_latest(&mut self) -> Option<ParsedTree> {
        let latest = self.latest?;
        let mut result = None;
        for (revision, handle) in std::mem::take(&mut self.tasks) {
            if revision != latest {
                // a blocking task can't be cancelled; dropping the handle
                // lets it finish unobserved
                continue;
            }
            match handle.await {
                Ok(parsed) => result = Some(parsed),
                Err(e) => error!("parse task failed: {}", e),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarFormat;
    use crate::highlight::{Font, SyntaxHighlighter};
    use crate::theme::default_theme;

    const MINI: &str = include_str!("../../testdata/Mini.tmLanguage");

    fn registry() -> Arc<GrammarRegistry> {
        let registry = GrammarRegistry::new();
        assert!(registry.load_language_from_str(MINI, GrammarFormat::Plist));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_latest_revision_wins() {
        let registry = registry();
        let grammar = registry.language_for_scope("source.mini").unwrap();
        let mut scheduler = ParseScheduler::new(Arc::clone(&registry));
        scheduler.schedule(Arc::clone(&grammar), "if 1".to_string(), 1);
        scheduler.schedule(Arc::clone(&grammar), "while 22".to_string(), 2);
        assert_eq!(scheduler.pending(), 2);
        assert!(scheduler.is_latest(2));

        let parsed = scheduler.finish_latest().await.unwrap();
        assert_eq!(parsed.revision, 2);
        assert_eq!(parsed.tree.len(), 8);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.finish_latest().await.is_none());
    }

    #[tokio::test]
    async fn test_drain_finished_skips_stale() {
        let registry = registry();
        let grammar = registry.language_for_scope("source.mini").unwrap();
        let mut scheduler = ParseScheduler::new(Arc::clone(&registry));
        scheduler.schedule(Arc::clone(&grammar), "1".to_string(), 3);
        scheduler.schedule(Arc::clone(&grammar), "2".to_string(), 4);

        let mut found = None;
        for _ in 0..500 {
            if let Some(parsed) = scheduler.drain_finished() {
                found = Some(parsed);
            }
            if scheduler.pending() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(found.map(|p| p.revision), Some(4));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_highlighter_rejects_stale_parse() {
        let registry = registry();
        let grammar = registry.language_for_scope("source.mini").unwrap();
        let theme = Arc::new(default_theme());
        let mut doc = Document::from_text("x");
        let parser = Parser::new(Arc::clone(&registry), Arc::clone(&grammar));
        let mut hl = SyntaxHighlighter::new(&mut doc, parser, theme, Font::default());

        let mut scheduler = ParseScheduler::new(Arc::clone(&registry));
        scheduler.schedule_document(&doc, Arc::clone(&grammar));
        let change = doc.insert(1, " 5");
        hl.apply_change(&mut doc, &change);

        let stale = scheduler.finish_latest().await.unwrap();
        assert!(!hl.accept_full_parse(&mut doc, stale));
        assert_eq!(hl.tree().len(), 3);

        scheduler.schedule_document(&doc, Arc::clone(&grammar));
        let fresh = scheduler.finish_latest().await.unwrap();
        assert!(hl.accept_full_parse(&mut doc, fresh));
        assert_eq!(hl.scope_name(2), "source.mini constant.numeric.mini");
    }
}
