//! Incremental TextMate parser
//!
//! The parser walks the text with an explicit stack of open begin/end
//! blocks. At each position every candidate pattern of the innermost block
//! is searched and the leftmost match wins, ties going to the pattern
//! listed first; the block's end pattern wins ties unless the rule sets
//! `applyEndPatternLast`. Matches become nodes of a [`TokenTree`].
//!
//! A block whose begin pattern matched the empty string can't begin again
//! inside itself before the next line. If the parser still makes no
//! progress it drops such empty blocks and skips a character.
//!
//! After an edit, [`Parser::reparse`] rebuilds the block stack that was
//! open at the start of the edited line from the old tree, parses from
//! there, and stops as soon as it reaches a token boundary the old tree
//! also had in the same block. The rest of the old tree is shifted and
//! spliced back in.

mod tree;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::grammar::{
    BlockRule, CaptureScopes, Grammar, GrammarRegistry, IncludeTarget, MatchRule, Pattern,
    PatternId,
};
use crate::region::{Region, shift};
use crate::regex::{Captures, CompiledRegex, next_char_boundary};

pub use tree::{BlockState, Leaf, Node, NodeId, NodeKind, TokenTree};

/// Iterations without progress before the parser skips a character
const MAX_STALLS: usize = 16;

/// A text replacement, in byte offsets. `start..old_end` of the old text
/// became `start..new_end` of the new text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextEdit {
    pub start: usize,
    pub old_end: usize,
    pub new_end: usize,
}

impl TextEdit {
    pub fn delta(&self) -> isize {
        self.new_end as isize - self.old_end as isize
    }
}

/// What a reparse replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reparse {
    /// Part of the new text whose nodes were rebuilt
    pub region: Region,
    /// Nodes with this id or higher were created by the reparse
    pub first_new_node: NodeId,
    /// False if parsing had to continue to the end of the text
    pub resynced: bool,
}

/// A pattern that can start a token, with the grammar that owns it
#[derive(Clone)]
struct Candidate {
    grammar: Arc<Grammar>,
    id: PatternId,
    anchored: bool,
}

impl Candidate {
    fn new(grammar: &Arc<Grammar>, id: PatternId) -> Self {
        let anchored = match grammar.pattern(id) {
            Pattern::Match(rule) => rule.regex.as_ref().is_some_and(|r| r.is_anchored()),
            Pattern::Block(rule) => rule.begin.as_ref().is_some_and(|r| r.is_anchored()),
            _ => false,
        };
        Self {
            grammar: Arc::clone(grammar),
            id,
            anchored,
        }
    }

    fn key(&self) -> (usize, PatternId) {
        (Arc::as_ptr(&self.grammar) as usize, self.id)
    }

    fn search(&self, text: &str, pos: usize) -> Option<Captures> {
        match self.grammar.pattern(self.id) {
            Pattern::Match(rule) => rule.regex.as_ref()?.find_non_empty_from(text, pos),
            Pattern::Block(rule) => rule.begin.as_ref()?.find_first_submatch_from(text, pos),
            _ => None,
        }
    }
}

/// Scope path of a frame. Frames share the path of the block they were
/// opened in.
struct ScopePath {
    scope: String,
    parent: Option<Arc<ScopePath>>,
}

impl ScopePath {
    fn root(scope: &str) -> Arc<Self> {
        Arc::new(Self {
            scope: scope.to_string(),
            parent: None,
        })
    }

    fn push(self: &Arc<Self>, scope: Option<&str>) -> Arc<Self> {
        match scope {
            Some(scope) => Arc::new(Self {
                scope: scope.to_string(),
                parent: Some(Arc::clone(self)),
            }),
            None => Arc::clone(self),
        }
    }

    /// Outermost scope first
    fn to_vec(&self) -> Vec<&str> {
        let mut path = Vec::new();
        let mut next = Some(self);
        while let Some(node) = next {
            path.push(node.scope.as_str());
            next = node.parent.as_deref();
        }
        path.reverse();
        path
    }
}

#[derive(Clone)]
enum Cached {
    Miss,
    Hit(Captures),
}

/// Where a frame rebuilt from an old tree came from
struct Origin {
    /// The old root or block node
    node: NodeId,
    /// The node holding its content children: the node itself or its
    /// `contentName` wrapper
    container: NodeId,
    /// Content children of `container` are `first..end`
    first: usize,
    end: usize,
    /// Index of the block the reparse descended into
    next: Option<usize>,
}

/// An open block, or the grammar's top level
struct Frame {
    grammar: Arc<Grammar>,
    rule: Option<PatternId>,
    end: Option<Arc<CompiledRegex>>,
    apply_end_last: bool,
    scopes: Arc<ScopePath>,
    candidates: Arc<[Candidate]>,
    cache: Vec<Option<Cached>>,
    block_start: usize,
    content_start: usize,
    begin_nodes: Vec<NodeId>,
    children: Vec<NodeId>,
    origin: Option<Origin>,
}

impl Frame {
    /// A block opened by an empty begin match
    fn opened_empty(&self) -> bool {
        self.rule.is_some() && self.block_start == self.content_start
    }

    /// A block opened at `pos` by an empty begin match, with nothing
    /// parsed inside it yet
    fn is_empty_at(&self, pos: usize) -> bool {
        self.opened_empty()
            && self.origin.is_none()
            && self.content_start == pos
            && self.children.is_empty()
    }

    /// Match of candidate `i` at or after `from`, reusing the last search
    /// while it is still ahead of `from`
    fn lookup(&mut self, i: usize, text: &str, from: usize) -> Option<Captures> {
        let candidate = &self.candidates[i];
        if candidate.anchored {
            return candidate.search(text, from);
        }
        match &self.cache[i] {
            Some(Cached::Miss) => return None,
            Some(Cached::Hit(caps)) if caps.start() >= from => return Some(caps.clone()),
            _ => {}
        }
        let found = candidate.search(text, from);
        self.cache[i] = Some(match &found {
            Some(caps) => Cached::Hit(caps.clone()),
            None => Cached::Miss,
        });
        found
    }

    /// Leftmost candidate match, ties going to the earlier candidate
    fn best_candidate(
        &mut self,
        text: &str,
        pos: usize,
        blocked: &Blocked,
    ) -> Option<(usize, Captures)> {
        let mut best: Option<(usize, Captures)> = None;
        for i in 0..self.candidates.len() {
            let mut found = self.lookup(i, text, pos);
            let reenters = found.as_ref().is_some_and(|caps| caps.start() < blocked.until)
                && blocked.rules.contains(&self.candidates[i].key());
            if reenters {
                trace!(pos, until = blocked.until, "not reopening a zero-width block");
                found = self.lookup(i, text, blocked.until);
            }
            let Some(caps) = found else { continue };
            if best.as_ref().is_none_or(|(_, b)| caps.start() < b.start()) {
                let at_pos = caps.start() == pos;
                best = Some((i, caps));
                if at_pos {
                    break;
                }
            }
        }
        best
    }
}

/// Blocks on top of the stack that were all opened by empty begin matches
/// at one offset. Inside them none of these rules may begin again before
/// the next line, or the same block would nest without consuming input.
struct Blocked {
    rules: Vec<(usize, PatternId)>,
    until: usize,
}

impl Blocked {
    fn new(stack: &[Frame], text: &str) -> Self {
        let Some(at) = stack.last().filter(|f| f.opened_empty()).map(|f| f.content_start) else {
            return Self {
                rules: Vec::new(),
                until: 0,
            };
        };
        let rules = stack
            .iter()
            .rev()
            .take_while(|f| f.opened_empty() && f.content_start == at)
            .filter_map(|f| Some((Arc::as_ptr(&f.grammar) as usize, f.rule?)))
            .collect();
        Self {
            rules,
            until: next_line_start(text, at).unwrap_or(usize::MAX),
        }
    }
}

enum Step {
    End(Captures),
    Token(usize, Captures),
}

/// Candidates depend on the scope path only through the injections that
/// match it
#[derive(Hash, PartialEq, Eq)]
struct CandidateKey {
    grammar: usize,
    rule: Option<PatternId>,
    injections: Vec<(usize, PatternId)>,
}

/// Patterns injected into a scope path
struct InjectionSource {
    grammar: Arc<Grammar>,
    pattern: PatternId,
    priority: i32,
    left: bool,
}

/// The pieces a block node is assembled from
struct BlockParts {
    grammar: Arc<Grammar>,
    rule: PatternId,
    scope: Option<String>,
    end_regex: Option<Arc<CompiledRegex>>,
    content_scope: Option<String>,
    begin: Vec<NodeId>,
    content_children: Vec<NodeId>,
    end_nodes: Vec<NodeId>,
    region: Region,
    content: Region,
}

pub struct Parser {
    registry: Arc<GrammarRegistry>,
    grammar: Arc<Grammar>,
    candidates: HashMap<CandidateKey, Arc<[Candidate]>>,
    /// False when no loaded grammar injects anything, so scope paths never
    /// need to be matched
    injecting: bool,
    warned: HashSet<String>,
}

impl Parser {
    pub fn new(registry: Arc<GrammarRegistry>, grammar: Arc<Grammar>) -> Self {
        let injecting = may_inject(&registry, &grammar);
        Self {
            registry,
            grammar,
            candidates: HashMap::new(),
            injecting,
            warned: HashSet::new(),
        }
    }

    /// Parser for the grammar with `scope`, or plain text if none is loaded
    pub fn for_scope(registry: Arc<GrammarRegistry>, scope: &str) -> Self {
        let grammar = registry.language_for_scope(scope).unwrap_or_else(|| {
            debug!(scope, "no grammar for scope, using plain text");
            registry.plain_text()
        });
        Self::new(registry, grammar)
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn registry(&self) -> &Arc<GrammarRegistry> {
        &self.registry
    }

    /// Parse `text` from scratch
    pub fn parse(&mut self, text: &str) -> TokenTree {
        // Grammars may have been loaded since the last parse
        self.candidates.clear();
        self.injecting = may_inject(&self.registry, &self.grammar);
        self.warned.clear();

        let mut tree = TokenTree::new(Arc::clone(&self.grammar));
        let mut stack = vec![self.root_frame()];
        self.run(text, &mut tree, &mut stack, 0, None);
        let root = close_all(&mut tree, stack, text.len());
        tree.set_root(root, text.len());
        tree
    }

    /// Update `tree` for an edit that turned its text into `text`
    pub fn reparse(&mut self, tree: &mut TokenTree, text: &str, edit: TextEdit) -> Reparse {
        let delta = edit.delta();
        let consistent = tree.len().checked_add_signed(delta) == Some(text.len())
            && edit.start <= edit.old_end.min(edit.new_end)
            && edit.new_end <= text.len()
            && Arc::ptr_eq(tree.grammar(), &self.grammar);
        if !consistent {
            debug!(?edit, "edit doesn't line up with the tree, parsing from scratch");
            *tree = self.parse(text);
            return Reparse {
                region: Region::new(0, text.len()),
                first_new_node: 0,
                resynced: false,
            };
        }

        self.warned.clear();
        self.injecting = may_inject(&self.registry, &self.grammar);
        if tree.needs_compaction() {
            tree.compact();
        }
        let first_new_node = tree.arena_len();

        let bytes = text.as_bytes();
        let line_start = bytes[..edit.start]
            .iter()
            .rposition(|&b| b == b'\n')
            .map_or(0, |i| i + 1);
        let line_end = bytes[edit.new_end..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(text.len(), |i| edit.new_end + i + 1);

        let (mut stack, start) = self.reconstruct(tree, line_start);
        let resync = Resync {
            delta,
            min_pos: line_end,
        };

        let (root, end, resynced) = match self.run(text, tree, &mut stack, start, Some(&resync)) {
            Some((index, pos)) => (splice(tree, stack, index, delta, text.len()), pos, true),
            None => (Some(close_all(tree, stack, text.len())), text.len(), false),
        };
        let Some(root) = root else {
            warn!("reparse lost the root node, parsing from scratch");
            *tree = self.parse(text);
            return Reparse {
                region: Region::new(0, text.len()),
                first_new_node: 0,
                resynced: false,
            };
        };
        tree.set_root(root, text.len());

        debug!(start, end, resynced, nodes = tree.arena_len() - first_new_node, "reparsed");
        Reparse {
            region: Region::new(start, end),
            first_new_node,
            resynced,
        }
    }

    fn root_frame(&mut self) -> Frame {
        let grammar = Arc::clone(&self.grammar);
        let scopes = ScopePath::root(grammar.scope_name());
        let candidates = self.candidates_for(&grammar, None, &scopes);
        Frame {
            cache: vec![None; candidates.len()],
            grammar,
            rule: None,
            end: None,
            apply_end_last: false,
            scopes,
            candidates,
            block_start: 0,
            content_start: 0,
            begin_nodes: Vec::new(),
            children: Vec::new(),
            origin: None,
        }
    }

    fn open_frame(
        &mut self,
        text: &str,
        tree: &mut TokenTree,
        candidate: &Candidate,
        rule: &BlockRule,
        caps: &Captures,
        scopes: &Arc<ScopePath>,
    ) -> Frame {
        let scopes = scopes
            .push(rule.name.as_deref())
            .push(rule.content_name.as_deref());
        let candidates = self.candidates_for(&candidate.grammar, Some(candidate.id), &scopes);
        Frame {
            cache: vec![None; candidates.len()],
            grammar: Arc::clone(&candidate.grammar),
            rule: Some(candidate.id),
            end: rule.end.resolve(text, caps),
            apply_end_last: rule.apply_end_pattern_last,
            scopes,
            candidates,
            block_start: caps.start(),
            content_start: caps.end(),
            begin_nodes: capture_nodes(tree, &rule.begin_captures, caps),
            children: Vec::new(),
            origin: None,
        }
    }

    /// Frame for an old block node, without its content children
    fn block_frame(&mut self, tree: &TokenTree, id: NodeId, scopes: &Arc<ScopePath>) -> Option<Frame> {
        let node = tree.node(id);
        let state = node.block()?;
        let Pattern::Block(rule) = state.grammar.pattern(state.rule) else {
            return None;
        };
        let scopes = scopes
            .push(node.scope.as_deref())
            .push(state.content_scope.as_deref());
        let begin_nodes = node
            .children
            .iter()
            .copied()
            .take_while(|&c| tree.node(c).region.start < state.content.start)
            .collect();
        let grammar = Arc::clone(&state.grammar);
        let candidates = self.candidates_for(&grammar, Some(state.rule), &scopes);
        Some(Frame {
            cache: vec![None; candidates.len()],
            grammar,
            rule: Some(state.rule),
            end: state.end.clone(),
            apply_end_last: rule.apply_end_pattern_last,
            scopes,
            candidates,
            block_start: node.region.start,
            content_start: state.content.start,
            begin_nodes,
            children: Vec::new(),
            origin: None,
        })
    }

    /// Rebuild the frames open at `at` in the old tree. Returns them with
    /// the position parsing restarts from: the last token boundary at or
    /// before `at` in the innermost block.
    fn reconstruct(&mut self, tree: &TokenTree, at: usize) -> (Vec<Frame>, usize) {
        let mut stack = Vec::new();
        let mut frame = self.root_frame();
        let mut id = tree.root();
        loop {
            let (container, first, end) = content_bounds(tree, id);
            let children = &tree.node(container).children;
            let i = first
                + children[first..end].partition_point(|&c| tree.node(c).region.end < at);
            let descend = children[..end].get(i).copied().filter(|&c| {
                let child = tree.node(c);
                child.block().is_some_and(|state| {
                    child.region.start < at && state.content.start <= at && at <= state.content.end
                })
            });

            if let Some(child) = descend {
                let scopes = Arc::clone(&frame.scopes);
                if let Some(inner) = self.block_frame(tree, child, &scopes) {
                    frame.children = children[first..i].to_vec();
                    frame.origin = Some(Origin {
                        node: id,
                        container,
                        first,
                        end,
                        next: Some(i),
                    });
                    stack.push(frame);
                    frame = inner;
                    id = child;
                    continue;
                }
            }

            let upto = first
                + children[first..end].partition_point(|&c| tree.node(c).region.end <= at);
            let keep = (first..upto)
                .rev()
                .find(|&j| !tree.node(children[j]).is_text())
                .map_or(first, |j| j + 1);
            let restart = if keep > first {
                tree.node(children[keep - 1]).region.end
            } else {
                frame.content_start
            };
            frame.children = children[first..keep].to_vec();
            frame.origin = Some(Origin {
                node: id,
                container,
                first,
                end,
                next: None,
            });
            stack.push(frame);
            trace!(at, restart, depth = stack.len(), "rebuilt parser state");
            return (stack, restart);
        }
    }

    /// Parse from `pos` until the end of the text, or until a resync point
    /// is reached. Returns the old child index and position of the resync.
    fn run(
        &mut self,
        text: &str,
        tree: &mut TokenTree,
        stack: &mut Vec<Frame>,
        mut pos: usize,
        resync: Option<&Resync>,
    ) -> Option<(usize, usize)> {
        let mut last = pos;
        let mut stalls = 0;
        loop {
            if pos == last {
                stalls += 1;
                if stalls > MAX_STALLS {
                    // Blocks opened here hold nothing yet and would only
                    // stall again
                    while stack.len() > 1 && stack.last().is_some_and(|f| f.is_empty_at(pos)) {
                        stack.pop();
                    }
                    pos = next_char_boundary(text, pos)?;
                    trace!(pos, depth = stack.len(), "parser stalled, skipping a character");
                    stalls = 0;
                }
            } else {
                stalls = 0;
            }
            last = pos;

            let blocked = Blocked::new(stack, text);
            let top = stack.last_mut()?;
            let end_match = top
                .end
                .as_ref()
                .and_then(|re| re.find_first_submatch_from(text, pos));
            let found = top.best_candidate(text, pos, &blocked);
            let step = match (end_match, found) {
                (Some(end), Some((i, caps))) => {
                    let end_first = if top.apply_end_last {
                        end.start() < caps.start()
                    } else {
                        end.start() <= caps.start()
                    };
                    if end_first {
                        Step::End(end)
                    } else {
                        Step::Token(i, caps)
                    }
                }
                (Some(end), None) => Step::End(end),
                (None, Some((i, caps))) => Step::Token(i, caps),
                (None, None) => return None,
            };

            match step {
                Step::End(end) => {
                    let frame = stack.pop()?;
                    pos = end.end();
                    let node = close_frame(tree, frame, Some(&end), text.len());
                    if let (Some(node), Some(parent)) = (node, stack.last_mut()) {
                        parent.children.push(node);
                    }
                }
                Step::Token(i, caps) => {
                    let candidate = top.candidates[i].clone();
                    pos = caps.end();
                    match candidate.grammar.pattern(candidate.id) {
                        Pattern::Match(rule) => {
                            let node = match_node(tree, rule, &caps);
                            top.children.push(node);
                        }
                        Pattern::Block(rule) => {
                            let scopes = Arc::clone(&top.scopes);
                            let frame = self.open_frame(text, tree, &candidate, rule, &caps, &scopes);
                            stack.push(frame);
                            continue;
                        }
                        _ => {}
                    }
                }
            }

            if let Some(resync) = resync.filter(|r| pos >= r.min_pos) {
                let index = stack
                    .last()
                    .and_then(|frame| frame.origin.as_ref())
                    .and_then(|origin| resync_index(tree, origin, pos, resync.delta));
                if let Some(index) = index {
                    trace!(pos, index, "resynced with the old tree");
                    return Some((index, pos));
                }
            }
        }
    }

    fn candidates_for(
        &mut self,
        grammar: &Arc<Grammar>,
        rule: Option<PatternId>,
        scopes: &ScopePath,
    ) -> Arc<[Candidate]> {
        let injections = if self.injecting {
            self.matching_injections(&scopes.to_vec())
        } else {
            Vec::new()
        };
        let key = CandidateKey {
            grammar: Arc::as_ptr(grammar) as usize,
            rule,
            injections: injections
                .iter()
                .map(|source| (Arc::as_ptr(&source.grammar) as usize, source.pattern))
                .collect(),
        };
        if let Some(found) = self.candidates.get(&key) {
            return Arc::clone(found);
        }

        let mut local = Vec::new();
        let mut visited = HashSet::new();
        match rule {
            None => self.expand(grammar, grammar.root(), &mut local, &mut visited),
            Some(id) => {
                if let Pattern::Block(block) = grammar.pattern(id) {
                    for &child in &block.patterns {
                        self.expand(grammar, child, &mut local, &mut visited);
                    }
                }
            }
        }

        // Left injections are tried before the local patterns, the rest after
        let mut left = Vec::new();
        let mut right = Vec::new();
        for source in &injections {
            let out = if source.left { &mut left } else { &mut right };
            self.expand(&source.grammar, source.pattern, out, &mut HashSet::new());
        }
        let found: Arc<[Candidate]> = left.into_iter().chain(local).chain(right).collect();
        self.candidates.insert(key, Arc::clone(&found));
        found
    }

    /// Injections whose selector matches `path`, highest priority first.
    /// The base grammar's own injections come before injection grammars of
    /// the same priority.
    fn matching_injections(&self, path: &[&str]) -> Vec<InjectionSource> {
        let mut sources: Vec<InjectionSource> = self
            .grammar
            .injections()
            .iter()
            .filter(|injection| injection.selector.matches(path))
            .map(|injection| InjectionSource {
                grammar: Arc::clone(&self.grammar),
                pattern: injection.pattern,
                priority: 0,
                left: injection.selector.is_left(),
            })
            .collect();
        sources.extend(
            self.registry
                .injections_for(path)
                .into_iter()
                .map(|injection| InjectionSource {
                    pattern: injection.grammar.root(),
                    grammar: injection.grammar,
                    priority: injection.priority,
                    left: injection.left,
                }),
        );
        sources.sort_by(|a, b| b.priority.cmp(&a.priority));
        sources
    }

    /// Flatten a pattern into the candidates it contributes, following
    /// includes. Each group and include is entered at most once, which
    /// also breaks include cycles.
    fn expand(
        &mut self,
        grammar: &Arc<Grammar>,
        id: PatternId,
        out: &mut Vec<Candidate>,
        visited: &mut HashSet<(usize, PatternId)>,
    ) {
        let key = (Arc::as_ptr(grammar) as usize, id);
        match grammar.pattern(id) {
            Pattern::Match(rule) => {
                if rule.regex.is_some() {
                    out.push(Candidate::new(grammar, id));
                }
            }
            Pattern::Block(rule) => {
                if rule.begin.is_some() && !rule.end.is_invalid() {
                    out.push(Candidate::new(grammar, id));
                }
            }
            Pattern::Group(children) => {
                if visited.insert(key) {
                    for &child in children {
                        self.expand(grammar, child, out, visited);
                    }
                }
            }
            Pattern::Include(target) => {
                if !visited.insert(key) {
                    return;
                }
                if let Some((owner, target)) = self.resolve_include(grammar, target) {
                    self.expand(&owner, target, out, visited);
                }
            }
        }
    }

    fn resolve_include(
        &mut self,
        from: &Arc<Grammar>,
        target: &IncludeTarget,
    ) -> Option<(Arc<Grammar>, PatternId)> {
        let resolved = match target {
            IncludeTarget::SelfRef => Some((Arc::clone(from), from.root())),
            IncludeTarget::Base => Some((Arc::clone(&self.grammar), self.grammar.root())),
            IncludeTarget::Repository(key) => {
                from.repository_entry(key).map(|id| (Arc::clone(from), id))
            }
            IncludeTarget::External { scope, key } => {
                let grammar = if scope == from.scope_name() {
                    Some(Arc::clone(from))
                } else {
                    self.registry.language_for_scope(scope)
                };
                grammar.and_then(|g| {
                    let id = match key {
                        Some(key) => g.repository_entry(key)?,
                        None => g.root(),
                    };
                    Some((g, id))
                })
            }
        };

        if resolved.is_none() {
            let label = match target {
                IncludeTarget::Repository(key) => format!("{}#{}", from.scope_name(), key),
                IncludeTarget::External { scope, key: Some(key) } => format!("{scope}#{key}"),
                IncludeTarget::External { scope, key: None } => scope.clone(),
                IncludeTarget::SelfRef | IncludeTarget::Base => String::new(),
            };
            if self.warned.insert(label.clone()) {
                warn!(include = %label, grammar = from.scope_name(), "unresolved include");
            }
        }
        resolved
    }
}

fn may_inject(registry: &GrammarRegistry, grammar: &Grammar) -> bool {
    !grammar.injections().is_empty() || registry.has_injections()
}

/// Offset just past the next newline at or after `pos`
fn next_line_start(text: &str, pos: usize) -> Option<usize> {
    text.get(pos..)?.find('\n').map(|i| pos + i + 1)
}

struct Resync {
    delta: isize,
    /// Resyncing is only tried once parsing passed the edited lines
    min_pos: usize,
}

/// The node holding the content children of `id`, and their index range
fn content_bounds(tree: &TokenTree, id: NodeId) -> (NodeId, usize, usize) {
    let node = tree.node(id);
    let Some(state) = node.block() else {
        return (id, 0, node.children.len());
    };
    let wrapper = node
        .children
        .iter()
        .copied()
        .find(|&c| matches!(tree.node(c).kind, NodeKind::Content));
    if let Some(wrapper) = wrapper {
        return (wrapper, 0, tree.node(wrapper).children.len());
    }
    let first = node
        .children
        .partition_point(|&c| tree.node(c).region.start < state.content.start);
    let end = node
        .children
        .partition_point(|&c| tree.node(c).region.start < state.content.end);
    (id, first, end)
}

/// Index of the old content child ending where the new parse is, if the
/// old parse was in the same state there
fn resync_index(tree: &TokenTree, origin: &Origin, pos: usize, delta: isize) -> Option<usize> {
    let old = pos.checked_add_signed(-delta)?;
    let children = &tree.node(origin.container).children;
    let content = &children[origin.first..origin.end];
    let index = origin.first + content.partition_point(|&c| tree.node(c).region.end < old);
    let &child = children[..origin.end].get(index)?;
    let node = tree.node(child);
    let after_next = origin.next.is_none_or(|next| index >= next);
    (node.region.end == old && !node.is_text() && after_next).then_some(index)
}

/// Close every frame at the end of the text and return the root node
fn close_all(tree: &mut TokenTree, mut stack: Vec<Frame>, len: usize) -> NodeId {
    while stack.len() > 1 {
        let Some(frame) = stack.pop() else { break };
        let node = close_frame(tree, frame, None, len);
        if let (Some(node), Some(parent)) = (node, stack.last_mut()) {
            parent.children.push(node);
        }
    }
    let region = Region::new(0, len);
    let (scope, children) = match stack.pop() {
        Some(root) => (root.grammar.scope_name().to_string(), root.children),
        None => (tree.grammar().scope_name().to_string(), Vec::new()),
    };
    let children = tree.seal(children, region);
    tree.push(Node {
        scope: Some(scope),
        region,
        children,
        kind: NodeKind::Root,
    })
}

/// Turn a finished frame into a block node. Without an end match the block
/// runs to the end of the text.
fn close_frame(tree: &mut TokenTree, frame: Frame, end: Option<&Captures>, len: usize) -> Option<NodeId> {
    let rule_id = frame.rule?;
    let Pattern::Block(rule) = frame.grammar.pattern(rule_id) else {
        return None;
    };
    let (content_end, block_end, end_nodes) = match end {
        Some(caps) => (caps.start(), caps.end(), capture_nodes(tree, &rule.end_captures, caps)),
        None => (len, len, Vec::new()),
    };
    let parts = BlockParts {
        grammar: Arc::clone(&frame.grammar),
        rule: rule_id,
        scope: rule.name.clone(),
        end_regex: frame.end,
        content_scope: rule.content_name.clone(),
        begin: frame.begin_nodes,
        content_children: frame.children,
        end_nodes,
        region: Region::new(frame.block_start, block_end),
        content: Region::new(frame.content_start, content_end.max(frame.content_start)),
    };
    build_block(tree, parts)
}

fn build_block(tree: &mut TokenTree, parts: BlockParts) -> Option<NodeId> {
    if parts.region.is_empty() {
        return None;
    }
    let content = parts.content;
    let mut children = tree.seal(parts.begin, Region::new(parts.region.start, content.start));
    match &parts.content_scope {
        Some(scope) if !content.is_empty() => {
            let inner = tree.seal(parts.content_children, content);
            children.push(tree.push(Node {
                scope: Some(scope.clone()),
                region: content,
                children: inner,
                kind: NodeKind::Content,
            }));
        }
        _ => children.extend(tree.seal(parts.content_children, content)),
    }
    children.extend(tree.seal(parts.end_nodes, Region::new(content.end, parts.region.end)));

    Some(tree.push(Node {
        scope: parts.scope,
        region: parts.region,
        children,
        kind: NodeKind::Block(Box::new(BlockState {
            grammar: parts.grammar,
            rule: parts.rule,
            end: parts.end_regex,
            content,
            content_scope: parts.content_scope,
        })),
    }))
}

/// Put the old tree back together around the freshly parsed nodes. The
/// old children after the resync point are shifted by `delta` and
/// reattached, innermost block first.
fn splice(
    tree: &mut TokenTree,
    mut stack: Vec<Frame>,
    index: usize,
    delta: isize,
    len: usize,
) -> Option<NodeId> {
    let mut carry: Option<NodeId> = None;
    let mut tail_from = index + 1;
    while let Some(mut frame) = stack.pop() {
        let origin = frame.origin.take()?;
        let container = tree.node(origin.container).children.clone();
        let tail = &container[tail_from.min(origin.end)..origin.end];
        for &id in tail {
            tree.shift_subtree(id, delta);
        }

        let mut children = std::mem::take(&mut frame.children);
        children.extend(carry.take());
        children.extend_from_slice(tail);
        carry = rebuild(tree, frame, &origin, children, delta, len);

        tail_from = stack
            .last()
            .and_then(|f| f.origin.as_ref())
            .and_then(|o| o.next)
            .map_or(usize::MAX, |next| next + 1);
    }
    carry
}

/// A new version of an old root or block node with new content children
fn rebuild(
    tree: &mut TokenTree,
    frame: Frame,
    origin: &Origin,
    children: Vec<NodeId>,
    delta: isize,
    len: usize,
) -> Option<NodeId> {
    let old = tree.node(origin.node).clone();
    let Some(state) = old.block() else {
        let region = Region::new(0, len);
        let children = tree.seal(children, region);
        return Some(tree.push(Node {
            scope: old.scope.clone(),
            region,
            children,
            kind: NodeKind::Root,
        }));
    };

    let end_nodes: Vec<NodeId> = if origin.container == origin.node {
        old.children[origin.end..].to_vec()
    } else {
        old.children
            .iter()
            .position(|&c| c == origin.container)
            .map(|i| old.children[i + 1..].to_vec())
            .unwrap_or_default()
    };
    for &id in &end_nodes {
        tree.shift_subtree(id, delta);
    }

    build_block(
        tree,
        BlockParts {
            grammar: Arc::clone(&state.grammar),
            rule: state.rule,
            scope: old.scope.clone(),
            end_regex: state.end.clone(),
            content_scope: state.content_scope.clone(),
            begin: frame.begin_nodes,
            content_children: children,
            end_nodes,
            region: Region::new(old.region.start, shift(old.region.end, delta)),
            content: Region::new(state.content.start, shift(state.content.end, delta)),
        },
    )
}

fn match_node(tree: &mut TokenTree, rule: &MatchRule, caps: &Captures) -> NodeId {
    let region = caps.whole();
    let captures = capture_nodes(tree, &rule.captures, caps);
    let children = if captures.is_empty() {
        captures
    } else {
        tree.seal(captures, region)
    };
    tree.push(Node {
        scope: rule.name.clone(),
        region,
        children,
        kind: NodeKind::Match,
    })
}

/// Nodes for the scoped capture groups of a match, nested by containment.
/// Groups that are empty, fall outside the match or partially overlap an
/// earlier group are dropped.
fn capture_nodes(tree: &mut TokenTree, scopes: &CaptureScopes, caps: &Captures) -> Vec<NodeId> {
    struct Open {
        region: Region,
        scope: String,
        children: Vec<NodeId>,
    }

    let bounds = caps.whole();
    let mut groups: Vec<(Region, usize, &str)> = scopes
        .iter()
        .filter_map(|(index, scope)| {
            let region = caps.get(*index)?;
            (!region.is_empty() && bounds.covers(region)).then_some((region, *index, scope.as_str()))
        })
        .collect();
    if groups.is_empty() {
        return Vec::new();
    }
    groups.sort_by(|a, b| {
        a.0.start
            .cmp(&b.0.start)
            .then(b.0.end.cmp(&a.0.end))
            .then(a.1.cmp(&b.1))
    });

    fn finish(tree: &mut TokenTree, open: Open) -> NodeId {
        let children = if open.children.is_empty() {
            open.children
        } else {
            tree.seal(open.children, open.region)
        };
        tree.push(Node {
            scope: Some(open.scope),
            region: open.region,
            children,
            kind: NodeKind::Capture,
        })
    }

    let mut stack: Vec<Open> = Vec::new();
    let mut top: Vec<NodeId> = Vec::new();
    for (region, _, scope) in groups {
        while stack.last().is_some_and(|open| !open.region.covers(region)) {
            let Some(open) = stack.pop() else { break };
            let id = finish(tree, open);
            match stack.last_mut() {
                Some(parent) => parent.children.push(id),
                None => top.push(id),
            }
        }
        let siblings_end = match stack.last() {
            Some(open) => open
                .children
                .last()
                .map_or(open.region.start, |&c| tree.node(c).region.end),
            None => top.last().map_or(bounds.start, |&c| tree.node(c).region.end),
        };
        if region.start < siblings_end {
            continue;
        }
        stack.push(Open {
            region,
            scope: scope.to_string(),
            children: Vec::new(),
        });
    }
    while let Some(open) = stack.pop() {
        let id = finish(tree, open);
        match stack.last_mut() {
            Some(parent) => parent.children.push(id),
            None => top.push(id),
        }
    }
    top
}

/// Parse `text` with `grammar` in one go
pub fn parse(registry: &Arc<GrammarRegistry>, grammar: &Arc<Grammar>, text: &str) -> TokenTree {
    Parser::new(Arc::clone(registry), Arc::clone(grammar)).parse(text)
}
