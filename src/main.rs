use std::env;
use std::io::{self, Write, stdout};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use crossterm::{
    queue,
    style::{Attribute, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use tmsyntax::config::ConfigEngine;
use tmsyntax::grammar::PLAIN_TEXT_SCOPE;
use tmsyntax::highlight::{Document, ParseScheduler, SyntaxHighlighter};
use tmsyntax::parser::Parser;
use tmsyntax::theme::Color;
use tmsyntax::{GrammarRegistry, ThemeRegistry};

const USAGE: &str = "usage: tmsyntax <file> [--theme NAME] [--scope SCOPE] [--grammars DIR] \
                     [--themes DIR] [--tree | --scopes | --html]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Ansi,
    Tree,
    Scopes,
    Html,
}

struct Args {
    file: PathBuf,
    theme: Option<String>,
    scope: Option<String>,
    grammar_dirs: Vec<PathBuf>,
    theme_dirs: Vec<PathBuf>,
    output: Output,
}

fn parse_args() -> Result<Args, String> {
    let mut args = env::args().skip(1);
    let mut file = None;
    let mut parsed = Args {
        file: PathBuf::new(),
        theme: None,
        scope: None,
        grammar_dirs: Vec::new(),
        theme_dirs: Vec::new(),
        output: Output::Ansi,
    };

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| args.next().ok_or_else(|| format!("{flag} needs a value"));
        match arg.as_str() {
            "--theme" => parsed.theme = Some(value("--theme")?),
            "--scope" => parsed.scope = Some(value("--scope")?),
            "--grammars" => parsed.grammar_dirs.push(value("--grammars")?.into()),
            "--themes" => parsed.theme_dirs.push(value("--themes")?.into()),
            "--tree" => parsed.output = Output::Tree,
            "--scopes" => parsed.output = Output::Scopes,
            "--html" => parsed.output = Output::Html,
            "-h" | "--help" => return Err(USAGE.to_string()),
            _ if arg.starts_with('-') => return Err(format!("unknown option {arg}\n{USAGE}")),
            _ => file = Some(PathBuf::from(arg)),
        }
    }

    parsed.file = file.ok_or_else(|| USAGE.to_string())?;
    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_env("TMSYNTAX_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tmsyntax: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), String> {
    let args = parse_args()?;

    let mut config = ConfigEngine::new();
    if let Err(e) = config.load_default() {
        warn!("{}", e);
    }
    let mut settings = config.settings();
    if let Some(dir) = ConfigEngine::config_dir() {
        settings.grammar_dirs.insert(0, dir.join("grammars"));
        settings.theme_dirs.insert(0, dir.join("themes"));
    }
    settings.grammar_dirs.extend(args.grammar_dirs);
    settings.theme_dirs.extend(args.theme_dirs);

    let grammars = GrammarRegistry::global();
    let themes = ThemeRegistry::global();
    settings.apply(&grammars, &themes);

    let theme = themes.theme_or_default(args.theme.as_deref().unwrap_or(&settings.theme));
    let mut document = Document::load(&args.file)
        .map_err(|e| format!("{}: {}", args.file.display(), e))?;

    let grammar = match &args.scope {
        Some(scope) => grammars
            .language_for_scope(scope)
            .ok_or_else(|| format!("no grammar loaded for scope {scope}"))?,
        None => {
            let grammar = grammars.language_for_hint(document.file_name(), &document.first_line());
            if grammar.scope_name() == PLAIN_TEXT_SCOPE {
                grammars.language_for_scope(&settings.default_scope).unwrap_or(grammar)
            } else {
                grammar
            }
        }
    };
    debug!(scope = grammar.scope_name(), theme = %theme.name, "highlighting {}", args.file.display());

    let mut scheduler = ParseScheduler::new(Arc::clone(&grammars));
    scheduler.schedule_document(&document, Arc::clone(&grammar));
    let parsed = scheduler
        .finish_latest()
        .await
        .ok_or_else(|| "parse did not complete".to_string())?;
    debug!(elapsed = ?parsed.elapsed, nodes = parsed.tree.live_count(), "parsed");

    let parser = Parser::new(Arc::clone(&grammars), grammar);
    let highlighter = SyntaxHighlighter::with_tree(
        &mut document,
        parser,
        parsed.tree,
        Arc::clone(&theme),
        settings.font(),
    );

    let result = match args.output {
        Output::Ansi => print_ansi(&document, theme.background()),
        Output::Tree => print_text(&highlighter.scope_tree()),
        Output::Scopes => print_scopes(&document, &highlighter),
        Output::Html => print_text(&highlighter.as_html(&document)),
    };
    result.map_err(|e| e.to_string())
}

fn print_text(text: &str) -> io::Result<()> {
    let mut out = stdout().lock();
    out.write_all(text.as_bytes())?;
    if !text.ends_with('\n') {
        out.write_all(b"\n")?;
    }
    out.flush()
}

/// One line per leaf: char range, text and scope path
fn print_scopes(document: &Document, highlighter: &SyntaxHighlighter) -> io::Result<()> {
    let mut out = stdout().lock();
    for leaf in highlighter.tree().leaf_list() {
        let start = document.byte_to_char(leaf.region.start);
        let end = document.byte_to_char(leaf.region.end);
        writeln!(
            out,
            "{:>6} {:>6}  {:<24?} {}",
            start,
            end,
            document.slice(start, end),
            leaf.scope_path()
        )?;
    }
    out.flush()
}

fn print_ansi(document: &Document, background: Option<Color>) -> io::Result<()> {
    let mut out = stdout().lock();
    let mut pos = 0;
    for span in document.format_spans() {
        if span.start > pos {
            queue!(out, Print(document.slice(pos, span.start)))?;
        }
        let style = span.format.style;
        if let Some(fg) = style.foreground {
            queue!(out, SetForegroundColor(fg.to_crossterm()))?;
        }
        // The terminal's own background stands in for the theme's
        if let Some(bg) = style.background.filter(|bg| Some(*bg) != background) {
            queue!(out, SetBackgroundColor(bg.to_crossterm()))?;
        }
        if style.is_bold() {
            queue!(out, SetAttribute(Attribute::Bold))?;
        }
        if style.is_italic() {
            queue!(out, SetAttribute(Attribute::Italic))?;
        }
        if style.is_underline() {
            queue!(out, SetAttribute(Attribute::Underlined))?;
        }
        queue!(
            out,
            Print(document.slice(span.start, span.end)),
            SetAttribute(Attribute::Reset),
            ResetColor
        )?;
        pos = span.end;
    }
    queue!(out, Print(document.slice(pos, document.len_chars())))?;
    out.flush()
}
