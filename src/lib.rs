#![forbid(unsafe_code)]
//! Mdocify rewrites legacy man(5) macro manual pages into the mdoc(5) dialect.
//!
//! # Example
//!
//! ```
//! let man = ".TH FOO 3C \"Aug 2011\"\n.SH NAME\nfoo \\- does a thing\n";
//! let rules = mdocify::Rules::new();
//! let mdoc = mdocify::convert(man, &rules)?;
//! assert!(mdoc.contains(".Dt FOO 3C\n"));
//! assert!(mdoc.contains(".Nm foo\n"));
//! # Ok::<(), mdocify::ConvertError>(())
//! ```

use chrono::Local;
use regex::Regex;
use std::error::Error;
use std::fmt;
use tracing::debug;

/// The troff rendering of a manual-page cross-reference: a bold name
/// followed by a section designator in parentheses.
const XREF_PATTERN: &str = r"\\fB([.A-Za-z0-9_-]+)\\fR\(([1-9][A-Z]*)\)";

/// An ordered, index-addressable, mutable sequence of document lines.
///
/// Every line keeps its trailing newline, except possibly the final line,
/// which is terminated when the document is written out. Indices are
/// zero-based and are invalidated by any insert or delete at or before
/// them; scan loops that mutate must re-evaluate their cursor rather than
/// auto-advancing.
#[derive(Debug, Clone)]
pub struct Document {
    lines: Vec<String>,
}

impl Document {
    /// Builds a document from raw input text, one element per physical line.
    pub fn parse(input: &str) -> Self {
        let lines = input.split_inclusive('\n').map(str::to_string).collect();
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn line(&self, at: usize) -> &str {
        &self.lines[at]
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Inserts `line` immediately before position `at`; everything at or
    /// after `at` shifts one position later.
    ///
    /// # Panics
    ///
    /// Panics if `at` exceeds the current length.
    pub fn insert(&mut self, at: usize, line: impl Into<String>) {
        assert!(at <= self.lines.len(), "insert position {at} out of range");
        self.lines.insert(at, line.into());
    }

    /// Removes the line at `at`; later lines shift one position earlier.
    ///
    /// # Panics
    ///
    /// Panics if `at` is out of range.
    pub fn delete(&mut self, at: usize) {
        assert!(at < self.lines.len(), "delete position {at} out of range");
        self.lines.remove(at);
    }

    /// Replaces the line at `at` wholesale.
    ///
    /// # Panics
    ///
    /// Panics if `at` is out of range.
    pub fn replace(&mut self, at: usize, line: impl Into<String>) {
        assert!(at < self.lines.len(), "replace position {at} out of range");
        self.lines[at] = line.into();
    }

    /// Splits the line at `at` in two. The first piece keeps everything
    /// before byte `column` plus a newline terminator; the remainder,
    /// starting with the character at `column`, becomes a new line at
    /// `at + 1`.
    ///
    /// # Panics
    ///
    /// Panics if `at` is out of range, `column` is zero, or `column` is
    /// not strictly inside the line.
    pub fn split(&mut self, at: usize, column: usize) {
        assert!(at < self.lines.len(), "split position {at} out of range");
        assert!(column > 0, "split column must be nonzero");
        let line = &self.lines[at];
        assert!(column < line.len(), "split column {column} past end of line");
        let remainder = line[column..].to_string();
        let mut head = line[..column].to_string();
        head.push('\n');
        self.lines[at] = head;
        self.lines.insert(at + 1, remainder);
    }

    /// Consumes the document, producing the verbatim line sequence
    /// followed by one trailing newline.
    pub fn into_output(self) -> String {
        let mut out = self.lines.concat();
        out.push('\n');
        out
    }
}

/// The mdoc macro a substitution rule expands to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Symbol,
    Variable,
    Define,
    Type,
}

impl RuleKind {
    fn macro_name(self) -> &'static str {
        match self {
            RuleKind::Symbol => ".Sy",
            RuleKind::Variable => ".Va",
            RuleKind::Define => ".Dv",
            RuleKind::Type => ".Vt",
        }
    }

    /// Font-escape template the legacy dialect renders this category with.
    /// Symbols and defines appear in bold, variables and types in italic.
    fn template(self, name: &str) -> String {
        match self {
            RuleKind::Symbol | RuleKind::Define => format!(r"\\fB({name})\\fR"),
            RuleKind::Variable | RuleKind::Type => format!(r"\\fI({name})\\fR"),
        }
    }
}

#[derive(Debug)]
struct SubstRule {
    kind: RuleKind,
    pattern: Regex,
}

/// Compiled patterns shared by every pass, built once before scanning.
#[derive(Debug)]
pub struct Rules {
    xref: Regex,
    subs: Vec<SubstRule>,
}

impl Rules {
    pub fn new() -> Self {
        let xref = Regex::new(XREF_PATTERN).expect("cross-reference pattern");
        Self {
            xref,
            subs: Vec::new(),
        }
    }

    /// Compiles and registers a user-supplied name for one substitution
    /// category. The name is interpolated into the category's font-escape
    /// template verbatim, so invalid pattern syntax in it is a user error.
    pub fn register(&mut self, kind: RuleKind, name: &str) -> Result<()> {
        let pattern =
            Regex::new(&kind.template(name)).map_err(|source| ConvertError::Pattern {
                name: name.to_string(),
                source,
            })?;
        debug!(?kind, name, "registered substitution");
        self.subs.push(SubstRule { kind, pattern });
        Ok(())
    }
}

impl Default for Rules {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub enum ConvertError {
    /// A user-supplied substitution name did not compile as a pattern.
    Pattern { name: String, source: regex::Error },
    /// A code block was opened with `.in +2`/`.nf` but never closed.
    UnbalancedCodeBlock,
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Pattern { name, source } => {
                write!(f, "bad substitution pattern '{name}': {source}")
            }
            ConvertError::UnbalancedCodeBlock => {
                write!(f, "code block still open at end of document")
            }
        }
    }
}

impl Error for ConvertError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConvertError::Pattern { source, .. } => Some(source),
            ConvertError::UnbalancedCodeBlock => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Tracks `.nf`/`.Bd` … `.fi`/`.Ed` preformatted spans while a pass scans.
/// Pass-local state; the document itself does not store it.
#[derive(Debug, Default)]
struct SkipRegions {
    inside: bool,
}

impl SkipRegions {
    /// Feeds one line; returns true when the line is a delimiter of, or
    /// inside, a preformatted span.
    fn observe(&mut self, line: &str) -> bool {
        if self.inside {
            if line.starts_with(".fi") || line.starts_with(".Ed") {
                self.inside = false;
            }
            true
        } else if line.starts_with(".nf") || line.starts_with(".Bd") {
            self.inside = true;
            true
        } else {
            false
        }
    }
}

/// Runs the full pass pipeline over `input` and returns the converted text.
pub fn convert(input: &str, rules: &Rules) -> Result<String> {
    let mut doc = Document::parse(input);
    cross_references(&mut doc, rules);
    substitutions(&mut doc, rules);
    name_section(&mut doc);
    code_blocks(&mut doc)?;
    split_paragraphs(&mut doc);
    rename_macros(&mut doc);
    collapse_spaces(&mut doc);
    strip_blank_lines(&mut doc);
    Ok(doc.into_output())
}

fn is_trailing_delim(byte: u8) -> bool {
    matches!(byte, b'.' | b',' | b':' | b';' | b'?' | b'!' | b')' | b']')
}

/// Replaces the span `start..end` of line `at` with a standalone macro
/// line. Trailing delimiter characters after the span are detached and
/// reattached after a space; any remaining text after them starts a new
/// line, as does any text preceding the span.
fn replace_with_macro(doc: &mut Document, at: usize, start: usize, end: usize, macro_text: String) {
    let content = doc.line(at).trim_end_matches('\n').to_string();
    let bytes = content.as_bytes();

    let mut cursor = end;
    let mut delims = String::new();
    while cursor < bytes.len() && is_trailing_delim(bytes[cursor]) {
        delims.push(bytes[cursor] as char);
        cursor += 1;
    }
    while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
        cursor += 1;
    }

    let mut macro_line = macro_text;
    if !delims.is_empty() {
        macro_line.push(' ');
        macro_line.push_str(&delims);
    }
    macro_line.push('\n');

    let mut at = at;
    if cursor < content.len() {
        doc.split(at, cursor);
    }
    if start > 0 && !content[..start].trim_end().is_empty() {
        doc.split(at, start);
        at += 1;
    }
    doc.replace(at, macro_line);
}

/// Converts inline `\fBname\fR(sec)` references into `.Xr` macro lines.
/// One match is processed per scanning step; lines shifted by the rewrite
/// are revisited as the scan advances.
fn cross_references(doc: &mut Document, rules: &Rules) {
    let mut skip = SkipRegions::default();
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        if skip.observe(line) || line.starts_with('.') {
            i += 1;
            continue;
        }
        let Some(caps) = rules.xref.captures(line) else {
            i += 1;
            continue;
        };
        let (Some(whole), Some(name), Some(section)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            i += 1;
            continue;
        };
        let (start, end) = (whole.start(), whole.end());
        let macro_text = format!(".Xr {} {}", name.as_str(), section.as_str());
        replace_with_macro(doc, i, start, end, macro_text);
        i += 1;
    }
}

/// Applies the configured Symbol/Variable/Define/Type substitutions, one
/// category at a time in registration order.
fn substitutions(doc: &mut Document, rules: &Rules) {
    for kind in [
        RuleKind::Symbol,
        RuleKind::Variable,
        RuleKind::Define,
        RuleKind::Type,
    ] {
        for rule in rules.subs.iter().filter(|rule| rule.kind == kind) {
            apply_rule(doc, rule);
        }
    }
}

fn apply_rule(doc: &mut Document, rule: &SubstRule) {
    let mut skip = SkipRegions::default();
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        if skip.observe(line) || line.starts_with('.') {
            i += 1;
            continue;
        }
        let Some(caps) = rule.pattern.captures(line) else {
            i += 1;
            continue;
        };
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            i += 1;
            continue;
        };
        let macro_text = format!("{} {}", rule.kind.macro_name(), name.as_str());
        let (start, end) = (whole.start(), whole.end());
        replace_with_macro(doc, i, start, end, macro_text);
        i += 1;
    }
}

/// Rewrites the NAME section's `a, b \- desc` line into one `.Nm` macro
/// per name followed by a `.Nd` description line. Lines without the
/// ` \- ` separator are left untouched.
fn name_section(doc: &mut Document) {
    let mut in_name = false;
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        if line.starts_with(".SH") || line.starts_with(".Sh") {
            let header = line.trim_end();
            in_name = header == ".SH NAME" || header == ".Sh NAME";
            i += 1;
            continue;
        }
        if !in_name {
            i += 1;
            continue;
        }
        let content = line.trim_end_matches('\n');
        let Some((name_part, desc_part)) = content.split_once(" \\- ") else {
            i += 1;
            continue;
        };
        let names: Vec<String> = name_part
            .split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();
        let description = desc_part.trim().to_string();

        doc.delete(i);
        for name in &names {
            doc.insert(i, format!(".Nm {name}\n"));
            i += 1;
        }
        doc.insert(i, format!(".Nd {description}\n"));
        i += 1;
    }
}

/// Rewrites `.in +2`/`.nf` opening brackets into `.Bd -literal -offset 2n`
/// and `.fi`/`.in -2` closing brackets into `.Ed`. A bracket left open at
/// end of document is a consistency fault.
fn code_blocks(doc: &mut Document) -> Result<()> {
    let mut in_code = false;
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i).trim_end();
        if !in_code && line == ".in +2" && i + 1 < doc.len() && doc.line(i + 1).trim_end() == ".nf"
        {
            doc.delete(i);
            doc.replace(i, ".Bd -literal -offset 2n\n");
            in_code = true;
            i += 1;
            continue;
        }
        if in_code && line == ".fi" && i + 1 < doc.len() && doc.line(i + 1).trim_end() == ".in -2"
        {
            doc.delete(i);
            doc.replace(i, ".Ed\n");
            in_code = false;
            i += 1;
            continue;
        }
        i += 1;
    }
    if in_code {
        return Err(ConvertError::UnbalancedCodeBlock);
    }
    Ok(())
}

/// Byte index of the first period that is not at the start of the line,
/// not preceded by an escape character, and not the last character.
fn find_sentence_break(bytes: &[u8]) -> Option<usize> {
    let mut j = 1;
    while j < bytes.len() {
        if bytes[j] == b'.' && bytes[j - 1] != b'\\' {
            if j + 1 >= bytes.len() {
                return None;
            }
            return Some(j);
        }
        j += 1;
    }
    None
}

/// New sentence, new line: splits prose lines after the first interior
/// period, trimming trailing whitespace from the shortened line. Macro
/// lines, `.\"` comments, and preformatted spans are exempt.
fn split_paragraphs(doc: &mut Document) {
    let mut skip = SkipRegions::default();
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        // the '.' check also covers .\" comment lines
        if skip.observe(line) || line.starts_with('.') {
            i += 1;
            continue;
        }
        let content = line.trim_end_matches('\n');
        let bytes = content.as_bytes();
        let Some(period) = find_sentence_break(bytes) else {
            i += 1;
            continue;
        };
        let mut cursor = period + 1;
        while cursor < bytes.len() && bytes[cursor].is_ascii_whitespace() {
            cursor += 1;
        }
        if cursor >= bytes.len() {
            // only whitespace follows the period
            i += 1;
            continue;
        }
        doc.split(i, cursor);
        let head = format!("{}\n", doc.line(i).trim_end());
        doc.replace(i, head);
        i += 1;
    }
}

/// Expands a `.TH name section …` header into `.Dd`/`.Dt`/`.Os` lines.
/// Returns the number of lines inserted; a header with fewer than three
/// space-delimited arguments is left unmodified.
fn rewrite_title(doc: &mut Document, at: usize) -> usize {
    let content = doc.line(at).trim_end_matches('\n');
    let mut spaces = 0;
    let mut cut = None;
    for (pos, byte) in content.bytes().enumerate() {
        if byte == b' ' {
            spaces += 1;
            if spaces == 3 {
                cut = Some(pos);
                break;
            }
        }
    }
    let Some(cut) = cut else {
        debug!(line = content, "leaving short .TH header untouched");
        return 0;
    };
    let title = format!(".Dt{}\n", &content[3..cut]);
    let date = Local::now().format("%b %e, %Y");
    doc.insert(at, format!(".Dd {date}\n"));
    doc.replace(at + 1, title);
    doc.insert(at + 2, ".Os\n");
    2
}

/// Renames legacy section macros to their mdoc spellings and drops the
/// spacing requests mdoc makes redundant. A deleted line's successor is
/// re-examined at the same index.
fn rename_macros(doc: &mut Document) {
    if !doc.is_empty() && doc.line(0).starts_with("'\\\" te") {
        doc.delete(0);
    }
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        if let Some(rest) = line.strip_prefix(".SH ") {
            let renamed = format!(".Sh {rest}");
            doc.replace(i, renamed);
            i += 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix(".DT ") {
            let renamed = format!(".Dt {rest}");
            doc.replace(i, renamed);
            i += 1;
            continue;
        }
        if let Some(rest) = line.strip_prefix(".SS ") {
            let renamed = format!(".Ss {rest}");
            doc.replace(i, renamed);
            i += 1;
            continue;
        }
        if line.trim_end() == ".sp" {
            doc.delete(i);
            continue;
        }
        if line.trim_end() == ".LP" {
            // redundant paragraph break directly after a heading
            if i > 0
                && (doc.line(i - 1).starts_with(".Sh ") || doc.line(i - 1).starts_with(".Ss "))
            {
                doc.delete(i);
                continue;
            }
            doc.replace(i, ".Pp\n");
            i += 1;
            continue;
        }
        if line.starts_with(".TH ") {
            let inserted = rewrite_title(doc, i);
            i += inserted + 1;
            continue;
        }
        i += 1;
    }
}

/// Collapses runs of two or more spaces to one, outside preformatted
/// spans and macro lines.
fn collapse_spaces(doc: &mut Document) {
    let mut skip = SkipRegions::default();
    for i in 0..doc.len() {
        let line = doc.line(i);
        if skip.observe(line) || line.starts_with('.') || !line.contains("  ") {
            continue;
        }
        let mut out = String::with_capacity(line.len());
        let mut last_space = false;
        for ch in line.chars() {
            if ch == ' ' {
                if last_space {
                    continue;
                }
                last_space = true;
            } else {
                last_space = false;
            }
            out.push(ch);
        }
        doc.replace(i, out);
    }
}

/// Deletes whitespace-only lines outside preformatted spans, re-examining
/// the same index after each deletion.
fn strip_blank_lines(doc: &mut Document) {
    let mut skip = SkipRegions::default();
    let mut i = 0;
    while i < doc.len() {
        let line = doc.line(i);
        if skip.observe(line) {
            i += 1;
            continue;
        }
        if line.trim().is_empty() {
            doc.delete(i);
            continue;
        }
        i += 1;
    }
}
