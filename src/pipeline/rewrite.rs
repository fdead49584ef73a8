//! HTML rewrite: apply the operator's sed-style rule set to captured HTML.
//!
//! The rule set strips tracking pixels, mail-client markup and styling that
//! does not survive printing. Two engines implement [`TextTransform`]:
//!
//! * [`BuiltinSed`]: an in-process interpreter for the subset of sed that
//!   rule sets actually use: `s` with `g`/`i`/N flags, `d`, `/re/` and
//!   `/re/,/re/` addresses, the empty regex `//`, `;`-chained commands and
//!   `#` comments. Patterns default to POSIX BRE (as `sed -f` reads them)
//!   and are translated to `regex` syntax. Alternation is rejected: `regex`
//!   picks the first matching branch where POSIX picks the longest.
//! * [`ExternalSed`]: writes the rules to a script file and pipes the text
//!   through the system `sed -f`.

use crate::config::{GenerateConfig, RewriteEngine};
use crate::document::Artifacts;
use crate::error::PostlinkError;
use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::borrow::Cow;
use std::iter::Peekable;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::Chars;
use tokio::io::AsyncWriteExt;
use tokio::process::Command as ProcessCommand;
use tracing::debug;

/// Pluggable `(text, rules) → text` rewrite.
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn apply(&self, input: &str, rules: &str) -> Result<String, PostlinkError>;
}

/// Pick the engine named by `generate.rewrite_engine`.
pub fn transform_for(config: &GenerateConfig, artifacts: &Artifacts) -> Box<dyn TextTransform> {
    match config.rewrite_engine {
        RewriteEngine::Builtin => Box::new(BuiltinSed {
            extended: config.extended_regex,
        }),
        RewriteEngine::Sed => Box::new(ExternalSed {
            program: "sed".into(),
            script_path: artifacts.rewrite_script(),
            extended: config.extended_regex,
        }),
    }
}

// ── Built-in engine ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BuiltinSed {
    /// Parse patterns as ERE instead of BRE.
    pub extended: bool,
}

#[async_trait]
impl TextTransform for BuiltinSed {
    async fn apply(&self, input: &str, rules: &str) -> Result<String, PostlinkError> {
        let script = SedScript::parse(rules, self.extended)?;
        debug!("builtin rewrite: {} commands", script.commands.len());
        Ok(script.apply(input))
    }
}

/// A parsed rule set, ready to run over any number of inputs.
#[derive(Debug)]
pub struct SedScript {
    commands: Vec<SedCommand>,
}

#[derive(Debug)]
struct SedCommand {
    address: Option<Address>,
    action: Action,
}

/// A compiled pattern, or the empty regex standing for the last one applied.
#[derive(Debug)]
enum Matcher {
    Regex(Regex),
    Last,
}

#[derive(Debug)]
enum Address {
    Match(Matcher),
    /// From a line matching `start` through the next later line matching `end`.
    Range { start: Matcher, end: Matcher },
}

#[derive(Debug)]
enum Action {
    Delete,
    Substitute {
        regex: Matcher,
        /// Replacement in `regex` expansion syntax (`${1}`, `$$`).
        replacement: String,
        /// 1-based first occurrence to replace.
        start: usize,
        /// Also replace every later occurrence (`g`).
        all: bool,
    },
}

impl SedScript {
    /// Parse a rule set. Errors carry the 1-based script line.
    pub fn parse(script: &str, extended: bool) -> Result<Self, PostlinkError> {
        let mut commands = Vec::new();
        let mut parser = PatternParser {
            extended,
            seen_regex: false,
        };
        for (idx, line) in script.lines().enumerate() {
            let lineno = idx + 1;
            let err = |detail: String| PostlinkError::InvalidRewriteRule {
                line: lineno,
                detail,
            };
            let mut chars = line.chars().peekable();
            loop {
                skip_blanks(&mut chars);
                match chars.peek() {
                    None | Some('#') => break,
                    Some(';') => {
                        chars.next();
                        continue;
                    }
                    _ => {}
                }
                commands.push(parse_command(&mut chars, &mut parser).map_err(err)?);
                skip_blanks(&mut chars);
                match chars.next() {
                    None | Some('#') => break,
                    Some(';') => {}
                    Some(c) => return Err(err(format!("unexpected '{c}' after command"))),
                }
            }
        }
        Ok(Self { commands })
    }

    /// Run the script over `input` line by line, keeping line endings.
    pub fn apply(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        // Both carry across lines, as in sed.
        let mut last: Option<&Regex> = None;
        let mut in_range = vec![false; self.commands.len()];
        'lines: for chunk in input.split_inclusive('\n') {
            let (body, newline) = match chunk.strip_suffix('\n') {
                Some(body) => (body, true),
                None => (chunk, false),
            };
            let mut line = Cow::Borrowed(body);
            for (cmd, active) in self.commands.iter().zip(in_range.iter_mut()) {
                if !cmd.selects(&line, active, &mut last) {
                    continue;
                }
                match &cmd.action {
                    Action::Delete => continue 'lines,
                    Action::Substitute {
                        regex,
                        replacement,
                        start,
                        all,
                    } => {
                        let Some(regex) = resolve(regex, &mut last) else {
                            continue;
                        };
                        if let Cow::Owned(s) = substitute(regex, replacement, &line, *start, *all) {
                            line = Cow::Owned(s);
                        }
                    }
                }
            }
            out.push_str(&line);
            if newline {
                out.push('\n');
            }
        }
        out
    }
}

impl SedCommand {
    fn selects<'s>(&'s self, line: &str, active: &mut bool, last: &mut Option<&'s Regex>) -> bool {
        match &self.address {
            None => true,
            Some(Address::Match(m)) => matches(m, line, last),
            Some(Address::Range { start, end }) => {
                if *active {
                    if matches(end, line, last) {
                        *active = false;
                    }
                    true
                } else if matches(start, line, last) {
                    // The end is first tried on the following line.
                    *active = true;
                    true
                } else {
                    false
                }
            }
        }
    }
}

/// The regex `m` stands for right now; applying it makes it the last one.
fn resolve<'s>(m: &'s Matcher, last: &mut Option<&'s Regex>) -> Option<&'s Regex> {
    let regex = match m {
        Matcher::Regex(regex) => regex,
        Matcher::Last => (*last)?,
    };
    *last = Some(regex);
    Some(regex)
}

fn matches<'s>(m: &'s Matcher, line: &str, last: &mut Option<&'s Regex>) -> bool {
    resolve(m, last).is_some_and(|regex| regex.is_match(line))
}

/// Compiles patterns in script order, tracking whether `//` has anything to refer to.
struct PatternParser {
    extended: bool,
    seen_regex: bool,
}

impl PatternParser {
    fn matcher(&mut self, raw: &str, delim: char, ignore_case: bool) -> Result<Matcher, String> {
        if raw.is_empty() {
            if !self.seen_regex {
                return Err("no previous regular expression".into());
            }
            if ignore_case {
                return Err("cannot specify modifiers on empty regexp".into());
            }
            return Ok(Matcher::Last);
        }
        let regex = compile(raw, delim, self.extended, ignore_case)?;
        self.seen_regex = true;
        Ok(Matcher::Regex(regex))
    }

    /// `/re/` or `\cREc`, with the opening character still unread.
    fn address(&mut self, chars: &mut Peekable<Chars<'_>>) -> Result<Option<Matcher>, String> {
        let delim = match chars.peek() {
            Some('/') => '/',
            Some('\\') => {
                chars.next();
                match chars.peek() {
                    Some(&c) if c != '\\' && c != '\n' => c,
                    _ => return Err("invalid address delimiter".into()),
                }
            }
            _ => return Ok(None),
        };
        chars.next();
        let raw = read_delimited(chars, delim).ok_or("unterminated address")?;
        self.matcher(&raw, delim, false).map(Some)
    }
}

fn skip_blanks(chars: &mut Peekable<Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn parse_command(
    chars: &mut Peekable<Chars<'_>>,
    parser: &mut PatternParser,
) -> Result<SedCommand, String> {
    let address = match parser.address(chars)? {
        Some(start) => {
            skip_blanks(chars);
            if chars.peek() == Some(&',') {
                chars.next();
                skip_blanks(chars);
                let end = parser
                    .address(chars)?
                    .ok_or("range end must be a /regex/ address")?;
                skip_blanks(chars);
                Some(Address::Range { start, end })
            } else {
                Some(Address::Match(start))
            }
        }
        None => None,
    };

    let action = match chars.next() {
        Some('d') => Action::Delete,
        Some('s') => parse_substitute(chars, parser)?,
        Some(c) => return Err(format!("unsupported command '{c}'")),
        None => return Err("missing command after address".into()),
    };
    Ok(SedCommand { address, action })
}

fn parse_substitute(
    chars: &mut Peekable<Chars<'_>>,
    parser: &mut PatternParser,
) -> Result<Action, String> {
    let delim = match chars.next() {
        Some(c) if c != '\\' && c != '\n' && !c.is_whitespace() => c,
        _ => return Err("invalid delimiter for 's'".into()),
    };
    let pattern = read_delimited(chars, delim).ok_or("unterminated 's' pattern")?;
    let replacement = read_delimited(chars, delim).ok_or("unterminated 's' replacement")?;

    let mut all = false;
    let mut ignore_case = false;
    let mut nth = String::new();
    while let Some(&c) = chars.peek() {
        match c {
            'g' => all = true,
            'i' | 'I' => ignore_case = true,
            '0'..='9' => nth.push(c),
            ';' | '#' => break,
            c if c.is_whitespace() => break,
            c => return Err(format!("unsupported 's' flag '{c}'")),
        }
        chars.next();
    }
    let start = if nth.is_empty() {
        1
    } else {
        match nth.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return Err(format!("invalid occurrence '{nth}'")),
        }
    };

    Ok(Action::Substitute {
        regex: parser.matcher(&pattern, delim, ignore_case)?,
        replacement: translate_replacement(&replacement, delim),
        start,
        all,
    })
}

/// Read up to the next unescaped `delim`, returning the raw text (escapes kept).
fn read_delimited(chars: &mut Peekable<Chars<'_>>, delim: char) -> Option<String> {
    let mut raw = String::new();
    while let Some(c) = chars.next() {
        if c == '\\' {
            raw.push(c);
            raw.push(chars.next()?);
        } else if c == delim {
            return Some(raw);
        } else {
            raw.push(c);
        }
    }
    None
}

fn compile(raw: &str, delim: char, extended: bool, ignore_case: bool) -> Result<Regex, String> {
    let pattern = translate_pattern(raw, delim, extended)?;
    RegexBuilder::new(&pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|e| format!("bad pattern '{raw}': {e}"))
}

/// Characters whose operator meaning BRE spells with a backslash.
const BRE_ESCAPED_OPS: &str = "(){}+?|";

const ALTERNATION: &str =
    "alternation is not supported (POSIX takes the longest branch); use rewrite_engine: sed";

/// Translate a sed pattern into `regex` crate syntax.
fn translate_pattern(raw: &str, delim: char, extended: bool) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len() + 8);
    let mut chars = raw.chars().peekable();
    // Start of the pattern or of a group: `^` anchors and `*` is literal.
    let mut group_start = true;

    while let Some(c) = chars.next() {
        let mut opens = false;
        match c {
            '\\' => {
                let Some(n) = chars.next() else {
                    return Err("trailing backslash".into());
                };
                match n {
                    _ if n == delim => out.push_str(&regex::escape(&n.to_string())),
                    'n' => out.push_str("\\n"),
                    't' => out.push_str("\\t"),
                    '1'..='9' => return Err("back-references in patterns are not supported".into()),
                    '|' if !extended => return Err(ALTERNATION.into()),
                    '(' if !extended => {
                        out.push('(');
                        opens = true;
                    }
                    _ if !extended && BRE_ESCAPED_OPS.contains(n) => out.push(n),
                    _ if n.is_ascii_alphanumeric() || n == '<' || n == '>' => {
                        out.push('\\');
                        out.push(n);
                    }
                    _ => out.push_str(&regex::escape(&n.to_string())),
                }
            }
            '[' => translate_bracket(&mut chars, &mut out)?,
            '*' if group_start => out.push_str("\\*"),
            '^' if group_start => {
                out.push('^');
                opens = true;
            }
            '^' if !extended => out.push_str("\\^"),
            '$' if !extended && chars.peek().is_some() => out.push_str("\\$"),
            '|' if extended => return Err(ALTERNATION.into()),
            '(' if extended => {
                out.push('(');
                opens = true;
            }
            _ if !extended && BRE_ESCAPED_OPS.contains(c) => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
        group_start = opens;
    }
    Ok(out)
}

/// Copy a POSIX bracket expression; backslash and `[` are literal inside it.
fn translate_bracket(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), String> {
    out.push('[');
    if chars.peek() == Some(&'^') {
        chars.next();
        out.push('^');
    }
    if chars.peek() == Some(&']') {
        chars.next();
        out.push_str("\\]");
    }
    while let Some(c) = chars.next() {
        match c {
            ']' => {
                out.push(']');
                return Ok(());
            }
            '[' if chars.peek() == Some(&':') => {
                // [:class:]
                out.push('[');
                for k in chars.by_ref() {
                    out.push(k);
                    if k == ']' {
                        break;
                    }
                }
            }
            '\\' | '[' | '&' | '~' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    Err("unterminated bracket expression".into())
}

/// Translate a sed replacement (`&`, `\1`, `\n`) into `regex` expansion syntax.
fn translate_replacement(raw: &str, delim: char) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(d @ '0'..='9') => {
                    out.push_str("${");
                    out.push(d);
                    out.push('}');
                }
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('$') => out.push_str("$$"),
                Some(n) if n == delim => out.push(n),
                Some(n) => out.push(n),
                None => out.push('\\'),
            },
            '&' => out.push_str("${0}"),
            '$' => out.push_str("$$"),
            _ => out.push(c),
        }
    }
    out
}

fn substitute<'a>(regex: &Regex, replacement: &str, line: &'a str, start: usize, all: bool) -> Cow<'a, str> {
    let mut out = String::new();
    let mut last = 0;
    let mut changed = false;
    for (i, caps) in regex.captures_iter(line).enumerate() {
        if i + 1 < start {
            continue;
        }
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&line[last..m.start()]);
        caps.expand(replacement, &mut out);
        last = m.end();
        changed = true;
        if !all {
            break;
        }
    }
    if !changed {
        return Cow::Borrowed(line);
    }
    out.push_str(&line[last..]);
    Cow::Owned(out)
}

// ── External engine ──────────────────────────────────────────────────────

/// Pipe the text through `sed -f <script_path>`.
#[derive(Debug, Clone)]
pub struct ExternalSed {
    pub program: String,
    pub script_path: PathBuf,
    pub extended: bool,
}

#[async_trait]
impl TextTransform for ExternalSed {
    async fn apply(&self, input: &str, rules: &str) -> Result<String, PostlinkError> {
        tokio::fs::write(&self.script_path, rules)
            .await
            .map_err(|e| PostlinkError::ArtifactWrite {
                path: self.script_path.clone(),
                source: e,
            })?;

        let mut cmd = ProcessCommand::new(&self.program);
        if self.extended {
            cmd.arg("-E");
        }
        cmd.arg("-f")
            .arg(&self.script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PostlinkError::Rewrite(format!("cannot start '{}': {e}", self.program)))?;

        // Feed stdin from a separate task so a full stdout pipe cannot deadlock us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PostlinkError::Internal("sed stdin not captured".into()))?;
        let data = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            let res = stdin.write_all(&data).await;
            drop(stdin);
            res
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PostlinkError::Rewrite(format!("sed did not finish: {e}")))?;
        writer
            .await
            .map_err(|e| PostlinkError::Internal(format!("sed stdin task panicked: {e}")))?
            .map_err(|e| PostlinkError::Rewrite(format!("writing to sed failed: {e}")))?;

        if !output.status.success() {
            return Err(PostlinkError::Rewrite(format!(
                "sed exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        String::from_utf8(output.stdout)
            .map_err(|e| PostlinkError::Rewrite(format!("sed output is not UTF-8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(script: &str, input: &str) -> String {
        SedScript::parse(script, false).unwrap().apply(input)
    }

    #[test]
    fn substitutes_first_match_only_by_default() {
        assert_eq!(run("s/a/X/", "banana\n"), "bXnana\n");
    }

    #[test]
    fn global_and_nth_flags() {
        assert_eq!(run("s/a/X/g", "banana"), "bXnXnX");
        assert_eq!(run("s/a/X/2", "banana"), "banXna");
        assert_eq!(run("s/a/X/2g", "banana"), "banXnX");
    }

    #[test]
    fn ignore_case_flag() {
        assert_eq!(run("s/IMG/x/gi", "<img><Img>"), "<x><x>");
    }

    #[test]
    fn bre_groups_and_ampersand() {
        assert_eq!(run(r"s/\(foo\)-\(bar\)/\2-\1 [&]/", "foo-bar"), "bar-foo [foo-bar]");
    }

    #[test]
    fn bre_parens_and_plus_are_literal() {
        assert_eq!(run("s/f(x)+1/ok/", "f(x)+1"), "ok");
        assert_eq!(run(r"s/a\+/A/", "caaat"), "cAt");
    }

    #[test]
    fn extended_mode_uses_ere_operators() {
        let s = SedScript::parse("s/(ab)+/<&>/g", true).unwrap();
        assert_eq!(s.apply("xababy"), "x<abab>y");
    }

    #[test]
    fn custom_delimiter_and_escaped_delimiter() {
        assert_eq!(run("s|a/b|c|", "a/b"), "c");
        assert_eq!(run(r"s/a\/b/c/", "a/b"), "c");
        assert_eq!(run(r"s|a\|b|c|", "a|b"), "c");
    }

    #[test]
    fn delete_by_address() {
        let input = "keep\n<img src=\"pixel.gif\">\nkeep too\n";
        assert_eq!(run("/pixel\\.gif/d", input), "keep\nkeep too\n");
    }

    #[test]
    fn addressed_substitution_only_touches_matching_lines() {
        let input = "<p>a</p>\n<div>a</div>\n";
        assert_eq!(run("/<div>/s/a/b/", input), "<p>a</p>\n<div>b</div>\n");
    }

    #[test]
    fn empty_pattern_reuses_the_address_regex() {
        assert_eq!(
            run("/tracking/s//x/", "<img class=\"tracking\">\n<p>tracking</p>\n<b>\n"),
            "<img class=\"x\">\n<p>x</p>\n<b>\n"
        );
        assert_eq!(run("s/a/b/;s//c/", "aaa"), "bca");
    }

    #[test]
    fn empty_pattern_means_last_regex_applied_not_last_written() {
        // On "za" the /x/ address fails, so `s/a/b/` never runs and `//` is /x/.
        assert_eq!(run("/x/s/a/b/\ns//c/", "za\nxa\n"), "za\nxb\n");
    }

    #[test]
    fn empty_address_reuses_previous_regex() {
        assert_eq!(run("s/pixel/PIXEL/\n//d", "a pixel\nb\n"), "a PIXEL\nb\n");
        assert_eq!(run("s/x/&/\n//d", "x\nq\n"), "q\n");
    }

    #[test]
    fn empty_pattern_without_previous_regex_is_rejected() {
        for script in ["s//x/", "//d", "/a/d\ns//x/i"] {
            assert!(
                matches!(
                    SedScript::parse(script, false),
                    Err(PostlinkError::InvalidRewriteRule { .. })
                ),
                "{script:?} should be rejected"
            );
        }
        match SedScript::parse("# strip\n//d", false).unwrap_err() {
            PostlinkError::InvalidRewriteRule { line, detail } => {
                assert_eq!(line, 2);
                assert!(detail.contains("no previous regular expression"), "{detail}");
            }
            other => panic!("unexpected {other:?}"),
        }
        // The range start counts as a previous regex for its end.
        assert!(SedScript::parse("/a/,//d", false).is_ok());
    }

    #[test]
    fn alternation_is_rejected_in_both_dialects() {
        for (script, extended) in [(r"s/a\|ab/X/", false), ("s/a|ab/X/", true)] {
            match SedScript::parse(script, extended).unwrap_err() {
                PostlinkError::InvalidRewriteRule { detail, .. } => {
                    assert!(detail.contains("alternation"), "{detail}")
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        // A bar in a bracket, or in BRE without a backslash, is literal.
        assert_eq!(run("s/[|]/X/", "a|b"), "aXb");
        assert_eq!(run("s/a|b/X/", "a|b"), "X");
    }

    #[test]
    fn range_address_deletes_multiline_blocks() {
        let input = "<p>a</p>\n<script>\ntrack();\n</script>\n<p>b</p>\n<style>\nx\n</style>\n";
        let script = "/<script/,/<\\/script>/d\n/<style>/,/<\\/style>/d";
        assert_eq!(run(script, input), "<p>a</p>\n<p>b</p>\n");
    }

    #[test]
    fn range_end_is_not_tested_on_the_start_line() {
        let input = "<ul><li>1</li></ul>\n<li>2</li>\n</ul>\n<li>3</li>\n";
        assert_eq!(
            run("/<ul>/,/<\\/ul>/s/li/LI/g", input),
            "<ul><LI>1</LI></ul>\n<LI>2</LI>\n</ul>\n<li>3</li>\n"
        );
    }

    #[test]
    fn unterminated_range_runs_to_end_of_input() {
        assert_eq!(run("/start/,/stop/d", "a\nstart\nb\nc"), "a\n");
    }

    #[test]
    fn custom_address_delimiter() {
        assert_eq!(run(r"\%</div>%d", "a\n</div>\nb\n"), "a\nb\n");
    }

    #[test]
    fn leading_star_is_literal_in_bre() {
        assert_eq!(run("s/*x/Y/", "a*x"), "aY");
        assert_eq!(run("s/^*/-/", "*a"), "-a");
        assert_eq!(run(r"s/\(*\)/[\1]/", "a*"), "a[*]");
        assert_eq!(run("s/a*/-/", "aab"), "-b");
    }

    #[test]
    fn range_needs_a_regex_end() {
        assert!(SedScript::parse("/a/,5d", false).is_err());
    }

    #[test]
    fn comments_blank_lines_and_semicolons() {
        let script = "# strip tracking\n\n s/x/y/ ; s/y/z/g # trailing\n";
        assert_eq!(run(script, "xy"), "zz");
    }

    #[test]
    fn bracket_expressions_and_classes() {
        assert_eq!(run("s/[0-9][0-9]*/N/g", "a12b3"), "aNbN");
        assert_eq!(run("s/[[:space:]]//g", "a b\tc"), "abc");
        assert_eq!(run(r"s/[\]/|/g", r"a\b"), "a|b");
    }

    #[test]
    fn anchors_and_dollar_in_replacement() {
        assert_eq!(run("s/^ *//", "   x"), "x");
        assert_eq!(run("s/x$/$5/", "axx"), "ax$5");
    }

    #[test]
    fn newline_escape_in_replacement() {
        assert_eq!(run(r"s/,/\n/g", "a,b"), "a\nb");
    }

    #[test]
    fn missing_final_newline_is_preserved() {
        assert_eq!(run("s/a/b/", "a\na"), "b\nb");
    }

    #[test]
    fn empty_script_is_identity() {
        assert_eq!(run("", "<html>\n"), "<html>\n");
    }

    #[test]
    fn unknown_command_reports_line() {
        let err = SedScript::parse("s/a/b/\ny/abc/xyz/", false).unwrap_err();
        match err {
            PostlinkError::InvalidRewriteRule { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unterminated_and_bad_flags_are_rejected() {
        assert!(SedScript::parse("s/a/b", false).is_err());
        assert!(SedScript::parse("s/a/b/w out.txt", false).is_err());
        assert!(SedScript::parse("s/[a/b/", false).is_err());
        assert!(SedScript::parse("s/a/b/0", false).is_err());
    }

    #[tokio::test]
    async fn builtin_engine_through_trait() {
        let engine: Box<dyn TextTransform> = Box::new(BuiltinSed::default());
        let out = engine
            .apply("<img src=x>\n<p>hi</p>\n", "/<img/d")
            .await
            .unwrap();
        assert_eq!(out, "<p>hi</p>\n");
    }

    fn sed_available() -> bool {
        std::process::Command::new("sed")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn external_sed_writes_script_and_rewrites() {
        if !sed_available() {
            eprintln!("skipping: GNU sed not on PATH");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let engine = ExternalSed {
            program: "sed".into(),
            script_path: dir.path().join("sed_script.sed"),
            extended: false,
        };
        let out = engine.apply("hello world\n", "s/world/post/").await.unwrap();
        assert_eq!(out, "hello post\n");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("sed_script.sed")).unwrap(),
            "s/world/post/"
        );
    }

    #[tokio::test]
    async fn external_sed_reports_bad_script() {
        if !sed_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let engine = ExternalSed {
            program: "sed".into(),
            script_path: dir.path().join("sed_script.sed"),
            extended: false,
        };
        let err = engine.apply("x\n", "s/unterminated").await.unwrap_err();
        assert!(matches!(err, PostlinkError::Rewrite(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn engine_selection_follows_config() {
        let yaml = "sed_options: ''\ncss_styling: ''\npdf_max_pages: 1\nextended_regex: true\n";
        let cfg: GenerateConfig = serde_yaml::from_str(yaml).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let engine = transform_for(&cfg, &Artifacts::new(dir.path()));
        // ERE grouping proves the builtin engine got the extended flag.
        let out = engine.apply("abab", "s/(ab)+/x/").await.unwrap();
        assert_eq!(out, "x");
        assert!(!dir.path().join("sed_script.sed").exists());
    }
}
