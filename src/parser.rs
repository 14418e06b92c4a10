//! Turns one raw input line into a [`Pipeline`].
//!
//! The grammar is deliberately lenient: nothing is ever rejected. Tokens are separated by runs
//! of whitespace, a standalone `|` starts the next stage, and tokens beginning with `<`, `>` or
//! `>>` are redirections. A trailing `&` or `?` on the whole line marks it as a background
//! command or an auto-complete request.

use crate::command::{Pipeline, Stage};
use std::iter::Peekable;

/// Parse a line into a pipeline.
///
/// A blank (or all-whitespace) line yields a single blank stage. A trailing `|` yields a blank
/// terminal stage rather than an error.
pub fn parse_line(line: &str) -> Pipeline {
    let mut line = line.trim();
    let mut background = false;
    let mut auto_complete = false;

    if let Some(rest) = line.strip_suffix('?') {
        auto_complete = true;
        line = rest;
    } else if let Some(rest) = line.strip_suffix('&') {
        background = true;
        line = rest;
    }

    let mut tokens = line.split_whitespace().peekable();
    let mut stages = Vec::new();
    loop {
        let (mut stage, piped) = parse_stage(&mut tokens);
        stage.background = background;
        stage.auto_complete = auto_complete;
        stages.push(stage);
        if !piped {
            break;
        }
    }

    Pipeline::new(stages)
}

/// Consume tokens for one stage. Returns the stage and whether a `|` ended it.
fn parse_stage<'a, I>(tokens: &mut Peekable<I>) -> (Stage, bool)
where
    I: Iterator<Item = &'a str>,
{
    let mut stage = match tokens.next() {
        Some(name) => Stage::new(name),
        None => return (Stage::blank(), false),
    };

    while let Some(token) = tokens.next() {
        match token {
            "|" => return (stage, true),
            "&" => continue,
            _ => {}
        }

        if let Some(rest) = token.strip_prefix('<') {
            stage.redirects.input = Some(redirect_target(rest, tokens));
        } else if let Some(rest) = token.strip_prefix(">>") {
            stage.redirects.append = Some(redirect_target(rest, tokens));
            stage.redirects.truncate = None;
        } else if let Some(rest) = token.strip_prefix('>') {
            stage.redirects.truncate = Some(redirect_target(rest, tokens));
            stage.redirects.append = None;
        } else {
            stage.arguments.push(unquote(token).to_string());
        }
    }

    (stage, false)
}

/// The path of a redirection. A bare operator takes the next token as its path.
fn redirect_target<'a, I>(rest: &str, tokens: &mut Peekable<I>) -> String
where
    I: Iterator<Item = &'a str>,
{
    if !rest.is_empty() {
        return rest.to_string();
    }
    match tokens.peek() {
        Some(&next) if next != "|" => {
            tokens.next();
            next.to_string()
        }
        _ => String::new(),
    }
}

/// Strip one layer of matching single or double quotes. No escapes, no nesting.
fn unquote(token: &str) -> &str {
    let bytes = token.as_bytes();
    if bytes.len() > 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &token[1..token.len() - 1];
        }
    }
    token
}
