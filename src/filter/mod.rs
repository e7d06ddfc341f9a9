// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2026 tagdex contributors

//! Filter expression evaluation
//!
//! A [`FilterNode`] is an immutable predicate tree built by an external
//! parser. [`matches`] evaluates one node against one image with no side
//! effects, so the catalog can use it for scope resolution and a display
//! layer can use it for live filtering.
//!
//! Chains have no operator precedence: `a AND b OR c` is evaluated as
//! `a AND (b OR c)`, each combinator applying its first operand against the
//! evaluation of everything to its right.

use std::sync::OnceLock;

use glob::Pattern;
use regex::Regex;

use crate::image::Image;
use crate::target_dimension::TargetDimensionCache;

/// Counts the tokens a caption encodes to, including start/end markers
pub trait Tokenizer {
    fn token_count(&self, text: &str) -> usize;
}

/// Binary combinator in a filter chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

/// Comparison operator for numeric and confidence predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl ComparisonOp {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            "<" => Some(Self::Lt),
            ">" => Some(Self::Gt),
            "<=" => Some(Self::Le),
            ">=" => Some(Self::Ge),
            _ => None,
        }
    }

    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Self::Eq => lhs == rhs,
            Self::Ne => lhs != rhs,
            Self::Lt => lhs < rhs,
            Self::Gt => lhs > rhs,
            Self::Le => lhs <= rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Fields matched by glob patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobField {
    Tag,
    Caption,
    Marking,
    Crops,
    Visible,
    Name,
    Path,
}

/// Fields compared against an exact `WxH` size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeField {
    Size,
    Target,
}

/// Fields compared numerically
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericField {
    Tags,
    Chars,
    Tokens,
    Stars,
    Width,
    Height,
    Area,
}

/// A filter predicate tree
#[derive(Debug, Clone)]
pub enum FilterNode {
    /// Glob match against the joined caption or the full path
    FreeText(String),
    FieldGlob(GlobField, String),
    SizeEquals(SizeField, u32, u32),
    Numeric(NumericField, ComparisonOp, f64),
    Not(Box<FilterNode>),
    Chain(Box<FilterNode>, Combinator, Box<FilterNode>),
}

impl FilterNode {
    /// Build the right-associative chain for a flat `a AND b OR c` sequence
    pub fn from_sequence(first: FilterNode, mut rest: Vec<(Combinator, FilterNode)>) -> FilterNode {
        if rest.is_empty() {
            return first;
        }
        let (combinator, next) = rest.remove(0);
        FilterNode::Chain(
            Box::new(first),
            combinator,
            Box::new(Self::from_sequence(next, rest)),
        )
    }
}

/// Everything the evaluator needs besides the image itself
pub struct FilterContext<'a> {
    /// Effective tag separator used to join captions
    pub separator: &'a str,
    /// Token counter for the `tokens` field; without one the predicate
    /// fails closed
    pub tokenizer: Option<&'a dyn Tokenizer>,
    /// Memoized export dimensions for the `target` field
    pub targets: &'a TargetDimensionCache,
}

/// Case-sensitive glob match; an invalid pattern matches nothing
fn glob_match(pattern: &str, text: &str) -> bool {
    Pattern::new(pattern)
        .map(|pattern| pattern.matches(text))
        .unwrap_or(false)
}

/// Glob match with implicit `*pattern*` wrapping
fn glob_contains(pattern: &str, text: &str) -> bool {
    glob_match(&format!("*{}*", pattern), text)
}

fn confidence_suffix_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(<=|>=|==|<|>|=)\s*(0?[.,][0-9]+)").expect("confidence suffix regex")
    })
}

/// Match marking labels, honoring an optional `:operator confidence` suffix
/// after the final colon. A malformed suffix matches nothing.
fn matches_marking(image: &Image, pattern: &str) -> bool {
    let Some(colon_index) = pattern.rfind(':') else {
        return image
            .markings
            .iter()
            .any(|marking| glob_match(pattern, &marking.label));
    };
    let label = &pattern[..colon_index];
    let suffix = &pattern[colon_index + 1..];
    let Some(captures) = confidence_suffix_regex().captures(suffix) else {
        return false;
    };
    let Some(op) = ComparisonOp::parse(&captures[1]) else {
        return false;
    };
    let Ok(threshold) = captures[2].replace(',', ".").parse::<f64>() else {
        return false;
    };
    image.markings.iter().any(|marking| {
        glob_match(label, &marking.label) && op.compare(marking.confidence, threshold)
    })
}

/// Match marking labels whose rectangle intersects the effective viewport.
/// With `exclude_contained`, markings lying fully inside the viewport are
/// rejected (they would survive the crop untouched).
fn matches_marking_in_viewport(image: &Image, pattern: &str, exclude_contained: bool) -> bool {
    let Some(viewport) = image.effective_viewport() else {
        return false;
    };
    image.markings.iter().any(|marking| {
        glob_match(pattern, &marking.label)
            && marking.rect.intersects(&viewport)
            && !(exclude_contained && viewport.contains(&marking.rect))
    })
}

fn numeric_value(field: NumericField, image: &Image, ctx: &FilterContext) -> Option<f64> {
    match field {
        NumericField::Tags => Some(image.tags.len() as f64),
        NumericField::Chars => Some(image.caption(ctx.separator).chars().count() as f64),
        NumericField::Tokens => {
            let tokenizer = ctx.tokenizer?;
            let caption = image.caption(ctx.separator);
            // Subtract 2 for the start and end marker tokens.
            Some(tokenizer.token_count(&caption).saturating_sub(2) as f64)
        }
        NumericField::Stars => Some(image.rating * 5.0),
        NumericField::Width => image.dimensions.map(|(width, _)| width as f64),
        NumericField::Height => image.dimensions.map(|(_, height)| height as f64),
        NumericField::Area => image
            .dimensions
            .map(|(width, height)| width as f64 * height as f64),
    }
}

/// Evaluate a filter node against an image
pub fn matches(node: &FilterNode, image: &Image, ctx: &FilterContext) -> bool {
    match node {
        FilterNode::FreeText(pattern) => {
            glob_contains(pattern, &image.caption(ctx.separator))
                || glob_contains(pattern, &image.path.to_string_lossy())
        }
        FilterNode::FieldGlob(field, pattern) => match field {
            GlobField::Tag => image.tags.iter().any(|tag| glob_match(pattern, tag)),
            GlobField::Caption => glob_contains(pattern, &image.caption(ctx.separator)),
            GlobField::Marking => matches_marking(image, pattern),
            GlobField::Crops => matches_marking_in_viewport(image, pattern, true),
            GlobField::Visible => matches_marking_in_viewport(image, pattern, false),
            GlobField::Name => glob_contains(pattern, image.file_name()),
            GlobField::Path => glob_contains(pattern, &image.path.to_string_lossy()),
        },
        FilterNode::SizeEquals(field, width, height) => match field {
            SizeField::Size => image.dimensions == Some((*width, *height)),
            SizeField::Target => {
                let target = image.target_dimension.or_else(|| {
                    image
                        .source_dimensions()
                        .map(|(source_width, source_height)| {
                            ctx.targets.get(source_width, source_height)
                        })
                });
                target == Some((*width, *height))
            }
        },
        FilterNode::Numeric(field, op, value) => match numeric_value(*field, image, ctx) {
            Some(actual) => op.compare(actual, *value),
            None => false,
        },
        FilterNode::Not(inner) => !matches(inner, image, ctx),
        FilterNode::Chain(left, combinator, right) => match combinator {
            Combinator::And => matches(left, image, ctx) && matches(right, image, ctx),
            Combinator::Or => matches(left, image, ctx) || matches(right, image, ctx),
        },
    }
}
