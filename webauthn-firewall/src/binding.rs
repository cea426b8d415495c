//! Transaction text derivation
//!
//! A [`TransactionBinder`] produces the text describing the operation being
//! authorized. The text is bound into the assertion under `txAuthSimple`, so
//! it must be complete: binders record their own errors on the context and
//! return `None` rather than a partial or default text.

use async_trait::async_trait;
use thiserror::Error;

use crate::context::RequestContext;
use crate::error::GateError;

/// Derives the action-specific text for a protected request
#[async_trait]
pub trait TransactionBinder: Send + Sync {
    /// The exact text the caller must have signed, or `None` after recording an error
    async fn transaction_text(&self, ctx: &mut RequestContext) -> Option<String>;
}

/// Invalid transaction text template
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Unclosed placeholder at byte {0}")]
    Unclosed(usize),

    #[error("Empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    #[error("Unmatched '}}' at byte {0}")]
    UnmatchedClose(usize),

    #[error("Template is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Renders a template such as `transfer {amount} to {account}` from request fields.
///
/// `{{` and `}}` produce literal braces. Every placeholder names a request
/// field that must be present and not blank.
#[derive(Debug, Clone)]
pub struct TemplateBinder {
    template: String,
    segments: Vec<Segment>,
}

impl TemplateBinder {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        if template.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    literal.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(TemplateError::Unclosed(pos));
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder(pos));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => return Err(TemplateError::UnmatchedClose(pos)),
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self {
            template: template.to_string(),
            segments,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Names of the request fields the template reads
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

#[async_trait]
impl TransactionBinder for TemplateBinder {
    async fn transaction_text(&self, ctx: &mut RequestContext) -> Option<String> {
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => text.push_str(literal),
                Segment::Field(name) => {
                    let value = ctx.get(name).await.ok()?;
                    if value.trim().is_empty() {
                        ctx.record_error(GateError::binding(format!(
                            "field '{}' of template '{}' is empty",
                            name, self.template
                        )));
                        return None;
                    }
                    text.push_str(&value);
                }
            }
        }

        if text.trim().is_empty() {
            ctx.record_error(GateError::binding(format!(
                "template '{}' rendered an empty transaction text",
                self.template
            )));
            return None;
        }
        Some(text)
    }
}
