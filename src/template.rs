//! `TemplateString` — the immutable, user-owned sequence of literal text
//! fragments and elements.

use std::sync::Arc;

use crate::element::Element;

/// One piece of a template: either literal SQL text or a structured
/// element.
#[derive(Clone, Debug)]
pub enum Fragment {
    Literal(String),
    El(Element),
}

/// An ordered, immutable sequence of fragments. Identity is by structural
/// equality of its fragment texts and element compilation keys — the
/// compiler never mutates a `TemplateString` it is given.
#[derive(Clone, Debug, Default)]
pub struct TemplateString {
    fragments: Vec<Fragment>,
}

impl TemplateString {
    pub fn new() -> Self {
        TemplateString {
            fragments: Vec::new(),
        }
    }

    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Literal(text.into()));
        self
    }

    pub fn element(mut self, element: Element) -> Self {
        self.fragments.push(Fragment::El(element));
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    pub fn into_fragments(self) -> Vec<Fragment> {
        self.fragments
    }

    /// Flattens any top-level `Wrapped` elements into the parent sequence.
    /// `Subquery` elements are left untouched — they recurse through a
    /// fresh compiler entry instead.
    pub fn expand(&self) -> Vec<Fragment> {
        let mut out = Vec::with_capacity(self.fragments.len());
        for fragment in &self.fragments {
            expand_into(fragment, &mut out);
        }
        out
    }
}

fn expand_into(fragment: &Fragment, out: &mut Vec<Fragment>) {
    match fragment {
        Fragment::El(Element::Wrapped { elements }) => {
            for inner in elements {
                expand_into(&Fragment::El(inner.clone()), out);
            }
        }
        other => out.push(other.clone()),
    }
}

/// Convenience constructor used throughout the crate and its tests:
/// `tpl![lit "SELECT ", el Element::column::<User>("name")]`-style building
/// reads more naturally through the builder methods above, but a bare
/// `Arc` wrapper is handy when passing templates into `Subquery`/`Where`.
pub fn arc(template: TemplateString) -> Arc<TemplateString> {
    Arc::new(template)
}
