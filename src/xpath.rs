//! Structural path queries.
//!
//! A tiny subset of XPath: a chain of `name[position]` steps, either absolute
//! (anchored at the document root, e.g. `/html/body/div[2]/section`) or
//! relative to a context element (e.g. `div/a[2]/span`).

use eyre::{bail, ensure, eyre, Result, WrapErr};
use kuchiki::NodeRef;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{fmt, str::FromStr};

/// Match a single step: element name (or `*`) and optional position.
static STEP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>\*|[A-Za-z][A-Za-z0-9\-]*)(?:\[(?P<position>\d+)\])?$")
        .expect("invalid path step regex")
});

/// A parsed structural path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralPath {
    /// Anchored at the document root?
    absolute: bool,
    /// Steps, from the outermost to the innermost element.
    steps: Vec<Step>,
}

/// One level of a structural path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Step {
    /// Element name, `None` matches any element.
    name: Option<String>,
    /// 1-based position among the matching siblings, `None` selects all.
    position: Option<usize>,
}

impl StructuralPath {
    /// Returns every element matching the path, in document order.
    pub fn find_all(&self, context: &NodeRef) -> Vec<NodeRef> {
        let start = if self.absolute {
            context
                .inclusive_ancestors()
                .last()
                .unwrap_or_else(|| context.clone())
        } else {
            context.clone()
        };

        self.steps.iter().fold(vec![start], |nodes, step| {
            nodes.iter().flat_map(|node| step.select(node)).collect()
        })
    }

    /// Returns the first element matching the path, if any.
    pub fn find_first(&self, context: &NodeRef) -> Option<NodeRef> {
        self.find_all(context).into_iter().next()
    }
}

impl Step {
    /// Selects the children of `parent` matched by this step.
    fn select(&self, parent: &NodeRef) -> Vec<NodeRef> {
        let matching = parent.children().filter(|child| {
            child.as_element().map_or(false, |element| {
                self.name.as_ref().map_or(true, |name| {
                    (*element.name.local).eq_ignore_ascii_case(name)
                })
            })
        });

        match self.position {
            Some(position) => matching.skip(position - 1).take(1).collect(),
            None => matching.collect(),
        }
    }
}

impl FromStr for StructuralPath {
    type Err = eyre::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        ensure!(!value.is_empty(), "empty structural path");
        ensure!(!value.contains("//"), "descendant axis not supported");

        let (absolute, relative) = match value.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, value),
        };

        let steps = relative
            .split('/')
            .map(|step| {
                step.parse()
                    .with_context(|| format!("invalid step `{step}`"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { absolute, steps })
    }
}

impl FromStr for Step {
    type Err = eyre::Report;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let captures = STEP
            .captures(value)
            .ok_or_else(|| eyre!("expected `name` or `name[position]`"))?;

        let name = captures
            .name("name")
            .map(|name| name.as_str())
            .filter(|&name| name != "*")
            .map(str::to_owned);
        let position = match captures.name("position") {
            Some(position) => match position.as_str().parse::<usize>() {
                Ok(0) => bail!("positions start at 1"),
                Ok(position) => Some(position),
                Err(err) => bail!("invalid position: {err}"),
            },
            None => None,
        };

        Ok(Self { name, position })
    }
}

impl fmt::Display for StructuralPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.absolute {
            write!(f, "/")?;
        }
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{}", step.name.as_deref().unwrap_or("*"))?;
            if let Some(position) = step.position {
                write!(f, "[{position}]")?;
            }
        }
        Ok(())
    }
}
