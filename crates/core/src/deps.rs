//! Structural dependency extraction.
//!
//! Walks an [`Expression`] without evaluating it. Relationship hops are
//! reported by name only; resolving them to concrete entity ids needs live
//! relationship data and is the context builder's job.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::ast::{Expression, Template};

/// Where a dotted chain starts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TraversalRoot {
    /// `self.a.b`
    SelfEntity,
    /// `<uuid>.a.b` or `@"id".a.b`
    Entity(String),
    /// `#prop.a.b`, starting at whatever entity `#prop` references
    SelfProperty(String),
}

/// A maximal dotted chain, e.g. `self.parent.category.markup` is
/// `{ root: SelfEntity, hops: ["parent", "category", "markup"] }`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Traversal {
    pub root: TraversalRoot,
    pub hops: Vec<String>,
}

impl Traversal {
    /// Dotted path form used in dependency hints.
    pub fn path(&self) -> String {
        let root = match &self.root {
            TraversalRoot::SelfEntity => "self".to_string(),
            TraversalRoot::Entity(id) => id.clone(),
            TraversalRoot::SelfProperty(name) => name.clone(),
        };
        std::iter::once(root)
            .chain(self.hops.iter().cloned())
            .collect::<Vec<_>>()
            .join(".")
    }
}

fn walk<'e>(expr: &'e Expression, visit: &mut dyn FnMut(&'e Expression)) {
    visit(expr);
    match expr {
        Expression::Literal { .. }
        | Expression::SelfProperty { .. }
        | Expression::SelfEntity
        | Expression::EntityRef { .. } => {}
        Expression::Member { object, .. } => walk(object, visit),
        Expression::Unary { operand, .. } => walk(operand, visit),
        Expression::Binary { left, right, .. } => {
            walk(left, visit);
            walk(right, visit);
        }
        Expression::Call { args, .. } => {
            for a in args {
                walk(a, visit);
            }
        }
        Expression::List { items } => {
            for i in items {
                walk(i, visit);
            }
        }
        Expression::Record { fields } => {
            for (_, v) in fields {
                walk(v, visit);
            }
        }
    }
}

/// Every entity id literal in the expression.
pub fn collect_referenced_entity_ids(expr: &Expression) -> BTreeSet<String> {
    let mut ids = BTreeSet::new();
    walk(expr, &mut |e| {
        if let Expression::EntityRef { id } = e {
            ids.insert(id.clone());
        }
    });
    ids
}

/// Every `#name` self-property reference in the expression.
pub fn collect_self_properties(expr: &Expression) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    walk(expr, &mut |e| {
        if let Expression::SelfProperty { name } = e {
            names.insert(name.clone());
        }
    });
    names
}

/// Unwind a member chain into its root and hops. Returns `None` when the
/// chain starts at something other than `self`, an entity id or a property.
fn unwind_chain(expr: &Expression) -> Option<Traversal> {
    let mut hops = Vec::new();
    let mut cur = expr;
    while let Expression::Member { object, member } = cur {
        hops.push(member.clone());
        cur = object;
    }
    if hops.is_empty() {
        return None;
    }
    hops.reverse();
    let root = match cur {
        Expression::SelfEntity => TraversalRoot::SelfEntity,
        Expression::EntityRef { id } => TraversalRoot::Entity(id.clone()),
        Expression::SelfProperty { name } => TraversalRoot::SelfProperty(name.clone()),
        _ => return None,
    };
    Some(Traversal { root, hops })
}

/// Maximal dotted chains in the expression. `self.a.b` yields one traversal
/// with hops `[a, b]`, not also the inner `self.a`.
pub fn collect_traversals(expr: &Expression) -> Vec<Traversal> {
    let mut out = BTreeSet::new();
    collect_traversals_into(expr, &mut out);
    out.into_iter().collect()
}

fn collect_traversals_into(expr: &Expression, out: &mut BTreeSet<Traversal>) {
    match expr {
        Expression::Member { .. } => {
            if let Some(t) = unwind_chain(expr) {
                out.insert(t);
                return;
            }
            // Chain rooted at a call, list or record: look inside the root.
            let mut cur = expr;
            while let Expression::Member { object, .. } = cur {
                cur = object;
            }
            collect_traversals_into(cur, out);
        }
        Expression::Literal { .. }
        | Expression::SelfProperty { .. }
        | Expression::SelfEntity
        | Expression::EntityRef { .. } => {}
        Expression::Unary { operand, .. } => collect_traversals_into(operand, out),
        Expression::Binary { left, right, .. } => {
            collect_traversals_into(left, out);
            collect_traversals_into(right, out);
        }
        Expression::Call { args, .. } => {
            for a in args {
                collect_traversals_into(a, out);
            }
        }
        Expression::List { items } => {
            for i in items {
                collect_traversals_into(i, out);
            }
        }
        Expression::Record { fields } => {
            for (_, v) in fields {
                collect_traversals_into(v, out);
            }
        }
    }
}

/// Sorted, de-duplicated dotted paths an expression reads: `#qty` gives
/// `qty`, `self.parent.price` gives `self.parent.price`.
pub fn dependency_paths(expr: &Expression) -> Vec<String> {
    let mut paths: BTreeSet<String> = collect_self_properties(expr);
    for t in collect_traversals(expr) {
        paths.insert(t.path());
    }
    paths.into_iter().collect()
}

/// Entity ids referenced by any interpolation of a template.
pub fn template_entity_ids(template: &Template) -> BTreeSet<String> {
    template
        .expressions()
        .flat_map(collect_referenced_entity_ids)
        .collect()
}

/// Dependency paths of every interpolation of a template.
pub fn template_dependency_paths(template: &Template) -> Vec<String> {
    let paths: BTreeSet<String> = template.expressions().flat_map(dependency_paths).collect();
    paths.into_iter().collect()
}
