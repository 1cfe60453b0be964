//! Variable containers named by handles, and how debugger values are shown
//!
//! A [`VariableRef`] says where a container's children come from: the
//! arguments and locals of a frame, or the value of an evaluated expression,
//! followed by a path of child indices into nested values. Resolving a handle
//! re-fetches the root from the debugger and walks the path, so nothing below
//! the expanded level is materialised.

use crate::delve::types::{EvalScope, Variable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableSource {
    /// Function arguments followed by local variables of a frame
    Locals,
    /// The value of an expression evaluated in a frame
    Expression(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    pub source: VariableSource,
    pub scope: EvalScope,
    pub child_path: Vec<usize>,
}

impl VariableRef {
    pub fn locals(scope: EvalScope) -> Self {
        Self {
            source: VariableSource::Locals,
            scope,
            child_path: Vec::new(),
        }
    }

    pub fn expression(expression: impl Into<String>, scope: EvalScope) -> Self {
        Self {
            source: VariableSource::Expression(expression.into()),
            scope,
            child_path: Vec::new(),
        }
    }

    /// Reference to the `index`th child of this container
    pub fn child(&self, index: usize) -> Self {
        let mut child = self.clone();
        child.child_path.push(index);
        child
    }
}

/// Walk `path` down from `roots`, returning the children found there
pub fn children_at<'a>(roots: &'a [Variable], path: &[usize]) -> Option<&'a [Variable]> {
    let mut current = roots;
    for &index in path {
        current = &current.get(index)?.children;
    }
    Some(current)
}

// reflect.Kind values reported by the debugger
const KIND_ARRAY: u32 = 17;
const KIND_MAP: u32 = 21;
const KIND_PTR: u32 = 22;
const KIND_SLICE: u32 = 23;
const KIND_STRING: u32 = 24;
const KIND_STRUCT: u32 = 25;

/// Display name; unnamed elements of arrays and slices are shown by index
pub fn display_name(variable: &Variable, index: usize) -> String {
    if variable.name.is_empty() {
        format!("[{index}]")
    } else {
        variable.name.clone()
    }
}

pub fn display_value(variable: &Variable) -> String {
    if !variable.unreadable.is_empty() {
        return format!("<unreadable: {}>", variable.unreadable);
    }

    let type_name = &variable.type_name;
    match variable.kind {
        KIND_SLICE => format!(
            "<{}> (length: {}, cap: {})",
            type_name, variable.len, variable.cap
        ),
        KIND_ARRAY | KIND_MAP => format!("<{}> (length: {})", type_name, variable.len),
        KIND_STRING => format!("\"{}\"", variable.value),
        KIND_PTR if variable.children.is_empty() => format!("nil <{type_name}>"),
        KIND_PTR | KIND_STRUCT => format!("<{type_name}>"),
        _ if variable.value.is_empty() => format!("<{type_name}>"),
        _ => variable.value.clone(),
    }
}
