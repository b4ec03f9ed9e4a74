use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::span::{SourceId, Span};

/// Stable index of a file-stack node. Sections, symbols, and patches record
/// node ids rather than holding onto the context that created them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    File { name: String },
    /// Iteration counts, innermost first.
    Rept { iters: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub parent: Option<NodeId>,
    /// Line in the parent context at which this context was entered.
    pub line: u32,
    pub kind: NodeKind,
}

/// Where a directive came from: the context node plus the line and byte span
/// within that context's source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub node: NodeId,
    pub line: u32,
    pub span: Span,
}

impl SourceLocation {
    /// Placeholder location for state created before any file is open.
    pub fn top_level() -> Self {
        Self {
            node: NodeId(0),
            line: 0,
            span: Span::new(SourceId(0), 0, 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
    line_starts: Vec<usize>,
}

impl SourceFile {
    fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (offset, ch) in text.char_indices() {
            if ch == '\n' {
                line_starts.push(offset + 1);
            }
        }

        Self {
            name: name.into(),
            text,
            line_starts,
        }
    }

    /// 1-based line number containing `offset`.
    pub fn line_of(&self, offset: usize) -> u32 {
        let line_idx = self
            .line_starts
            .partition_point(|line_start| *line_start <= offset)
            .saturating_sub(1);
        line_idx as u32 + 1
    }
}

/// Arena of nested source contexts: the root file, `INCLUDE`d files, and
/// REPT/FOR blocks. Nodes are append-only; the active stack tracks which
/// context is currently being read.
#[derive(Debug, Default)]
pub struct FileStack {
    sources: Vec<SourceFile>,
    nodes: Vec<Node>,
    active: Vec<ActiveContext>,
    include_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveContext {
    node: NodeId,
    source_id: SourceId,
}

impl FileStack {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self {
            include_paths,
            ..Self::default()
        }
    }

    pub fn add_source(&mut self, name: impl Into<String>, text: impl Into<String>) -> SourceId {
        let id = SourceId(self.sources.len() as u32);
        self.sources.push(SourceFile::new(name, text));
        id
    }

    pub fn source(&self, id: SourceId) -> &SourceFile {
        &self.sources[id.0 as usize]
    }

    pub fn try_source(&self, id: SourceId) -> Option<&SourceFile> {
        self.sources.get(id.0 as usize)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of contexts currently open (1 = just the root file).
    pub fn depth(&self) -> usize {
        self.active.len()
    }

    pub fn current_node(&self) -> NodeId {
        self.active.last().map(|ctx| ctx.node).unwrap_or(NodeId(0))
    }

    pub fn current_source(&self) -> SourceId {
        self.active
            .last()
            .map(|ctx| ctx.source_id)
            .unwrap_or(SourceId(0))
    }

    pub fn location(&self, span: Span) -> SourceLocation {
        let line = self.source(span.source_id).line_of(span.start);
        SourceLocation {
            node: self.current_node(),
            line,
            span,
        }
    }

    /// Open the main input file; must be the first context entered.
    pub fn open_root(&mut self, name: impl Into<String>, text: impl Into<String>) -> SourceId {
        let name = name.into();
        let source_id = self.add_source(name.clone(), text);
        let node = self.push_node(Node {
            parent: None,
            line: 0,
            kind: NodeKind::File { name },
        });
        self.active.push(ActiveContext { node, source_id });
        source_id
    }

    /// Search the include paths for `name`, trying the bare path first.
    /// Directories are not acceptable matches.
    pub fn find_file(&self, name: &str) -> Option<PathBuf> {
        let bare = PathBuf::from(name);
        if is_readable_file(&bare) {
            return Some(bare);
        }
        for dir in &self.include_paths {
            let candidate = dir.join(name);
            if is_readable_file(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    /// Enter an included file. `entered_at` is the line of the INCLUDE
    /// directive in the current context.
    pub fn enter_include(
        &mut self,
        name: impl Into<String>,
        text: impl Into<String>,
        entered_at: u32,
    ) -> SourceId {
        let name = name.into();
        let source_id = self.add_source(name.clone(), text);
        let node = self.push_node(Node {
            parent: Some(self.current_node()),
            line: entered_at,
            kind: NodeKind::File { name },
        });
        self.active.push(ActiveContext { node, source_id });
        source_id
    }

    /// Enter the first iteration of a REPT/FOR block at `entered_at`.
    pub fn enter_rept(&mut self, entered_at: u32) -> NodeId {
        let mut iters = vec![1];
        if let NodeKind::Rept { iters: parent } = &self.node(self.current_node()).kind {
            iters.extend_from_slice(parent);
        }
        let source_id = self.current_source();
        let node = self.push_node(Node {
            parent: Some(self.current_node()),
            line: entered_at,
            kind: NodeKind::Rept { iters },
        });
        self.active.push(ActiveContext { node, source_id });
        node
    }

    /// Advance the innermost REPT/FOR context to its next iteration. A fresh
    /// node is allocated so earlier iterations keep their identity.
    pub fn next_rept_iteration(&mut self) -> NodeId {
        let current = self.current_node();
        let (parent, line, mut iters) = match &self.node(current).kind {
            NodeKind::Rept { iters } => {
                let node = self.node(current);
                (node.parent, node.line, iters.clone())
            }
            NodeKind::File { .. } => return current,
        };
        iters[0] += 1;
        let node = self.push_node(Node {
            parent,
            line,
            kind: NodeKind::Rept { iters },
        });
        if let Some(ctx) = self.active.last_mut() {
            ctx.node = node;
        }
        node
    }

    pub fn leave(&mut self) {
        self.active.pop();
    }

    /// Render the chain of contexts leading to `node`, ending with `line`,
    /// e.g. `main.asm(3) -> lib.inc::REPT~2(7)`.
    pub fn backtrace(&self, node: NodeId, line: u32) -> String {
        let mut out = String::new();
        self.write_chain(node, &mut out);
        let _ = write!(out, "({line})");
        out
    }

    fn write_chain(&self, id: NodeId, out: &mut String) -> String {
        let Some(node) = self.nodes.get(id.0 as usize) else {
            out.push_str("at top level");
            return String::new();
        };
        match &node.kind {
            NodeKind::Rept { iters } => {
                // REPT contexts always have a parent.
                let name = match node.parent {
                    Some(parent) => self.write_chain(parent, out),
                    None => String::new(),
                };
                let _ = write!(out, "({}) -> {}", node.line, name);
                for iter in iters.iter().rev() {
                    let _ = write!(out, "::REPT~{iter}");
                }
                name
            }
            NodeKind::File { name } => {
                if let Some(parent) = node.parent {
                    self.write_chain(parent, out);
                    let _ = write!(out, "({}) -> {}", node.line, name);
                } else {
                    out.push_str(name);
                }
                name.clone()
            }
        }
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }
}

fn is_readable_file(path: &Path) -> bool {
    path.metadata().map(|meta| meta.is_file()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_numbers_are_one_based() {
        let file = SourceFile::new("test", "first\nsecond\nthird");
        assert_eq!(file.line_of(0), 1);
        assert_eq!(file.line_of(7), 2);
        assert_eq!(file.line_of(14), 3);
    }

    #[test]
    fn backtrace_walks_include_chain() {
        let mut fstack = FileStack::default();
        fstack.open_root("main.asm", "INCLUDE \"lib.inc\"\n");
        fstack.enter_include("lib.inc", "DB 0\n", 1);
        let trace = fstack.backtrace(fstack.current_node(), 4);
        assert_eq!(trace, "main.asm(1) -> lib.inc(4)");
    }

    #[test]
    fn rept_iterations_allocate_fresh_nodes() {
        let mut fstack = FileStack::default();
        fstack.open_root("main.asm", "REPT 2\nDB 0\nENDR\n");
        let first = fstack.enter_rept(1);
        let second = fstack.next_rept_iteration();
        assert_ne!(first, second);
        assert_eq!(
            fstack.node(second).kind,
            NodeKind::Rept { iters: vec![2] }
        );
        // The first iteration's node is untouched.
        assert_eq!(fstack.node(first).kind, NodeKind::Rept { iters: vec![1] });
        let trace = fstack.backtrace(second, 2);
        assert_eq!(trace, "main.asm(1) -> main.asm::REPT~2(2)");
    }

    #[test]
    fn nested_rept_extends_iteration_counts() {
        let mut fstack = FileStack::default();
        fstack.open_root("main.asm", "");
        fstack.enter_rept(1);
        fstack.next_rept_iteration();
        let inner = fstack.enter_rept(2);
        assert_eq!(
            fstack.node(inner).kind,
            NodeKind::Rept {
                iters: vec![1, 2]
            }
        );
    }

    #[test]
    fn find_file_rejects_directories() {
        let fstack = FileStack::new(vec![std::env::temp_dir()]);
        assert!(fstack.find_file(".").is_none());
    }
}
