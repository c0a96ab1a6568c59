use crate::analysis::topology;
use crate::compute::{NodeState, RunResults};
use crate::graph::{DependencyGraph, RejectionReason, ResolutionFailure};
use std::fmt::Write;

/// Renders the reason chain of an unresolvable requirement as a tree:
/// each rejected candidate, why it was rejected and, for failed inputs,
/// the same breakdown one level down.
pub fn format_failure(failure: &ResolutionFailure) -> String {
    let mut tracer = Tracer { output: String::new() };
    let _ = writeln!(tracer.output, "RESOLUTION FAILURE for '{}':", failure.requirement());
    let _ = writeln!(tracer.output, "--------------------------------------------------");
    tracer.trace_failure(failure, 1, "");
    let _ = writeln!(tracer.output, "Deepest blocker: {}", failure.deepest_blocker());
    tracer.output
}

/// Lists the nodes of `graph` in dependency order with their inputs and
/// outputs, then the roots and what each resolved to. With `results`, each
/// node also shows its run state.
pub fn format_graph(graph: &DependencyGraph, results: Option<&RunResults>) -> String {
    let mut output = String::new();
    let order = topology::sort(graph).unwrap_or_else(|_| graph.node_ids());

    let _ = writeln!(output, "DEPENDENCY GRAPH ({} nodes) at {}:", graph.node_count(), graph.valuation_time());
    let _ = writeln!(output, "--------------------------------------------------");
    for id in order {
        let Some(node) = graph.node(id) else { continue };
        let state = results.and_then(|r| r.node_state(id)).map(state_label).unwrap_or_default();
        let kind = if node.is_live_data() { " (live data)" } else { "" };
        let _ = writeln!(output, "[{}] {}{}{}", id.index(), node, kind, state);

        let lines: Vec<String> = node
            .inputs()
            .iter()
            .map(|s| format!("in:  {}", s))
            .chain(node.outputs().iter().map(|s| format!("out: {}", s)))
            .collect();
        for (i, line) in lines.iter().enumerate() {
            let connector = if i == lines.len() - 1 { "`--" } else { "|--" };
            let _ = writeln!(output, "    {} {}", connector, line);
        }
    }

    let _ = writeln!(output, "ROOTS:");
    for root in graph.roots() {
        match &root.outcome {
            Ok(spec) => {
                let _ = writeln!(output, "  {} -> {}", root.requirement, spec);
            }
            Err(failure) => {
                let _ = writeln!(output, "  {} -> UNRESOLVED ({})", root.requirement, failure);
            }
        }
    }
    output
}

fn state_label(state: &NodeState) -> String {
    match state {
        NodeState::Pending => " [PENDING]".into(),
        NodeState::Ready => " [READY]".into(),
        NodeState::Running => " [RUNNING]".into(),
        NodeState::Succeeded => " [SUCCEEDED]".into(),
        NodeState::Failed(f) => format!(" [FAILED: {}]", f),
    }
}

struct Tracer {
    output: String,
}

impl Tracer {
    fn trace_failure(&mut self, failure: &ResolutionFailure, level: usize, prefix: &str) {
        let gap = if prefix.is_empty() { "" } else { " " };
        let _ = writeln!(self.output, "{}{}[L{}] {}", prefix, gap, level, describe(failure));

        let rejected = failure.rejected();
        let stem = build_child_stem(prefix);
        for (i, candidate) in rejected.iter().enumerate() {
            let is_last = i == rejected.len() - 1;
            let connector = if is_last { "`--" } else { "|--" };
            match &candidate.reason {
                RejectionReason::InputFailed(inner) => {
                    let _ = writeln!(self.output, "{}{} {}: input unresolvable", stem, connector, candidate.function);
                    let child_stem = format!("{}{}", stem, if is_last { "    " } else { "|   " });
                    self.trace_failure(inner, level + 1, &format!("{}`--", child_stem));
                }
                reason => {
                    let _ = writeln!(self.output, "{}{} {}: {}", stem, connector, candidate.function, reason);
                }
            }
        }
    }
}

fn describe(failure: &ResolutionFailure) -> String {
    match failure {
        ResolutionFailure::TargetNotFound { requirement } => format!("{}: target not found", requirement),
        ResolutionFailure::Unresolvable { requirement, rejected } if rejected.is_empty() => {
            format!("{}: no function produces it", requirement)
        }
        ResolutionFailure::Unresolvable { requirement, rejected } => {
            format!("{}: {} candidate(s) rejected", requirement, rejected.len())
        }
        ResolutionFailure::Cyclic { requirement, path } => {
            let names: Vec<&str> = path.iter().map(|r| r.value_name.as_str()).collect();
            format!("{}: cycle {}", requirement, names.join(" -> "))
        }
        ResolutionFailure::DepthExceeded { requirement, max_depth } => {
            format!("{}: exceeds maximum depth {}", requirement, max_depth)
        }
    }
}

/// Converts a connector prefix into the indentation used by its children.
fn build_child_stem(prefix: &str) -> String {
    prefix.replace("`--", "    ").replace("|--", "|   ")
}
