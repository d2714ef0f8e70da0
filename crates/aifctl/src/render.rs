//! Plain-text rendering for command output.

use serde_json::Value;

/// Render a spec state object as a short detail block.
pub fn render_spec(spec: &Value) -> String {
    let mut out = String::new();
    push_field(&mut out, "slug", spec.get("slug"));
    push_field(&mut out, "phase", spec.get("phase"));
    let completed = spec.get("completed_tasks").and_then(Value::as_u64).unwrap_or(0);
    let total = spec.get("total_tasks").and_then(Value::as_u64).unwrap_or(0);
    out.push_str(&format!("tasks:           {completed}/{total}\n"));
    push_field(&mut out, "review_iteration", spec.get("review_iteration"));
    push_field(&mut out, "worktree_sha8", spec.get("worktree_sha8"));
    if let Some(reason) = spec.get("abort_reason").and_then(Value::as_str) {
        out.push_str(&format!("abort_reason:    {reason}\n"));
    }
    out
}

fn push_field(out: &mut String, label: &str, value: Option<&Value>) {
    let rendered = match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "-".to_string(),
    };
    out.push_str(&format!("{label:<16} {rendered}\n"));
}

/// Render search hits as `score  path  title` lines.
pub fn render_hits(hits: &[Value]) -> String {
    let mut out = String::new();
    for hit in hits {
        let score = hit.get("score").and_then(Value::as_f64).unwrap_or(0.0);
        let path = hit.get("path").and_then(Value::as_str).unwrap_or("-");
        let corpus = hit.get("corpus").and_then(Value::as_str).unwrap_or("-");
        let title = hit.get("title").and_then(Value::as_str).unwrap_or("");
        out.push_str(&format!("{score:.3}  [{corpus}] {path}  {title}\n"));
    }
    if out.is_empty() {
        out.push_str("no results\n");
    }
    out
}

/// Render proposals as a compact list.
pub fn render_proposals(proposals: &[Value]) -> String {
    let mut out = String::new();
    for proposal in proposals {
        let id = proposal
            .get("proposal_id")
            .and_then(Value::as_str)
            .unwrap_or("-");
        let kind = proposal.get("kind").and_then(Value::as_str).unwrap_or("-");
        let confidence = proposal
            .get("confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let title = proposal.get("title").and_then(Value::as_str).unwrap_or("");
        let status = proposal.get("status").and_then(Value::as_str).unwrap_or("");
        out.push_str(&format!(
            "{id}\n  [{kind}] {title} (confidence {confidence:.2}, {status})\n"
        ));
    }
    if out.is_empty() {
        out.push_str("no proposals\n");
    }
    out
}
