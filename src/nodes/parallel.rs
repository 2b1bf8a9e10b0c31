//! Parallel node: concurrent fan-out to branches, optional fan-in merge.
//!
//! Every branch runs its own chat/tool loop against the shared provider.
//! Branches race individual timeouts but never abort each other; the
//! handler gathers all settled outcomes before emitting.

use std::collections::HashSet;
use std::time::Duration;

use futures_util::future::join_all;
use serde_json::json;
use tracing::warn;

use crate::context::ExecutionContext;
use crate::workflow::{handles, BranchSpec, ParallelData};

use super::chat_loop::{run_chat_loop, ChatLoopSpec, StreamTarget};
use super::{NodeError, NodeExecution, Transition};

pub(crate) async fn execute(
    ctx: &ExecutionContext,
    data: &ParallelData,
) -> Result<NodeExecution, NodeError> {
    if data.branches.is_empty() {
        return Err(NodeError::InvalidConfig(
            "parallel node has no branches".to_string(),
        ));
    }

    let timeout = Duration::from_millis(data.branch_timeout_ms());
    let seed_history = ctx.history();

    let tasks = data.branches.iter().cloned().map(|branch| {
        let ctx = ctx.clone();
        let data = data.clone();
        let seed_history = seed_history.clone();
        tokio::spawn(async move { run_branch(ctx, data, branch, seed_history, timeout).await })
    });

    let mut successes: Vec<(BranchSpec, String)> = Vec::new();
    let mut failures: Vec<(String, String)> = Vec::new();
    for settled in join_all(tasks).await {
        match settled {
            Ok((branch, Ok(output))) => {
                ctx.hooks()
                    .branch_complete(&ctx.node_id, &branch.id, &branch.label, &output);
                successes.push((branch, output));
            }
            Ok((branch, Err(err))) => {
                warn!(node = %ctx.node_id, branch = %branch.id, error = %err, "branch failed");
                failures.push((branch.label.clone(), err.to_string()));
            }
            Err(join_err) => {
                failures.push(("branch".to_string(), join_err.to_string()));
            }
        }
    }
    ctx.ensure_active()?;

    let records: Vec<(String, String)> = successes
        .iter()
        .map(|(branch, output)| (format!("{}:{}", ctx.node_id, branch.id), output.clone()))
        .collect();

    let mut sections = String::new();
    for (branch, output) in &successes {
        sections.push_str(&format!("## {}\n{}\n\n", branch.label, output));
    }
    if !failures.is_empty() {
        sections.push_str("## Errors\n");
        for (label, error) in &failures {
            sections.push_str(&format!("- {label}: {error}\n"));
        }
    }
    let sections = sections.trim_end().to_string();

    let metadata = (!failures.is_empty()).then(|| {
        json!({
            "branchErrors": failures
                .iter()
                .map(|(label, error)| json!({ "branch": label, "error": error }))
                .collect::<Vec<_>>(),
        })
    });

    let execution = if data.merge_enabled() {
        let output = match &data.prompt {
            Some(merge_prompt) => merge_call(ctx, data, merge_prompt, &sections).await?,
            None => sections,
        };
        let next = ctx
            .targets(handles::MERGED)
            .into_iter()
            .map(Transition::to)
            .collect();
        NodeExecution::new(output).with_next(next)
    } else {
        // Splitter: each branch feeds its own handle with its own output.
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut next = Vec::new();
        for (branch, output) in &successes {
            for target in ctx.targets(&branch.id) {
                if seen.insert((branch.id.clone(), target.clone())) {
                    next.push(Transition::with_input(target, output.clone()));
                }
            }
        }
        NodeExecution::new(sections).with_next(next)
    };

    let execution = execution.with_records(records);
    Ok(match metadata {
        Some(metadata) => execution.with_metadata(metadata),
        None => execution,
    })
}

async fn run_branch(
    ctx: ExecutionContext,
    data: ParallelData,
    branch: BranchSpec,
    seed_history: Vec<crate::message::ChatMessage>,
    timeout: Duration,
) -> (BranchSpec, Result<String, NodeError>) {
    ctx.hooks()
        .branch_start(&ctx.node_id, &branch.id, &branch.label);

    let model = match ctx.resolve_model(branch.model.as_deref().or(data.model.as_deref())) {
        Ok(model) => model,
        Err(err) => return (branch, Err(err)),
    };
    let tools = match &branch.tools {
        Some(names) if !names.is_empty() => ctx.tools().resolve(names),
        _ => ctx.tools().all(),
    };

    let spec = ChatLoopSpec {
        model,
        system_prompt: branch.prompt.clone(),
        seed_history,
        user_text: ctx.input.clone(),
        attachments: ctx.attachments(),
        tools,
        temperature: None,
        max_tokens: None,
        max_iterations: ctx.max_tool_iterations(),
        on_limit: ctx.tool_iteration_policy(),
        stream: StreamTarget::Branch {
            branch_id: branch.id.clone(),
            label: branch.label.clone(),
        },
    };

    let result = match tokio::time::timeout(timeout, run_chat_loop(&ctx, spec)).await {
        Ok(outcome) => outcome.map(|outcome| outcome.content),
        Err(_) => Err(NodeError::BranchTimeout {
            branch: branch.id.clone(),
            elapsed_ms: timeout.as_millis() as u64,
        }),
    };
    (branch, result)
}

/// Fan-in LLM call over the concatenated branch outputs.
async fn merge_call(
    ctx: &ExecutionContext,
    data: &ParallelData,
    merge_prompt: &str,
    sections: &str,
) -> Result<String, NodeError> {
    let model = ctx.resolve_model(data.model.as_deref())?;
    let outcome = run_chat_loop(
        ctx,
        ChatLoopSpec {
            model,
            system_prompt: Some(merge_prompt.to_string()),
            seed_history: Vec::new(),
            user_text: sections.to_string(),
            attachments: Vec::new(),
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            max_iterations: 1,
            on_limit: crate::workflow::ToolIterationPolicy::Warning,
            stream: StreamTarget::Merge,
        },
    )
    .await?;
    Ok(outcome.content)
}
