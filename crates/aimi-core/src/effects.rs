//! Action effects shared by the streaming interpreter and the dispatcher.
//!
//! Both paths hand an accepted record to [`apply`], so they converge on the
//! same state-store representation: the record itself followed, when the
//! action produces a result, by a system-authored follow-up record carrying
//! that result. A failing effect never propagates; it becomes a follow-up
//! whose request is `{"error": "..."}` plus a diagnostic fragment.

use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use aimi_contracts::{
    action::{
        result_call, ActionRecord, ActionToolItem, ExecuteLevel, CHAT_TO_PREFIX,
        OPERATOR_REPLY_CALL,
    },
    error::{AimiError, AimiResult},
    render::{FragmentKind, RenderFragment},
    task::TaskStep,
};

use crate::{context::TurnContext, traits::ToolReply};

pub const SET_TASK_INFO_CALL: &str = "set_task_info";
pub const SET_TASK_STEP_CALL: &str = "set_task_step";
pub const CRITIC_CALL: &str = "critic";
pub const ANALYSIS_CALL: &str = "analysis";
pub const PYTHON_CALL: &str = "chat_to_python";
pub const NOTE_CALL: &str = "chat_to_note";
pub const APPEND_ACTION_CALL: &str = "chat_to_append_action";

/// The request field of `call` whose text is rendered live while it
/// streams, and whose completion fires the action's effect.
pub fn streamed_field(call: &str) -> Option<(&'static str, FragmentKind)> {
    match call {
        OPERATOR_REPLY_CALL => Some(("content", FragmentKind::Operator)),
        PYTHON_CALL => Some(("code", FragmentKind::Code)),
        NOTE_CALL => Some(("content", FragmentKind::Note)),
        _ => None,
    }
}

/// Render the human-readable part of a complete record's request.
pub fn render_request(record: &ActionRecord) -> Option<RenderFragment> {
    if let Some((field, kind)) = streamed_field(&record.call) {
        let text = record.request.get(field).and_then(Value::as_str)?;
        return Some(RenderFragment::new(kind, text));
    }
    (record.call == ANALYSIS_CALL)
        .then(|| RenderFragment::new(FragmentKind::Analysis, describe(&record.request)))
}

fn describe(request: &Value) -> String {
    match request {
        Value::Object(map) => map
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| match value {
                Value::String(s) => format!("{key}: {s}"),
                other => format!("{key}: {other}"),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Run the effect of an accepted record and log its follow-up.
pub fn apply(record: &ActionRecord, ctx: &mut TurnContext<'_>) -> Vec<RenderFragment> {
    let mut out = Vec::new();
    match execute(record, ctx, &mut out) {
        Ok(Some(result)) => {
            let ts = ctx
                .store
                .append(ActionRecord::system(result_call(&record.call), result));
            debug!(call = %record.call, follow_up = ts, "effect result logged");
        }
        Ok(None) => {}
        Err(err) => {
            warn!(call = %record.call, error = %err, "action effect failed");
            out.push(RenderFragment::diagnostic(&err));
            ctx.store.append(ActionRecord::system(
                result_call(&record.call),
                json!({ "error": err.to_string() }),
            ));
        }
    }
    out
}

fn execute(
    record: &ActionRecord,
    ctx: &mut TurnContext<'_>,
    out: &mut Vec<RenderFragment>,
) -> AimiResult<Option<Value>> {
    match record.call.as_str() {
        OPERATOR_REPLY_CALL => {
            let req: ContentRequest = narrow(record)?;
            ctx.collaborators
                .sink
                .deliver(&req.content)
                .map_err(|e| execution_error(record, e))?;
            info!(chars = req.content.chars().count(), "message delivered to operator");
            Ok(None)
        }

        SET_TASK_INFO_CALL => {
            let req: TaskInfoRequest = narrow(record)?;
            let id = ctx
                .store
                .set_task_info(req.task_id.as_deref(), &req.task_info, &req.task_check);
            out.push(RenderFragment::new(
                FragmentKind::Task,
                format!("task {id}: {}", req.task_info),
            ));
            Ok(Some(json!({ "task_id": id })))
        }

        SET_TASK_STEP_CALL => {
            let req: TaskStepRequest = narrow(record)?;
            let task_id = req
                .task_id
                .or_else(|| ctx.store.current_task().map(|t| t.task_id.clone()))
                .ok_or_else(|| shape_error(record, "no task_id and no current task"))?;
            let steps: Vec<TaskStep> = req
                .task_step
                .into_iter()
                .enumerate()
                .map(|(n, s)| TaskStep {
                    step_id: s.step_id.unwrap_or_else(|| (n + 1).to_string()),
                    step: s.step,
                    call: s.call.filter(|c| !c.is_empty()),
                })
                .collect();
            let count = steps.len();

            let registry = &*ctx.registry;
            ctx.store
                .set_task_step(&task_id, steps, req.current_step_id, |call| {
                    registry.allows(call)
                })?;
            out.push(RenderFragment::new(
                FragmentKind::Task,
                format!("task {task_id}: {count} steps"),
            ));
            Ok(Some(json!({ "task_id": task_id, "steps": count })))
        }

        CRITIC_CALL => {
            let req: CriticRequest = narrow(record)?;
            let retired = ctx.store.critic(req.task_id.as_deref(), req.success)?;
            match retired {
                Some(task) => {
                    out.push(RenderFragment::new(
                        FragmentKind::Task,
                        format!("task {} complete", task.task_id),
                    ));
                    Ok(Some(json!({ "task_id": task.task_id, "retired": true })))
                }
                None => Ok(Some(json!({
                    "retired": false,
                    "critique": req.critique.unwrap_or_default(),
                }))),
            }
        }

        ANALYSIS_CALL => Ok(None),

        PYTHON_CALL => {
            let req: CodeRequest = narrow(record)?;
            let outcome = ctx
                .collaborators
                .sandbox
                .run(&req.code)
                .map_err(|e| execution_error(record, e))?;
            if outcome.succeeded() {
                debug!(elapsed_ms = outcome.elapsed_ms, "sandbox run finished");
            } else {
                warn!(
                    exit_status = outcome.exit_status,
                    elapsed_ms = outcome.elapsed_ms,
                    "sandbox run failed"
                );
            }

            let mut text = outcome.stdout.clone();
            if !outcome.stderr.is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&outcome.stderr);
            }
            out.push(RenderFragment::new(FragmentKind::CodeOutput, text));
            Ok(Some(json!({
                "exit_status": outcome.exit_status,
                "stdout": outcome.stdout,
                "stderr": outcome.stderr,
                "elapsed_ms": outcome.elapsed_ms,
            })))
        }

        NOTE_CALL => {
            let req: ContentRequest = narrow(record)?;
            let evicted = ctx.store.push_note(req.content)?;
            Ok(Some(json!({ "stored": true, "evicted": evicted })))
        }

        APPEND_ACTION_CALL => {
            let req: AppendActionRequest = narrow(record)?;
            let call = if req.call.starts_with(CHAT_TO_PREFIX) {
                req.call
            } else {
                format!("{CHAT_TO_PREFIX}{}", req.call)
            };
            let execute = req
                .execute
                .as_deref()
                .and_then(ExecuteLevel::parse)
                .unwrap_or(ExecuteLevel::System);

            ctx.registry
                .register(ActionToolItem {
                    call: call.clone(),
                    description: req.description,
                    request: req.request,
                    execute,
                    request_schema: None,
                    tool: None,
                })
                .map_err(|e| execution_error(record, e))?;
            info!(call = %call, execute = execute.as_str(), "self-authored action registered");
            Ok(Some(json!({ "call": call })))
        }

        call => {
            let tool = ctx.registry.get(call).and_then(|item| item.tool.clone());
            match tool {
                Some(tool) => query_tool(record, &tool, ctx, out).map(Some),
                None => {
                    debug!(call = %call, "action has no runtime effect");
                    Ok(None)
                }
            }
        }
    }
}

fn query_tool(
    record: &ActionRecord,
    tool: &str,
    ctx: &mut TurnContext<'_>,
    out: &mut Vec<RenderFragment>,
) -> AimiResult<Value> {
    let client = ctx.collaborators.tool(tool).ok_or_else(|| AimiError::ActionExecution {
        call: record.call.clone(),
        reason: format!("no tool client named '{tool}'"),
    })?;

    let reply = client
        .query(&record.request)
        .map_err(|e| execution_error(record, e))?;

    let content = match reply {
        ToolReply::Text(text) => {
            out.push(RenderFragment::new(FragmentKind::ToolOutput, text.clone()));
            text
        }
        ToolReply::Stream(pieces) => {
            let mut content = String::new();
            for piece in pieces {
                let piece = piece.map_err(|e| execution_error(record, e))?;
                out.push(RenderFragment::new(FragmentKind::ToolOutput, piece.clone()));
                content.push_str(&piece);
            }
            content
        }
    };
    debug!(tool = %tool, chars = content.len(), "tool answered");
    Ok(json!({ "content": content }))
}

// ── Request narrowing ─────────────────────────────────────────────────────────

fn narrow<T: DeserializeOwned>(record: &ActionRecord) -> AimiResult<T> {
    serde_json::from_value(record.request.clone()).map_err(|e| shape_error(record, e))
}

fn shape_error(record: &ActionRecord, reason: impl ToString) -> AimiError {
    AimiError::RequestShape {
        call: record.call.clone(),
        reason: reason.to_string(),
    }
}

fn execution_error(record: &ActionRecord, err: AimiError) -> AimiError {
    match err {
        AimiError::ActionExecution { .. } => err,
        other => AimiError::ActionExecution {
            call: record.call.clone(),
            reason: other.to_string(),
        },
    }
}

/// Ids arrive as strings or numbers.
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(b) => b,
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1"
        ),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    })
}

#[derive(Deserialize)]
struct ContentRequest {
    content: String,
}

#[derive(Deserialize)]
struct CodeRequest {
    code: String,
}

#[derive(Deserialize)]
struct TaskInfoRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    task_id: Option<String>,
    task_info: String,
    #[serde(default)]
    task_check: String,
}

#[derive(Deserialize)]
struct StepRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    step_id: Option<String>,
    #[serde(default)]
    step: String,
    #[serde(default)]
    call: Option<String>,
}

#[derive(Deserialize)]
struct TaskStepRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    task_id: Option<String>,
    task_step: Vec<StepRequest>,
    #[serde(default, deserialize_with = "lenient_id")]
    current_step_id: Option<String>,
}

#[derive(Deserialize)]
struct CriticRequest {
    #[serde(default, deserialize_with = "lenient_id")]
    task_id: Option<String>,
    #[serde(deserialize_with = "lenient_bool")]
    success: bool,
    #[serde(default)]
    critique: Option<String>,
}

#[derive(Deserialize)]
struct AppendActionRequest {
    call: String,
    description: String,
    #[serde(default)]
    execute: Option<String>,
    #[serde(default)]
    request: Value,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use aimi_contracts::{
        action::{ActionRecord, ExecuteLevel},
        render::FragmentKind,
    };

    use super::*;
    use crate::testing::Harness;

    fn record(call: &str, request: Value) -> ActionRecord {
        ActionRecord {
            request,
            ..ActionRecord::new(call, ExecuteLevel::System)
        }
    }

    fn last_call(h: &Harness) -> (String, Value) {
        let last = h.store.log().last().unwrap();
        (last.call.clone(), last.request.clone())
    }

    // ── Operator and notes ────────────────────────────────────────────────────

    #[test]
    fn operator_reply_is_delivered_without_follow_up() {
        let mut h = Harness::new();
        let out = apply(
            &record("chat_to_operator", json!({ "content": "hello" })),
            &mut h.ctx(),
        );
        assert!(out.is_empty());
        assert_eq!(h.delivered(), vec!["hello"]);
        assert_eq!(h.store.log_len(), 0);
    }

    #[test]
    fn failed_delivery_logs_error_result() {
        let mut h = Harness::with_failing_sink();
        let out = apply(
            &record("chat_to_operator", json!({ "content": "hello" })),
            &mut h.ctx(),
        );
        assert_eq!(out[0].kind, FragmentKind::Diagnostic);
        let (call, request) = last_call(&h);
        assert_eq!(call, "chat_to_operator_result");
        assert!(request["error"].as_str().unwrap().contains("gateway down"));
    }

    #[test]
    fn wrong_shape_becomes_error_result() {
        let mut h = Harness::new();
        apply(&record("chat_to_note", json!({ "text": "x" })), &mut h.ctx());
        let (call, request) = last_call(&h);
        assert_eq!(call, "chat_from_note");
        assert!(request["error"]
            .as_str()
            .unwrap()
            .contains("has the wrong shape"));
        assert!(h.store.notes().is_empty());
    }

    #[test]
    fn note_is_stored_with_follow_up() {
        let mut h = Harness::new();
        apply(&record("chat_to_note", json!({ "content": "remember" })), &mut h.ctx());
        assert_eq!(h.store.notes(), ["remember"]);
        let (call, request) = last_call(&h);
        assert_eq!(call, "chat_from_note");
        assert_eq!(request["stored"], true);
    }

    // ── Sandbox ───────────────────────────────────────────────────────────────

    #[test]
    fn python_runs_in_sandbox_and_reports_outcome() {
        let mut h = Harness::new();
        let out = apply(
            &record("chat_to_python", json!({ "code": "print(1)" })),
            &mut h.ctx(),
        );
        assert_eq!(h.runs(), vec!["print(1)"]);
        assert_eq!(out[0].kind, FragmentKind::CodeOutput);
        assert_eq!(out[0].text, "ran: print(1)\n");

        let (call, request) = last_call(&h);
        assert_eq!(call, "chat_from_python");
        assert_eq!(request["exit_status"], 0);
    }

    // ── Tasks ─────────────────────────────────────────────────────────────────

    #[test]
    fn task_info_step_and_critic() {
        let mut h = Harness::new();
        apply(
            &record("set_task_info", json!({ "task_info": "write", "task_check": "done" })),
            &mut h.ctx(),
        );
        assert_eq!(last_call(&h).1, json!({ "task_id": "1" }));

        apply(
            &record(
                "set_task_step",
                json!({ "task_step": [
                    { "step_id": 1, "step": "draft", "call": "analysis" },
                    { "step": "send", "call": "chat_to_operator" }
                ]}),
            ),
            &mut h.ctx(),
        );
        let task = h.store.task("1").unwrap();
        assert_eq!(task.task_step[1].step_id, "2");
        assert_eq!(task.current_step_id.as_deref(), Some("1"));

        apply(&record("critic", json!({ "success": "true" })), &mut h.ctx());
        assert!(h.store.task("1").is_none());
        assert_eq!(last_call(&h).1["retired"], true);
    }

    #[test]
    fn task_step_with_unregistered_call_is_rejected() {
        let mut h = Harness::new();
        apply(&record("set_task_info", json!({ "task_info": "goal" })), &mut h.ctx());
        apply(
            &record(
                "set_task_step",
                json!({ "task_id": "1", "task_step": [{ "step": "x", "call": "rm_rf" }] }),
            ),
            &mut h.ctx(),
        );
        let (call, request) = last_call(&h);
        assert_eq!(call, "set_task_step_result");
        assert!(request["error"].as_str().unwrap().contains("rm_rf"));
    }

    // ── Self-authored actions ─────────────────────────────────────────────────

    #[test]
    fn append_action_prefixes_and_refuses_duplicates() {
        let mut h = Harness::new();
        let req = json!({ "call": "summarise", "description": "sum up", "execute": "AI" });
        apply(&record("chat_to_append_action", req.clone()), &mut h.ctx());
        assert_eq!(
            h.registry.execute_level("chat_to_summarise"),
            Some(ExecuteLevel::Ai)
        );
        assert_eq!(last_call(&h).1, json!({ "call": "chat_to_summarise" }));

        let out = apply(&record("chat_to_append_action", req), &mut h.ctx());
        assert_eq!(out[0].kind, FragmentKind::Diagnostic);
        assert!(last_call(&h).1["error"]
            .as_str()
            .unwrap()
            .contains("already exists"));
    }

    // ── Tools ─────────────────────────────────────────────────────────────────

    #[test]
    fn tool_reply_text_and_stream() {
        let mut h = Harness::new();
        let out = apply(
            &record("chat_to_wolfram", json!({ "question": "2+2" })),
            &mut h.ctx(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(last_call(&h), ("chat_from_wolfram".to_string(), json!({ "content": "4" })));

        let out = apply(
            &record("chat_to_bing", json!({ "question": "news" })),
            &mut h.ctx(),
        );
        let texts: Vec<&str> = out.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["one ", "two"]);
        assert_eq!(last_call(&h).1, json!({ "content": "one two" }));
    }

    #[test]
    fn missing_tool_client_is_execution_error() {
        let mut h = Harness::new();
        apply(&record("chat_to_google", json!({ "question": "q" })), &mut h.ctx());
        let (call, request) = last_call(&h);
        assert_eq!(call, "chat_from_google");
        assert!(request["error"]
            .as_str()
            .unwrap()
            .contains("no tool client named 'google'"));
    }

    // ── Rendering ─────────────────────────────────────────────────────────────

    #[test]
    fn render_request_by_call() {
        let analysis = record("analysis", json!({ "type": "object", "problem": "p" }));
        let fragment = render_request(&analysis).unwrap();
        assert_eq!(fragment.kind, FragmentKind::Analysis);
        assert_eq!(fragment.text, "problem: p");

        let code = record("chat_to_python", json!({ "code": "x = 1" }));
        assert_eq!(render_request(&code).unwrap().kind, FragmentKind::Code);

        assert!(render_request(&record("critic", json!({}))).is_none());
    }
}
