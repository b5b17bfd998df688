//! Message validation rulebook
//!
//! Returns the complete list of violations rather than failing fast, so
//! an operator fixing a hand-built message sees every problem in one
//! round trip. The router rejects any message for which this list is
//! non-empty.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Value};

use super::types::{ActionType, BodyEncoding, MessageType, coerce_u64, is_int_like, normalize_to};

const ISSUE_CATEGORIES: [&str; 5] = ["func", "perf", "ux", "security", "docs"];
const SEVERITY_LEVELS: [&str; 3] = ["high", "medium", "low"];

/// Validates a raw message payload against the protocol rulebook.
///
/// With `allow_missing_generated` set, the router-assigned fields
/// (`seq`, `id`, `ts`) may be absent; that is the ingress mode. Replayed
/// log records are checked with it unset.
#[must_use]
pub fn validate_message(message: &Value, allow_missing_generated: bool) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(fields) = message.as_object() else {
        return vec!["message must be a JSON object".to_string()];
    };

    let mut required = vec!["v", "session", "epoch", "agent_instance", "from", "to", "type"];
    if !allow_missing_generated {
        required.extend(["seq", "id", "ts"]);
    }
    for key in required {
        if !fields.contains_key(key) {
            errors.push(format!("missing field: {key}"));
        }
    }

    if let Some(v) = fields.get("v")
        && !is_int_like(v)
    {
        errors.push("v must be int-like".to_string());
    }
    if let Some(session) = fields.get("session")
        && !session.is_string()
    {
        errors.push("session must be string".to_string());
    }
    for key in ["epoch", "seq", "ts"] {
        if let Some(value) = fields.get(key)
            && !is_int_like(value)
        {
            errors.push(format!("{key} must be int-like"));
        }
    }
    for key in ["agent_instance", "from"] {
        if let Some(value) = fields.get(key)
            && !value.is_string()
        {
            errors.push(format!("{key} must be string"));
        }
    }

    let to_list = match fields.get("to").map(normalize_to) {
        Some(Ok(targets)) => Some(targets),
        Some(Err(reason)) => {
            errors.push(format!("to invalid: {reason}"));
            None
        }
        None => None,
    };

    let type_str = fields.get("type").and_then(Value::as_str);
    let msg_type = match fields.get("type") {
        Some(Value::String(raw)) => {
            let parsed = MessageType::parse(raw);
            if parsed.is_none() {
                errors.push(format!("type invalid: {raw}"));
            }
            parsed
        }
        Some(_) => {
            errors.push("type must be string".to_string());
            None
        }
        None => None,
    };

    let action = match fields.get("action") {
        Some(Value::String(raw)) => {
            let parsed = ActionType::parse(raw);
            if parsed.is_none() {
                errors.push(format!("action invalid: {raw}"));
            }
            parsed
        }
        Some(_) => {
            errors.push("action must be string".to_string());
            None
        }
        None => None,
    };

    if let Some(corr) = fields.get("corr")
        && !corr.is_string()
    {
        errors.push("corr must be string".to_string());
    }
    if let Some(task_id) = fields.get("task_id")
        && !task_id.is_string()
    {
        errors.push("task_id must be string".to_string());
    }
    for key in ["deadline", "ttl_ms"] {
        if let Some(value) = fields.get(key)
            && !is_int_like(value)
        {
            errors.push(format!("{key} must be int-like"));
        }
    }

    let has_body = fields.contains_key("body");
    let has_body_ref = fields.contains_key("body_ref");
    let explicit_encoding = fields.get("body_encoding").and_then(Value::as_str);
    if let Some(value) = fields.get("body_encoding")
        && !value.is_string()
    {
        errors.push("body_encoding must be string".to_string());
    }
    let body_encoding = match explicit_encoding {
        Some(raw) => {
            let parsed = BodyEncoding::parse(raw);
            if parsed.is_none() {
                errors.push(format!("body_encoding invalid: {raw}"));
            }
            parsed
        }
        None if has_body || has_body_ref => Some(BodyEncoding::Json),
        None => None,
    };

    let body_value = fields.get("body").and_then(Value::as_str);
    if has_body {
        match fields.get("body") {
            Some(Value::String(body)) => {
                if body.contains('\n') || body.contains('\r') {
                    errors.push("body must be single-line string".to_string());
                }
            }
            _ => errors.push("body must be string".to_string()),
        }
    }
    if has_body_ref && !fields.get("body_ref").is_some_and(Value::is_string) {
        errors.push("body_ref must be string".to_string());
    }

    let mut parsed_body: Option<Map<String, Value>> = None;
    if body_encoding == Some(BodyEncoding::Json) {
        if let Some(body) = body_value {
            if body.is_empty() && !has_body_ref {
                errors.push("body is empty for json encoding".to_string());
            } else if !body.is_empty() {
                match serde_json::from_str::<Value>(body) {
                    Ok(Value::Object(object)) => parsed_body = Some(object),
                    Ok(_) => errors.push("body must be JSON object".to_string()),
                    Err(parse_err) => errors.push(format!("body json invalid: {parse_err}")),
                }
            }
        } else if !has_body_ref {
            errors.push("body missing for json encoding".to_string());
        }
    }

    if body_encoding == Some(BodyEncoding::Base64)
        && let Some(body) = body_value
        && BASE64.decode(body).is_err()
    {
        errors.push("body base64 invalid".to_string());
    }

    if let Some(kind) = msg_type
        && kind != MessageType::Ask
        && !fields.get("corr").and_then(Value::as_str).is_some_and(|corr| !corr.is_empty())
    {
        errors.push("corr required for non-ask messages".to_string());
    }

    match action {
        Some(ActionType::Review) => check_review(
            type_str,
            body_encoding,
            parsed_body.as_ref(),
            to_list.as_deref(),
            &mut errors,
        ),
        Some(ActionType::Assign) => {
            check_assign(fields, type_str, body_encoding, parsed_body.as_ref(), &mut errors);
        }
        Some(ActionType::Clarify) => {
            check_clarify(fields, type_str, body_encoding, parsed_body.as_ref(), &mut errors);
        }
        Some(ActionType::Verify) => {
            check_verify(fields, type_str, body_encoding, parsed_body.as_ref(), &mut errors);
        }
        Some(ActionType::ReviewFeedback) => {
            check_review_feedback(fields, type_str, body_encoding, parsed_body.as_ref(), &mut errors);
        }
        Some(ActionType::Answer) => {
            check_answer(fields, type_str, body_encoding, parsed_body.as_ref(), &mut errors);
        }
        Some(ActionType::Verified) | None => {}
    }

    if msg_type == Some(MessageType::Done) {
        require_str_field(fields, "task_id", "message", &mut errors);
        if action == Some(ActionType::Verified) {
            if let Some(body) =
                require_json_body("verified", body_encoding, parsed_body.as_ref(), &mut errors)
            {
                check_verified_body(body, &mut errors);
            }
        } else if body_encoding == Some(BodyEncoding::Json)
            && let Some(body) = parsed_body.as_ref()
            && body.contains_key("status")
        {
            require_str_field(body, "status", "done.body", &mut errors);
        }
    }

    if msg_type == Some(MessageType::Fail) {
        require_str_field(fields, "task_id", "message", &mut errors);
        if let Some(body) = require_json_body("fail", body_encoding, parsed_body.as_ref(), &mut errors)
        {
            require_str_field(body, "reason", "fail.body", &mut errors);
            optional_list_of_strings(body, "blocked_by", "fail.body", &mut errors);
        }
    }

    errors
}

fn check_review(
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    to_list: Option<&[String]>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "ask") {
        errors.push("review requires type ask".to_string());
    }
    let Some(body) = require_json_body("review", body_encoding, parsed_body, errors) else {
        return;
    };
    require_str_field(body, "doc_path", "review.body", errors);
    require_int_field(body, "review_deadline", "review.body", errors);
    match body.get("reviewers").and_then(Value::as_array) {
        Some(reviewers) if !reviewers.is_empty() => {
            if reviewers.iter().any(|item| !is_non_empty_string(item)) {
                errors.push("review.body.reviewers must be list of strings".to_string());
            } else if let Some(to_list) = to_list {
                let names: Vec<&str> = reviewers.iter().filter_map(Value::as_str).collect();
                if names != to_list.iter().map(String::as_str).collect::<Vec<_>>() {
                    errors.push("review.body.reviewers must match to".to_string());
                }
            }
        }
        _ => errors.push("review.body.reviewers must be non-empty list".to_string()),
    }
    if let Some(focus) = body.get("focus") {
        match focus.as_array() {
            Some(items) => {
                if items.iter().any(|item| !is_non_empty_string(item)) {
                    errors.push("review.body.focus must be list of non-empty strings".to_string());
                }
            }
            None => errors.push("review.body.focus must be list".to_string()),
        }
    }
}

fn check_assign(
    fields: &Map<String, Value>,
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "ask") {
        errors.push("assign requires type ask".to_string());
    }
    require_str_field(fields, "task_id", "message", errors);
    require_str_field(fields, "owner", "message", errors);
    require_int_field(fields, "deadline", "message", errors);
    if let Some(body) = require_json_body("assign", body_encoding, parsed_body, errors) {
        require_str_field(body, "task_type", "assign.body", errors);
        require_list_of_strings(body, "files", "assign.body", errors);
        require_list_of_strings(body, "success_criteria", "assign.body", errors);
        optional_list_of_strings(body, "dependencies", "assign.body", errors);
    }
}

fn check_clarify(
    fields: &Map<String, Value>,
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "ask") {
        errors.push("clarify requires type ask".to_string());
    }
    require_str_field(fields, "task_id", "message", errors);
    require_str_field(fields, "owner", "message", errors);
    if let Some(body) = require_json_body("clarify", body_encoding, parsed_body, errors) {
        require_str_field(body, "code_path", "clarify.body", errors);
        require_str_field(body, "question", "clarify.body", errors);
        require_str_field(body, "context", "clarify.body", errors);
        optional_str_field(body, "expected", "clarify.body", errors);
        optional_str_field(body, "doc_path", "clarify.body", errors);
    }
}

fn check_verify(
    fields: &Map<String, Value>,
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "ask") {
        errors.push("verify requires type ask".to_string());
    }
    require_str_field(fields, "task_id", "message", errors);
    require_str_field(fields, "owner", "message", errors);
    if let Some(body) = require_json_body("verify", body_encoding, parsed_body, errors) {
        require_str_field(body, "doc_path", "verify.body", errors);
        require_str_field(body, "question", "verify.body", errors);
        optional_str_field(body, "changes_summary", "verify.body", errors);
    }
}

fn check_review_feedback(
    fields: &Map<String, Value>,
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "report") {
        errors.push("review_feedback requires type report".to_string());
    }
    require_str_field(fields, "task_id", "message", errors);
    let Some(body) = require_json_body("review_feedback", body_encoding, parsed_body, errors) else {
        return;
    };
    require_str_field(body, "doc_path", "review_feedback.body", errors);
    let has_issues = require_bool_field(body, "has_issues", "review_feedback.body", errors);
    let issue_count = require_int_field(body, "issue_count", "review_feedback.body", errors);
    let issues = body.get("issues");

    if has_issues == Some(true) {
        if issue_count.is_some_and(|count| count == 0) {
            errors.push("review_feedback.body.issue_count must be > 0 when has_issues=true".to_string());
        }
        if !issues.and_then(Value::as_array).is_some_and(|list| !list.is_empty()) {
            errors.push(
                "review_feedback.body.issues must be non-empty list when has_issues=true".to_string(),
            );
        }
    } else if has_issues == Some(false) {
        if issue_count.is_some_and(|count| count != 0) {
            errors.push("review_feedback.body.issue_count must be 0 when has_issues=false".to_string());
        }
        if issues.and_then(Value::as_array).is_some_and(|list| !list.is_empty()) {
            errors.push("review_feedback.body.issues must be empty when has_issues=false".to_string());
        }
    }

    if let Some(issues) = issues.and_then(Value::as_array) {
        if let Some(count) = issue_count
            && issues.len() as u64 != count
        {
            errors.push("review_feedback.body.issue_count must match issues length".to_string());
        }
        for (index, issue) in issues.iter().enumerate() {
            let context = format!("review_feedback.body.issues[{index}]");
            let Some(issue) = issue.as_object() else {
                errors.push(format!("{context} must be object"));
                continue;
            };
            require_str_field(issue, "doc_path", &context, errors);
            let issue_text = issue.get("issue");
            let summary_text = issue.get("summary");
            if !issue_text.is_some_and(is_non_empty_string)
                && !summary_text.is_some_and(is_non_empty_string)
            {
                errors.push(format!("{context}.issue or {context}.summary required"));
            }
            if issue_text.is_some_and(|text| !is_non_empty_string(text)) {
                errors.push(format!("{context}.issue must be non-empty string"));
            }
            if summary_text.is_some_and(|text| !is_non_empty_string(text)) {
                errors.push(format!("{context}.summary must be non-empty string"));
            }
            match issue.get("category").and_then(Value::as_str) {
                Some(category) if ISSUE_CATEGORIES.contains(&category) => {}
                Some(category) => errors.push(format!("{context}.category invalid: {category}")),
                None => errors.push(format!("{context}.category must be non-empty string")),
            }
            match issue.get("severity").and_then(Value::as_str) {
                Some(severity) if SEVERITY_LEVELS.contains(&severity) => {}
                Some(severity) => errors.push(format!("{context}.severity invalid: {severity}")),
                None => errors.push(format!("{context}.severity must be non-empty string")),
            }
            optional_str_field(issue, "code_path", &context, errors);
            optional_list_of_strings(issue, "code_paths", &context, errors);
            optional_list_of_strings(issue, "doc_paths", &context, errors);
            optional_str_field(issue, "issue_group", &context, errors);
            optional_str_field(issue, "suggested_fix", &context, errors);
            optional_str_field(issue, "suggestion", &context, errors);
        }
    }

    optional_str_field(body, "summary", "review_feedback.body", errors);
    if let Some(questions) = body.get("questions") {
        match questions.as_array() {
            Some(items) => {
                if items.iter().any(|item| !is_non_empty_string(item)) {
                    errors.push(
                        "review_feedback.body.questions must be list of non-empty strings".to_string(),
                    );
                }
            }
            None => errors.push("review_feedback.body.questions must be list".to_string()),
        }
    }
}

fn check_answer(
    fields: &Map<String, Value>,
    type_str: Option<&str>,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&Map<String, Value>>,
    errors: &mut Vec<String>,
) {
    if type_str.is_some_and(|kind| kind != "send") {
        errors.push("answer requires type send".to_string());
    }
    require_str_field(fields, "task_id", "message", errors);
    if let Some(body) = require_json_body("answer", body_encoding, parsed_body, errors)
        && body.is_empty()
    {
        errors.push("answer.body must not be empty object".to_string());
    }
}

fn check_verified_body(body: &Map<String, Value>, errors: &mut Vec<String>) {
    let has_new_issues = require_bool_field(body, "has_new_issues", "verified.body", errors);
    if has_new_issues == Some(true) {
        let count = require_int_field(body, "new_issue_count", "verified.body", errors);
        if count.is_some_and(|value| value == 0) {
            errors.push("verified.body.new_issue_count must be > 0 when has_new_issues=true".to_string());
        }
    } else if has_new_issues == Some(false)
        && let Some(value) = body.get("new_issue_count")
        && !is_int_like(value)
    {
        errors.push("verified.body.new_issue_count must be int-like".to_string());
    }
}

fn is_non_empty_string(value: &Value) -> bool {
    value.as_str().is_some_and(|text| !text.trim().is_empty())
}

fn require_str_field<'a>(
    container: &'a Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match container.get(field) {
        Some(value) if is_non_empty_string(value) => value.as_str(),
        _ => {
            errors.push(format!("{context}.{field} must be non-empty string"));
            None
        }
    }
}

fn optional_str_field(
    container: &Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) {
    if let Some(value) = container.get(field)
        && !is_non_empty_string(value)
    {
        errors.push(format!("{context}.{field} must be non-empty string"));
    }
}

fn require_bool_field(
    container: &Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<bool> {
    match container.get(field) {
        None => {
            errors.push(format!("{context}.{field} missing"));
            None
        }
        Some(Value::Bool(flag)) => Some(*flag),
        Some(_) => {
            errors.push(format!("{context}.{field} must be boolean"));
            None
        }
    }
}

fn require_int_field(
    container: &Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) -> Option<u64> {
    match container.get(field) {
        None => {
            errors.push(format!("{context}.{field} missing"));
            None
        }
        Some(value) if is_int_like(value) => coerce_u64(value),
        Some(_) => {
            errors.push(format!("{context}.{field} must be int-like"));
            None
        }
    }
}

fn require_list_of_strings(
    container: &Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) {
    match container.get(field) {
        None => errors.push(format!("{context}.{field} missing")),
        Some(Value::Array(items)) => {
            if items.is_empty() {
                errors.push(format!("{context}.{field} must be non-empty list"));
            } else if items.iter().any(|item| !is_non_empty_string(item)) {
                errors.push(format!("{context}.{field} must be list of non-empty strings"));
            }
        }
        Some(_) => errors.push(format!("{context}.{field} must be list")),
    }
}

fn optional_list_of_strings(
    container: &Map<String, Value>,
    field: &str,
    context: &str,
    errors: &mut Vec<String>,
) {
    match container.get(field) {
        None => {}
        Some(Value::Array(items)) => {
            if items.iter().any(|item| !is_non_empty_string(item)) {
                errors.push(format!("{context}.{field} must be list of non-empty strings"));
            }
        }
        Some(_) => errors.push(format!("{context}.{field} must be list")),
    }
}

fn require_json_body<'a>(
    action: &str,
    body_encoding: Option<BodyEncoding>,
    parsed_body: Option<&'a Map<String, Value>>,
    errors: &mut Vec<String>,
) -> Option<&'a Map<String, Value>> {
    if body_encoding != Some(BodyEncoding::Json) {
        errors.push(format!("{action} requires body_encoding json"));
        return None;
    }
    match parsed_body {
        Some(body) => Some(body),
        None => {
            errors.push(format!("{action} requires json body"));
            None
        }
    }
}
