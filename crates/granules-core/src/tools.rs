//! Tool operations exposed to workers.
//!
//! Transport-agnostic: a server layer decodes a named call with JSON
//! arguments and hands it to [`dispatch_json`]. Nothing here fails with an
//! error type; every outcome is a [`ToolResponse`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::domain::{GranuleId, TaskClass, TaskRecord, WorkerId};
use crate::ports::TaskStore;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolCall {
    ListGranules {},
    #[serde(rename_all = "camelCase")]
    GetGranule { granule_id: GranuleId },
    /// `class` stays a string so an unknown class is a validation failure
    /// with a useful message rather than a decode error.
    CreateGranule { class: String, content: String },
    #[serde(rename_all = "camelCase")]
    ClaimGranule {
        granule_id: GranuleId,
        worker_id: WorkerId,
    },
    #[serde(rename_all = "camelCase")]
    ReleaseGranule {
        granule_id: GranuleId,
        worker_id: WorkerId,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    CompleteGranule {
        granule_id: GranuleId,
        worker_id: WorkerId,
        #[serde(default)]
        summary: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UpdateGranule { granule_id: GranuleId, content: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<TaskRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<TaskRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    fn with_record(record: TaskRecord) -> Self {
        Self {
            success: true,
            record: Some(record),
            ..Default::default()
        }
    }

    pub fn failure(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

impl<E: ToString> From<Result<TaskRecord, E>> for ToolResponse {
    fn from(result: Result<TaskRecord, E>) -> Self {
        result.map_or_else(|e| ToolResponse::failure(e), ToolResponse::with_record)
    }
}

pub fn dispatch(store: &dyn TaskStore, call: ToolCall) -> ToolResponse {
    let response = match call {
        ToolCall::ListGranules {} => {
            let records = store.list();
            ToolResponse {
                success: true,
                count: Some(records.len()),
                records: Some(records),
                ..Default::default()
            }
        }
        ToolCall::GetGranule { granule_id } => match store.get(granule_id) {
            Some(record) => ToolResponse::with_record(record),
            None => ToolResponse::failure(format!("task {granule_id} not found")),
        },
        ToolCall::CreateGranule { class, content } => match class.parse::<TaskClass>() {
            Ok(class) => {
                let record = store.create(class, &content);
                tracing::info!(task_id = %record.id, class = %record.class, "task created");
                ToolResponse::with_record(record)
            }
            Err(e) => ToolResponse::failure(e),
        },
        ToolCall::ClaimGranule {
            granule_id,
            worker_id,
        } => store.claim(granule_id, worker_id).into(),
        ToolCall::ReleaseGranule {
            granule_id,
            worker_id,
            error,
        } => match store.release(granule_id, worker_id, error.as_deref()) {
            Ok(()) => ToolResponse::ok(),
            Err(e) => ToolResponse::failure(e),
        },
        ToolCall::CompleteGranule {
            granule_id,
            worker_id,
            summary,
        } => match store.complete(granule_id, worker_id, summary.as_deref()) {
            Ok(()) => {
                tracing::info!(task_id = %granule_id, worker_id = %worker_id, "task completed");
                ToolResponse::ok()
            }
            Err(e) => ToolResponse::failure(e),
        },
        ToolCall::UpdateGranule {
            granule_id,
            content,
        } => store.update_content(granule_id, &content).into(),
    };
    if let Some(error) = &response.error {
        tracing::debug!(error = %error, "tool call rejected");
    }
    response
}

/// Decode `args` for tool `name` and dispatch. Decode failures become
/// unsuccessful responses.
pub fn dispatch_json(store: &dyn TaskStore, name: &str, args: Value) -> ToolResponse {
    let args = if args.is_null() { json!({}) } else { args };
    match serde_json::from_value::<ToolCall>(json!({ "name": name, "arguments": args })) {
        Ok(call) => dispatch(store, call),
        Err(e) => ToolResponse::failure(format!("invalid call to {name}: {e}")),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Name, description and JSON schema of every tool, for tool listing.
pub fn descriptors() -> Vec<ToolDescriptor> {
    let id = json!({ "type": "string" });
    let classes: Vec<&str> = TaskClass::ALL.iter().map(|c| c.as_str()).collect();
    vec![
        ToolDescriptor {
            name: "list_granules",
            description: "List all granules",
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDescriptor {
            name: "get_granule",
            description: "Get one granule by id",
            input_schema: json!({
                "type": "object",
                "properties": { "granuleId": id },
                "required": ["granuleId"],
            }),
        },
        ToolDescriptor {
            name: "create_granule",
            description: "Create a new granule",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "class": { "type": "string", "enum": classes },
                    "content": { "type": "string" },
                },
                "required": ["class", "content"],
            }),
        },
        ToolDescriptor {
            name: "claim_granule",
            description: "Claim an unclaimed granule",
            input_schema: json!({
                "type": "object",
                "properties": { "granuleId": id, "workerId": id },
                "required": ["granuleId", "workerId"],
            }),
        },
        ToolDescriptor {
            name: "release_granule",
            description: "Release a claimed granule, optionally reporting an error",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "granuleId": id,
                    "workerId": id,
                    "error": { "type": "string" },
                },
                "required": ["granuleId", "workerId"],
            }),
        },
        ToolDescriptor {
            name: "complete_granule",
            description: "Mark a claimed granule as completed",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "granuleId": id,
                    "workerId": id,
                    "summary": { "type": "string" },
                },
                "required": ["granuleId", "workerId"],
            }),
        },
        ToolDescriptor {
            name: "update_granule",
            description: "Replace the content of a granule",
            input_schema: json!({
                "type": "object",
                "properties": { "granuleId": id, "content": { "type": "string" } },
                "required": ["granuleId", "content"],
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn create_claim_complete_flow() {
        let store = MemoryStore::new();
        let created = dispatch_json(
            &store,
            "create_granule",
            json!({ "class": "implement", "content": "do X" }),
        );
        assert!(created.success);
        let id = created.record.unwrap().id;

        let claimed = dispatch_json(
            &store,
            "claim_granule",
            json!({ "granuleId": id.to_string(), "workerId": "W-1" }),
        );
        assert!(claimed.success);
        assert_eq!(claimed.record.unwrap().claimed_by(), Some(WorkerId::new(1)));

        let again = dispatch_json(
            &store,
            "claim_granule",
            json!({ "granuleId": id.to_string(), "workerId": "W-2" }),
        );
        assert!(!again.success);
        assert!(again.error.unwrap().contains("not unclaimed"));

        let done = dispatch_json(
            &store,
            "complete_granule",
            json!({ "granuleId": id.to_string(), "workerId": "W-1", "summary": "ok" }),
        );
        assert!(done.success);
        assert_eq!(store.get(id).unwrap().summary(), Some("ok"));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let store = MemoryStore::new();
        let resp = dispatch_json(
            &store,
            "create_granule",
            json!({ "class": "deploy", "content": "ship it" }),
        );
        assert!(!resp.success);
        assert!(store.list().is_empty());
    }

    #[test]
    fn terminal_class_is_accepted() {
        let store = MemoryStore::new();
        let resp = dispatch(
            &store,
            ToolCall::CreateGranule {
                class: "Implemented".into(),
                content: "all done".into(),
            },
        );
        assert!(resp.success);
        assert_eq!(resp.record.unwrap().class, TaskClass::Implemented);
    }

    #[test]
    fn list_accepts_missing_arguments() {
        let store = MemoryStore::new();
        store.create(TaskClass::Plan, "p");
        let resp = dispatch_json(&store, "list_granules", Value::Null);
        assert!(resp.success);
        assert_eq!(resp.count, Some(1));
    }

    #[test]
    fn release_with_error_counts_retry() {
        let store = MemoryStore::new();
        let rec = store.create(TaskClass::Test, "t");
        store.claim(rec.id, WorkerId::new(1)).unwrap();
        let resp = dispatch_json(
            &store,
            "release_granule",
            json!({ "granuleId": "T-1", "workerId": "W-1", "error": "boom" }),
        );
        assert!(resp.success);
        assert_eq!(store.get(rec.id).unwrap().retry_count, 1);
    }

    #[test]
    fn malformed_calls_fail_without_panicking() {
        let store = MemoryStore::new();
        assert!(!dispatch_json(&store, "no_such_tool", json!({})).success);
        assert!(!dispatch_json(&store, "claim_granule", json!({ "granuleId": "X-1" })).success);
        assert!(!dispatch_json(&store, "get_granule", json!({ "granuleId": "T-9" })).success);
    }

    #[test]
    fn response_omits_empty_fields() {
        let v = serde_json::to_value(ToolResponse::ok()).unwrap();
        assert_eq!(v, json!({ "success": true }));
    }

    #[test]
    fn descriptors_cover_every_call() {
        let names: Vec<_> = descriptors().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec![
                "list_granules",
                "get_granule",
                "create_granule",
                "claim_granule",
                "release_granule",
                "complete_granule",
                "update_granule",
            ]
        );
    }
}
