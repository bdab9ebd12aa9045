//! Dedup-keyed upsert engine over the custom target entity
//!
//! The target entity is owned exclusively by this store: find-before-create
//! on the dedup key guarantees at most one record per source call, updates
//! always refresh the sync timestamps, and link/disposition fields enter a
//! patch only when resolution produced a concrete value — absence never
//! erases previously stored links.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::domain::disposition::LabelResolver;
use crate::domain::records::{
    first_int, first_str, fmt_iso, fmt_space, normalize_phone, now_local, parse_local_ts,
    CallRecord,
};
use crate::domain::resolver::MatchResult;

use super::config::{FieldCodes, SyncConfig};
use super::fetch_client::{FetchClient, FetchError};
use super::remote::{invoke_with_timeout, RemoteError, RemoteInvoker};

pub const ITEM_LIST_METHOD: &str = "crm.item.list";
pub const ITEM_ADD_METHOD: &str = "crm.item.add";
pub const ITEM_UPDATE_METHOD: &str = "crm.item.update";
pub const ITEM_GET_METHOD: &str = "crm.item.get";

/// Raw disposition text is capped before being written to the portal.
const DISPOSITION_RAW_MAX_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    Created,
    Updated,
}

#[derive(Debug, Clone, Copy)]
pub struct UpsertOutcome {
    pub mode: UpsertMode,
    pub id: i64,
}

/// Target row as read back from the store; only the fields the engine
/// needs for matching and link checks.
#[derive(Debug, Clone)]
pub struct TargetRow {
    pub id: i64,
    pub call_id: Option<String>,
    pub activity_id: Option<String>,
    pub user_id: Option<String>,
    pub phone: String,
    pub call_start: Option<NaiveDateTime>,
}

impl TargetRow {
    pub fn from_raw(raw: &Value, fields: &FieldCodes) -> Option<Self> {
        let id = item_int_id(raw)?;
        Some(Self {
            id,
            call_id: first_str(raw, &[fields.telephony_call_id.as_str()]),
            activity_id: first_str(raw, &[fields.crm_activity_id.as_str()]),
            user_id: first_str(raw, &[fields.user_id.as_str()]),
            phone: normalize_phone(
                &first_str(raw, &[fields.phone_number.as_str()]).unwrap_or_default(),
            ),
            call_start: first_str(raw, &[fields.call_start_dt.as_str()])
                .and_then(|s| parse_local_ts(&s)),
        })
    }
}

/// Ids come back under varying keys and as either numbers or strings.
fn item_int_id(raw: &Value) -> Option<i64> {
    first_int(raw, &["id", "ID", "Id"]).or_else(|| {
        raw.get("item")
            .and_then(|item| first_int(item, &["id", "ID"]))
    })
}

/// Extracts the written item id from an add/update/get response body.
fn written_item_id(body: &Value) -> Option<i64> {
    for path in ["/result/item", "/item", "/result", ""] {
        if let Some(v) = body.pointer(path) {
            if let Some(id) = first_int(v, &["id", "ID", "Id"]) {
                return Some(id);
            }
        }
    }
    None
}

#[derive(Clone)]
pub struct TargetStore {
    invoker: Arc<dyn RemoteInvoker>,
    fetch: FetchClient,
    entity_type_id: u64,
    fields: FieldCodes,
    verify_saves: bool,
    call_timeout: Duration,
    direction_labels: Option<Arc<dyn LabelResolver>>,
    disposition_labels: Option<Arc<dyn LabelResolver>>,
}

impl TargetStore {
    pub fn new(invoker: Arc<dyn RemoteInvoker>, fetch: FetchClient, config: &SyncConfig) -> Self {
        Self {
            invoker,
            call_timeout: Duration::from_millis(config.fetch.page_timeout_ms),
            fetch,
            entity_type_id: config.entity_type_id,
            fields: config.field_codes.clone(),
            verify_saves: config.verify_saves,
            direction_labels: None,
            disposition_labels: None,
        }
    }

    /// Injects the platform enum-label mappers. Without them the enum
    /// fields are simply omitted from patches.
    pub fn with_label_resolvers(
        mut self,
        direction: Option<Arc<dyn LabelResolver>>,
        disposition: Option<Arc<dyn LabelResolver>>,
    ) -> Self {
        self.direction_labels = direction;
        self.disposition_labels = disposition;
        self
    }

    pub fn field_codes(&self) -> &FieldCodes {
        &self.fields
    }

    // ===== read side =====

    /// Looks up the record holding `call_id` in its dedup field. Duplicate
    /// rows should not exist; when they do, the lowest id wins and the rest
    /// are left untouched.
    pub async fn find_by_dedup_key(&self, call_id: &str) -> Result<Option<TargetRow>, RemoteError> {
        let params = json!({
            "entityTypeId": self.entity_type_id,
            "filter": { &self.fields.dedup_key: call_id },
            "select": [
                "id",
                &self.fields.dedup_key,
                &self.fields.telephony_call_id,
                &self.fields.crm_activity_id,
            ],
            "order": { "id": "ASC" },
        });

        let body =
            invoke_with_timeout(self.invoker.as_ref(), ITEM_LIST_METHOD, params, self.call_timeout)
                .await?;
        let page = super::response::normalize_page(ITEM_LIST_METHOD, &body)?;

        let mut rows: Vec<TargetRow> = page
            .items
            .iter()
            .filter_map(|item| TargetRow::from_raw(item, &self.fields))
            .collect();
        rows.sort_by_key(|r| r.id);

        if rows.len() > 1 {
            warn!(
                "⚠️ dedup key {} matches {} target records, using the first by id",
                call_id,
                rows.len()
            );
        }
        Ok(rows.into_iter().next())
    }

    pub async fn get(&self, id: i64) -> Result<Option<Value>, RemoteError> {
        let params = json!({ "entityTypeId": self.entity_type_id, "id": id });
        let body =
            invoke_with_timeout(self.invoker.as_ref(), ITEM_GET_METHOD, params, self.call_timeout)
                .await?;
        Ok(body
            .pointer("/result/item")
            .or_else(|| body.get("item"))
            .cloned())
    }

    /// Target rows whose call start falls inside `[from, to]`, paginated.
    /// `only_missing` narrows to rows without an activity link yet.
    pub async fn list_targets(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
        only_missing: bool,
    ) -> Result<Vec<Value>, FetchError> {
        let mut filter = Map::new();
        filter.insert(format!(">={}", self.fields.call_start_dt), json!(fmt_space(from)));
        filter.insert(format!("<={}", self.fields.call_start_dt), json!(fmt_space(to)));
        if only_missing {
            filter.insert(format!("={}", self.fields.crm_activity_id), json!(false));
        }

        let params = json!({
            "entityTypeId": self.entity_type_id,
            "filter": filter,
            "select": [
                "id",
                &self.fields.telephony_call_id,
                &self.fields.crm_activity_id,
                &self.fields.user_id,
                &self.fields.phone_number,
                &self.fields.call_start_dt,
                &self.fields.disposition_raw,
                &self.fields.entity_type,
                &self.fields.entity_id,
            ],
            "order": { "id": "ASC" },
        });

        self.fetch.fetch_all(ITEM_LIST_METHOD, &params).await
    }

    // ===== write side =====

    async fn create(&self, fields: Map<String, Value>) -> Result<i64, RemoteError> {
        let params = json!({ "entityTypeId": self.entity_type_id, "fields": fields });
        let body =
            invoke_with_timeout(self.invoker.as_ref(), ITEM_ADD_METHOD, params, self.call_timeout)
                .await?;
        written_item_id(&body).ok_or_else(|| RemoteError::Shape {
            method: ITEM_ADD_METHOD.to_string(),
            message: "create response carries no item id".to_string(),
        })
    }

    async fn update(&self, id: i64, fields: Map<String, Value>) -> Result<i64, RemoteError> {
        let params = json!({ "entityTypeId": self.entity_type_id, "id": id, "fields": fields });
        let body =
            invoke_with_timeout(self.invoker.as_ref(), ITEM_UPDATE_METHOD, params, self.call_timeout)
                .await?;
        Ok(written_item_id(&body).unwrap_or(id))
    }

    /// Find-before-create upsert on the dedup key. The patch is applied as
    /// given, plus a creation timestamp when the record is new.
    pub async fn upsert(
        &self,
        call_id: &str,
        mut patch: Map<String, Value>,
    ) -> Result<UpsertOutcome, RemoteError> {
        let existing = self.find_by_dedup_key(call_id).await?;

        let outcome = match existing {
            None => {
                patch.insert(self.fields.created_at.clone(), json!(fmt_iso(now_local())));
                let id = self.create(patch).await?;
                debug!("🆕 created target {} for call {}", id, call_id);
                UpsertOutcome { mode: UpsertMode::Created, id }
            }
            Some(row) => {
                let id = self.update(row.id, patch).await?;
                debug!("♻️ updated target {} for call {}", id, call_id);
                UpsertOutcome { mode: UpsertMode::Updated, id }
            }
        };

        if self.verify_saves {
            self.verify_saved(outcome.id, call_id).await;
        }
        Ok(outcome)
    }

    /// Applies a link patch to an existing row (activities mode).
    pub async fn apply_links(
        &self,
        id: i64,
        patch: Map<String, Value>,
    ) -> Result<i64, RemoteError> {
        let updated = self.update(id, patch).await?;
        if self.verify_saves {
            self.verify_saved(updated, "").await;
        }
        Ok(updated)
    }

    /// Observability-only read-back of a written record; never propagates.
    async fn verify_saved(&self, id: i64, call_id: &str) {
        match self.get(id).await {
            Ok(Some(saved)) => {
                let stored_call = first_str(&saved, &[self.fields.telephony_call_id.as_str()]);
                if !call_id.is_empty() && stored_call.as_deref() != Some(call_id) {
                    warn!(
                        "VERIFY_SAVE mismatch on target {}: stored call id {:?}, expected {}",
                        id, stored_call, call_id
                    );
                    return;
                }
                info!(
                    "VERIFY_SAVE target {}: call={:?} activity={:?} disposition={:?} phone={:?}",
                    id,
                    stored_call,
                    first_str(&saved, &[self.fields.crm_activity_id.as_str()]),
                    first_str(&saved, &[self.fields.disposition.as_str()]),
                    first_str(&saved, &[self.fields.phone_number.as_str()]),
                );
            }
            Ok(None) => warn!("VERIFY_SAVE: target {} not found after write", id),
            Err(err) => warn!("VERIFY_SAVE failed for target {}: {}", id, err),
        }
    }

    // ===== patch builders =====

    /// Full field patch for a telephony call, optionally merged with a
    /// resolution result. Always refreshes the sync timestamps.
    pub fn call_patch(
        &self,
        call: &CallRecord,
        resolved: Option<&MatchResult>,
    ) -> Map<String, Value> {
        let f = &self.fields;
        let mut patch = Map::new();

        patch.insert(f.telephony_call_id.clone(), json!(call.call_id));
        patch.insert(f.dedup_key.clone(), json!(call.call_id));

        if let Some(user_id) = &call.user_id {
            patch.insert(f.user_id.clone(), json!(user_id));
        }
        if let Some(user_name) = &call.user_name {
            patch.insert(f.user_name.clone(), json!(user_name));
        }
        if let Some(direction_value) = self
            .direction_labels
            .as_ref()
            .and_then(|r| r.resolve(call.direction.as_token()))
        {
            patch.insert(f.call_direction.clone(), json!(direction_value));
        }

        patch.insert(f.phone_number.clone(), json!(call.phone));
        patch.insert(f.call_status_code.clone(), json!(call.status_code));
        if let Some(started) = call.started_at {
            patch.insert(f.call_start_dt.clone(), json!(fmt_iso(started)));
        }
        patch.insert(f.call_duration.clone(), json!(call.duration_secs));
        patch.insert(f.answered.clone(), json!(if call.answered() { "Y" } else { "N" }));

        let now = fmt_iso(now_local());
        patch.insert(f.synced_at.clone(), json!(now.clone()));
        patch.insert(f.updated_at.clone(), json!(now));

        if let Some(resolved) = resolved {
            for (key, value) in self.link_fields(resolved) {
                patch.insert(key, value);
            }
        }
        patch
    }

    /// Link patch for an existing target row. Timestamps always refresh;
    /// everything else appears only when the resolver produced a value.
    pub fn link_patch(&self, resolved: &MatchResult) -> Map<String, Value> {
        let mut patch: Map<String, Value> = self.link_fields(resolved).into_iter().collect();
        let now = fmt_iso(now_local());
        patch.insert(self.fields.synced_at.clone(), json!(now.clone()));
        patch.insert(self.fields.updated_at.clone(), json!(now));
        patch
    }

    fn link_fields(&self, resolved: &MatchResult) -> Vec<(String, Value)> {
        let f = &self.fields;
        let mut out = Vec::new();

        if let Some(activity_id) = &resolved.activity_id {
            out.push((f.crm_activity_id.clone(), json!(activity_id)));
        }
        if let Some(entity_type) = &resolved.entity_type_id {
            out.push((f.entity_type.clone(), json!(entity_type)));
        }
        if let Some(entity_id) = &resolved.entity_id {
            out.push((f.entity_id.clone(), json!(entity_id)));
        }
        if let Some(label) = &resolved.disposition {
            if let Some(value) = self
                .disposition_labels
                .as_ref()
                .and_then(|r| r.resolve(label))
            {
                out.push((f.disposition.clone(), json!(value)));
            }
        }
        if let Some(raw) = &resolved.disposition_raw {
            let capped: String = raw.chars().take(DISPOSITION_RAW_MAX_CHARS).collect();
            out.push((f.disposition_raw.clone(), json!(capped)));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::disposition::StaticLabelResolver;
    use crate::infrastructure::fetch_client::FetchPolicy;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted invoker answering per method, recording every call.
    struct ScriptedStore {
        list_response: Value,
        calls: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl RemoteInvoker for ScriptedStore {
        async fn invoke(&self, method: &str, params: Value) -> Result<Value, RemoteError> {
            self.calls.lock().unwrap().push((method.to_string(), params));
            match method {
                ITEM_LIST_METHOD => Ok(self.list_response.clone()),
                ITEM_ADD_METHOD => Ok(json!({"result": {"item": {"id": 42}}})),
                ITEM_UPDATE_METHOD => Ok(json!({"result": {"item": {"id": 7}}})),
                ITEM_GET_METHOD => Ok(json!({"result": {"item": {"id": 7}}})),
                other => Err(RemoteError::Business {
                    method: other.to_string(),
                    message: "unexpected method".to_string(),
                }),
            }
        }
    }

    fn store_with(list_response: Value) -> (TargetStore, Arc<ScriptedStore>) {
        let invoker = Arc::new(ScriptedStore { list_response, calls: Mutex::new(Vec::new()) });
        let config = SyncConfig::default();
        let fetch = FetchClient::new(invoker.clone(), FetchPolicy { page_delay_ms: 0, ..Default::default() });
        (TargetStore::new(invoker.clone(), fetch, &config), invoker)
    }

    fn call() -> CallRecord {
        CallRecord::from_raw(&json!({
            "CALL_ID": "C1",
            "CALL_TYPE": 1,
            "CALL_DURATION": 30,
            "PHONE_NUMBER": "+1 555 123-4567",
            "CALL_START_DATE": "2025-03-01 10:00:00",
            "PORTAL_USER_ID": "7",
            "PORTAL_USER_NAME": "Ana",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn upsert_creates_when_dedup_key_is_unseen() {
        let (store, invoker) = store_with(json!({"result": {"items": []}}));
        let patch = store.call_patch(&call(), None);
        let outcome = store.upsert("C1", patch).await.unwrap();
        assert_eq!(outcome.mode, UpsertMode::Created);
        assert_eq!(outcome.id, 42);

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls[0].0, ITEM_LIST_METHOD);
        assert_eq!(calls[1].0, ITEM_ADD_METHOD);
        // Creation stamps created_at.
        let fields = &calls[1].1["fields"];
        assert!(fields.get(&SyncConfig::default().field_codes.created_at).is_some());
    }

    #[tokio::test]
    async fn upsert_updates_when_dedup_key_exists() {
        let f = FieldCodes::default();
        let (store, invoker) = store_with(json!({"result": {"items": [
            {"id": 7, &f.telephony_call_id: "C1"}
        ]}}));
        let outcome = store.upsert("C1", store.call_patch(&call(), None)).await.unwrap();
        assert_eq!(outcome.mode, UpsertMode::Updated);
        assert_eq!(outcome.id, 7);

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(calls[1].0, ITEM_UPDATE_METHOD);
        assert!(calls[1].1["fields"].get(&f.created_at).is_none());
    }

    #[tokio::test]
    async fn duplicate_dedup_rows_pick_lowest_id_and_never_create() {
        let f = FieldCodes::default();
        let (store, invoker) = store_with(json!({"result": {"items": [
            {"id": 31, &f.telephony_call_id: "C1"},
            {"id": 9, &f.telephony_call_id: "C1"},
        ]}}));
        let row = store.find_by_dedup_key("C1").await.unwrap().unwrap();
        assert_eq!(row.id, 9);

        let outcome = store.upsert("C1", Map::new()).await.unwrap();
        assert_eq!(outcome.mode, UpsertMode::Updated);
        let calls = invoker.calls.lock().unwrap();
        assert!(calls.iter().all(|(m, _)| m != ITEM_ADD_METHOD));
    }

    #[test]
    fn call_patch_carries_call_fields_and_answered_flag() {
        let (store, _) = store_with(json!({"result": {"items": []}}));
        let f = FieldCodes::default();
        let patch = store.call_patch(&call(), None);
        assert_eq!(patch[&f.dedup_key], json!("C1"));
        assert_eq!(patch[&f.phone_number], json!("+15551234567"));
        assert_eq!(patch[&f.answered], json!("Y"));
        assert_eq!(patch[&f.call_duration], json!(30));
        assert!(patch.contains_key(&f.synced_at));
        // No resolution: link fields stay absent rather than null.
        assert!(!patch.contains_key(&f.crm_activity_id));
        assert!(!patch.contains_key(&f.disposition_raw));
    }

    #[test]
    fn link_patch_omits_unresolved_fields() {
        let (store, _) = store_with(json!({"result": {"items": []}}));
        let f = FieldCodes::default();
        let resolved = MatchResult {
            activity_id: Some("A1".to_string()),
            disposition_raw: Some("x".repeat(6000)),
            ..Default::default()
        };
        let patch = store.link_patch(&resolved);
        assert_eq!(patch[&f.crm_activity_id], json!("A1"));
        assert!(!patch.contains_key(&f.entity_type));
        assert!(!patch.contains_key(&f.entity_id));
        assert!(!patch.contains_key(&f.disposition));
        let raw = patch[&f.disposition_raw].as_str().unwrap();
        assert_eq!(raw.chars().count(), 5000);
    }

    #[test]
    fn label_resolvers_map_direction_and_disposition_enums() {
        let (store, _) = store_with(json!({"result": {"items": []}}));
        let store = store.with_label_resolvers(
            Some(Arc::new(StaticLabelResolver::new([("OUTBOUND", "201")]))),
            Some(Arc::new(StaticLabelResolver::new([("FOLLOW-UP", "301")]))),
        );
        let f = FieldCodes::default();

        let resolved = MatchResult {
            activity_id: Some("A1".to_string()),
            disposition: Some("FOLLOW-UP".to_string()),
            ..Default::default()
        };
        let patch = store.call_patch(&call(), Some(&resolved));
        assert_eq!(patch[&f.call_direction], json!("201"));
        assert_eq!(patch[&f.disposition], json!("301"));
        assert_eq!(patch[&f.crm_activity_id], json!("A1"));
    }

    #[test]
    fn target_row_parses_store_fields() {
        let f = FieldCodes::default();
        let raw = json!({
            "id": 12,
            &f.telephony_call_id: "C9",
            &f.user_id: 7,
            &f.phone_number: "+55 (11) 1234",
            &f.call_start_dt: "2025-03-01T09:00:00",
        });
        let row = TargetRow::from_raw(&raw, &f).unwrap();
        assert_eq!(row.id, 12);
        assert_eq!(row.call_id.as_deref(), Some("C9"));
        assert_eq!(row.user_id.as_deref(), Some("7"));
        assert_eq!(row.phone, "+55111234");
        assert!(row.call_start.is_some());
        assert!(row.activity_id.is_none());
    }

    #[test]
    fn direction_unknown_without_resolver_leaves_field_absent() {
        let (store, _) = store_with(json!({"result": {"items": []}}));
        let f = FieldCodes::default();
        let patch = store.call_patch(&call(), None);
        assert!(!patch.contains_key(&f.call_direction));
    }
}
