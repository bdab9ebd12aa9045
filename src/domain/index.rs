//! In-memory identity/time index over a fetched activity batch
//!
//! Buckets activities by their owning-user id (or, under the alternative
//! policy, by normalized phone) and keeps each bucket sorted by timestamp so
//! the resolver can scan a narrow window. Rows without a usable timestamp or
//! bucket key are skipped, not errors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::records::{ts_millis, ActivityRecord, Direction};

/// Which record attribute keys the index buckets.
///
/// Owner-user keying is the default: phone-only keying silently drops
/// matches whenever the two sides normalize differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKeyPolicy {
    #[default]
    OwnerUser,
    Phone,
}

/// One indexed activity entry; `seq` preserves original fetch order for
/// deterministic tie-breaking.
#[derive(Debug, Clone)]
pub struct IndexedActivity {
    pub id: String,
    pub ts_ms: i64,
    pub seq: usize,
    pub direction: Direction,
    pub phone: String,
    pub text: String,
    pub owner_type_id: Option<String>,
    pub owner_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ActivityIndex {
    buckets: HashMap<String, Vec<IndexedActivity>>,
    policy: IndexKeyPolicy,
    len: usize,
}

impl ActivityIndex {
    pub fn build(activities: &[ActivityRecord], policy: IndexKeyPolicy) -> Self {
        let mut buckets: HashMap<String, Vec<IndexedActivity>> = HashMap::new();
        let mut len = 0usize;

        for (seq, activity) in activities.iter().enumerate() {
            let Some(ts) = activity.timestamp else {
                continue;
            };
            let key = match policy {
                IndexKeyPolicy::OwnerUser => match activity.user_id.as_deref() {
                    Some(user) if !user.is_empty() => user.to_string(),
                    _ => continue,
                },
                IndexKeyPolicy::Phone => {
                    if activity.phone.is_empty() {
                        continue;
                    }
                    activity.phone.clone()
                }
            };

            buckets.entry(key).or_default().push(IndexedActivity {
                id: activity.id.clone(),
                ts_ms: ts_millis(ts),
                seq,
                direction: activity.direction,
                phone: activity.phone.clone(),
                text: activity.description.clone(),
                owner_type_id: activity.owner_type_id.clone(),
                owner_id: activity.owner_id.clone(),
            });
            len += 1;
        }

        for bucket in buckets.values_mut() {
            bucket.sort_by_key(|e| (e.ts_ms, e.seq));
        }

        Self { buckets, policy, len }
    }

    pub fn bucket(&self, key: &str) -> &[IndexedActivity] {
        self.buckets.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn policy(&self) -> IndexKeyPolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn activity(id: &str, user: Option<&str>, ts: &str, phone: &str) -> ActivityRecord {
        ActivityRecord::from_raw(&json!({
            "ID": id,
            "RESPONSIBLE_ID": user,
            "START_TIME": ts,
            "COMMUNICATIONS": [{"VALUE": phone}],
        }))
        .unwrap()
    }

    #[test]
    fn buckets_by_owner_user_and_sorts_by_timestamp() {
        let acts = vec![
            activity("b", Some("7"), "2025-03-01 10:05:00", ""),
            activity("a", Some("7"), "2025-03-01 10:00:00", ""),
            activity("c", Some("8"), "2025-03-01 09:00:00", ""),
        ];
        let index = ActivityIndex::build(&acts, IndexKeyPolicy::OwnerUser);
        assert_eq!(index.len(), 3);
        assert_eq!(index.bucket_count(), 2);
        let ids: Vec<_> = index.bucket("7").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn equal_timestamps_keep_fetch_order() {
        let acts = vec![
            activity("first", Some("7"), "2025-03-01 10:00:00", ""),
            activity("second", Some("7"), "2025-03-01 10:00:00", ""),
        ];
        let index = ActivityIndex::build(&acts, IndexKeyPolicy::OwnerUser);
        let ids: Vec<_> = index.bucket("7").iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["first", "second"]);
    }

    #[test]
    fn skips_rows_without_timestamp_or_key() {
        let mut no_ts = activity("x", Some("7"), "2025-03-01 10:00:00", "");
        no_ts.timestamp = None;
        let no_user = activity("y", None, "2025-03-01 10:00:00", "");
        let ok = activity("z", Some("7"), "2025-03-01 10:00:00", "");
        let index = ActivityIndex::build(&[no_ts, no_user, ok], IndexKeyPolicy::OwnerUser);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn phone_policy_buckets_by_normalized_phone() {
        let acts = vec![
            activity("a", Some("7"), "2025-03-01 10:00:00", "+55 11 91234-5678"),
            activity("b", Some("8"), "2025-03-01 10:01:00", "(55) 11 912345678"),
            activity("c", Some("9"), "2025-03-01 10:02:00", ""),
        ];
        let index = ActivityIndex::build(&acts, IndexKeyPolicy::Phone);
        assert_eq!(index.bucket("+5511912345678").len(), 1);
        assert_eq!(index.bucket("5511912345678").len(), 1);
        assert_eq!(index.len(), 2);
    }
}
