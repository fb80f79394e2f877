use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub type DeploymentKey = String;

/// Flag configurations for one deployment, keyed by flag key.
pub type FlagSet = IndexMap<String, FlagConfig>;

#[derive(Clone, Debug, PartialEq)]
pub struct Project {
    pub id: String,
    pub api_key: String,
    pub secret_key: String,
    pub management_key: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub label: String,
    /// The SDK-facing key, used as the lookup handle everywhere.
    pub key: DeploymentKey,
}

/// Wire record from the management API. Records flagged `deleted` are
/// filtered out during reconciliation.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    pub id: String,
    pub project_id: String,
    pub label: String,
    pub key: DeploymentKey,
    #[serde(default)]
    pub deleted: bool,
}

impl DeploymentRecord {
    pub fn into_deployment(self) -> Deployment {
        Deployment {
            id: self.id,
            project_id: self.project_id,
            label: self.label,
            key: self.key,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortDescription {
    pub id: String,
    pub group_type: String,
    /// Timestamp of the remote computation. Stored values only move
    /// forward; an equal-or-older write is a no-op.
    pub last_computed: i64,
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Cohort {
    pub description: CohortDescription,
    pub members: HashSet<String>,
}

/// One flag configuration as returned by the deployment API. The structure
/// is owned by the evaluation engine; the core only reads the flag key and
/// the cohort ids referenced by targeting rules.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FlagConfig(pub serde_json::Value);

const COHORT_SELECTOR: &str = "cohort_ids";

impl FlagConfig {
    pub fn key(&self) -> Option<&str> {
        self.0.get("key").and_then(|key| key.as_str())
    }

    /// Cohort ids referenced by any targeting rule of this flag: values of
    /// conditions whose selector path addresses the cohort context field.
    pub fn cohort_ids(&self) -> HashSet<String> {
        let mut ids = HashSet::new();
        let Some(segments) = self.0.get("segments").and_then(|s| s.as_array()) else {
            return ids;
        };
        for segment in segments {
            let Some(groups) = segment.get("conditions").and_then(|c| c.as_array()) else {
                continue;
            };
            for group in groups {
                let Some(conditions) = group.as_array() else {
                    continue;
                };
                for condition in conditions {
                    if !selects_cohorts(condition) {
                        continue;
                    }
                    if let Some(values) = condition.get("values").and_then(|v| v.as_array()) {
                        ids.extend(
                            values
                                .iter()
                                .filter_map(|v| v.as_str().map(str::to_string)),
                        );
                    }
                }
            }
        }
        ids
    }
}

fn selects_cohorts(condition: &serde_json::Value) -> bool {
    condition
        .get("selector")
        .and_then(|s| s.as_array())
        .is_some_and(|parts| parts.iter().any(|p| p.as_str() == Some(COHORT_SELECTOR)))
}

/// Union of cohort ids referenced across a set of flags.
pub fn referenced_cohort_ids<'a>(
    flags: impl IntoIterator<Item = &'a FlagConfig>,
) -> HashSet<String> {
    let mut ids = HashSet::new();
    for flag in flags {
        ids.extend(flag.cohort_ids());
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn flag_with_cohorts(key: &str, cohort_ids: &[&str]) -> FlagConfig {
        FlagConfig(json!({
            "key": key,
            "variants": { "on": {}, "off": {} },
            "segments": [
                {
                    "conditions": [[
                        {
                            "selector": ["context", "user", "cohort_ids"],
                            "op": "set contains any",
                            "values": cohort_ids,
                        }
                    ]],
                    "variant": "on",
                }
            ],
        }))
    }

    #[test]
    fn extracts_cohort_ids_from_targeting_rules() {
        let flag = flag_with_cohorts("flag-a", &["vip", "beta"]);
        assert_eq!(flag.key(), Some("flag-a"));
        let ids = flag.cohort_ids();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains("vip"));
        assert!(ids.contains("beta"));
    }

    #[test]
    fn flags_without_cohort_conditions_reference_nothing() {
        let flag = FlagConfig(json!({
            "key": "plain",
            "segments": [
                {
                    "conditions": [[
                        {
                            "selector": ["context", "user", "country"],
                            "op": "is",
                            "values": ["DE"],
                        }
                    ]],
                }
            ],
        }));
        assert!(flag.cohort_ids().is_empty());
    }

    #[test]
    fn referenced_ids_union_across_flags() {
        let flags = vec![
            flag_with_cohorts("a", &["one"]),
            flag_with_cohorts("b", &["one", "two"]),
        ];
        let ids = referenced_cohort_ids(&flags);
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn deleted_records_deserialize() {
        let record: DeploymentRecord = serde_json::from_value(json!({
            "id": "d1",
            "projectId": "p1",
            "label": "server",
            "key": "server-abc",
            "deleted": true,
        }))
        .unwrap();
        assert!(record.deleted);
        let deployment = record.into_deployment();
        assert_eq!(deployment.project_id, "p1");
    }
}
