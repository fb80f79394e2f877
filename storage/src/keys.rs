//! Key schema for the distributed store.
//!
//! Every key carries the configured prefix plus a version segment, so a
//! future layout change can migrate by bumping the version instead of
//! rewriting keys in place. Cohort member sets embed a `{...}` hash tag:
//! all versions of one cohort hash to the same cluster slot, which keeps
//! multi-key set operations between versions single-partition.

pub const STORAGE_VERSION: &str = "v1";

#[derive(Clone, Debug)]
pub struct KeySchema {
    prefix: String,
}

impl KeySchema {
    pub fn new(prefix: &str) -> Self {
        KeySchema {
            prefix: format!("{}:{}", prefix, STORAGE_VERSION),
        }
    }

    /// Set of project ids known to the store.
    pub fn projects(&self) -> String {
        format!("{}:projects", self.prefix)
    }

    /// Hash of deployment key -> deployment record.
    pub fn deployments(&self, project_id: &str) -> String {
        format!("{}:projects:{}:deployments", self.prefix, project_id)
    }

    /// Hash of flag key -> flag configuration.
    pub fn flags(&self, project_id: &str, deployment_key: &str) -> String {
        format!(
            "{}:projects:{}:deployments:{}:flags",
            self.prefix, project_id, deployment_key
        )
    }

    /// Hash of cohort id -> cohort description.
    pub fn cohort_descriptions(&self, project_id: &str) -> String {
        format!("{}:projects:{}:cohorts", self.prefix, project_id)
    }

    /// Member set for one computed version of a cohort. The cohort id is the
    /// hash tag, so successive versions land in the same cluster slot.
    pub fn cohort_members(
        &self,
        project_id: &str,
        cohort_id: &str,
        group_type: &str,
        last_computed: i64,
    ) -> String {
        format!(
            "{}:projects:{}:cohort:{{{}}}:{}:{}",
            self.prefix, project_id, cohort_id, group_type, last_computed
        )
    }

    pub fn lock(&self, name: &str) -> String {
        format!("{}:locks:{}", self.prefix, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_prefix_and_version() {
        let keys = KeySchema::new("pennant");
        assert_eq!(keys.projects(), "pennant:v1:projects");
        assert_eq!(keys.deployments("p1"), "pennant:v1:projects:p1:deployments");
        assert_eq!(
            keys.flags("p1", "server-abc"),
            "pennant:v1:projects:p1:deployments:server-abc:flags"
        );
        assert_eq!(keys.lock("projects:p1:reconcile"), "pennant:v1:locks:projects:p1:reconcile");
    }

    #[test]
    fn cohort_member_keys_share_a_hash_tag_across_versions() {
        let keys = KeySchema::new("pennant");
        let v1 = keys.cohort_members("p1", "vip", "User", 100);
        let v2 = keys.cohort_members("p1", "vip", "User", 150);
        assert_eq!(v1, "pennant:v1:projects:p1:cohort:{vip}:User:100");
        assert_eq!(v2, "pennant:v1:projects:p1:cohort:{vip}:User:150");

        let tag = |key: &str| {
            let start = key.find('{').unwrap();
            let end = key.find('}').unwrap();
            key[start..=end].to_string()
        };
        assert_eq!(tag(&v1), tag(&v2));
    }
}
