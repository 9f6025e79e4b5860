//! In-process structured merge of two kubeconfigs.
//!
//! Named collections are merged by `name`: an incoming entry replaces every
//! existing entry of the same name (in place of the first one), new names are
//! appended, and untouched names keep their position. Everything else is a
//! recursive override merge with the incoming document winning.

use serde_yaml::Value;

use crate::document::{Kubeconfig, Named};

/// Merge `incoming` over `existing`.
pub fn merge_documents(existing: Kubeconfig, incoming: Kubeconfig) -> Kubeconfig {
    let mut merged = existing;

    upsert_all(&mut merged.clusters, incoming.clusters);
    upsert_all(&mut merged.contexts, incoming.contexts);
    upsert_all(&mut merged.users, incoming.users);

    if !incoming.current_context.is_empty() {
        merged.current_context = incoming.current_context;
    }
    if incoming.api_version.is_some() {
        merged.api_version = incoming.api_version;
    }
    if incoming.kind.is_some() {
        merged.kind = incoming.kind;
    }

    merged.preferences = match (merged.preferences.take(), incoming.preferences) {
        (Some(base), Some(next)) => Some(override_merge(base, next)),
        (base, next) => next.or(base),
    };

    for (key, next) in incoming.extra {
        let value = match merged.extra.remove(&key) {
            Some(base) => override_merge(base, next),
            None => next,
        };
        merged.extra.insert(key, value);
    }

    merged
}

/// Replace-or-append each incoming entry by name.
fn upsert_all<T: Named>(base: &mut Vec<T>, incoming: Vec<T>) {
    for entry in incoming {
        let name = entry.name().to_string();
        match base.iter().position(|e| e.name() == name) {
            Some(first) => {
                base[first] = entry;
                let mut index = 0;
                base.retain(|e| {
                    let keep = index == first || e.name() != name;
                    index += 1;
                    keep
                });
            }
            None => base.push(entry),
        }
    }
}

/// Recursive mapping merge; for anything other than two mappings `next` wins.
pub fn override_merge(base: Value, next: Value) -> Value {
    match (base, next) {
        (Value::Mapping(mut a), Value::Mapping(b)) => {
            for (k, vb) in b {
                match a.get_mut(&k) {
                    Some(va) => {
                        let base = std::mem::replace(va, Value::Null);
                        *va = override_merge(base, vb);
                    }
                    None => {
                        a.insert(k, vb);
                    }
                }
            }
            Value::Mapping(a)
        }
        (_, next) => next,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::TWO_CLUSTERS;

    fn fresh(name: &str, server: &str, token: &str) -> Kubeconfig {
        Kubeconfig::parse(&format!(
            "apiVersion: v1\nkind: Config\nclusters:\n- name: {name}\n  cluster:\n    server: {server}\ncontexts:\n- name: {name}\n  context:\n    cluster: {name}\n    user: {name}-user\nusers:\n- name: {name}-user\n  user:\n    token: {token}\ncurrent-context: {name}\n"
        ))
        .unwrap()
    }

    #[test]
    fn same_name_is_replaced_exactly_once() {
        let existing = Kubeconfig::parse(TWO_CLUSTERS).unwrap();
        let merged = merge_documents(existing, fresh("prod", "https://10.9.9.9:6443", "new"));

        assert_eq!(merged.clusters.iter().filter(|c| c.name == "prod").count(), 1);
        assert_eq!(merged.contexts.iter().filter(|c| c.name == "prod").count(), 1);
        assert_eq!(merged.users.iter().filter(|u| u.name == "prod-user").count(), 1);
        assert_eq!(merged.cluster("prod").unwrap().cluster.server, "https://10.9.9.9:6443");
        assert_eq!(
            merged.user("prod-user").unwrap().user.get("token"),
            Some(&Value::from("new"))
        );
        // stale certificate data must not survive
        assert!(
            !merged
                .cluster("prod")
                .unwrap()
                .cluster
                .extra
                .contains_key("certificate-authority-data")
        );
        assert_eq!(merged.current_context, "prod");
        assert!(merged.entry_problems("prod").is_empty());
    }

    #[test]
    fn unrelated_entries_are_preserved() {
        let existing = Kubeconfig::parse(TWO_CLUSTERS).unwrap();
        let staging_before = existing.cluster("staging").cloned().unwrap();
        let staging_user_before = existing.user("staging-user").cloned().unwrap();

        let merged = merge_documents(existing, fresh("demo", "https://10.0.0.5:6443", "t"));

        assert_eq!(merged.cluster("staging"), Some(&staging_before));
        assert_eq!(merged.user("staging-user"), Some(&staging_user_before));
        assert_eq!(merged.clusters.len(), 3);
        assert_eq!(merged.clusters.last().unwrap().name, "demo");
        assert_eq!(merged.current_context, "demo");
    }

    #[test]
    fn replacement_keeps_position() {
        let existing = Kubeconfig::parse(TWO_CLUSTERS).unwrap();
        let order_before: Vec<_> = existing.clusters.iter().map(|c| c.name.clone()).collect();
        let merged = merge_documents(existing, fresh("prod", "https://1.1.1.1:6443", "x"));
        let order_after: Vec<_> = merged.clusters.iter().map(|c| c.name.clone()).collect();
        assert_eq!(order_before, order_after);
    }

    #[test]
    fn duplicates_from_earlier_concatenation_are_collapsed() {
        let mut existing = Kubeconfig::parse(TWO_CLUSTERS).unwrap();
        let dup = existing.clusters[0].clone();
        existing.clusters.push(dup);

        let merged = merge_documents(existing, fresh("prod", "https://2.2.2.2:6443", "y"));
        assert_eq!(merged.clusters.iter().filter(|c| c.name == "prod").count(), 1);
        assert!(merged.duplicate_names().is_empty());
    }

    #[test]
    fn override_merge_is_recursive() {
        let base: Value = serde_yaml::from_str("a: 1\nnested:\n  keep: true\n  change: old\n").unwrap();
        let next: Value = serde_yaml::from_str("nested:\n  change: new\nb: 2\n").unwrap();
        let merged = override_merge(base, next);
        let expected: Value =
            serde_yaml::from_str("a: 1\nnested:\n  keep: true\n  change: new\nb: 2\n").unwrap();
        assert_eq!(merged, expected);
    }
}
