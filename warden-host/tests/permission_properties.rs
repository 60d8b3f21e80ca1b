//! Permission store behavior that must always hold:
//! - a matching deny entry beats any allow entry, whatever the list order
//! - without an allow-list, access is confined to the workspace root
//! - unknown plugins are denied

use proptest::prelude::*;
use std::path::{Path, PathBuf};
use warden_host::{Grant, Operation, PermissionStore, SecurityEventType};

fn store() -> PermissionStore {
    PermissionStore::new(Some(PathBuf::from("/ws")), 1000)
}

fn segments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,6}", 1..6)
}

fn prefix(segments: &[String], len: usize) -> PathBuf {
    let mut path = PathBuf::from("/ws");
    for s in &segments[..len] {
        path.push(s);
    }
    path
}

fn insert_at(list: &mut Vec<PathBuf>, index: usize, path: PathBuf) {
    let index = index.min(list.len());
    list.insert(index, path);
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn deny_always_wins(
        segs in segments(),
        deny_len in 0usize..6,
        allow_len in 0usize..6,
        deny_at in 0usize..3,
        allow_at in 0usize..3,
        noise in prop::collection::vec("[a-z]{1,6}", 0..3),
    ) {
        let deny_len = deny_len.min(segs.len());
        let allow_len = allow_len.min(segs.len());
        let target = prefix(&segs, segs.len());

        let mut allowed: Vec<PathBuf> = noise.iter().map(|n| Path::new("/ws/noise").join(n)).collect();
        let mut denied = allowed.clone();
        insert_at(&mut allowed, allow_at, prefix(&segs, allow_len));
        insert_at(&mut denied, deny_at, prefix(&segs, deny_len));

        let store = store();
        store.set_permissions("p", Grant {
            allowed_paths: allowed,
            denied_paths: denied,
            ..Grant::read_only()
        });

        prop_assert!(!store.is_allowed("p", &Operation::ReadFile, Some(&target)));
    }

    #[test]
    fn allow_list_admits_without_deny_match(
        segs in segments(),
        allow_len in 0usize..6,
    ) {
        let allow_len = allow_len.min(segs.len());
        let target = prefix(&segs, segs.len());

        let store = store();
        store.set_permissions("p", Grant {
            allowed_paths: vec![prefix(&segs, allow_len)],
            denied_paths: vec![PathBuf::from("/ws/zzzzzzz")],
            ..Grant::read_only()
        });

        prop_assert!(store.is_allowed("p", &Operation::ReadFile, Some(&target)));
    }

    #[test]
    fn dot_dot_cannot_escape_workspace(segs in segments(), ups in 1usize..8) {
        let mut target = prefix(&segs, segs.len());
        for _ in 0..(segs.len() + ups) {
            target.push("..");
        }
        target.push("etc");

        let store = store();
        store.set_permissions("p", Grant::read_only());
        prop_assert!(!store.is_allowed("p", &Operation::ReadFile, Some(&target)));
    }
}

// =============================================================================
// READ-ONLY GRANT IN A WORKSPACE
// =============================================================================

#[test]
fn read_only_grant_in_workspace() {
    let store = store();
    store.set_permissions("p", Grant::read_only());

    assert!(store.is_allowed("p", &Operation::ReadFile, Some(Path::new("/ws/x.cs"))));
    assert!(!store.is_allowed("p", &Operation::WriteFile, Some(Path::new("/ws/x.cs"))));
    assert!(!store.is_allowed("p", &Operation::ReadFile, Some(Path::new("/etc/passwd"))));
}

#[test]
fn unknown_plugin_is_denied_and_audited() {
    let store = store();
    assert!(!store.is_allowed("ghost", &Operation::ReadFile, Some(Path::new("/ws/a.txt"))));

    let events = store.audit_log().for_plugin("ghost");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, SecurityEventType::PermissionCheck);
    assert!(!events[0].success);
}

#[test]
fn custom_operations_come_from_the_grant() {
    let store = store();
    let mut grant = Grant::read_only();
    grant.custom_operations.insert("IndexSymbols".into());
    store.set_permissions("p", grant);

    assert!(store.is_allowed("p", &Operation::from("IndexSymbols"), None));
    assert!(!store.is_allowed("p", &Operation::from("UploadTelemetry"), None));
}

#[test]
fn no_workspace_root_denies_path_checks() {
    let store = PermissionStore::new(None, 100);
    store.set_permissions("p", Grant::read_only());
    assert!(!store.is_allowed("p", &Operation::ReadFile, Some(Path::new("/ws/a.txt"))));
    assert!(store.is_allowed("p", &Operation::ReadFile, None));
}
