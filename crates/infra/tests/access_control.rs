use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rolegate_auth::{
    AccessControl, CacheStats, GrantRecord, NobodyHasAccessCache, Permission, PermissionStore,
    RbacConfig, RbacError, Role, StaticPolicyRegistry, StoreError,
};
use rolegate_core::{Entity, RoleId};
use rolegate_infra::{InMemoryPermissionStore, InMemoryRoleStore, in_memory_access_control};
use rolegate_observability::{LogConfig, LogFormat};

fn registry() -> Arc<StaticPolicyRegistry> {
    Arc::new(StaticPolicyRegistry::new(["read", "write", "delete"]))
}

fn perm(name: &'static str) -> Permission {
    Permission::new(name)
}

fn perms(names: &[&'static str]) -> BTreeSet<Permission> {
    names.iter().copied().map(perm).collect()
}

fn init_logging() {
    rolegate_observability::init(&LogConfig {
        filter: "rolegate_auth=debug".to_string(),
        format: LogFormat::Pretty,
    });
}

/// Access control plus a handle on its permission store for assertions.
fn setup() -> (AccessControl, Arc<InMemoryPermissionStore>) {
    init_logging();
    let store = InMemoryPermissionStore::arc();
    let access = AccessControl::new(
        store.clone(),
        InMemoryRoleStore::arc(),
        registry(),
        Arc::new(NobodyHasAccessCache::new()),
    );
    (access, store)
}

/// Permission store that can be switched into a failing state.
#[derive(Debug, Default)]
struct FlakyStore {
    inner: InMemoryPermissionStore,
    down: AtomicBool,
    writes_down: AtomicBool,
}

impl FlakyStore {
    fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.check()?;
        if self.writes_down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("read-only replica".into()))
        } else {
            Ok(())
        }
    }
}

impl PermissionStore for FlakyStore {
    fn create(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        self.check_write()?;
        self.inner.create(role_id, permission)
    }

    fn find(&self, role_id: RoleId, permission: &Permission) -> Result<GrantRecord, StoreError> {
        self.check()?;
        self.inner.find(role_id, permission)
    }

    fn list_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        self.check()?;
        self.inner.list_by_role(role_id)
    }

    fn delete(&self, role_id: RoleId, permission: &Permission) -> Result<(), StoreError> {
        self.check_write()?;
        self.inner.delete(role_id, permission)
    }

    fn delete_all_by_role(&self, role_id: RoleId) -> Result<Vec<GrantRecord>, StoreError> {
        self.check_write()?;
        self.inner.delete_all_by_role(role_id)
    }

    fn delete_all_by_permission(&self, permission: &Permission) -> Result<usize, StoreError> {
        self.check_write()?;
        self.inner.delete_all_by_permission(permission)
    }

    fn exists_for_permission(&self, permission: &Permission) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.exists_for_permission(permission)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Grant / revoke protocol
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn granting_twice_leaves_one_record() {
    let (access, store) = setup();
    let role = access.create_role("editor", "Editor").unwrap();

    access.grant(&role, &perm("read")).unwrap();
    access.grant(&role, &perm("read")).unwrap();

    assert_eq!(store.len(), 1);
    assert!(access.has_permission(&role, &perm("read")).unwrap());
}

#[test]
fn granting_unknown_permission_fails_without_writing() {
    let (access, store) = setup();
    let role = access.create_role("editor", "Editor").unwrap();

    let err = access.grant(&role, &perm("nonexistent.permission")).unwrap_err();
    assert_eq!(err, RbacError::UnknownPermission(perm("nonexistent.permission")));
    assert!(store.is_empty());
    assert!(!access.has_permission(&role, &perm("nonexistent.permission")).unwrap());
}

#[test]
fn revoking_ungranted_permission_is_not_found() {
    let (access, store) = setup();
    let role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("write")).unwrap();

    let err = access.revoke(&role, &perm("read")).unwrap_err();
    assert!(matches!(err, RbacError::NotFound(_)), "got: {err:?}");
    assert_eq!(store.len(), 1);
}

#[test]
fn revoke_removes_only_the_named_grant() {
    let (access, _) = setup();
    let role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("read")).unwrap();
    access.grant(&role, &perm("write")).unwrap();

    access.revoke(&role, &perm("read")).unwrap();

    assert_eq!(access.permissions(&role).unwrap(), perms(&["write"]));
}

#[test]
fn grants_are_scoped_per_role() {
    let (access, _) = setup();
    let a = access.create_role("a", "A").unwrap();
    let b = access.create_role("b", "B").unwrap();

    access.grant(&a, &perm("read")).unwrap();

    assert!(access.has_permission(&a, &perm("read")).unwrap());
    assert!(!access.has_permission(&b, &perm("read")).unwrap());
}

#[test]
fn held_grant_survives_withdrawal_from_registry() {
    let store = InMemoryPermissionStore::arc();
    let roles = InMemoryRoleStore::arc();
    let cache = Arc::new(NobodyHasAccessCache::new());

    let before = AccessControl::new(store.clone(), roles.clone(), registry(), cache.clone());
    let role = before.create_role("editor", "Editor").unwrap();
    before.grant(&role, &perm("delete")).unwrap();

    // Same storage, registry without "delete".
    let after = AccessControl::new(
        store,
        roles,
        Arc::new(StaticPolicyRegistry::new(["read", "write"])),
        cache,
    );

    assert!(after.has_permission(&role, &perm("delete")).unwrap());
    // Already held, so the grant is still a no-op rather than a rejection.
    after.grant(&role, &perm("delete")).unwrap();

    after.revoke(&role, &perm("delete")).unwrap();
    assert_eq!(
        after.grant(&role, &perm("delete")),
        Err(RbacError::UnknownPermission(perm("delete")))
    );
}

#[test]
fn unpersisted_roles_hold_nothing_and_cannot_be_granted() {
    let (access, store) = setup();
    let role = Role::new("draft", "Draft").unwrap();

    assert!(!access.has_permission(&role, &perm("read")).unwrap());
    assert!(access.permissions(&role).unwrap().is_empty());
    assert_eq!(access.revoke_all(&role).unwrap(), 0);
    assert_eq!(
        access.grant(&role, &perm("read")),
        Err(RbacError::RoleNotPersisted("draft".into()))
    );
    assert!(store.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Bulk operations
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn revoke_all_empties_the_role() {
    let (access, _) = setup();
    let role = access.create_role("editor", "Editor").unwrap();
    for p in ["read", "write", "delete"] {
        access.grant(&role, &perm(p)).unwrap();
    }

    assert_eq!(access.revoke_all(&role).unwrap(), 3);

    for p in ["read", "write", "delete"] {
        assert!(!access.has_permission(&role, &perm(p)).unwrap());
        assert!(access.is_permission_unassigned(&perm(p)).unwrap());
    }
    assert!(access.permissions(&role).unwrap().is_empty());
    assert_eq!(access.revoke_all(&role).unwrap(), 0);
}

#[test]
fn set_permissions_skips_unknown_identifiers() {
    let (access, _) = setup();
    let mut role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("delete")).unwrap();

    let granted = access
        .set_permissions(&mut role, [perm("read"), perm("bogus"), perm("write")])
        .unwrap();

    assert_eq!(granted, perms(&["read", "write"]));
    assert_eq!(access.permissions(&role).unwrap(), perms(&["read", "write"]));
    assert!(access.is_permission_unassigned(&perm("delete")).unwrap());
}

#[test]
fn set_permissions_tolerates_duplicates() {
    let (access, store) = setup();
    let mut role = access.create_role("editor", "Editor").unwrap();

    access
        .set_permissions(&mut role, [perm("read"), perm("read")])
        .unwrap();

    assert_eq!(store.len(), 1);
}

#[test]
fn set_permissions_persists_a_new_role() {
    let (access, _) = setup();
    let mut role = Role::new("auditor", "Auditor").unwrap();

    access.set_permissions(&mut role, [perm("read")]).unwrap();

    let id = role.id().expect("role should have been persisted");
    assert_eq!(access.get_role(id).unwrap().slug(), "auditor");
    assert_eq!(access.permissions(&role).unwrap(), perms(&["read"]));
}

#[test]
fn set_permissions_with_empty_set_clears_everything() {
    let (access, store) = setup();
    let mut role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("read")).unwrap();

    let granted = access.set_permissions(&mut role, Vec::new()).unwrap();

    assert!(granted.is_empty());
    assert!(store.is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Nobody-has-access cache
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn unassigned_tracks_grants_across_roles() {
    let (access, _) = setup();
    let a = access.create_role("a", "A").unwrap();
    let b = access.create_role("b", "B").unwrap();

    access.grant(&a, &perm("read")).unwrap();
    assert!(access.has_permission(&a, &perm("read")).unwrap());
    assert!(access.is_permission_unassigned(&perm("write")).unwrap());

    access.grant(&b, &perm("write")).unwrap();
    assert!(!access.is_permission_unassigned(&perm("write")).unwrap());

    access.revoke(&b, &perm("write")).unwrap();
    assert!(access.is_permission_unassigned(&perm("write")).unwrap());
}

#[test]
fn last_revoke_flips_unassigned_only_when_nobody_holds_it() {
    let (access, _) = setup();
    let a = access.create_role("a", "A").unwrap();
    let b = access.create_role("b", "B").unwrap();
    access.grant(&a, &perm("read")).unwrap();
    access.grant(&b, &perm("read")).unwrap();
    assert!(!access.is_permission_unassigned(&perm("read")).unwrap());

    access.revoke(&a, &perm("read")).unwrap();
    assert!(!access.is_permission_unassigned(&perm("read")).unwrap());

    access.revoke(&b, &perm("read")).unwrap();
    assert!(access.is_permission_unassigned(&perm("read")).unwrap());
}

#[test]
fn repeated_queries_hit_the_cache() {
    let (access, _) = setup();

    for _ in 0..5 {
        assert!(access.is_permission_unassigned(&perm("read")).unwrap());
    }

    let stats = access.cache().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);
}

#[test]
fn unknown_identifiers_are_unassigned() {
    let (access, _) = setup();
    assert!(access.is_permission_unassigned(&perm("bogus")).unwrap());
}

#[test]
fn unknown_identifiers_bypass_the_cache() {
    let (access, _) = setup();

    for i in 0..100 {
        let unknown = Permission::new(format!("unregistered.{i}"));
        assert!(access.is_permission_unassigned(&unknown).unwrap());
    }

    assert!(access.cache().is_empty());
    assert_eq!(access.cache().stats(), CacheStats::default());
}

#[test]
fn withdrawn_but_held_identifiers_are_still_reported_held() {
    init_logging();
    let store = InMemoryPermissionStore::arc();
    let roles = InMemoryRoleStore::arc();
    let before = AccessControl::new(
        store.clone(),
        roles.clone(),
        registry(),
        Arc::new(NobodyHasAccessCache::new()),
    );
    let role = before.create_role("editor", "Editor").unwrap();
    before.grant(&role, &perm("delete")).unwrap();

    let after = AccessControl::new(
        store,
        roles,
        Arc::new(StaticPolicyRegistry::new(["read", "write"])),
        Arc::new(NobodyHasAccessCache::new()),
    );
    assert!(!after.is_permission_unassigned(&perm("delete")).unwrap());
    assert!(after.cache().is_empty());
}

#[test]
fn purge_removes_permission_from_every_role() {
    let (access, _) = setup();
    let a = access.create_role("a", "A").unwrap();
    let b = access.create_role("b", "B").unwrap();
    access.grant(&a, &perm("delete")).unwrap();
    access.grant(&b, &perm("delete")).unwrap();
    access.grant(&b, &perm("read")).unwrap();
    assert!(!access.is_permission_unassigned(&perm("delete")).unwrap());

    assert_eq!(access.purge_permission(&perm("delete")).unwrap(), 2);

    assert!(access.is_permission_unassigned(&perm("delete")).unwrap());
    assert_eq!(access.permissions(&b).unwrap(), perms(&["read"]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn deleting_a_role_releases_its_permissions() {
    let (access, store) = setup();
    let role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("write")).unwrap();
    assert!(!access.is_permission_unassigned(&perm("write")).unwrap());

    access.delete_role(&role).unwrap();

    assert!(store.is_empty());
    assert!(access.is_permission_unassigned(&perm("write")).unwrap());
    assert_eq!(access.find_role_by_slug("editor").unwrap(), None);
}

#[test]
fn duplicate_slugs_are_rejected() {
    let (access, _) = setup();
    access.create_role("editor", "Editor").unwrap();

    let err = access.create_role("editor", "Another Editor").unwrap_err();
    assert!(matches!(err, RbacError::AlreadyExists(_)), "got: {err:?}");
}

#[test]
fn invalid_slug_is_a_domain_error() {
    let (access, _) = setup();
    let err = access.create_role("Not A Slug", "Bad").unwrap_err();
    assert!(matches!(err, RbacError::Domain(_)), "got: {err:?}");
}

#[test]
fn save_role_updates_name_of_persisted_role() {
    let (access, _) = setup();
    let mut role = access.create_role("editor", "Editor").unwrap();
    let id = role.id().unwrap();

    role.rename("Managing Editor").unwrap();
    assert_eq!(access.save_role(&mut role).unwrap(), id);

    assert_eq!(access.get_role(id).unwrap().name(), "Managing Editor");
    assert_eq!(access.list_roles().unwrap().len(), 1);
}

#[test]
fn view_serializes_derived_permissions() {
    let (access, _) = setup();
    let role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("write")).unwrap();
    access.grant(&role, &perm("read")).unwrap();

    let view = access.view(&role).unwrap();
    let json = serde_json::to_value(&view).unwrap();

    assert_eq!(json["slug"], "editor");
    assert_eq!(json["name"], "Editor");
    assert_eq!(json["permissions"], serde_json::json!(["read", "write"]));
}

#[test]
fn registry_built_from_config() -> anyhow::Result<()> {
    let config = RbacConfig::from_json(
        r#"{ "policies": { "posts.read": true, "posts.write": true, "posts.delete": false } }"#,
    )?;
    let access = in_memory_access_control(Arc::new(config.registry()));
    let role = access.create_role("author", "Author")?;

    access.grant(&role, &Permission::new("posts.write"))?;
    assert_eq!(
        access.grant(&role, &Permission::new("posts.delete")),
        Err(RbacError::UnknownPermission(Permission::new("posts.delete")))
    );
    assert!(access.is_permission_unassigned(&Permission::new("posts.read"))?);
    Ok(())
}

#[test]
fn policies_expose_the_registry() {
    let access = in_memory_access_control(registry());
    assert_eq!(access.policies(), perms(&["delete", "read", "write"]));
}

// ─────────────────────────────────────────────────────────────────────────────
// Store failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn store_failures_propagate_unchanged() {
    let store = Arc::new(FlakyStore::default());
    let access = AccessControl::new(
        store.clone(),
        InMemoryRoleStore::arc(),
        registry(),
        Arc::new(NobodyHasAccessCache::new()),
    );
    let mut role = access.create_role("editor", "Editor").unwrap();
    access.grant(&role, &perm("read")).unwrap();

    store.go_down();
    let unavailable = RbacError::StoreUnavailable("connection refused".into());

    assert_eq!(access.grant(&role, &perm("write")), Err(unavailable.clone()));
    assert_eq!(access.revoke(&role, &perm("read")), Err(unavailable.clone()));
    assert_eq!(access.has_permission(&role, &perm("read")), Err(unavailable.clone()));
    assert_eq!(access.revoke_all(&role), Err(unavailable.clone()));
    assert_eq!(
        access.set_permissions(&mut role, [perm("write")]),
        Err(unavailable.clone())
    );
    assert_eq!(access.is_permission_unassigned(&perm("read")), Err(unavailable));

    // Nothing was lost while the store was down.
    assert_eq!(
        store.inner.list_by_role(role.id().unwrap()).unwrap().len(),
        1
    );
}

#[test]
fn failed_write_leaves_no_stale_cache_entry() {
    let store = Arc::new(FlakyStore::default());
    let access = AccessControl::new(
        store.clone(),
        InMemoryRoleStore::arc(),
        registry(),
        Arc::new(NobodyHasAccessCache::new()),
    );
    let role = access.create_role("editor", "Editor").unwrap();
    assert!(access.is_permission_unassigned(&perm("write")).unwrap());

    store.writes_down.store(true, Ordering::SeqCst);
    assert_eq!(
        access.grant(&role, &perm("write")),
        Err(RbacError::StoreUnavailable("read-only replica".into()))
    );
    assert!(!access.has_permission(&role, &perm("write")).unwrap());

    // The failed create still invalidated; the answer is recomputed, not assumed.
    assert!(access.is_permission_unassigned(&perm("write")).unwrap());
    assert_eq!(access.cache().stats().misses, 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Concurrency
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn concurrent_writers_never_leave_a_stale_answer() {
    let (access, store) = setup();
    let roles: Vec<Role> = (0..8)
        .map(|i| access.create_role(&format!("role-{i}"), "Worker").unwrap())
        .collect();

    std::thread::scope(|scope| {
        for (i, role) in roles.iter().enumerate() {
            let access = access.clone();
            scope.spawn(move || {
                for round in 0..200 {
                    access.grant(role, &perm("write")).unwrap();
                    let _ = access.is_permission_unassigned(&perm("write")).unwrap();
                    // Leave the last role holding the permission.
                    if !(i == 7 && round == 199) {
                        access.revoke(role, &perm("write")).unwrap();
                    }
                    let _ = access.is_permission_unassigned(&perm("write")).unwrap();
                }
            });
        }
    });

    let held = store.exists_for_permission(&perm("write")).unwrap();
    assert!(held);
    assert_eq!(access.is_permission_unassigned(&perm("write")).unwrap(), !held);
}

#[test]
fn concurrent_grants_of_the_same_pair_are_idempotent() {
    let (access, store) = setup();
    let role = access.create_role("editor", "Editor").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let access = access.clone();
            let role = &role;
            scope.spawn(move || access.grant(role, &perm("read")).unwrap());
        }
    });

    assert_eq!(store.len(), 1);
    assert!(!access.is_permission_unassigned(&perm("read")).unwrap());
}
