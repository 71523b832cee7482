//! Cross-manager invariants of the control plane.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Duration;

use warden::auth::{NewUser, SessionOptions, UserUpdate};
use warden::controls::{RateLimitAction, RateLimitRuleDef, RateLimitScope};
use warden::events::{EventBus, handler};
use warden::identity::OAuthClientDef;
use warden::monitor::DetectionInput;
use warden::plugins::PluginManifest;
use warden::rbac::{DelegationScope, PermissionDef, RoleAssignmentOptions, RoleDef};
use warden::{Platform, RequestScreen};

/// Session validity law: ok iff active, unexpired, and the user is active.
#[tokio::test]
async fn session_validity_law() {
    let platform = Platform::builder().build().await;
    let auth = platform.auth();
    let user = auth
        .register_user(NewUser::new("alice", "alice@ex.com", "pw"))
        .await
        .unwrap();

    // Active + unexpired + active user: ok
    let session = auth
        .create_session(user.user_id, SessionOptions::default())
        .await
        .unwrap();
    assert!(auth.validate_session(session.session_id).await.is_some());

    // Inactive session: not ok
    auth.invalidate_session(session.session_id).await;
    assert!(auth.validate_session(session.session_id).await.is_none());

    // Expired session: not ok, and lazily deactivated on read
    let expired = auth
        .create_session(
            user.user_id,
            SessionOptions {
                lifetime: Some(Duration::seconds(-1)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(auth.validate_session(expired.session_id).await.is_none());
    assert!(!auth.get_session(expired.session_id).await.unwrap().active);

    // Inactive user: not ok
    let session = auth
        .create_session(user.user_id, SessionOptions::default())
        .await
        .unwrap();
    auth.update_user(
        user.user_id,
        UserUpdate {
            active: Some(false),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert!(auth.validate_session(session.session_id).await.is_none());
}

/// OAuth code single-use under concurrency: exactly one winner.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oauth_code_single_use_under_concurrency() {
    let platform = Arc::new(Platform::builder().build().await);
    let user = platform
        .auth()
        .register_user(NewUser::new("alice", "alice@ex.com", "pw"))
        .await
        .unwrap();
    platform
        .identity()
        .oauth()
        .register_client(
            OAuthClientDef::confidential("c1", "C", "s")
                .with_redirect_uris(&["https://x/cb"])
                .with_scopes(&["*"]),
        )
        .await
        .unwrap();

    for _ in 0..10 {
        let code = platform
            .identity()
            .oauth()
            .create_authorization_code("c1", user.user_id, "https://x/cb", vec![], None)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let platform = Arc::clone(&platform);
            let code = code.code.clone();
            handles.push(tokio::spawn(async move {
                platform
                    .identity()
                    .oauth()
                    .exchange_authorization_code(&code, "c1", Some("s"), None, None)
                    .await
                    .is_ok()
            }));
        }
        let successes = {
            let mut successes = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    successes += 1;
                }
            }
            successes
        };
        assert_eq!(successes, 1);
    }
}

/// Sliding-window rate limits recover once old entries age out, and the
/// counter never exceeds the limit on admitted requests.
#[tokio::test]
async fn rate_limit_window_slides() {
    let platform = Platform::builder().build().await;
    platform
        .controls()
        .register_rate_limit_rule(RateLimitRuleDef::new(
            "blink",
            "Blink",
            "^/blink$",
            2,
            1,
            RateLimitScope::Global,
            RateLimitAction::Block,
        ))
        .await
        .unwrap();

    let check = || platform.controls().check_rate_limit("/blink", None, None);
    assert!(check().await.allowed);
    assert!(check().await.allowed);
    assert!(!check().await.allowed);

    tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
    assert!(check().await.allowed);
}

/// Consent consistency: a positive check implies manifest membership,
/// grant, no denial, and a usable consent.
#[tokio::test]
async fn consent_consistency() {
    let platform = Platform::builder().build().await;
    let plugins = platform.plugins();
    let user = uuid::Uuid::new_v4();

    plugins
        .register_plugin_manifest(
            PluginManifest::new("notes", "Notes", "1.0.0", "Acme")
                .with_permissions(&["file.read", "file.write"]),
        )
        .await
        .unwrap();
    let request = plugins.request_user_consent(user, "notes", None).await.unwrap();
    plugins
        .process_consent_response(
            request.request_id,
            user,
            "notes",
            vec!["file.read".into()],
            vec!["file.write".into()],
            None,
        )
        .await
        .unwrap();

    assert!(plugins.check_plugin_permission(user, "notes", "file.read").await);

    let manifest = plugins.get_plugin_manifest("notes").await.unwrap();
    let consent = plugins.get_user_plugin_consent(user, "notes").await.unwrap();
    assert!(manifest.requested_permissions.contains(&"file.read".to_string()));
    assert!(consent.granted.contains(&"file.read".to_string()));
    assert!(!consent.denied.contains(&"file.read".to_string()));
    assert!(consent.is_usable());

    // Revocation breaks the conjunction
    plugins.revoke_user_consent(user, "notes").await;
    assert!(!plugins.check_plugin_permission(user, "notes", "file.read").await);
}

/// Delegation soundness: the delegator must hold every delegated
/// permission at creation time.
#[tokio::test]
async fn delegation_soundness() {
    let platform = Platform::builder().build().await;
    let rbac = platform.rbac();
    let enhanced = platform.enhanced_rbac();
    let (delegator, delegatee) = (uuid::Uuid::new_v4(), uuid::Uuid::new_v4());

    let read = rbac
        .register_permission(PermissionDef::new("file.read", ""))
        .await
        .unwrap();
    rbac.register_permission(PermissionDef::new("file.write", ""))
        .await
        .unwrap();
    let role = rbac
        .register_role(RoleDef::new("Readers", "").with_permissions(vec![read.permission_id]))
        .await
        .unwrap();
    rbac.assign_role_to_user(delegator, role.role_id, RoleAssignmentOptions::default())
        .await
        .unwrap();

    // file.write is registered but not held by the delegator
    let err = enhanced
        .delegate_permission(
            delegator,
            delegatee,
            vec!["file.read".into(), "file.write".into()],
            DelegationScope::default(),
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Delegator does not have permission: file.write");

    enhanced
        .delegate_permission(
            delegator,
            delegatee,
            vec!["file.read".into()],
            DelegationScope::default(),
            None,
        )
        .await
        .unwrap();
}

/// Idempotent revocations: a second call is a no-op returning the same
/// result and emitting no further event.
#[tokio::test]
async fn revocations_are_idempotent() {
    let platform = Platform::builder().build().await;
    let auth = platform.auth();
    let user = auth
        .register_user(NewUser::new("alice", "alice@ex.com", "pw"))
        .await
        .unwrap();
    let session = auth
        .create_session(user.user_id, SessionOptions::default())
        .await
        .unwrap();

    let counted = Arc::new(AtomicUsize::new(0));
    {
        let counted = Arc::clone(&counted);
        platform
            .bus()
            .subscribe(
                "session.invalidated",
                handler(move |_| {
                    let counted = Arc::clone(&counted);
                    async move {
                        counted.fetch_add(1, Ordering::SeqCst);
                    }
                }),
            )
            .await;
    }

    assert!(auth.invalidate_session(session.session_id).await);
    assert!(auth.invalidate_session(session.session_id).await);
    assert_eq!(counted.load(Ordering::SeqCst), 1);
}

/// Event fan-out: one state change, one event, no duplicate delivery to
/// any subscriber.
#[tokio::test]
async fn event_fan_out_is_exactly_once() {
    let bus = Arc::new(EventBus::new());
    let exact = Arc::new(AtomicUsize::new(0));
    let wildcard = Arc::new(AtomicUsize::new(0));
    {
        let exact = Arc::clone(&exact);
        bus.subscribe(
            "user.registered",
            handler(move |_| {
                let exact = Arc::clone(&exact);
                async move {
                    exact.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await;
        let wildcard = Arc::clone(&wildcard);
        bus.subscribe(
            "user.*",
            handler(move |_| {
                let wildcard = Arc::clone(&wildcard);
                async move {
                    wildcard.fetch_add(1, Ordering::SeqCst);
                }
            }),
        )
        .await;
    }

    let auth = warden::auth::AuthenticationManager::new(Arc::clone(&bus));
    auth.register_user(NewUser::new("alice", "alice@ex.com", "pw"))
        .await
        .unwrap();

    assert_eq!(exact.load(Ordering::SeqCst), 1);
    assert_eq!(wildcard.load(Ordering::SeqCst), 1);
    assert_eq!(bus.stats().events_emitted, 1);
}

/// The monitoring wiring turns control-plane events into audit records,
/// and firing detections land in the security event log.
#[tokio::test]
async fn monitoring_wiring() {
    let platform = Platform::builder().build().await;
    platform
        .auth()
        .register_user(NewUser::new("alice", "alice@ex.com", "pw"))
        .await
        .unwrap();

    let records = platform
        .monitor()
        .get_audit_logs(&warden::monitor::AuditFilter {
            action: Some("user.registered".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].resource_type, "user");

    // Statistical anomaly -> security.anomaly_detected -> event log
    platform
        .monitor()
        .add_baseline_data("failed-login", vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0])
        .await
        .unwrap();
    let detection = platform
        .monitor()
        .detect_anomalies("failed-login", DetectionInput::Value(40.0))
        .await
        .unwrap();
    assert!(detection.anomalous);

    let events = platform
        .controls()
        .get_security_events(&warden::controls::SecurityEventFilter {
            event_type: Some("anomaly_detected".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(events.len(), 1);
}

/// Role-hierarchy monotonicity: a child role's closure contains every
/// parent permission.
#[tokio::test]
async fn hierarchy_monotonicity() {
    let platform = Platform::builder().build().await;
    let rbac = platform.rbac();

    let read = rbac
        .register_permission(PermissionDef::new("doc.read", ""))
        .await
        .unwrap();
    let write = rbac
        .register_permission(PermissionDef::new("doc.write", ""))
        .await
        .unwrap();
    let admin_p = rbac
        .register_permission(PermissionDef::new("doc.admin", ""))
        .await
        .unwrap();

    let viewer = rbac
        .register_role(RoleDef::new("Viewer", "").with_permissions(vec![read.permission_id]))
        .await
        .unwrap();
    let editor = rbac
        .register_role(
            RoleDef::new("Editor", "")
                .with_permissions(vec![write.permission_id])
                .with_parents(vec![viewer.role_id]),
        )
        .await
        .unwrap();
    let owner = rbac
        .register_role(
            RoleDef::new("Owner", "")
                .with_permissions(vec![admin_p.permission_id])
                .with_parents(vec![editor.role_id]),
        )
        .await
        .unwrap();

    let user = uuid::Uuid::new_v4();
    rbac.assign_role_to_user(user, owner.role_id, RoleAssignmentOptions::default())
        .await
        .unwrap();

    let permissions = rbac.effective_permissions(user).await;
    for name in ["doc.read", "doc.write", "doc.admin"] {
        assert!(permissions.contains(name), "missing {name}");
    }
}

/// The gate feeds dedicated security events whose payloads are intact.
#[tokio::test]
async fn gate_denials_record_structured_events() {
    let platform = Platform::builder().build().await;
    let decision = platform
        .screen_request(RequestScreen::new("/api/x").from_ip("203.0.113.5".parse().unwrap()))
        .await;
    assert!(!decision.allowed);
    assert!(decision.reason.as_deref().unwrap_or_default().contains("blocked"));

    let events = platform
        .controls()
        .get_security_events(&warden::controls::SecurityEventFilter {
            event_type: Some("ip_blocked".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ip_address.as_deref(), Some("203.0.113.5"));
    assert_eq!(events[0].resource.as_deref(), Some("/api/x"));
}
