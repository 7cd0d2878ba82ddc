//! End-to-end pipeline runs over fake registries and templates with a real store

mod helper;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use helper::{
    RecordingNotifier, RecordingTemplateUpdater, StaticRegistry, create_test_manager,
    create_test_storage,
};
use template_versions::config::PipelineConfig;
use template_versions::pipeline::{PipelineError, PipelineOutcome, UpdatePipeline};
use template_versions::version::registry::RegistryKind;
use template_versions::version::types::UpdatePolicy;

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        retry_delay: 0,
        ..PipelineConfig::default()
    }
}

fn policy(auto_update: bool, security_priority: bool, breaking_change_approval: bool) -> UpdatePolicy {
    UpdatePolicy {
        auto_update,
        security_priority,
        breaking_change_approval,
        ..UpdatePolicy::default()
    }
}

fn versions(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(name, version)| (name.to_string(), version.to_string()))
        .collect()
}

#[tokio::test]
async fn no_newer_version_is_a_successful_no_op() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage,
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.2.0")],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]));

    let result = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .execute()
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.outcome, PipelineOutcome::NoUpdates);
    assert_eq!(result.updates_detected, 0);
    assert_eq!(result.store_backup, None);
    let calls = templates.calls();
    assert!(calls.backups.is_empty());
    assert!(calls.updates.is_empty());
}

#[tokio::test]
async fn auto_update_applies_minor_update() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]));

    let result = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .execute()
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.outcome, PipelineOutcome::Applied);
    assert_eq!(result.updates_detected, 1);
    assert_eq!(result.updates_applied, 1);
    assert_eq!(result.breaking_changes, 0);

    let calls = templates.calls();
    assert_eq!(calls.backups, vec![vec![PathBuf::from("web/package.json")]]);
    assert_eq!(calls.updates, vec![versions(&[("react", "18.3.1")])]);
    assert_eq!(calls.validations, vec![PathBuf::from("web/package.json")]);
    assert!(calls.restores.is_empty());

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.3.1");
    assert_eq!(record.previous_version, "18.2.0");
    assert!(result.store_backup.is_some_and(|p| p.exists()));
}

#[tokio::test]
async fn breaking_update_waits_for_manual_approval() {
    let (_dir, storage) = create_test_storage(&[("react", "17.0.2")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.2.0")],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]));

    let result = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .execute()
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.outcome, PipelineOutcome::NothingApproved);
    assert_eq!(result.breaking_changes, 1);
    assert_eq!(result.updates_applied, 0);
    assert!(result.skipped.iter().any(|s| s.name == "react"));
    assert!(templates.calls().updates.is_empty());

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "17.0.2");
    assert_eq!(record.latest_version, "18.2.0");
}

#[tokio::test]
async fn security_priority_overrides_breaking_change_approval() {
    let (_dir, storage) = create_test_storage(&[("express", "4.18.2")], policy(false, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![
            StaticRegistry::new(RegistryKind::Npm)
                .with_latest("express", "5.0.1")
                .with_issue("express", "GHSA-rv95-896h-c2vc"),
        ],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["api/package.json"]));

    let result = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .execute()
        .await
        .unwrap();

    assert_eq!(result.outcome, PipelineOutcome::Applied);
    assert_eq!(result.security_updates, 1);
    assert_eq!(result.breaking_changes, 1);
    assert_eq!(result.updates_applied, 1);
    assert_eq!(templates.calls().updates, vec![versions(&[("express", "5.0.1")])]);

    let record = storage.get_version_info("express").unwrap().unwrap();
    assert_eq!(record.current_version, "5.0.1");
    assert!(record.is_secure);
    assert_eq!(record.metadata.get("last_update_breaking").map(String::as_str), Some("true"));
}

#[tokio::test]
async fn failing_apply_rolls_back_after_all_attempts() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates = Arc::new(
        RecordingTemplateUpdater::new(&["web/package.json", "admin/package.json"]).failing_updates(),
    );
    let notifier = Arc::new(RecordingNotifier::default());

    let failure = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .with_notifier(notifier.clone())
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PipelineError::Apply { attempts: 3, .. }));
    assert!(!failure.result.success);
    assert!(failure.result.rollback_performed);
    assert_eq!(failure.result.outcome, PipelineOutcome::RolledBack);
    assert_eq!(failure.result.updates_applied, 0);

    let calls = templates.calls();
    assert_eq!(calls.updates.len(), 3);
    assert_eq!(calls.restores, calls.backups);
    assert_eq!(
        calls.restores,
        vec![vec![
            PathBuf::from("web/package.json"),
            PathBuf::from("admin/package.json")
        ]]
    );

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.2.0");

    let notified = notifier.results();
    assert_eq!(notified.len(), 1);
    assert!(!notified[0].success);
}

#[tokio::test]
async fn failure_without_backups_is_not_rolled_back() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates =
        Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]).failing_updates());
    let config = PipelineConfig {
        backup_enabled: false,
        max_retries: 1,
        ..fast_config()
    };

    let failure = UpdatePipeline::new(manager, templates.clone(), config)
        .execute()
        .await
        .unwrap_err();

    assert!(!failure.result.rollback_performed);
    assert_eq!(failure.result.outcome, PipelineOutcome::FailedWithoutRollback);
    let calls = templates.calls();
    assert_eq!(calls.updates.len(), 1);
    assert!(calls.restores.is_empty());

    // Nothing restored the store either
    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.3.1");
}

#[tokio::test]
async fn backup_failure_is_fatal_when_rollback_is_enabled() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates =
        Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]).failing_backups());

    let failure = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(failure.error, PipelineError::Backup(_)));
    assert_eq!(failure.result.outcome, PipelineOutcome::FailedWithoutRollback);
    assert!(!failure.result.rollback_performed);
    let calls = templates.calls();
    assert_eq!(calls.backups.len(), 1);
    assert!(calls.updates.is_empty());
    assert!(calls.restores.is_empty());

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.2.0");
}

#[tokio::test]
async fn backup_failure_is_a_warning_when_rollback_is_disabled() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates =
        Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]).failing_backups());
    let config = PipelineConfig {
        rollback_on_failure: false,
        ..fast_config()
    };

    let result = UpdatePipeline::new(manager, templates.clone(), config)
        .execute()
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.outcome, PipelineOutcome::Applied);
    assert!(result.warnings.iter().any(|w| w.starts_with("backup incomplete")));
    assert_eq!(templates.calls().updates, vec![versions(&[("react", "18.3.1")])]);

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.3.1");
}

#[tokio::test]
async fn cancel_before_run_fails_without_touching_anything() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage,
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]));
    let pipeline = UpdatePipeline::new(manager, templates.clone(), fast_config());

    pipeline.cancel_handle().cancel();
    let failure = pipeline.execute().await.unwrap_err();

    assert!(matches!(failure.error, PipelineError::Cancelled));
    assert_eq!(failure.result.outcome, PipelineOutcome::FailedWithoutRollback);
    assert_eq!(templates.calls(), Default::default());
}

#[tokio::test]
async fn cancel_between_retries_rolls_back() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage.clone(),
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.3.1")],
    );
    let templates =
        Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]).failing_updates());
    let pipeline = UpdatePipeline::new(manager, templates.clone(), fast_config());
    templates.cancel_on_update(pipeline.cancel_handle());

    let failure = pipeline.execute().await.unwrap_err();

    assert!(matches!(failure.error, PipelineError::Cancelled));
    assert!(failure.result.rollback_performed);
    assert_eq!(failure.result.outcome, PipelineOutcome::RolledBack);
    let calls = templates.calls();
    assert_eq!(calls.updates.len(), 1);
    assert_eq!(calls.restores, vec![vec![PathBuf::from("web/package.json")]]);

    let record = storage.get_version_info("react").unwrap().unwrap();
    assert_eq!(record.current_version, "18.2.0");
}

#[tokio::test]
async fn validation_failures_are_warnings() {
    let (_dir, storage) = create_test_storage(&[("vite", "5.4.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage,
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("vite", "5.4.10")],
    );
    let templates =
        Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]).failing_validation());

    let result = UpdatePipeline::new(manager, templates, fast_config())
        .execute()
        .await
        .unwrap();

    assert_eq!(result.outcome, PipelineOutcome::Applied);
    assert!(result.warnings.iter().any(|w| w.contains("validation")));
}

#[tokio::test]
async fn registry_failures_are_skipped_not_fatal() {
    let (_dir, storage) = create_test_storage(
        &[("react", "18.2.0"), ("github.com/gin-gonic/gin", "v1.9.0")],
        policy(true, true, true),
    );
    let manager = create_test_manager(
        storage.clone(),
        vec![
            StaticRegistry::new(RegistryKind::Npm)
                .with_latest("react", "18.3.1")
                .with_failing("left-pad"),
            StaticRegistry::new(RegistryKind::GoProxy)
                .with_latest("github.com/gin-gonic/gin", "v1.10.0")
                .unavailable(),
            StaticRegistry::new(RegistryKind::GitHub).with_latest("golang/go", "1.22.0"),
        ],
    );
    let templates = Arc::new(RecordingTemplateUpdater::new(&["web/package.json"]));
    let notifier = Arc::new(RecordingNotifier::default());

    let result = UpdatePipeline::new(manager, templates.clone(), fast_config())
        .with_notifier(notifier.clone())
        .execute()
        .await
        .unwrap();

    assert_eq!(result.outcome, PipelineOutcome::Applied);
    assert_eq!(result.updates_detected, 1);
    assert!(result.skipped.iter().any(|s| s.name == "left-pad"));
    assert!(result.skipped.iter().any(|s| s.name == "go_proxy"));
    assert_eq!(templates.calls().updates, vec![versions(&[("react", "18.3.1")])]);

    // First sighting is recorded but never treated as an update
    let go = storage.get_version_info("golang/go").unwrap().unwrap();
    assert_eq!(go.current_version, "1.22.0");
    assert_eq!(notifier.results().len(), 1);
}

#[tokio::test]
async fn disabled_notifications_are_not_sent() {
    let (_dir, storage) = create_test_storage(&[("react", "18.2.0")], policy(true, true, true));
    let manager = create_test_manager(
        storage,
        vec![StaticRegistry::new(RegistryKind::Npm).with_latest("react", "18.2.0")],
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let config = PipelineConfig {
        notifications_enabled: false,
        ..fast_config()
    };

    UpdatePipeline::new(manager, Arc::new(RecordingTemplateUpdater::default()), config)
        .with_notifier(notifier.clone())
        .execute()
        .await
        .unwrap();

    assert!(notifier.results().is_empty());
}
