//! Unit tests for module error types.

use rstest::rstest;

use super::*;

#[rstest]
#[case::handle(ModuleError::handle_not_found(ModuleHandle::new(7)), "#7")]
#[case::name(ModuleError::name_not_found("system"), "'system'")]
#[case::repository(ModuleError::repository_not_found("running"), "'running'")]
fn not_found_messages_name_the_key(#[case] error: ModuleError, #[case] fragment: &str) {
    let message = error.to_string();
    assert!(message.contains("not found"), "missing 'not found': {message}");
    assert!(message.contains(fragment), "missing {fragment}: {message}");
}

#[test]
fn repository_conflict_names_owner() {
    let error = ModuleError::RepositoryInUse {
        repository: RepositoryId::new("ietf-system"),
        owner: "system".into(),
    };
    let message = error.to_string();
    assert!(message.contains("ietf-system"), "{message}");
    assert!(message.contains("'system'"), "{message}");
}

#[test]
fn init_failure_carries_module_message() {
    let error = ModuleError::InitFailed {
        name: "system".into(),
        message: "datastore locked".into(),
    };
    assert_eq!(
        error.to_string(),
        "module 'system' failed to initialise: datastore locked"
    );
}
