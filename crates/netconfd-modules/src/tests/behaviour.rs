//! Behaviour-driven tests for module registration and eligibility.

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::json;

use crate::capability::CapabilitySet;
use crate::contract::MockDeviceModule;
use crate::descriptor::ModuleDescriptor;
use crate::error::ModuleError;
use crate::registry::ModuleRegistry;

// ---------------------------------------------------------------------------
// Test world
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryWorld {
    registry: ModuleRegistry,
    eligible: Vec<String>,
    registration: Option<Result<(), ModuleError>>,
}

#[fixture]
fn world() -> RegistryWorld {
    RegistryWorld::default()
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}

fn register(world: &RegistryWorld, descriptor: ModuleDescriptor) -> Result<(), ModuleError> {
    let mut module = MockDeviceModule::new();
    module.expect_init().returning(|_| Ok(json!({})));
    module.expect_close().return_const(());
    world.registry.add(descriptor, Box::new(module)).map(|_| ())
}

fn capability(uri: &str) -> CapabilitySet {
    [unquote(uri)].into_iter().collect()
}

// ---------------------------------------------------------------------------
// Given steps
// ---------------------------------------------------------------------------

#[given("a module {name} with capability {uri} implementing {operation}")]
fn given_module(world: &mut RegistryWorld, name: String, uri: String, operation: String) {
    let descriptor =
        ModuleDescriptor::new(unquote(&name), capability(&uri), [unquote(&operation)]);
    register(world, descriptor).expect("register module");
}

#[given("a module {name} owning repository {repository}")]
fn given_repository_owner(world: &mut RegistryWorld, name: String, repository: String) {
    let descriptor = ModuleDescriptor::new(unquote(&name), CapabilitySet::new(), ["get"])
        .with_repository(unquote(&repository));
    register(world, descriptor).expect("register owner");
}

#[given("module {name} is disallowed")]
fn given_disallowed(world: &mut RegistryWorld, name: String) {
    world
        .registry
        .set_allowed(unquote(&name), false)
        .expect("disallow module");
}

// ---------------------------------------------------------------------------
// When steps
// ---------------------------------------------------------------------------

#[when("a session with capability {uri} asks for {operation}")]
fn when_session_asks(world: &mut RegistryWorld, uri: String, operation: String) {
    world.eligible = world
        .registry
        .matching(unquote(&operation), &capability(&uri))
        .iter()
        .map(|module| module.name().to_owned())
        .collect();
}

#[when("module {name} is registered for repository {repository}")]
fn when_registering_owner(world: &mut RegistryWorld, name: String, repository: String) {
    let descriptor = ModuleDescriptor::new(unquote(&name), CapabilitySet::new(), ["get"])
        .with_repository(unquote(&repository));
    world.registration = Some(register(world, descriptor));
}

// ---------------------------------------------------------------------------
// Then steps
// ---------------------------------------------------------------------------

#[then("the eligible modules are {names}")]
fn then_eligible(world: &mut RegistryWorld, names: String) {
    let expected: Vec<&str> = unquote(&names).split(',').collect();
    assert_eq!(world.eligible, expected);
}

#[then("no module is eligible")]
fn then_none_eligible(world: &mut RegistryWorld) {
    assert!(world.eligible.is_empty(), "eligible: {:?}", world.eligible);
}

#[then("registration fails because the repository is in use")]
fn then_repository_in_use(world: &mut RegistryWorld) {
    let outcome = world.registration.as_ref().expect("registration attempted");
    assert!(
        matches!(outcome, Err(ModuleError::RepositoryInUse { .. })),
        "unexpected outcome: {outcome:?}"
    );
}

#[then("the registry holds {count} module(s)")]
fn then_module_count(world: &mut RegistryWorld, count: usize) {
    assert_eq!(world.registry.len(), count);
}

// ---------------------------------------------------------------------------
// Scenario registration
// ---------------------------------------------------------------------------

#[scenario(
    path = "tests/features/module_registry.feature",
    name = "Only modules sharing a capability with the session are eligible"
)]
fn capability_filtering(world: RegistryWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/module_registry.feature",
    name = "Modules are consulted in registration order"
)]
fn registration_order(world: RegistryWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/module_registry.feature",
    name = "Disallowed modules receive no requests"
)]
fn disallowed_modules(world: RegistryWorld) {
    drop(world);
}

#[scenario(
    path = "tests/features/module_registry.feature",
    name = "A repository has a single owner"
)]
fn single_repository_owner(world: RegistryWorld) {
    drop(world);
}
