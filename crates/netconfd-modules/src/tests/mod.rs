//! Crate-level integration and BDD tests.

use serde_json::json;

use crate::capability::CapabilitySet;
use crate::contract::SessionContext;
use crate::descriptor::ModuleDescriptor;
use crate::factory::ModuleFactory;
use crate::notification::NotificationBus;
use crate::registry::ModuleRegistry;
use crate::reply::Reply;
use crate::system::{CONFIG_CHANGE_EVENT, SYSTEM_CAPABILITY, SYSTEM_OPERATIONS};

mod behaviour;

#[test]
fn built_in_system_module_round_trip() {
    let bus = NotificationBus::default();
    let subscription = bus.subscribe();
    let registry = ModuleRegistry::new(bus);
    let capabilities: CapabilitySet = [SYSTEM_CAPABILITY].into_iter().collect();
    let module = ModuleFactory::with_builtins()
        .instantiate("system")
        .unwrap_or_else(|error| panic!("instantiate: {error}"));
    registry
        .add(
            ModuleDescriptor::new("system", capabilities.clone(), SYSTEM_OPERATIONS),
            module,
        )
        .expect("register");

    let session = SessionContext::new("7", "admin", capabilities);
    let modules = registry.matching("set-hostname", session.capabilities());
    let target = modules.first().expect("system module eligible");
    assert_eq!(
        target.execute(&session, "set-hostname", &json!({"hostname": "edge1"})),
        Reply::Ok
    );
    let event = subscription
        .recv_timeout(std::time::Duration::from_millis(200))
        .expect("change event");
    assert_eq!(event.event(), CONFIG_CHANGE_EVENT);

    let state = registry
        .state_data(target.info().handle())
        .expect("state data");
    assert!(state["system-state"]["clock"]["current-datetime"].is_string());
    assert_eq!(registry.close_all(), 1);
}
