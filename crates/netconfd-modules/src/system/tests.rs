//! Unit tests for the built-in system module.

use std::time::Duration as StdDuration;

use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::capability::CapabilitySet;
use crate::descriptor::ModuleHandle;
use crate::reply::ErrorKind;

fn session() -> SessionContext {
    SessionContext::new("1", "admin", [SYSTEM_CAPABILITY].into_iter().collect::<CapabilitySet>())
}

#[fixture]
fn bus() -> NotificationBus {
    NotificationBus::default()
}

#[fixture]
fn module(bus: NotificationBus) -> SystemModule {
    let mut module = SystemModule::new("router1");
    let context = ModuleContext::new(ModuleHandle::new(0), "system".into(), None, bus);
    module.init(&context).expect("init");
    module
}

fn error_kind(reply: &Reply) -> Option<ErrorKind> {
    reply.as_error().map(RpcError::kind)
}

#[test]
fn init_returns_running_config() {
    let mut module = SystemModule::new("router1");
    let context = ModuleContext::new(
        ModuleHandle::new(4),
        "system".into(),
        None,
        NotificationBus::default(),
    );
    let running = module.init(&context).expect("init");
    assert_eq!(running["system"]["hostname"], "router1");
    assert_eq!(running["system"]["clock"]["timezone-name"], "UTC");
}

#[rstest]
#[case::object(json!({"hostname": "core-2.lab"}))]
#[case::bare_string(json!("core-2.lab"))]
fn set_hostname_updates_config(mut module: SystemModule, #[case] payload: serde_json::Value) {
    assert_eq!(
        module.execute_operation(&session(), "set-hostname", &payload),
        Reply::Ok
    );
    let reply = module.execute_operation(&session(), "get-config", &Value::Null);
    assert_eq!(
        reply,
        Reply::data(json!({
            "system": {
                "hostname": "core-2.lab",
                "clock": {"timezone-name": "UTC"},
                "ntp": {"enabled": false, "server": []},
            }
        }))
    );
}

#[rstest]
#[case::empty("")]
#[case::leading_dash("-router")]
#[case::underscore("my_router")]
#[case::empty_label("a..b")]
fn rejects_malformed_hostnames(mut module: SystemModule, #[case] hostname: &str) {
    let reply = module.execute_operation(&session(), "set-hostname", &json!({"hostname": hostname}));
    assert_eq!(error_kind(&reply), Some(ErrorKind::InvalidValue));
    assert_eq!(reply.as_error().and_then(RpcError::bad_element), Some("hostname"));
}

#[rstest]
fn missing_hostname_is_reported(mut module: SystemModule) {
    let reply = module.execute_operation(&session(), "set-hostname", &json!({}));
    assert_eq!(error_kind(&reply), Some(ErrorKind::MissingParameter));
}

#[rstest]
#[case::name(json!({"timezone-name": "Europe/Prague"}), json!({"timezone-name": "Europe/Prague"}))]
#[case::offset(json!({"timezone-utc-offset": 60}), json!({"timezone-utc-offset": 60}))]
fn set_timezone_accepts_name_or_offset(
    mut module: SystemModule,
    #[case] payload: serde_json::Value,
    #[case] clock: serde_json::Value,
) {
    assert_eq!(module.execute_operation(&session(), "set-timezone", &payload), Reply::Ok);
    let Reply::Data { data } = module.execute_operation(&session(), "get", &Value::Null) else {
        panic!("expected data reply");
    };
    assert_eq!(data["system"]["clock"], clock);
}

#[rstest]
#[case::offset_too_large(json!({"timezone-utc-offset": 900}))]
#[case::offset_not_integer(json!({"timezone-utc-offset": "east"}))]
#[case::traversal(json!({"timezone-name": "../etc/passwd"}))]
fn set_timezone_rejects_bad_values(mut module: SystemModule, #[case] payload: serde_json::Value) {
    let reply = module.execute_operation(&session(), "set-timezone", &payload);
    assert_eq!(error_kind(&reply), Some(ErrorKind::InvalidValue));
}

#[rstest]
fn set_current_datetime_shifts_reported_clock(mut module: SystemModule) {
    let reply = module.execute_operation(
        &session(),
        "set-current-datetime",
        &json!({"current-datetime": "2001-02-03T04:05:06Z"}),
    );
    assert_eq!(reply, Reply::Ok);

    let state = module.get_state_data().expect("state");
    let current = state["system-state"]["clock"]["current-datetime"]
        .as_str()
        .expect("current datetime");
    assert!(current.starts_with("2001-02-03T04:05"), "{current}");
}

#[rstest]
fn set_current_datetime_rejects_garbage(mut module: SystemModule) {
    let reply = module.execute_operation(
        &session(),
        "set-current-datetime",
        &json!({"current-datetime": "yesterday"}),
    );
    assert_eq!(error_kind(&reply), Some(ErrorKind::InvalidValue));
}

#[rstest]
fn ntp_can_be_toggled(mut module: SystemModule) {
    assert_eq!(
        module.execute_operation(&session(), "set-ntp-enabled", &json!({"enabled": true})),
        Reply::Ok
    );
    let Reply::Data { data } = module.execute_operation(&session(), "get-config", &Value::Null)
    else {
        panic!("get-config returns data");
    };
    assert_eq!(data["system"]["ntp"]["enabled"], true);

    assert_eq!(
        module.execute_operation(&session(), "set-ntp-enabled", &json!(false)),
        Reply::Ok
    );
    let Reply::Data { data } = module.execute_operation(&session(), "get-config", &Value::Null)
    else {
        panic!("get-config returns data");
    };
    assert_eq!(data["system"]["ntp"]["enabled"], false);
}

#[rstest]
#[case::missing(json!({}), ErrorKind::MissingParameter)]
#[case::not_boolean(json!({"enabled": "yes"}), ErrorKind::InvalidValue)]
fn set_ntp_enabled_validates_its_flag(
    mut module: SystemModule,
    #[case] payload: serde_json::Value,
    #[case] expected: ErrorKind,
) {
    let reply = module.execute_operation(&session(), "set-ntp-enabled", &payload);
    assert_eq!(error_kind(&reply), Some(expected));
}

#[rstest]
fn ntp_servers_are_added_and_removed(mut module: SystemModule) {
    let added = module.execute_operation(
        &session(),
        "add-ntp-server",
        &json!({"name": "lab", "udp": {"address": "192.0.2.10"}, "association-type": "peer"}),
    );
    assert_eq!(added, Reply::Ok);
    assert_eq!(
        module.execute_operation(&session(), "add-ntp-server", &json!("time.example.net")),
        Reply::Ok
    );
    let Reply::Data { data } = module.execute_operation(&session(), "get-config", &Value::Null)
    else {
        panic!("get-config returns data");
    };
    assert_eq!(
        data["system"]["ntp"]["server"],
        json!([
            {"name": "lab", "udp": {"address": "192.0.2.10"}, "association-type": "peer"},
            {
                "name": "time.example.net",
                "udp": {"address": "time.example.net"},
                "association-type": "server",
            },
        ])
    );

    assert_eq!(
        module.execute_operation(&session(), "remove-ntp-server", &json!({"address": "192.0.2.10"})),
        Reply::Ok
    );
    let Reply::Data { data } = module.execute_operation(&session(), "get-config", &Value::Null)
    else {
        panic!("get-config returns data");
    };
    assert_eq!(data["system"]["ntp"]["server"].as_array().map(Vec::len), Some(1));
}

#[rstest]
fn duplicate_ntp_server_is_rejected(mut module: SystemModule) {
    module.execute_operation(&session(), "add-ntp-server", &json!("192.0.2.10"));
    let reply = module.execute_operation(&session(), "add-ntp-server", &json!("192.0.2.10"));
    assert_eq!(error_kind(&reply), Some(ErrorKind::OperationFailed));
}

#[rstest]
#[case::missing_address(json!({"name": "lab"}), ErrorKind::MissingParameter)]
#[case::bad_host(json!({"address": "not a host"}), ErrorKind::InvalidValue)]
#[case::bad_association(
    json!({"address": "192.0.2.10", "association-type": "broadcast"}),
    ErrorKind::InvalidValue
)]
fn add_ntp_server_validates_input(
    mut module: SystemModule,
    #[case] payload: serde_json::Value,
    #[case] expected: ErrorKind,
) {
    let reply = module.execute_operation(&session(), "add-ntp-server", &payload);
    assert_eq!(error_kind(&reply), Some(expected));
}

#[rstest]
fn pool_is_expanded_into_server_associations(mut module: SystemModule) {
    let reply = module.execute_operation(
        &session(),
        "add-ntp-server",
        &json!({"name": "pool", "address": "127.0.0.1", "association-type": "pool"}),
    );
    assert_eq!(reply, Reply::Ok);
    let Reply::Data { data } = module.execute_operation(&session(), "get-config", &Value::Null)
    else {
        panic!("get-config returns data");
    };
    assert_eq!(
        data["system"]["ntp"]["server"],
        json!([{"name": "pool", "udp": {"address": "127.0.0.1"}, "association-type": "server"}])
    );
}

#[rstest]
fn removing_an_unknown_ntp_server_fails(mut module: SystemModule) {
    let reply = module.execute_operation(&session(), "remove-ntp-server", &json!("192.0.2.99"));
    assert_eq!(error_kind(&reply), Some(ErrorKind::InvalidValue));
}

#[rstest]
fn clock_cannot_be_set_while_ntp_is_enabled(mut module: SystemModule) {
    module.execute_operation(&session(), "set-ntp-enabled", &json!(true));
    let reply = module.execute_operation(
        &session(),
        "set-current-datetime",
        &json!({"current-datetime": "2030-01-01T00:00:00Z"}),
    );
    assert_eq!(error_kind(&reply), Some(ErrorKind::OperationFailed));
}

#[rstest]
fn power_actions_are_scheduled_once(mut module: SystemModule) {
    assert_eq!(
        module.execute_operation(&session(), "system-restart", &Value::Null),
        Reply::Ok
    );
    let second = module.execute_operation(&session(), "system-shutdown", &Value::Null);
    assert_eq!(error_kind(&second), Some(ErrorKind::OperationFailed));

    let state = module.get_state_data().expect("state");
    assert_eq!(state["system-state"]["pending-action"], "restart");
}

#[rstest]
fn unknown_operation_is_not_supported(mut module: SystemModule) {
    let reply = module.execute_operation(&session(), "edit-config", &Value::Null);
    assert_eq!(error_kind(&reply), Some(ErrorKind::OperationNotSupported));
}

#[rstest]
fn state_data_reports_platform(module: SystemModule) {
    let state = module.get_state_data().expect("state");
    assert_eq!(state["system-state"]["platform"]["os-name"], std::env::consts::OS);
    assert!(state["system-state"]["clock"]["boot-datetime"].is_string());
}

#[test]
fn configuration_changes_are_published() {
    let bus = NotificationBus::default();
    let subscription = bus.subscribe();
    let mut module = SystemModule::default();
    let context = ModuleContext::new(ModuleHandle::new(0), "system".into(), None, bus);
    module.init(&context).expect("init");

    module.execute_operation(&session(), "set-hostname", &json!("edge1"));

    let event = subscription
        .recv_timeout(StdDuration::from_millis(200))
        .expect("change event");
    assert_eq!(event.event(), CONFIG_CHANGE_EVENT);
    assert_eq!(
        event.body(),
        &json!({"module": "system", "target": "hostname", "value": "edge1"})
    );
}

#[test]
fn ntp_changes_are_published() {
    let bus = NotificationBus::default();
    let subscription = bus.subscribe();
    let mut module = SystemModule::default();
    let context = ModuleContext::new(ModuleHandle::new(0), "system".into(), None, bus);
    module.init(&context).expect("init");

    module.execute_operation(&session(), "set-ntp-enabled", &json!(true));

    let event = subscription
        .recv_timeout(StdDuration::from_millis(200))
        .expect("change event");
    assert_eq!(event.event(), CONFIG_CHANGE_EVENT);
    assert_eq!(
        event.body(),
        &json!({
            "module": "system",
            "target": "ntp",
            "value": {"enabled": true, "server": []},
        })
    );
}

#[test]
fn close_stops_publishing() {
    let bus = NotificationBus::default();
    let subscription = bus.subscribe();
    let mut module = SystemModule::default();
    let context = ModuleContext::new(ModuleHandle::new(0), "system".into(), None, bus);
    module.init(&context).expect("init");
    module.close();

    module.execute_operation(&session(), "set-hostname", &json!("edge1"));
    assert!(
        subscription
            .recv_timeout(StdDuration::from_millis(20))
            .is_err()
    );
}
