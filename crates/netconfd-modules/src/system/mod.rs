//! Built-in `system` device module.
//!
//! Models the host identity, clock and power controls of a device in memory:
//! host name, time zone, a settable clock, NTP client settings and scheduled
//! restart/shutdown requests. Nothing is applied to the real operating
//! system.

use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};

use serde_json::{Value, json};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::contract::{DeviceModule, ModuleContext, ModuleFailure, SessionContext, StateSnapshot};
use crate::notification::{Notification, NotificationBus};
use crate::reply::{Reply, RpcError, single_entry};

/// Capability the module participates in.
pub const SYSTEM_CAPABILITY: &str = "urn:ietf:params:xml:ns:yang:ietf-system";

/// Operations the module executes.
pub const SYSTEM_OPERATIONS: [&str; 10] = [
    "get",
    "get-config",
    "set-hostname",
    "set-timezone",
    "set-current-datetime",
    "set-ntp-enabled",
    "add-ntp-server",
    "remove-ntp-server",
    "system-restart",
    "system-shutdown",
];

/// Event published whenever the module's configuration changes.
pub const CONFIG_CHANGE_EVENT: &str = "netconf-config-change";

const SYSTEM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::system");
const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;
const MIN_UTC_OFFSET_MINUTES: i64 = -720;
const MAX_UTC_OFFSET_MINUTES: i64 = 840;
const NTP_PORT: u16 = 123;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Timezone {
    Name(String),
    UtcOffset(i64),
}

impl Timezone {
    fn to_json(&self) -> Value {
        match self {
            Self::Name(name) => json!({ "timezone-name": name }),
            Self::UtcOffset(minutes) => json!({ "timezone-utc-offset": minutes }),
        }
    }
}

/// How the client associates with an NTP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Association {
    Server,
    Peer,
    Pool,
}

impl Association {
    fn parse(value: Option<&Value>) -> Result<Self, RpcError> {
        match value.map(Value::as_str) {
            None | Some(Some("server")) => Ok(Self::Server),
            Some(Some("peer")) => Ok(Self::Peer),
            Some(Some("pool")) => Ok(Self::Pool),
            _ => Err(RpcError::invalid_value(
                "association-type",
                "association type must be 'server', 'peer' or 'pool'",
            )),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::Peer => "peer",
            Self::Pool => "pool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NtpServer {
    name: String,
    address: String,
    association: Association,
}

impl NtpServer {
    fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "udp": { "address": self.address },
            "association-type": self.association.as_str(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PowerAction {
    Restart,
    Shutdown,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Restart => "restart",
            Self::Shutdown => "shutdown",
        })
    }
}

/// In-memory model of host identity and clock.
#[derive(Debug)]
pub struct SystemModule {
    hostname: String,
    timezone: Timezone,
    clock_offset: Duration,
    boot_time: OffsetDateTime,
    ntp_enabled: bool,
    ntp_servers: Vec<NtpServer>,
    pending_action: Option<PowerAction>,
    notifications: Option<NotificationBus>,
    name: String,
}

impl Default for SystemModule {
    fn default() -> Self {
        Self::new("localhost")
    }
}

impl SystemModule {
    /// Creates the module with the given initial host name, UTC time zone,
    /// an unadjusted clock and NTP disabled without servers.
    #[must_use]
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            timezone: Timezone::Name("UTC".to_owned()),
            clock_offset: Duration::ZERO,
            boot_time: OffsetDateTime::now_utc(),
            ntp_enabled: false,
            ntp_servers: Vec::new(),
            pending_action: None,
            notifications: None,
            name: "system".to_owned(),
        }
    }

    fn running_config(&self) -> Value {
        json!({
            "system": {
                "hostname": self.hostname,
                "clock": self.timezone.to_json(),
                "ntp": self.ntp_config(),
            }
        })
    }

    fn ntp_config(&self) -> Value {
        json!({
            "enabled": self.ntp_enabled,
            "server": self.ntp_servers.iter().map(NtpServer::to_json).collect::<Vec<_>>(),
        })
    }

    fn announce(&self, target: &str, value: Value) {
        if let Some(bus) = &self.notifications {
            bus.publish(Notification::new(
                CONFIG_CHANGE_EVENT,
                json!({ "module": self.name, "target": target, "value": value }),
            ));
        }
    }

    fn set_hostname(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        let hostname = required_str(payload, "hostname")?;
        validate_hostname(hostname)?;
        hostname.clone_into(&mut self.hostname);
        info!(target: SYSTEM_TARGET, hostname, "host name changed");
        self.announce("hostname", Value::String(self.hostname.clone()));
        Ok(Reply::Ok)
    }

    fn set_timezone(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        let timezone = if let Some(offset) = payload.get("timezone-utc-offset") {
            let minutes = offset.as_i64().ok_or_else(|| {
                RpcError::invalid_value("timezone-utc-offset", "offset must be an integer")
            })?;
            if !(MIN_UTC_OFFSET_MINUTES..=MAX_UTC_OFFSET_MINUTES).contains(&minutes) {
                return Err(RpcError::invalid_value(
                    "timezone-utc-offset",
                    format!(
                        "offset {minutes} is outside {MIN_UTC_OFFSET_MINUTES}..={MAX_UTC_OFFSET_MINUTES} minutes"
                    ),
                ));
            }
            Timezone::UtcOffset(minutes)
        } else {
            let name = required_str(payload, "timezone-name")?;
            validate_timezone_name(name)?;
            Timezone::Name(name.to_owned())
        };
        self.timezone = timezone;
        info!(target: SYSTEM_TARGET, timezone = ?self.timezone, "time zone changed");
        self.announce("clock", self.timezone.to_json());
        Ok(Reply::Ok)
    }

    fn set_current_datetime(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        if self.ntp_enabled {
            return Err(RpcError::operation_failed(
                "the clock is synchronised by NTP; disable NTP before setting it",
            ));
        }
        let text = required_str(payload, "current-datetime")?;
        let target = OffsetDateTime::parse(text, &Rfc3339).map_err(|error| {
            RpcError::invalid_value(
                "current-datetime",
                format!("'{text}' is not an RFC 3339 timestamp: {error}"),
            )
        })?;
        self.clock_offset = target - OffsetDateTime::now_utc();
        info!(target: SYSTEM_TARGET, datetime = text, "clock adjusted");
        Ok(Reply::Ok)
    }

    fn set_ntp_enabled(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        let value = match payload {
            Value::Object(map) => map
                .get("enabled")
                .ok_or_else(|| RpcError::missing_parameter("enabled"))?,
            other => other,
        };
        let enabled = value
            .as_bool()
            .ok_or_else(|| RpcError::invalid_value("enabled", "'enabled' must be true or false"))?;
        if enabled != self.ntp_enabled {
            self.ntp_enabled = enabled;
            info!(target: SYSTEM_TARGET, enabled, "NTP client toggled");
            self.announce("ntp", self.ntp_config());
        }
        Ok(Reply::Ok)
    }

    fn add_ntp_server(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        let address = ntp_address(payload)?;
        let association = Association::parse(payload.get("association-type"))?;
        let name = match payload.get("name") {
            None => address.to_owned(),
            Some(value) => value
                .as_str()
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| RpcError::invalid_value("name", "'name' must be a non-empty string"))?
                .to_owned(),
        };
        let servers = if association == Association::Pool {
            resolve_pool(&name, address)?
        } else {
            vec![NtpServer {
                name,
                address: address.to_owned(),
                association,
            }]
        };
        if let Some(duplicate) = servers.iter().find(|server| self.has_ntp_server(&server.address)) {
            return Err(RpcError::operation_failed(format!(
                "NTP server {} is already configured",
                duplicate.address
            )));
        }
        info!(target: SYSTEM_TARGET, address, count = servers.len(), "NTP servers added");
        self.ntp_servers.extend(servers);
        self.announce("ntp", self.ntp_config());
        Ok(Reply::Ok)
    }

    fn remove_ntp_server(&mut self, payload: &Value) -> Result<Reply, RpcError> {
        let address = ntp_address(payload)?;
        let before = self.ntp_servers.len();
        self.ntp_servers.retain(|server| server.address != address);
        if self.ntp_servers.len() == before {
            return Err(RpcError::invalid_value(
                "address",
                format!("NTP server {address} is not configured"),
            ));
        }
        info!(target: SYSTEM_TARGET, address, "NTP server removed");
        self.announce("ntp", self.ntp_config());
        Ok(Reply::Ok)
    }

    fn has_ntp_server(&self, address: &str) -> bool {
        self.ntp_servers.iter().any(|server| server.address == address)
    }

    fn schedule(&mut self, action: PowerAction) -> Reply {
        if let Some(pending) = self.pending_action {
            return Reply::error(RpcError::operation_failed(format!(
                "a {pending} is already scheduled"
            )));
        }
        info!(target: SYSTEM_TARGET, %action, "power action scheduled");
        self.pending_action = Some(action);
        Reply::Ok
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc() + self.clock_offset
    }
}

impl DeviceModule for SystemModule {
    fn init(&mut self, context: &ModuleContext) -> Result<StateSnapshot, ModuleFailure> {
        context.name().clone_into(&mut self.name);
        self.notifications = Some(context.notifications().clone());
        self.boot_time = OffsetDateTime::now_utc();
        Ok(self.running_config())
    }

    fn close(&mut self) {
        self.notifications = None;
        info!(target: SYSTEM_TARGET, module = %self.name, "system module closed");
    }

    fn execute_operation(
        &mut self,
        _session: &SessionContext,
        operation: &str,
        payload: &Value,
    ) -> Reply {
        let outcome = match operation {
            "get" | "get-config" => Ok(Reply::data(self.running_config())),
            "set-hostname" => self.set_hostname(payload),
            "set-timezone" => self.set_timezone(payload),
            "set-current-datetime" => self.set_current_datetime(payload),
            "set-ntp-enabled" => self.set_ntp_enabled(payload),
            "add-ntp-server" => self.add_ntp_server(payload),
            "remove-ntp-server" => self.remove_ntp_server(payload),
            "system-restart" => Ok(self.schedule(PowerAction::Restart)),
            "system-shutdown" => Ok(self.schedule(PowerAction::Shutdown)),
            other => Err(RpcError::not_supported(format!(
                "operation '{other}' is not implemented by the system module"
            ))),
        };
        outcome.unwrap_or_else(Reply::error)
    }

    fn get_state_data(&self) -> Result<StateSnapshot, ModuleFailure> {
        let format = |instant: OffsetDateTime| {
            instant
                .format(&Rfc3339)
                .map_err(|error| ModuleFailure::new(format!("clock formatting failed: {error}")))
        };
        let mut state = json!({
            "platform": {
                "os-name": std::env::consts::OS,
                "machine": std::env::consts::ARCH,
            },
            "clock": {
                "current-datetime": format(self.now())?,
                "boot-datetime": format(self.boot_time)?,
            },
        });
        if let (Some(action), Some(object)) = (self.pending_action, state.as_object_mut()) {
            object.insert("pending-action".to_owned(), Value::String(action.to_string()));
        }
        Ok(single_entry("system-state", state))
    }
}

/// Reads `key` from an object payload. A bare string payload is accepted
/// as the value itself.
fn required_str<'a>(payload: &'a Value, key: &str) -> Result<&'a str, RpcError> {
    let value = match payload {
        Value::String(_) => payload,
        Value::Object(map) => map.get(key).ok_or_else(|| RpcError::missing_parameter(key))?,
        _ => return Err(RpcError::missing_parameter(key)),
    };
    value
        .as_str()
        .ok_or_else(|| RpcError::invalid_value(key, format!("'{key}' must be a string")))
}

/// Reads the server address from `{"udp": {"address": ..}}`, a flat
/// `address` key or a bare string payload.
fn ntp_address(payload: &Value) -> Result<&str, RpcError> {
    let raw = match payload.pointer("/udp/address") {
        Some(value) => value
            .as_str()
            .ok_or_else(|| RpcError::invalid_value("address", "'address' must be a string"))?,
        None => required_str(payload, "address")?,
    };
    let address = raw.trim();
    if address.is_empty() {
        return Err(RpcError::invalid_value("address", "address must not be empty"));
    }
    if address.parse::<IpAddr>().is_err() {
        validate_hostname(address)
            .map_err(|_| RpcError::invalid_value("address", format!("'{address}' is not a host")))?;
    }
    Ok(address)
}

/// Expands a pool into one server association per resolved address.
fn resolve_pool(name: &str, address: &str) -> Result<Vec<NtpServer>, RpcError> {
    let resolved = (address, NTP_PORT).to_socket_addrs().map_err(|error| {
        RpcError::operation_failed(format!("cannot resolve NTP pool {address}: {error}"))
    })?;
    let mut servers: Vec<NtpServer> = Vec::new();
    for socket in resolved {
        let ip = socket.ip().to_string();
        if servers.iter().all(|server| server.address != ip) {
            servers.push(NtpServer {
                name: name.to_owned(),
                address: ip,
                association: Association::Server,
            });
        }
    }
    if servers.is_empty() {
        return Err(RpcError::operation_failed(format!(
            "NTP pool {address} resolved to no addresses"
        )));
    }
    Ok(servers)
}

fn validate_hostname(hostname: &str) -> Result<(), RpcError> {
    let invalid = |reason: &str| {
        Err(RpcError::invalid_value(
            "hostname",
            format!("invalid host name '{hostname}': {reason}"),
        ))
    };
    if hostname.is_empty() || hostname.len() > MAX_HOSTNAME_LEN {
        return invalid("length must be 1 to 253 characters");
    }
    for label in hostname.split('.') {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return invalid("labels must be 1 to 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return invalid("labels must not start or end with '-'");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return invalid("only letters, digits and '-' are allowed");
        }
    }
    Ok(())
}

fn validate_timezone_name(name: &str) -> Result<(), RpcError> {
    let well_formed = !name.is_empty()
        && !name.starts_with('/')
        && !name.contains("..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '+' | '-'));
    if well_formed {
        Ok(())
    } else {
        Err(RpcError::invalid_value(
            "timezone-name",
            format!("'{name}' is not a time zone name"),
        ))
    }
}

#[cfg(test)]
mod tests;
