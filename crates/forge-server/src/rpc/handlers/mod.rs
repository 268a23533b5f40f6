//! Built-in method handlers and their registration.

pub mod printer;
pub mod server;

use std::sync::Arc;

use forge_core::errors::ComponentError;

use crate::auth::Permission;
use crate::rpc::registry::{MethodRegistry, MethodSpec, ParamKind, ParamSpec};

/// Register the server's built-in method surface.
///
/// Firmware-remote methods are registered through
/// [`printer::RemoteMethod`]; the server forwards them verbatim and never
/// interprets their payloads.
pub fn register_builtin(registry: &mut MethodRegistry) -> Result<(), ComponentError> {
    registry.register(
        "server.info",
        Arc::new(server::ServerInfo),
        MethodSpec::query(),
    )?;
    registry.register(
        "server.connection.identify",
        Arc::new(server::Identify),
        MethodSpec {
            permission: Permission::Observer,
            requires_ready: false,
            exclusive_key: None,
            params: &[
                ParamSpec {
                    name: "clientName",
                    kind: ParamKind::String,
                    required: true,
                },
                ParamSpec {
                    name: "version",
                    kind: ParamKind::String,
                    required: false,
                },
            ],
        },
    )?;
    registry.register(
        "printer.info",
        Arc::new(printer::PrinterInfo),
        MethodSpec::query(),
    )?;
    registry.register(
        "printer.objects.list",
        Arc::new(printer::ObjectsList),
        MethodSpec {
            requires_ready: true,
            ..MethodSpec::query()
        },
    )?;
    registry.register(
        "printer.objects.query",
        Arc::new(printer::ObjectsQuery),
        MethodSpec {
            requires_ready: true,
            params: OBJECTS_PARAM,
            ..MethodSpec::query()
        },
    )?;
    registry.register(
        "printer.objects.subscribe",
        Arc::new(printer::ObjectsSubscribe),
        MethodSpec {
            requires_ready: true,
            params: OBJECTS_PARAM,
            ..MethodSpec::query()
        },
    )?;
    registry.register(
        "printer.objects.unsubscribe",
        Arc::new(printer::ObjectsUnsubscribe),
        MethodSpec {
            params: OBJECTS_PARAM,
            ..MethodSpec::query()
        },
    )?;

    // Commands the firmware executes; the server only relays them. Script
    // and restart share an exclusive key so they cannot interleave; the
    // emergency stop must never wait behind them.
    registry.register(
        "printer.gcode.script",
        Arc::new(printer::RemoteMethod::new("gcode/script")),
        MethodSpec {
            permission: Permission::Operator,
            requires_ready: true,
            exclusive_key: Some("firmware-command"),
            params: &[ParamSpec {
                name: "script",
                kind: ParamKind::String,
                required: true,
            }],
        },
    )?;
    registry.register(
        "printer.restart",
        Arc::new(printer::RemoteMethod::new("restart")),
        MethodSpec {
            permission: Permission::Operator,
            requires_ready: true,
            exclusive_key: Some("firmware-command"),
            params: &[],
        },
    )?;
    registry.register(
        "printer.emergency_stop",
        Arc::new(printer::RemoteMethod::new("emergency_stop")),
        MethodSpec {
            permission: Permission::Operator,
            requires_ready: false,
            exclusive_key: None,
            params: &[],
        },
    )?;
    Ok(())
}

const OBJECTS_PARAM: &[ParamSpec] = &[ParamSpec {
    name: "objects",
    kind: ParamKind::Object,
    required: true,
}];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_surface_registers_once() {
        let mut registry = MethodRegistry::new();
        register_builtin(&mut registry).unwrap();
        let names = registry.method_names();
        assert!(names.contains(&"server.info".to_string()));
        assert!(names.contains(&"printer.objects.subscribe".to_string()));
        assert!(names.contains(&"printer.gcode.script".to_string()));
        // Registering again collides.
        assert!(register_builtin(&mut registry).is_err());
    }
}
