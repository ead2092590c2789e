use crate::core::header::{NetObject, PacketHeader};
use crate::error::constants::{ERR_DISPATCHER_READ_LOCK, ERR_DISPATCHER_WRITE_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::command::Command;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

type HandlerFn = dyn Fn(&Command) -> Result<()> + Send + Sync + 'static;

struct Route {
    type_name: &'static str,
    handler: Box<HandlerFn>,
}

/// Routes commands to typed handlers by `(object_id, object_version)`.
///
/// Registering a second type under an identity already in use fails, which
/// is where message identity collisions are caught.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RwLock<HashMap<(u16, u8), Route>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register `handler` for messages of type `T`
    pub fn register<T, F>(&self, handler: F) -> Result<()>
    where
        T: NetObject + 'static,
        F: Fn(&Command, T) -> Result<()> + Send + Sync + 'static,
    {
        let mut routes = self
            .routes
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        let key = (T::OBJECT_ID, T::OBJECT_VERSION);
        if let Some(existing) = routes.get(&key) {
            return Err(ProtocolError::DuplicateRegistration {
                object_id: T::OBJECT_ID,
                object_version: T::OBJECT_VERSION,
                existing: existing.type_name,
            });
        }

        routes.insert(
            key,
            Route {
                type_name: T::type_name(),
                handler: Box::new(move |command: &Command| {
                    let message = command.decode::<T>()?;
                    handler(command, message)
                }),
            },
        );
        Ok(())
    }

    /// Run the handler for `command`. Returns `false` when no type is
    /// registered for its identity.
    pub fn dispatch(&self, command: &Command) -> Result<bool> {
        let routes = self
            .routes
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_READ_LOCK.to_string()))?;

        let header = command.header();
        match routes.get(&(header.object_id, header.object_version)) {
            Some(route) => (route.handler)(command).map(|_| true),
            None => Ok(false),
        }
    }

    /// Name of the type registered for `header`'s identity
    pub fn type_name_of(&self, header: &PacketHeader) -> Option<&'static str> {
        let routes = self.routes.read().ok()?;
        routes
            .get(&(header.object_id, header.object_version))
            .map(|route| route.type_name)
    }

    pub fn len(&self) -> usize {
        self.routes.read().map(|routes| routes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
