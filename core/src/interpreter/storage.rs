//! Save / read / delete through decorated names
//!
//! All three operations parse the name into an [`Address`] and dispatch on
//! its level. Path addresses (`user.address.city`) are handled as a
//! read-modify-write of the container.

use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, warn};

use super::address::{Address, Level};
use super::context::ExecContext;
use super::errors::{AddressError, ProviderError, StorageError};
use super::providers::{ProviderContext, StorageProvider};
use super::scope::ScopeId;
use super::values::{build_from_path, read_path, remove_path, set_path};

pub fn parse(ctx: &ExecContext, name: &str) -> Result<Address, StorageError> {
    Ok(Address::parse(name, ctx.engine().providers())?)
}

pub fn save(ctx: &ExecContext, target: &str, value: JsonValue) -> Result<(), StorageError> {
    let address = parse(ctx, target)?;
    save_address(ctx, &address, value)
}

pub fn read(ctx: &ExecContext, source: &str) -> Result<Option<JsonValue>, StorageError> {
    let address = parse(ctx, source)?;
    read_address(ctx, &address)
}

pub fn delete(ctx: &ExecContext, target: &str) -> Result<(), StorageError> {
    let address = parse(ctx, target)?;
    delete_address(ctx, &address)
}

/// Where a scope-level address lands.
enum Slot {
    Scope(ScopeId),
    Properties,
}

fn slot(ctx: &ExecContext, level: &Level) -> Result<Slot, StorageError> {
    match level {
        Level::Current if ctx.request().is_detached() && ctx.depth() == 0 => Ok(Slot::Properties),
        Level::Current => Ok(Slot::Scope(ctx.current_scope())),
        Level::Ancestor(n) => ctx
            .request()
            .scopes()
            .ancestor(ctx.current_scope(), *n)
            .map(Slot::Scope)
            .ok_or(StorageError::NoAncestor(*n)),
        Level::Expression | Level::Literal | Level::Quoted | Level::Provider(_) => {
            Err(StorageError::ReadOnly(format!("{:?}", level)))
        }
    }
}

fn provider_for(ctx: &ExecContext, name: &str) -> Result<Arc<dyn StorageProvider>, StorageError> {
    ctx.engine()
        .providers()
        .get(name)
        .ok_or_else(|| AddressError::UnknownLevel(name.to_string()).into())
}

/// Log a provider failure; abort the request when the address is fatal.
fn provider_failure(ctx: &ExecContext, address: &Address, provider: &str, e: ProviderError) -> StorageError {
    if address.fatal {
        error!(provider, key = %address.name, error = %e, "Storage provider failed");
        ctx.request().abort(format!("{}: {}", provider, e));
    } else {
        warn!(provider, key = %address.name, error = %e, "Storage provider failed");
    }
    StorageError::Provider {
        provider: provider.to_string(),
        source: e,
    }
}

pub fn save_address(ctx: &ExecContext, address: &Address, value: JsonValue) -> Result<(), StorageError> {
    if address.is_read_only() {
        return Err(StorageError::ReadOnly(address.name.clone()));
    }

    let value = match &address.path {
        Some(path) => {
            let container = address.container();
            match read_address(ctx, &container)? {
                Some(mut current) => {
                    set_path(&mut current, path, value).map_err(|reason| StorageError::Path {
                        path: path.clone(),
                        reason,
                    })?;
                    current
                }
                None => build_from_path(path, value),
            }
        }
        None => value,
    };

    if let Level::Provider(name) = &address.level {
        let provider = provider_for(ctx, name)?;
        let pctx = ProviderContext {
            request: ctx.request(),
            properties: ctx.engine().properties(),
        };
        return match provider.save(&pctx, &address.sub_level, &address.name, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = provider_failure(ctx, address, name, e);
                if address.fatal {
                    Err(err)
                } else {
                    Ok(())
                }
            }
        };
    }

    match slot(ctx, &address.level)? {
        Slot::Scope(scope) => ctx.request().scopes().set(scope, address.name.clone(), value),
        Slot::Properties => ctx.engine().properties().set(address.name.clone(), value),
    }
    Ok(())
}

pub fn read_address(ctx: &ExecContext, address: &Address) -> Result<Option<JsonValue>, StorageError> {
    let value = match &address.level {
        Level::Quoted => return Ok(Some(JsonValue::String(address.name.clone()))),
        Level::Expression => {
            return ctx
                .eval_any(&address.name)
                .map(Some)
                .map_err(|source| StorageError::Eval {
                    expr: address.name.clone(),
                    source,
                })
        }
        Level::Literal => {
            return serde_json::from_str(&address.name)
                .map(Some)
                .map_err(|source| StorageError::Literal {
                    text: address.name.clone(),
                    source,
                })
        }
        Level::Provider(name) => {
            let provider = provider_for(ctx, name)?;
            let pctx = ProviderContext {
                request: ctx.request(),
                properties: ctx.engine().properties(),
            };
            match provider.read(&pctx, &address.sub_level, &address.name) {
                Ok(value) => value,
                Err(e) => {
                    let err = provider_failure(ctx, address, name, e);
                    if address.fatal {
                        return Err(err);
                    }
                    None
                }
            }
        }
        Level::Current => ctx.lookup(&address.name),
        Level::Ancestor(n) => {
            let request = ctx.request();
            let scopes = request.scopes();
            let scope = scopes
                .ancestor(ctx.current_scope(), *n)
                .ok_or(StorageError::NoAncestor(*n))?;
            scopes
                .get(scope, &address.name)
                .or_else(|| ctx.engine().properties().get(&address.name))
        }
    };

    Ok(match (&address.path, value) {
        (Some(path), Some(v)) => read_path(&v, path),
        (_, v) => v,
    })
}

pub fn delete_address(ctx: &ExecContext, address: &Address) -> Result<(), StorageError> {
    if address.is_read_only() {
        return Err(StorageError::ReadOnly(address.name.clone()));
    }

    if let Some(path) = &address.path {
        let container = address.container();
        if let Some(mut current) = read_address(ctx, &container)? {
            remove_path(&mut current, path).map_err(|reason| StorageError::Path {
                path: path.clone(),
                reason,
            })?;
            save_address(ctx, &container, current)?;
        }
        return Ok(());
    }

    if let Level::Provider(name) = &address.level {
        let provider = provider_for(ctx, name)?;
        let pctx = ProviderContext {
            request: ctx.request(),
            properties: ctx.engine().properties(),
        };
        if let Err(e) = provider.delete(&pctx, &address.sub_level, &address.name) {
            let err = provider_failure(ctx, address, name, e);
            if address.fatal {
                return Err(err);
            }
        }
        return Ok(());
    }

    match slot(ctx, &address.level)? {
        Slot::Scope(scope) => {
            ctx.request().scopes().remove(scope, &address.name);
        }
        Slot::Properties => {
            ctx.engine().properties().remove(&address.name);
        }
    }
    Ok(())
}
