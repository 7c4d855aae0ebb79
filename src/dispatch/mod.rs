//! RPC dispatcher
//!
//! Routes decoded requests to the named storage and encodes the answer.
//! This module provides loose coupling between the server and the storages:
//! it only sees the registry and the `Storage` trait.

use crate::error::{KvError, Result};
use crate::protocol::{Data, Frame, Method, Request, Response, SetData};
use crate::registry::StorageRegistry;
use crate::storage::validate::parse_ttl;
use crate::storage::{Context, Item, Storage};
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// RPC dispatcher
///
/// Cheap to clone; every clone shares the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<StorageRegistry>,
}

impl Dispatcher {
    /// Create a dispatcher over a registry
    pub fn new(registry: Arc<StorageRegistry>) -> Self {
        Dispatcher { registry }
    }

    /// Get reference to the registry
    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Handle one request frame and build the response frame
    ///
    /// Never fails: decode and application errors become error frames
    /// carrying the same sequence number.
    pub async fn handle(&self, ctx: &Context, frame: Frame) -> Frame {
        let seq = frame.seq;

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                // Encode the raw body in Base64 for debugging
                let b64 = general_purpose::STANDARD.encode(&frame.body);
                warn!(
                    "Malformed frame (tag {:#04x}, seq {}): {}. Body (B64): {}",
                    frame.tag, seq, e, b64
                );
                let err = KvError::from(e);
                // Error frames do not carry the method
                let method = Method::from_u8(frame.tag).unwrap_or(Method::Get);
                return Response::error(err.code(), err.to_string()).encode(method, seq);
            }
        };

        let method = request.method();
        debug!("Dispatching {} (seq {})", method, seq);

        match ctx.run(self.dispatch(ctx, request)).await {
            Ok(response) => response.encode(method, seq),
            Err(e) => {
                if e.is_client_error() {
                    warn!("{} failed: {}", method, e);
                } else {
                    error!("{} failed: {}", method, e);
                }
                Response::error(e.code(), e.to_string()).encode(method, seq)
            }
        }
    }

    /// Execute a decoded request
    pub async fn dispatch(&self, ctx: &Context, request: Request) -> Result<Response> {
        match request {
            Request::Has(data) => self.has(ctx, data).await,
            Request::Get(data) => self.get(ctx, data).await,
            Request::MGet(data) => {
                let storage = self.registry.get(&data.storage)?;
                Ok(Response::MGet(storage.mget(ctx, &data.keys).await?))
            }
            Request::Set(data) => {
                self.set(ctx, data).await?;
                Ok(Response::Done(Method::Set))
            }
            Request::MExpire(data) => {
                self.mexpire(ctx, data).await?;
                Ok(Response::Done(Method::MExpire))
            }
            Request::Ttl(data) => self.ttl(ctx, data).await,
            Request::Delete(data) => {
                let storage = self.registry.get(&data.storage)?;
                storage.delete(ctx, &data.keys).await?;
                Ok(Response::Done(Method::Delete))
            }
            Request::Close(name) => {
                self.registry.close(&name).await?;
                Ok(Response::Done(Method::Close))
            }
        }
    }

    async fn has(&self, ctx: &Context, data: Data) -> Result<Response> {
        let storage = self.registry.get(&data.storage)?;
        let found = storage.has(ctx, &data.keys).await?;

        // Answer in request order
        let pairs = data
            .keys
            .into_iter()
            .map(|key| {
                let present = found.get(&key).copied().unwrap_or(false);
                (key, present)
            })
            .collect();
        Ok(Response::Has(pairs))
    }

    async fn get(&self, ctx: &Context, data: Data) -> Result<Response> {
        let storage = self.registry.get(&data.storage)?;
        let key = data.keys.first().ok_or(KvError::NoKeys)?;
        Ok(Response::Get(storage.get(ctx, key).await?))
    }

    async fn ttl(&self, ctx: &Context, data: Data) -> Result<Response> {
        let storage = self.registry.get(&data.storage)?;
        let remaining = storage.ttl(ctx, &data.keys).await?;

        let pairs = data
            .keys
            .into_iter()
            .filter_map(|key| {
                let secs = match remaining.get(&key)? {
                    Some(secs) => i64::try_from(*secs).unwrap_or(i64::MAX),
                    None => -1,
                };
                Some((key, secs))
            })
            .collect();
        Ok(Response::Ttl(pairs))
    }

    async fn mexpire(&self, ctx: &Context, data: Data) -> Result<()> {
        let storage = self.registry.get(&data.storage)?;

        // A timeout is mandatory here
        let ttl = parse_ttl(&data.timeout)?.ok_or_else(|| KvError::BadTtl(data.timeout.clone()))?;

        let items: Vec<Item> = data
            .keys
            .into_iter()
            .map(|key| Item::new(key, Bytes::new(), Some(ttl)))
            .collect();
        storage.mexpire(ctx, &items).await
    }

    /// Write one batch to every target storage concurrently
    ///
    /// Every backend call runs to completion; only the caller's own
    /// cancellation or deadline aborts them. The first error is reported,
    /// and backends that applied the batch keep it.
    async fn set(&self, ctx: &Context, data: SetData) -> Result<()> {
        let items = data
            .items
            .into_iter()
            .map(|wire| {
                Ok(Item {
                    ttl: parse_ttl(&wire.timeout)?,
                    key: wire.key,
                    value: wire.value,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if data.storages.is_empty() {
            return Err(KvError::NoKeys);
        }

        // Resolve everything before writing anywhere
        let targets = data
            .storages
            .into_iter()
            .map(|name| {
                let storage = self.registry.get(&name)?;
                Ok((name, storage))
            })
            .collect::<Result<Vec<(String, Arc<dyn Storage>)>>>()?;

        debug!("Set of {} items fanned out to {} storages", items.len(), targets.len());

        let items = Arc::new(items);
        let mut tasks = JoinSet::new();

        for (name, storage) in targets {
            let items = items.clone();
            let task_ctx = ctx.clone();
            tasks.spawn(async move {
                let res = task_ctx.run(storage.set(&task_ctx, &items)).await;
                (name, res)
            });
        }

        let mut first_err: Option<KvError> = None;
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((_, Ok(()))) => continue,
                Ok((name, Err(e))) => KvError::Fanout {
                    storage: name,
                    source: Box::new(e),
                },
                Err(e) => KvError::backend(anyhow::anyhow!("set task failed: {}", e)),
            };

            // A failing sibling does not stop the others
            if first_err.is_none() {
                first_err = Some(failure);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
