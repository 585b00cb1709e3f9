//! `fluxsync get`: retrieve resources by numeric id or by name.
//!
//! Every key becomes its own `retrieve_one` call, so the debounced
//! retriever folds them into a single request. Items that come back
//! without the lookup field are dropped rather than matched to a key.

use std::fmt::Display;
use std::hash::Hash;
use std::time::Duration;

use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::{debug, warn};

use fluxsync_api::HttpRetrieveClient;
use fluxsync_core::retrieve::http_fetcher;
use fluxsync_core::{
    CoreError, DebouncedRetriever, FetchError, Fetcher, Keyed, ParamValue, Params, RetrieveError,
    RetrieverOptions, SyncConfig, TypeTag, VariantMap, normalize,
};

use crate::cli::{GetArgs, GlobalOpts};
use crate::error::CliError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lookup {
    ById,
    ByName,
}

/// A retrieved item and the key it was found under.
#[derive(Debug, Clone)]
struct Item<K> {
    key: K,
    body: Value,
}

impl<K> Item<K> {
    fn keyed(body: Value, field: &str, read_key: fn(&Value) -> Option<K>) -> Option<Self> {
        let Some(key) = body.get(field).and_then(read_key) else {
            debug!(field, "skipping item without a usable key");
            return None;
        };
        Some(Self { key, body })
    }
}

impl<K: Clone> Keyed for Item<K> {
    type Key = K;

    fn key(&self) -> K {
        self.key.clone()
    }
}

pub async fn handle(args: GetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load_config(global)?;
    let profile = super::effective_profile(global, &cfg)?;
    let base_url = profile.retrieve_url()?;
    let timeout = Duration::from_secs(profile.timeout.unwrap_or(cfg.defaults.timeout));
    let sync = fluxsync_config::profile_to_sync_config(&profile, &cfg.defaults);
    let client = HttpRetrieveClient::new(base_url.as_str(), timeout).map_err(CoreError::from)?;

    let values: Vec<ParamValue> = args.keys.into_iter().map(ParamValue::String).collect();
    let params = match <[ParamValue; 1]>::try_from(values) {
        Ok([one]) => Params::Single(one),
        Err(values) => Params::Many(values),
    };

    let variants = VariantMap::new()
        .with(TypeTag::Number, Lookup::ById)
        .with(TypeTag::String, Lookup::ByName);
    let normalized = normalize(params, &variants);
    let lookup = *normalized.require_variant()?;
    let single = normalized.single;

    let resource = args.resource;
    let found = match lookup {
        Lookup::ById => {
            let ids = normalized
                .normalized
                .iter()
                .map(|value| {
                    value.as_number().ok_or_else(|| CliError::Validation {
                        field: "keys".into(),
                        reason: format!("'{value}' is not a numeric id; ids and names cannot be mixed"),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            let retriever = retriever(client, &resource, &sync, "id", Value::as_i64);
            fetch_all(&retriever, ids).await
        }
        Lookup::ByName => {
            let names = normalized
                .normalized
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            let retriever = retriever(client, &resource, &sync, "name", |v: &Value| {
                v.as_str().map(str::to_owned)
            });
            fetch_all(&retriever, names).await
        }
    }
    .map_err(|e| CliError::RetrieveFailed {
        resource: resource.clone(),
        message: e.to_string(),
    })?;

    if single {
        return match found.into_iter().next() {
            Some((_, Some(value))) => super::print_json(&value, global.output),
            Some((identifier, None)) => Err(CliError::NotFound {
                resource,
                identifier,
            }),
            None => Ok(()),
        };
    }

    let mut items = Vec::with_capacity(found.len());
    for (identifier, value) in found {
        match value {
            Some(value) => items.push(value),
            None => warn!(%resource, %identifier, "not found"),
        }
    }
    super::print_json(&items, global.output)
}

/// Retriever over the HTTP endpoint that indexes items by `field`.
fn retriever<K>(
    client: HttpRetrieveClient,
    resource: &str,
    sync: &SyncConfig,
    field: &'static str,
    read_key: fn(&Value) -> Option<K>,
) -> DebouncedRetriever<K, Item<K>>
where
    K: Eq + Hash + Clone + serde::Serialize + Send + Sync + 'static,
{
    let http = http_fetcher::<K, Value>(client, resource);
    DebouncedRetriever::new(
        move |keys: Vec<K>| {
            let response = http.fetch(keys);
            async move {
                let items = response.await?;
                Ok::<_, FetchError>(
                    items
                        .into_iter()
                        .filter_map(|body| Item::keyed(body, field, read_key))
                        .collect::<Vec<_>>(),
                )
            }
        },
        RetrieverOptions::from_config(resource, sync),
    )
}

/// Look up every key concurrently; results come back in key order.
async fn fetch_all<K>(
    retriever: &DebouncedRetriever<K, Item<K>>,
    keys: Vec<K>,
) -> Result<Vec<(String, Option<Value>)>, RetrieveError>
where
    K: Eq + Hash + Clone + Display + Send + Sync + 'static,
{
    let found = try_join_all(keys.iter().cloned().map(|key| retriever.retrieve_one(key))).await?;
    Ok(keys
        .iter()
        .map(ToString::to_string)
        .zip(found.into_iter().map(|item| item.map(|item| item.body)))
        .collect())
}
