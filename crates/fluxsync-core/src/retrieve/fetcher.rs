use std::future::Future;
use std::sync::Arc;

use fluxsync_api::HttpRetrieveClient;
use futures_util::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::FetchError;

/// A bulk `retrieve(keys) -> values` operation.
///
/// Receives a deduplicated key list and may return values in any order,
/// omitting keys it does not know.
pub trait Fetcher<K, V>: Send + Sync + 'static {
    fn fetch(&self, keys: Vec<K>) -> BoxFuture<'static, Result<Vec<V>, FetchError>>;
}

impl<K, V, F, Fut> Fetcher<K, V> for F
where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<V>, FetchError>> + Send + 'static,
{
    fn fetch(&self, keys: Vec<K>) -> BoxFuture<'static, Result<Vec<V>, FetchError>> {
        Box::pin(self(keys))
    }
}

/// Fetcher backed by the HTTP retrieve endpoint for `resource`.
pub fn http_fetcher<K, V>(
    client: HttpRetrieveClient,
    resource: impl Into<String>,
) -> impl Fetcher<K, V>
where
    K: Serialize + Send + Sync + 'static,
    V: DeserializeOwned + Send + 'static,
{
    let client = Arc::new(client);
    let resource: Arc<str> = Arc::from(resource.into());

    move |keys: Vec<K>| {
        let client = Arc::clone(&client);
        let resource = Arc::clone(&resource);
        async move {
            client
                .retrieve(&resource, &keys)
                .await
                .map_err(FetchError::from)
        }
    }
}
