//! Memoized deferred values.
//!
//! A [`Deferred`] is computed at most once no matter how many dependents read
//! it, so a diamond in the dependency graph shares one computation.

use std::future::Future;

use futures::future::{try_join, BoxFuture, FutureExt, Shared};

use crate::error::{DeployError, Result};

pub struct Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: Shared<BoxFuture<'static, Result<T>>>,
}

impl<T> Clone for Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Deferred<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.peek() {
            Some(resolved) => f.debug_tuple("Deferred").field(resolved).finish(),
            None => f.write_str("Deferred(<pending>)"),
        }
    }
}

impl<T> Deferred<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    pub fn ready(value: T) -> Self {
        Self::from_future(async move { Ok(value) })
    }

    pub fn failed(error: DeployError) -> Self {
        Self::from_future(async move { Err(error) })
    }

    pub fn map<U, F>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let source = self.clone();
        Deferred::from_future(async move { transform(source.resolve().await?) })
    }

    pub fn then<U, F, Fut>(&self, transform: F) -> Deferred<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U>> + Send + 'static,
    {
        let source = self.clone();
        Deferred::from_future(async move { transform(source.resolve().await?).await })
    }

    /// Resolves both values concurrently; the first error wins.
    pub fn combine<U>(&self, other: &Deferred<U>) -> Deferred<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Deferred::from_future(async move { try_join(left.resolve(), right.resolve()).await })
    }

    pub async fn resolve(&self) -> Result<T> {
        self.inner.clone().await
    }
}
