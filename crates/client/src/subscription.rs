//! Observable values.
//!
//! A [`SubscriptionValue`] holds the latest value of a cached query and
//! pushes every replacement to its [`Subscription`]s. It starts out either
//! unloaded or seeded with a value the caller already had.

use std::{fmt, marker::PhantomData, sync::Arc};

use futures_util::{stream, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};

use crate::{QueryError, QueryResult};

pub struct SubscriptionValue<T> {
    tx: Arc<watch::Sender<Option<Arc<T>>>>,
}

impl<T> Clone for SubscriptionValue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for SubscriptionValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionValue")
            .field("loaded", &self.tx.borrow().is_some())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl<T: Send + Sync + 'static> SubscriptionValue<T> {
    pub fn new(initial: Option<T>) -> Self {
        let (tx, _) = watch::channel(initial.map(Arc::new));
        Self { tx: Arc::new(tx) }
    }

    pub fn unloaded() -> Self {
        Self::new(None)
    }

    /// Latest value, `None` until the first one arrives.
    pub fn current(&self) -> Option<Arc<T>> {
        self.tx.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Start listening. Never waits: the returned subscription yields the
    /// current value (if any) first.
    pub fn subscribe(&self) -> Subscription<T> {
        Subscription {
            rx: self.tx.subscribe(),
            started: false,
        }
    }

    /// Live [`Subscription`]s.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Replace the value and notify every subscriber.
    pub fn publish(&self, value: Arc<T>) {
        self.tx.send_replace(Some(value));
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.tx, &other.tx)
    }

    /// Run `callback` for the current value and every later one until the
    /// returned handle is dropped.
    pub fn observe<F>(&self, callback: F) -> QueryResult<ObserverHandle>
    where
        F: Fn(Arc<T>) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
        let mut subscription = self.subscribe();
        let task = runtime.spawn(async move {
            while let Some(value) = subscription.next().await {
                callback(value);
            }
        });
        Ok(ObserverHandle { task })
    }
}

/// One listener on a [`SubscriptionValue`]. Dropping it unsubscribes.
pub struct Subscription<T> {
    rx: watch::Receiver<Option<Arc<T>>>,
    started: bool,
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("started", &self.started)
            .finish()
    }
}

impl<T: Send + Sync + 'static> Subscription<T> {
    /// The current value on the first call, then each replacement. Values
    /// published faster than they are read are skipped; the latest one is
    /// always delivered. `None` once the value is gone for good.
    pub async fn next(&mut self) -> Option<Arc<T>> {
        if !self.started {
            self.started = true;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(value) = self.rx.borrow_and_update().clone() {
                return Some(value);
            }
        }
    }

    /// Wait until a value is present.
    pub async fn loaded(&mut self) -> Option<Arc<T>> {
        self.started = true;
        let value = self.rx.wait_for(Option::is_some).await.ok()?;
        value.clone()
    }

    pub fn current(&self) -> Option<Arc<T>> {
        self.rx.borrow().clone()
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<T>> {
        stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|value| (value, subscription))
        })
    }
}

/// Keeps an [`observe`](SubscriptionValue::observe) callback running.
#[derive(Debug)]
pub struct ObserverHandle {
    task: JoinHandle<()>,
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A cached JSON value read as `T`.
pub struct Observable<T> {
    inner: SubscriptionValue<Value>,
    _type: PhantomData<fn() -> T>,
}

impl<T> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _type: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observable")
            .field(&std::any::type_name::<T>())
            .field(&self.inner)
            .finish()
    }
}

impl<T: DeserializeOwned> Observable<T> {
    pub fn new(inner: SubscriptionValue<Value>) -> Self {
        Self {
            inner,
            _type: PhantomData,
        }
    }

    pub fn raw(&self) -> &SubscriptionValue<Value> {
        &self.inner
    }

    pub fn into_raw(self) -> SubscriptionValue<Value> {
        self.inner
    }

    pub fn current(&self) -> QueryResult<Option<T>> {
        self.inner.current().map(|v| decode(&v)).transpose()
    }

    pub fn subscribe(&self) -> TypedSubscription<T> {
        TypedSubscription {
            inner: self.inner.subscribe(),
            _type: PhantomData,
        }
    }
}

pub struct TypedSubscription<T> {
    inner: Subscription<Value>,
    _type: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> TypedSubscription<T> {
    pub async fn next(&mut self) -> Option<QueryResult<T>> {
        self.inner.next().await.map(|v| decode(&v))
    }

    pub async fn loaded(&mut self) -> Option<QueryResult<T>> {
        self.inner.loaded().await.map(|v| decode(&v))
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> QueryResult<T> {
    Ok(T::deserialize(value)?)
}
