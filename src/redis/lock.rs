use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::client::RedisClient;
use super::errors::LockError;
use super::lock_store::{lock_key, LockStore};
use super::proxy::RedisConnectionProxy;
use crate::common::errors::ClientError;
use crate::common::proxy::ConnectionProxy;

#[derive(Debug, Default)]
struct LockState {
    token: Option<String>,
    acquired_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
}

/// Mutual exclusion over a set of resource keys, shared by every process
/// using the same cache store.
///
/// Acquisition is all-or-nothing: the lock is taken only when no key of
/// the set is held by anyone. Each acquisition writes a fresh token and
/// a release only deletes keys that still carry it, so a holder whose
/// keys expired never releases someone else's lock.
pub struct DistributedLock<P: ConnectionProxy = RedisConnectionProxy> {
    client: RedisClient<P>,
    resource_keys: Vec<String>,
    lock_keys: Vec<String>,
    state: Mutex<LockState>,
    acquiring: AtomicBool,
    is_locked: AtomicBool,
}

impl<P> DistributedLock<P>
where
    P: ConnectionProxy,
    P::Connection: LockStore<Error = P::Error>,
{
    pub fn new<K: Into<String>>(
        client: RedisClient<P>,
        resource_keys: impl IntoIterator<Item = K>,
    ) -> Result<Self, LockError<P::Error>> {
        let resource_keys: Vec<String> = resource_keys.into_iter().map(Into::into).collect();
        if resource_keys.is_empty() {
            return Err(LockError::NoResourceKeys);
        }
        let lock_keys = resource_keys.iter().map(|key| lock_key(key)).collect();
        Ok(Self {
            client,
            resource_keys,
            lock_keys,
            state: Mutex::new(LockState::default()),
            acquiring: AtomicBool::new(false),
            is_locked: AtomicBool::new(false),
        })
    }

    pub fn resource_keys(&self) -> &[String] {
        &self.resource_keys
    }

    pub fn is_locked(&self) -> bool {
        self.is_locked.load(Ordering::SeqCst)
    }

    pub fn acquired_at(&self) -> Option<DateTime<Utc>> {
        self.state().acquired_at
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.state().released_at
    }

    /// Time between the last acquisition and the release that followed it,
    /// zero while the lock is held or was never taken.
    pub fn lock_held_duration(&self) -> Duration {
        let state = self.state();
        match (state.acquired_at, state.released_at) {
            (Some(acquired), Some(released)) if released > acquired => {
                (released - acquired).to_std().unwrap_or_default()
            }
            _ => Duration::ZERO,
        }
    }

    fn state(&self) -> MutexGuard<'_, LockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Retries the all-or-nothing acquisition with a jittered pause until
    /// the keys are free or the acquire timeout elapses.
    pub async fn acquire_lock(&self, ctx: &CancellationToken) -> Result<(), LockError<P::Error>> {
        if self.is_locked()
            || self
                .acquiring
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
        {
            return Err(LockError::LocksAlreadyAcquired);
        }

        let token = Uuid::new_v4().to_string();
        let acquired = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(LockError::Canceled),
            acquired = self.try_acquire(&token) => acquired,
        };

        // is_locked is published before the in-flight flag clears
        if acquired.is_ok() {
            {
                let mut state = self.state();
                state.token = Some(token);
                state.acquired_at = Some(Utc::now());
            }
            self.is_locked.store(true, Ordering::SeqCst);
            info!(keys = ?self.resource_keys, "Locks acquired");
        }
        self.acquiring.store(false, Ordering::SeqCst);
        acquired
    }

    async fn try_acquire(&self, token: &str) -> Result<(), LockError<P::Error>> {
        let settings = self.client.lock_settings();
        let deadline = Instant::now() + settings.acquire_timeout;
        let keys = self.lock_keys.as_slice();
        let ttl = settings.ttl;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::LockAcquireTimeout);
            }

            let acquired = self
                .client
                .execute_closure(remaining, move |store| async move { store.acquire(keys, token, ttl).await })
                .await;
            match acquired {
                Ok(true) => return Ok(()),
                Ok(false) => debug!(keys = ?self.resource_keys, "Locks are held elsewhere, retrying"),
                Err(ClientError::OperationTimeout) => return Err(LockError::LockAcquireTimeout),
                Err(err) => return Err(err.into()),
            }

            let wait = jittered_wait(settings.retry_wait_min, settings.retry_wait_max);
            sleep(wait.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    /// Deletes the keys still holding this instance's token. Keys that
    /// expired and were taken by another holder are left alone.
    pub async fn release_lock(&self, ctx: &CancellationToken) -> Result<(), LockError<P::Error>> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(LockError::Canceled),
            released = self.release() => released,
        }
    }

    /// `release_lock` without a cancellation point, bounded only by the
    /// write timeout. Used once the guarded work is done, so a canceled
    /// caller does not leave the keys held until their TTL.
    pub(crate) async fn release(&self) -> Result<(), LockError<P::Error>> {
        if !self.is_locked() {
            return Err(LockError::LockReleaseBeforeAcquire);
        }
        let token = self
            .state()
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(LockError::LockValueEmpty)?;

        let keys = self.lock_keys.as_slice();
        let token_ref = token.as_str();
        let released = self
            .client
            .execute_closure(self.client.write_timeout(), move |store| async move {
                store.release(keys, token_ref).await
            })
            .await?;

        if released < keys.len() {
            warn!(
                keys = ?self.resource_keys,
                lost = keys.len() - released,
                "Some locks expired before release"
            );
        }

        {
            let mut state = self.state();
            state.token = None;
            state.released_at = Some(Utc::now());
        }
        self.is_locked.store(false, Ordering::SeqCst);
        info!(keys = ?self.resource_keys, held_ms = self.lock_held_duration().as_millis() as u64, "Locks released");
        Ok(())
    }
}

fn jittered_wait(min: Duration, max: Duration) -> Duration {
    let min_ms = u64::try_from(min.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX).max(min_ms);
    Duration::from_millis(rand::rng().random_range(min_ms..=max_ms))
}
