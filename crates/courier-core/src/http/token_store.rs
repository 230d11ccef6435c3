//! Token cache with durable persistence and deduplicated refresh
//!
//! [`TokenStore`] is the single owner of the current token. The cache and the
//! in-flight refresh handle live behind one mutex that is never held across an
//! await point; persistence goes through a [`DurableStore`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::http::auth::{Token, TokenRefresher};
use crate::http::storage::{DurableStore, StorageError};
use crate::util::lock_unpoisoned;

/// Default key tokens are stored under
pub const DEFAULT_TOKEN_KEY: &str = "courier.token";

/// Callback notified of every storage failure
pub type StorageErrorCallback = Arc<dyn Fn(&StorageError) + Send + Sync>;

/// A refresh attempt failed; shared verbatim with every waiter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token refresh failed: {message}")]
pub struct RefreshError {
    pub message: String,
}

type SharedRefresh<T> = Arc<OnceCell<Result<(T, u64), RefreshError>>>;

/// Outcome of [`TokenStore::renew`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Renewal<T> {
    /// A refresh completed, started by this caller or joined
    Refreshed {
        token: T,
        generation: u64,
        /// Whether this caller started the refresh
        initiated: bool,
    },
    /// The token already moved past the generation the caller saw
    Superseded,
    /// No refresh was running and the caller was not admitted to start one
    Declined,
}

struct TokenState<T> {
    cached: Option<T>,
    generation: u64,
    in_flight: Option<SharedRefresh<T>>,
}

/// Single source of truth for the current authentication token
pub struct TokenStore<T: Token> {
    key: String,
    store: Arc<dyn DurableStore>,
    on_error: Option<StorageErrorCallback>,
    state: Mutex<TokenState<T>>,
}

impl<T: Token> TokenStore<T> {
    /// Create a store and hydrate the cache from `store`
    pub fn new(store: Arc<dyn DurableStore>, key: impl Into<String>) -> Self {
        Self::build(store, key.into(), None)
    }

    /// Like [`TokenStore::new`], reporting storage failures to `on_error`
    ///
    /// A stored token that fails to decode is reported here and treated as
    /// absent.
    pub fn with_error_callback(
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
        on_error: impl Fn(&StorageError) + Send + Sync + 'static,
    ) -> Self {
        Self::build(store, key.into(), Some(Arc::new(on_error)))
    }

    fn build(
        store: Arc<dyn DurableStore>,
        key: String,
        on_error: Option<StorageErrorCallback>,
    ) -> Self {
        let mut token_store = Self {
            key,
            store,
            on_error,
            state: Mutex::new(TokenState {
                cached: None,
                generation: 0,
                in_flight: None,
            }),
        };

        let hydrated = match token_store.read_durable() {
            Ok(token) => token,
            Err(err) => {
                token_store.report(&err);
                None
            }
        };
        token_store
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cached = hydrated;
        token_store
    }

    /// Key this store persists under
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current token, if any
    pub fn load(&self) -> Option<T> {
        lock_unpoisoned(&self.state).cached.clone()
    }

    /// Replace the current token; `None` clears it
    ///
    /// The durable write happens first and the cache only changes once it
    /// succeeded.
    pub fn save(&self, token: Option<T>) -> Result<(), StorageError> {
        let mut state = lock_unpoisoned(&self.state);
        if let Err(err) = self.write_durable(token.as_ref()) {
            self.report(&err);
            return Err(err);
        }
        state.cached = token;
        state.generation += 1;
        Ok(())
    }

    /// Clear the current token
    pub fn clear(&self) -> Result<(), StorageError> {
        self.save(None)
    }

    /// Current token with the generation it was installed at
    ///
    /// The generation advances on every save, clear and successful refresh.
    pub fn snapshot(&self) -> (Option<T>, u64) {
        let state = lock_unpoisoned(&self.state);
        (state.cached.clone(), state.generation)
    }

    /// Generation of the current token
    pub fn generation(&self) -> u64 {
        lock_unpoisoned(&self.state).generation
    }

    /// Whether a refresh is currently running
    pub fn is_refreshing(&self) -> bool {
        lock_unpoisoned(&self.state).in_flight.is_some()
    }

    /// Refresh the token, joining a refresh that is already in flight
    ///
    /// The first caller starts `refresher` with the current token; every caller
    /// arriving before it completes awaits the same outcome. A successful
    /// result is cached and persisted before any waiter sees it. The in-flight
    /// handle is cleared once, by whichever waiter gets there first.
    pub async fn refresh<R>(&self, refresher: &R) -> Result<T, RefreshError>
    where
        R: TokenRefresher<T> + ?Sized,
    {
        let (cell, current) = {
            let mut state = lock_unpoisoned(&self.state);
            let cell = state
                .in_flight
                .get_or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();
            (cell, state.cached.clone())
        };

        let (token, _) = self.complete(cell, current, refresher, None).await?;
        Ok(token)
    }

    /// Replace the token seen at generation `seen`, unless that already
    /// happened
    ///
    /// A refresh in flight is joined. A token that moved past `seen` is left
    /// alone and [`Renewal::Superseded`] is returned. Otherwise `admit` decides
    /// whether this caller may start a refresh; it runs under the store lock,
    /// so exactly one caller is admitted per generation. The admitted refresh
    /// waits `pause` before calling `refresher`, and joiners wait with it.
    pub async fn renew<R, A>(
        &self,
        seen: u64,
        refresher: &R,
        pause: Option<Duration>,
        admit: A,
    ) -> Result<Renewal<T>, RefreshError>
    where
        R: TokenRefresher<T> + ?Sized,
        A: FnOnce() -> bool,
    {
        let (cell, current, initiated) = {
            let mut state = lock_unpoisoned(&self.state);
            match state.in_flight.clone() {
                Some(cell) => (cell, state.cached.clone(), false),
                None if state.generation != seen => return Ok(Renewal::Superseded),
                None => {
                    if !admit() {
                        return Ok(Renewal::Declined);
                    }
                    let cell: SharedRefresh<T> = Arc::new(OnceCell::new());
                    state.in_flight = Some(Arc::clone(&cell));
                    (cell, state.cached.clone(), true)
                }
            }
        };

        let (token, generation) = self.complete(cell, current, refresher, pause).await?;
        Ok(Renewal::Refreshed {
            token,
            generation,
            initiated,
        })
    }

    async fn complete<R>(
        &self,
        cell: SharedRefresh<T>,
        current: Option<T>,
        refresher: &R,
        pause: Option<Duration>,
    ) -> Result<(T, u64), RefreshError>
    where
        R: TokenRefresher<T> + ?Sized,
    {
        let outcome = cell
            .get_or_init(|| async move {
                if let Some(pause) = pause {
                    tokio::time::sleep(pause).await;
                }
                debug!(key = %self.key, "refreshing token");
                match refresher.refresh(current).await {
                    Ok(token) => {
                        let generation = self.install(&token);
                        Ok((token, generation))
                    }
                    Err(err) => {
                        warn!(key = %self.key, error = %err, "token refresh failed");
                        Err(RefreshError {
                            message: format!("{:#}", err),
                        })
                    }
                }
            })
            .await
            .clone();

        let mut state = lock_unpoisoned(&self.state);
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| Arc::ptr_eq(in_flight, &cell))
        {
            state.in_flight = None;
        }
        outcome
    }

    /// Cache a refreshed token; a failed durable write is reported but the
    /// token is still handed out
    fn install(&self, token: &T) -> u64 {
        let mut state = lock_unpoisoned(&self.state);
        if let Err(err) = self.write_durable(Some(token)) {
            self.report(&err);
        }
        state.cached = Some(token.clone());
        state.generation += 1;
        state.generation
    }

    fn read_durable(&self) -> Result<Option<T>, StorageError> {
        let Some(bytes) = self.store.get(&self.key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Decode {
                key: self.key.clone(),
                source,
            })
    }

    fn write_durable(&self, token: Option<&T>) -> Result<(), StorageError> {
        match token {
            Some(token) => {
                let bytes = serde_json::to_vec(token).map_err(|source| StorageError::Encode {
                    key: self.key.clone(),
                    source,
                })?;
                self.store.set(&self.key, Some(&bytes))
            }
            None => self.store.remove(&self.key),
        }
    }

    fn report(&self, err: &StorageError) {
        warn!(key = %self.key, error = %err, "token storage error");
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }
}

impl<T: Token> fmt::Debug for TokenStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock_unpoisoned(&self.state);
        f.debug_struct("TokenStore")
            .field("key", &self.key)
            .field("has_token", &state.cached.is_some())
            .field("refreshing", &state.in_flight.is_some())
            .finish()
    }
}
