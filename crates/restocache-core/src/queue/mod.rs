//! Write queue for mutations made while offline.
//!
//! Mutations try the server first. When the server cannot be reached the
//! local store is updated optimistically and the request is appended to the
//! `offline-queue` collection. `drain` replays the queue oldest-first and
//! stops at the first entry that still fails, so no write ever overtakes an
//! earlier one.

pub mod entry;

pub use entry::{QueueEntry, WriteKind};

use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::api::RemoteClient;
use crate::error::{Error, QueuedWrite, Result};
use crate::events::{SyncEvent, EVENT_BUFFER_SIZE};
use crate::models::{NewReview, Restaurant, Review};
use crate::router::{is_provisional, mirror_record};
use crate::store::{decode, LocalStore, WriteTx, OFFLINE_QUEUE, RESTAURANTS, REVIEWS};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub remaining: usize,
    /// Entry that failed and stopped the pass.
    pub halted_at: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain holds the guard; nothing was touched.
    AlreadyRunning,
}

/// Clears the drain flag when dropped.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct WriteQueue {
    store: LocalStore,
    remote: RemoteClient,
    draining: AtomicBool,
    events: broadcast::Sender<SyncEvent>,
}

impl WriteQueue {
    pub fn new(store: LocalStore, remote: RemoteClient) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            store,
            remote,
            draining: AtomicBool::new(false),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Queued writes in replay order.
    pub async fn pending(&self) -> Result<Vec<(i64, QueueEntry)>> {
        let mut cursor = self.store.open_cursor(OFFLINE_QUEUE).await?;
        let mut entries = Vec::new();
        while let Some((key, value)) = cursor.next().await? {
            entries.push((key, decode(OFFLINE_QUEUE, value)?));
        }
        Ok(entries)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.count(OFFLINE_QUEUE).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Post a review.
    ///
    /// When the server cannot be reached the review is stored locally as
    /// unsynced, a queue entry pointing at it is added in the same
    /// transaction, and `Error::Queued` is returned.
    pub async fn create_review(&self, review: &NewReview) -> Result<Review> {
        let failure = match self.remote.create_review(review).await {
            Ok(server) => return Ok(server),
            Err(e) if e.is_remote_failure() => e,
            Err(e) => return Err(e),
        };

        let request = self.remote.create_review_request(review);
        let provisional = to_record(&review.provisional())?;
        let (review_key, queue_key) = self
            .store
            .write(|tx| {
                let review_key = provisional_key(tx)?;
                tx.put_with_key(REVIEWS, review_key, provisional)?;
                let entry = to_record(&QueueEntry::review(request, review_key))?;
                let queue_key = tx.put(OFFLINE_QUEUE, entry)?;
                Ok((review_key, queue_key))
            })
            .await?;

        warn!(restaurant_id = review.restaurant_id, review_key, queue_key, error = %failure, "Review queued for replay");
        self.emit(SyncEvent::Queued {
            queue_key,
            description: format!("review (local #{})", review_key),
        });
        Err(Error::Queued {
            write: QueuedWrite { queue_key, review_key: Some(review_key) },
            source: Box::new(failure),
        })
    }

    /// Flip a restaurant's favorite flag.
    ///
    /// The new state is computed from the stored record when there is one,
    /// so repeated toggles while offline alternate correctly. Only the last
    /// requested state for a restaurant stays queued.
    pub async fn toggle_favorite(&self, restaurant: &Restaurant) -> Result<Restaurant> {
        let mut optimistic = match self.store.get(RESTAURANTS, restaurant.id).await? {
            Some(stored) => decode::<Restaurant>(RESTAURANTS, stored)?,
            None => restaurant.clone(),
        };
        optimistic.is_favorite = !optimistic.is_favorite;
        let is_favorite = optimistic.is_favorite;
        let id = optimistic.id;

        let failure = match self.remote.set_favorite(id, is_favorite).await {
            Ok(server) => {
                self.store.put(RESTAURANTS, to_record(&server)?).await?;
                debug!(restaurant_id = id, is_favorite = server.is_favorite, "Favorite saved");
                return Ok(server);
            }
            Err(e) if e.is_remote_failure() => e,
            Err(e) => return Err(e),
        };

        let request = self.remote.favorite_request(id, is_favorite);
        let record = to_record(&optimistic)?;
        let entry = to_record(&QueueEntry::favorite(request, id, is_favorite))?;
        let (queue_key, superseded) = self
            .store
            .write(|tx| {
                tx.put(RESTAURANTS, record)?;
                let mut superseded = 0;
                for (key, value) in tx.get_all(OFFLINE_QUEUE)? {
                    let earlier: QueueEntry = decode(OFFLINE_QUEUE, value)?;
                    if earlier.favorite_of() == Some(id) {
                        tx.delete(OFFLINE_QUEUE, key)?;
                        superseded += 1;
                    }
                }
                Ok((tx.put(OFFLINE_QUEUE, entry)?, superseded))
            })
            .await?;

        warn!(restaurant_id = id, is_favorite, queue_key, superseded, error = %failure, "Favorite queued for replay");
        self.emit(SyncEvent::Queued {
            queue_key,
            description: format!("{} restaurant {}", if is_favorite { "favorite" } else { "unfavorite" }, id),
        });
        Err(Error::Queued {
            write: QueuedWrite { queue_key, review_key: None },
            source: Box::new(failure),
        })
    }

    /// Replay queued writes oldest-first, halting at the first failure.
    pub async fn drain(&self) -> Result<DrainOutcome> {
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("Queue drain already running");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let mut report = DrainReport::default();
        let mut cursor = self.store.open_cursor(OFFLINE_QUEUE).await?;

        while let Some((key, value)) = cursor.next().await? {
            let outcome = match decode::<QueueEntry>(OFFLINE_QUEUE, value) {
                Ok(entry) => self.replay(key, &entry).await.map(|()| entry.describe()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(description) => {
                    info!(queue_key = key, entry = %description, "Replayed queued write");
                    report.replayed += 1;
                    self.emit(SyncEvent::Replayed { queue_key: key, description });
                }
                Err(e) => {
                    warn!(queue_key = key, error = %e, "Replay failed, leaving the rest of the queue for later");
                    report.halted_at = Some(key);
                    report.error = Some(e.to_string());
                    self.emit(SyncEvent::DrainHalted { queue_key: key, error: e.to_string() });
                    break;
                }
            }
        }

        report.remaining = self.len().await?;
        info!(replayed = report.replayed, remaining = report.remaining, "Queue drain finished");
        Ok(DrainOutcome::Completed(report))
    }

    /// Send one entry and reconcile the local store with the server's answer.
    async fn replay(&self, key: i64, entry: &QueueEntry) -> Result<()> {
        let body = self.remote.send(&entry.request).await?;
        // Validate before touching the queue so a bad answer leaves the entry in place
        let confirmed = confirmed_record(entry, &body)?;

        match self.store.delete(OFFLINE_QUEUE, key).await {
            Ok(()) => {}
            // A newer favorite toggle already superseded this entry
            Err(Error::NotFound(_)) => debug!(queue_key = key, "Queue entry already removed"),
            Err(e) => return Err(e),
        }

        let swap = match (&entry.kind, entry.review_key) {
            (WriteKind::Review, Some(review_key)) => {
                self.store
                    .write(|tx| {
                        // Only the provisional record goes; anything else under that key stays
                        if tx.get(REVIEWS, review_key)?.as_ref().is_some_and(is_provisional) {
                            tx.delete(REVIEWS, review_key)?;
                        }
                        mirror_record(tx, REVIEWS, confirmed).map(|_| ())
                    })
                    .await
            }
            (WriteKind::Review, None) => self.store.write(|tx| mirror_record(tx, REVIEWS, confirmed).map(|_| ())).await,
            (WriteKind::Favorite { .. }, _) => self.store.put(RESTAURANTS, confirmed).await.map(|_| ()),
        };
        if let Err(e) = swap {
            // The server has the write; a stale local copy is tolerable
            error!(queue_key = key, error = %e, "Failed to reconcile local store after replay");
        }
        Ok(())
    }
}

/// The server's record for a replayed write, checked against the shape the
/// entry expects.
fn confirmed_record(entry: &QueueEntry, body: &Value) -> Result<Value> {
    match entry.kind {
        WriteKind::Review => {
            let review: Review = decode(REVIEWS, body.clone())?;
            if review.id.is_none() {
                return Err(Error::Parse("Replayed review came back without an id".to_string()));
            }
        }
        WriteKind::Favorite { .. } => {
            decode::<Restaurant>(RESTAURANTS, body.clone())?;
        }
    }
    Ok(body.clone())
}

/// Provisional reviews take keys below zero, out of reach of server ids.
fn provisional_key(tx: &WriteTx<'_>) -> Result<i64> {
    let lowest = tx.first_key(REVIEWS)?.unwrap_or(0).min(0);
    lowest
        .checked_sub(1)
        .ok_or_else(|| Error::Storage("No provisional review keys left".to_string()))
}

fn to_record<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| Error::storage("Failed to encode record", e))
}
