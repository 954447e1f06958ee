use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::db::store::TrackingStore;
use crate::models::trip_history::TripPointDraft;

#[derive(Debug, Error)]
#[error("flush of {buffered} trip points for vehicle {vehicle_id} failed: {source}")]
pub struct PersistError {
    pub vehicle_id: i64,
    pub buffered: usize,
    #[source]
    pub source: anyhow::Error,
}

/// Buffers accepted samples and writes them in fixed-size batches.
///
/// A failed flush keeps the buffer intact; the next submission retries it.
/// While the store stays down the buffer holds at most `max_buffered` points,
/// dropping the oldest.
pub struct BatchedPersister<S: ?Sized> {
    store: Arc<S>,
    vehicle_id: i64,
    batch_size: usize,
    max_buffered: usize,
    buffer: Vec<TripPointDraft>,
}

impl<S: TrackingStore + ?Sized> BatchedPersister<S> {
    pub fn new(store: Arc<S>, vehicle_id: i64, batch_size: usize, max_buffered: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            vehicle_id,
            batch_size,
            max_buffered: max_buffered.max(batch_size),
            buffer: Vec::with_capacity(batch_size),
        }
    }

    /// Returns the number of points written, zero when the batch is still filling.
    pub async fn submit(&mut self, point: TripPointDraft) -> Result<usize, PersistError> {
        self.buffer.push(point);
        if self.buffer.len() > self.max_buffered {
            let dropped = self.buffer.len() - self.max_buffered;
            self.buffer.drain(..dropped);
            error!(
                vehicle_id = %self.vehicle_id,
                dropped,
                kept = self.buffer.len(),
                "trip buffer full while store is failing, oldest points dropped"
            );
        }
        if self.buffer.len() < self.batch_size {
            return Ok(0);
        }
        self.flush().await
    }

    /// Writes whatever is buffered, full batch or not.
    pub async fn flush(&mut self) -> Result<usize, PersistError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        match self
            .store
            .append_trip_points(self.vehicle_id, &self.buffer)
            .await
        {
            Ok(()) => {
                let written = self.buffer.len();
                self.buffer.clear();
                debug!(vehicle_id = %self.vehicle_id, written, "trip batch flushed");
                Ok(written)
            }
            Err(source) => {
                warn!(
                    vehicle_id = %self.vehicle_id,
                    buffered = self.buffer.len(),
                    "trip batch flush failed, keeping buffer for retry"
                );
                Err(PersistError {
                    vehicle_id: self.vehicle_id,
                    buffered: self.buffer.len(),
                    source,
                })
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Forgets unwritten points, returning how many were discarded.
    pub fn discard(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        discarded
    }
}
