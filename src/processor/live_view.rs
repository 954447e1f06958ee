use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::processor::session::LiveView;

/// Outbound destination for per-vehicle live views.
#[async_trait]
pub trait LiveViewSink: Send + Sync + 'static {
    async fn publish(&self, view: &LiveView) -> Result<()>;
}

/// Publishes the current view, then every change until the session ends.
/// A slow sink only ever sees the latest view.
pub async fn forward_live_views(mut views: watch::Receiver<LiveView>, sink: Arc<dyn LiveViewSink>) {
    loop {
        let view = views.borrow_and_update().clone();
        if let Err(e) = sink.publish(&view).await {
            warn!(vehicle_id = %view.vehicle_id, "live view publish failed: {}", e);
        }
        if views.changed().await.is_err() {
            break;
        }
    }
    debug!("live view forwarder stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::position::{PositionSample, SampleSource};
    use crate::processor::session::ConnectionState;
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub views: Mutex<Vec<LiveView>>,
    }

    #[async_trait]
    impl LiveViewSink for RecordingSink {
        async fn publish(&self, view: &LiveView) -> Result<()> {
            self.views.lock().await.push(view.clone());
            Ok(())
        }
    }

    fn view(position: Option<PositionSample>) -> LiveView {
        LiveView {
            vehicle_id: 4,
            position,
            inside_geofence: None,
            connection: ConnectionState::Unpaired,
            updated_at_ms: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_latest_view_until_sender_drops() {
        let sink = Arc::new(RecordingSink::default());
        let (tx, rx) = watch::channel(view(None));
        let forwarder = tokio::spawn(forward_live_views(rx, sink.clone()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        let sample = PositionSample::new(1.0, 2.0, 3, SampleSource::Realtime);
        tx.send_replace(view(Some(sample)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(tx);
        forwarder.await.unwrap();

        let views = sink.views.lock().await;
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].position, None);
        assert_eq!(views[1].position, Some(sample));
    }
}
