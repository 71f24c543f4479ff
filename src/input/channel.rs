//! Programmatic sample source

use super::SampleSource;
use crate::matrix::Axis;
use crate::Result;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Sample source fed through a bounded channel.
///
/// Each poll drains whatever has been sent since the previous one.
pub struct ChannelSource {
    start_time: i64,
    receiver: Mutex<mpsc::Receiver<(i64, Axis)>>,
}

/// Create a channel source and the sender that feeds it.
pub fn channel_source(start_time: i64, capacity: usize) -> (mpsc::Sender<(i64, Axis)>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        sender,
        ChannelSource {
            start_time,
            receiver: Mutex::new(receiver),
        },
    )
}

#[async_trait]
impl SampleSource for ChannelSource {
    fn start_time(&self) -> i64 {
        self.start_time
    }

    async fn poll(&self) -> Result<Vec<(i64, Axis)>> {
        let mut receiver = self.receiver.lock();
        let mut snapshots = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        Ok(snapshots)
    }
}
