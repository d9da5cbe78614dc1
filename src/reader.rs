use std::sync::mpsc::Sender;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::output::process_output;
use crate::ssh::ChannelHandle;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(30);
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReaderEvent {
    Output { session: String, text: String },
    Closed { session: String, generation: u64 },
}

enum Poll {
    Data(Vec<u8>),
    Idle,
    Finished(&'static str),
}

/// Spawns the background loop that drains one session's channel into `events`.
pub(crate) fn spawn_reader(
    session: String,
    generation: u64,
    channel: ChannelHandle,
    events: Sender<ReaderEvent>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("reader-{session}"))
        .spawn(move || run_reader(session, generation, channel, events))
}

fn run_reader(
    session: String,
    generation: u64,
    channel: ChannelHandle,
    events: Sender<ReaderEvent>,
) {
    tracing::debug!(session = %session, generation, "reader started");
    let reason = loop {
        match poll_channel(&channel) {
            Poll::Data(bytes) => {
                let decoded = String::from_utf8_lossy(&bytes);
                let text = process_output(&decoded);
                if text.is_empty() {
                    continue;
                }
                let event = ReaderEvent::Output {
                    session: session.clone(),
                    text,
                };
                if events.send(event).is_err() {
                    break "dispatch receiver dropped";
                }
            }
            Poll::Idle => thread::sleep(POLL_INTERVAL),
            Poll::Finished(reason) => break reason,
        }
    };

    {
        let mut channel = channel.lock();
        if !channel.is_closed() {
            channel.close();
        }
    }
    tracing::info!(session = %session, generation, reason, "reader stopped");
    let _ = events.send(ReaderEvent::Closed {
        session,
        generation,
    });
}

fn poll_channel(channel: &ChannelHandle) -> Poll {
    let mut channel = channel.lock();
    if channel.is_closed() {
        return Poll::Finished("channel closed");
    }
    match channel.data_ready() {
        Ok(true) => {
            let mut buffer = vec![0u8; READ_BUFFER_SIZE];
            match channel.read(&mut buffer) {
                Ok(0) => Poll::Finished("remote closed the channel"),
                Ok(count) => {
                    buffer.truncate(count);
                    Poll::Data(buffer)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "channel read failed");
                    Poll::Finished("read error")
                }
            }
        }
        Ok(false) if channel.exit_status_ready() => Poll::Finished("remote process exited"),
        Ok(false) => Poll::Idle,
        Err(err) => {
            tracing::warn!(error = %err, "channel unreadable");
            Poll::Finished("read error")
        }
    }
}
