//! Relays child stdout/stderr lines onto the event bus.

use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use super::SUPERVISOR_TARGET;
use crate::events::{EventBus, OutputSource, OutputStream, ServiceEvent};

/// Spawns a thread forwarding every non-empty line of `reader`.
pub(super) fn spawn_relay<R>(
    reader: R,
    source: OutputSource,
    stream: OutputStream,
    events: EventBus,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(format!("{source}-{stream}"))
        .spawn(move || relay_lines(BufReader::new(reader), source, stream, &events))
}

/// Forwards lines until end of stream.
///
/// Bytes are decoded lossily so a stray invalid sequence from the core never
/// ends the relay early.
pub(super) fn relay_lines<R: BufRead>(
    mut reader: R,
    source: OutputSource,
    stream: OutputStream,
    events: &EventBus,
) {
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer) {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&buffer);
                let line = text.trim();
                if line.is_empty() {
                    continue;
                }
                match stream {
                    OutputStream::Stdout => {
                        info!(target: SUPERVISOR_TARGET, source = %source, "{line}");
                    }
                    OutputStream::Stderr => {
                        warn!(target: SUPERVISOR_TARGET, source = %source, "{line}");
                    }
                }
                events.publish(ServiceEvent::ProcessOutput {
                    source,
                    stream,
                    line: line.to_owned(),
                });
            }
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => {
                debug!(
                    target: SUPERVISOR_TARGET,
                    source = %source,
                    stream = %stream,
                    error = %error,
                    "output relay stopped"
                );
                break;
            }
        }
    }
}
