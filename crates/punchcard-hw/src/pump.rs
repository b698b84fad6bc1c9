//! Background line reader feeding a channel, so blocking reads can be
//! bounded with `recv_timeout`.

use std::io::{BufRead, BufReader, Read};
use std::sync::mpsc;
use std::thread;

/// Spawn a thread that forwards each line of `reader` until EOF or error.
///
/// The thread exits on its own once the reader closes or the receiver is
/// dropped.
pub(crate) fn spawn_line_pump<R>(name: &str, reader: R) -> std::io::Result<mpsc::Receiver<String>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let label = name.to_string();
    thread::Builder::new().name(label.clone()).spawn(move || {
        for line in BufReader::new(reader).lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(reader = %label, error = %e, "line read failed");
                    break;
                }
            }
        }
        tracing::debug!(reader = %label, "line pump exiting");
    })?;
    Ok(rx)
}
