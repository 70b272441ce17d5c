//! The writer thread: the other half of [`ChannelSink`](crate::core::sink::ChannelSink).
//! Receives filled output-record buffers from the listener thread and
//! appends them to the configured sink file — the one place the pipeline
//! does blocking I/O.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::Receiver;

use log::{error, info};

pub fn write(path: &Path, rx: Receiver<Vec<u8>>) {
    let file = File::create(path).unwrap_or_else(|e| panic!("failed to open sink file {}: {}", path.display(), e));
    let mut out = BufWriter::new(file);
    info!("writing transcoded records to {}", path.display());

    while let Ok(chunk) = rx.recv() {
        if let Err(e) = out.write_all(&chunk) {
            error!("failed to write {} bytes to {}: {}", chunk.len(), path.display(), e);
            continue;
        }
        if let Err(e) = out.flush() {
            error!("failed to flush {}: {}", path.display(), e);
        }
    }
}
