//! Streams a share's attachments as a zip archive.
//!
//! The archive is written on a blocking thread into a bounded channel and
//! handed to the response body as a stream. Once bytes have gone out, a
//! failure can no longer become an error response: the stream yields the
//! error, which aborts the connection.

use bytes::Bytes;
use futures::Stream;
use std::{
    collections::HashSet,
    fs::File,
    io::{self, BufWriter, Write},
    path::PathBuf,
};
use tokio::sync::mpsc;
use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

const CHANNEL_DEPTH: usize = 8;
const CHUNK_SIZE: usize = 64 * 1024;

/// One member of the archive: entry name and the file holding its bytes.
#[derive(Clone, Debug)]
pub struct BundleEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Start writing `entries` into a zip and return the byte stream.
pub fn zip_stream(entries: Vec<BundleEntry>) -> impl Stream<Item = io::Result<Bytes>> {
    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(CHANNEL_DEPTH);

    tokio::task::spawn_blocking(move || {
        let sink = ChannelWriter { tx: tx.clone() };
        if let Err(err) = write_archive(BufWriter::with_capacity(CHUNK_SIZE, sink), &entries) {
            tracing::error!(error = %err, "zip bundle aborted");
            // receiver may already be gone if the client disconnected
            let _ = tx.blocking_send(Err(err));
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
}

fn write_archive<W: Write>(sink: W, entries: &[BundleEntry]) -> io::Result<()> {
    let mut zip = ZipWriter::new_stream(sink);
    let mut names = HashSet::new();

    for entry in entries {
        let mut file = File::open(&entry.path)?;
        let size = file.metadata()?.len();
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(size > u32::MAX as u64);

        zip.start_file(unique_name(&mut names, &entry.name), options)
            .map_err(io::Error::other)?;
        io::copy(&mut file, &mut zip)?;
    }

    let mut sink = zip.finish().map_err(io::Error::other)?;
    sink.flush()
}

/// Zip entry names must be unique; suffix repeats as `name (2).ext`.
fn unique_name(taken: &mut HashSet<String>, name: &str) -> String {
    if taken.insert(name.to_string()) {
        return name.to_string();
    }
    let (stem, ext) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// `Write` adapter that forwards every buffer into the response channel.
struct ChannelWriter {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
