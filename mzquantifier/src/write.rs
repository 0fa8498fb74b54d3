use std::collections::HashMap;
use std::io;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use itertools::Itertools;
use tracing::{debug, error, info};

use crate::table::Row;

pub(crate) const BUFFER_SIZE: usize = 10_000;

/// Re-orders indexed items arriving in any order so they can be released in index order
#[derive(Debug)]
pub(crate) struct Collator<T> {
    pub waiting: HashMap<usize, T>,
    pub next_key: usize,
    pub done: bool,
}

impl<T> Default for Collator<T> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            next_key: 0,
            done: false,
        }
    }
}

impl<T> Collator<T> {
    pub fn receive(&mut self, key: usize, item: T) {
        self.waiting.insert(key, item);
    }

    pub fn has_next(&self) -> bool {
        self.waiting.contains_key(&self.next_key)
    }

    pub fn try_next(&mut self) -> Option<(usize, T)> {
        let key = self.next_key;
        let item = self.waiting.remove(&key)?;
        self.next_key += 1;
        Some((key, item))
    }

    /// Release whatever is still waiting in key order, skipping over gaps
    pub fn drain_sorted(&mut self) -> Vec<(usize, T)> {
        let items = std::mem::take(&mut self.waiting)
            .into_iter()
            .sorted_by_key(|(k, _)| *k)
            .collect_vec();
        if let Some((k, _)) = items.last() {
            self.next_key = k + 1;
        }
        items
    }
}

fn drain_channel<T>(
    collator: &mut Collator<T>,
    channel: &Receiver<(usize, T)>,
    batch_size: usize,
) -> bool {
    let mut j = 0;
    for b in 0..batch_size {
        match channel.try_recv() {
            Ok((key, item)) => {
                collator.receive(key, item);
                j += 1;
            }
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                debug!("Work queue finished after draining {b} items from the work queue");
                collator.done = true;
                break;
            }
        }
    }
    if j > batch_size / 2 {
        debug!("Drained {j} items from work queue");
    }
    collator.done
}

/// Forward items from `receiver` to `sender` in index order, starting from index 0
pub(crate) fn collate_results<T: Send>(receiver: Receiver<(usize, T)>, sender: Sender<(usize, T)>) {
    let mut collator = Collator::default();
    while !collator.done {
        match receiver.recv() {
            Ok((key, item)) => {
                collator.receive(key, item);
                drain_channel(&mut collator, &receiver, 1000);
            }
            Err(_) => {
                collator.done = true;
            }
        }
        while let Some((key, item)) = collator.try_next() {
            if let Err(e) = sender.send((key, item)) {
                error!("Failed to send {key} for writing: {e}");
                return;
            }
        }
    }
    let n = collator.waiting.len();
    if n > 0 {
        debug!("Draining output queue, {n} items");
        for (key, item) in collator.drain_sorted() {
            if let Err(e) = sender.send((key, item)) {
                error!("Failed to send {key} for writing: {e}");
                break;
            }
        }
    }
    debug!("Result collator done");
}

/// Open a tab-separated output writer on `path`, or STDOUT when `path` is `-`
pub(crate) fn open_output(path: &std::path::Path) -> io::Result<csv::Writer<Box<dyn io::Write + Send>>> {
    let handle: Box<dyn io::Write + Send> = if path == std::path::Path::new("-") {
        Box::new(io::stdout())
    } else {
        Box::new(io::BufWriter::new(std::fs::File::create(path)?))
    };
    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(csv::QuoteStyle::Never)
        .has_headers(false)
        .from_writer(handle))
}

/// Write `header` and then every batch of rows received, in the order they arrive.
///
/// Returns the number of rows written, not counting the header.
pub(crate) fn write_rows<W: io::Write>(
    mut writer: csv::Writer<W>,
    header: Row,
    receiver: Receiver<(usize, Vec<Row>)>,
) -> Result<usize, csv::Error> {
    writer.write_record(&header)?;
    let mut row_counter = 0usize;
    let mut checkpoint = 0usize;
    while let Ok((batch_idx, rows)) = receiver.recv() {
        for row in rows {
            writer.write_record(&row)?;
            row_counter += 1;
        }
        if batch_idx - checkpoint >= 1000 {
            let queue_size = receiver.len();
            info!(
                "Completed Entry {} | Rows={row_counter} | {queue_size} items in the write queue",
                batch_idx + 1
            );
            checkpoint = batch_idx;
        }
    }
    writer.flush()?;
    Ok(row_counter)
}
