//! HDF5 persistence for events, centroids and trigger timing.
//!
//! Layout, all datasets 1-D, extendable and chunked, each with a `units`
//! attribute:
//!
//! ```text
//! /raw            trigger nr, x, y, tof, tot
//! /centroided     trigger nr, x, y, tof, tot avg, tot max, clustersize
//! /timing/timepix trigger nr, timestamp
//! ```

use crate::{Error, Result};
use hdf5::types::{H5Type, VarLenUnicode};
use hdf5::{Dataset, File, Group, Location};
use log::debug;
use ndarray::{s, ArrayView1};
use std::path::Path;
use tpxflow_core::{CentroidBatch, EventBatch, TriggerTimestamps};
use tpxflow_pipeline::Message;

/// Dataset creation options.
#[derive(Clone, Debug)]
pub struct SinkOptions {
    /// Rows per HDF5 chunk.
    pub chunk_rows: usize,
    /// Deflate level, if any.
    pub compression: Option<u8>,
    /// Apply the shuffle filter.
    pub shuffle: bool,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            chunk_rows: 100_000,
            compression: None,
            shuffle: false,
        }
    }
}

/// Rows written so far, per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounts {
    /// Rows in `/raw`.
    pub events: usize,
    /// Rows in `/centroided`.
    pub centroids: usize,
    /// Rows in `/timing/timepix`.
    pub timestamps: usize,
}

/// Streaming writer for pipeline output.
pub struct Hdf5Sink {
    file: File,
    raw: EventTable,
    centroided: CentroidTable,
    timing: TimingTable,
}

impl Hdf5Sink {
    /// Creates the file and all tables.
    ///
    /// # Errors
    /// Returns an error if the HDF5 file or datasets cannot be created.
    pub fn create<P: AsRef<Path>>(path: P, options: &SinkOptions) -> Result<Self> {
        if options.chunk_rows == 0 {
            return Err(Error::InvalidFormat("chunk_rows must be at least 1".into()));
        }
        let file = File::create(path)?;
        write_text_attr(&file, "tpxflow_format_version", "0.1")?;

        let raw = EventTable::new(&file.create_group("raw")?, options)?;
        let centroided = CentroidTable::new(&file.create_group("centroided")?, options)?;
        let timing_group = file.create_group("timing")?.create_group("timepix")?;
        let timing = TimingTable::new(&timing_group, options)?;

        Ok(Self {
            file,
            raw,
            centroided,
            timing,
        })
    }

    /// Appends events to `/raw`.
    ///
    /// # Errors
    /// Returns an error if the datasets cannot be extended.
    pub fn write_events(&mut self, events: &EventBatch) -> Result<()> {
        self.raw.append(events)
    }

    /// Appends centroids to `/centroided`.
    ///
    /// # Errors
    /// Returns an error if the datasets cannot be extended.
    pub fn write_centroids(&mut self, centroids: &CentroidBatch) -> Result<()> {
        self.centroided.append(centroids)
    }

    /// Appends trigger stamps to `/timing/timepix`.
    ///
    /// # Errors
    /// Returns an error if the datasets cannot be extended.
    pub fn write_timestamps(&mut self, timestamps: &TriggerTimestamps) -> Result<()> {
        self.timing.append(timestamps)
    }

    /// Persists whatever a message carries. Raw and decoded batches and the
    /// sentinel are not persisted.
    ///
    /// # Errors
    /// Returns an error if a table cannot be extended.
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        match message {
            Message::EventBatch(events) => {
                self.write_events(events)?;
                self.write_timestamps(&events.timestamps)
            }
            Message::CentroidBatch(out) => {
                self.write_centroids(&out.centroids)?;
                self.write_timestamps(&out.timestamps)?;
                if let Some(events) = &out.events {
                    self.write_events(events)?;
                }
                Ok(())
            }
            other => {
                debug!("sink skipping {} message", other.kind());
                Ok(())
            }
        }
    }

    /// Rows written so far.
    #[must_use]
    pub fn counts(&self) -> SinkCounts {
        SinkCounts {
            events: self.raw.rows,
            centroids: self.centroided.rows,
            timestamps: self.timing.rows,
        }
    }

    /// Flushes HDF5 buffers to disk.
    ///
    /// # Errors
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> Result<()> {
        Ok(self.file.flush()?)
    }
}

struct EventTable {
    trigger: Column,
    x: Column,
    y: Column,
    tof: Column,
    tot: Column,
    rows: usize,
}

impl EventTable {
    fn new(group: &Group, options: &SinkOptions) -> Result<Self> {
        Ok(Self {
            trigger: Column::create::<u64>(group, "trigger nr", "id", options)?,
            x: Column::create::<u16>(group, "x", "pixel", options)?,
            y: Column::create::<u16>(group, "y", "pixel", options)?,
            tof: Column::create::<f64>(group, "tof", "s", options)?,
            tot: Column::create::<f64>(group, "tot", "s", options)?,
            rows: 0,
        })
    }

    fn append(&mut self, batch: &EventBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let at = self.rows;
        self.trigger.extend(at, &batch.trigger_id)?;
        self.x.extend(at, &batch.x)?;
        self.y.extend(at, &batch.y)?;
        self.tof.extend(at, &batch.tof)?;
        self.tot.extend(at, &batch.tot)?;
        self.rows += batch.len();
        Ok(())
    }
}

struct CentroidTable {
    trigger: Column,
    x: Column,
    y: Column,
    tof: Column,
    tot_mean: Column,
    tot_max: Column,
    size: Column,
    rows: usize,
}

impl CentroidTable {
    fn new(group: &Group, options: &SinkOptions) -> Result<Self> {
        Ok(Self {
            trigger: Column::create::<u64>(group, "trigger nr", "id", options)?,
            x: Column::create::<f64>(group, "x", "pixel", options)?,
            y: Column::create::<f64>(group, "y", "pixel", options)?,
            tof: Column::create::<f64>(group, "tof", "s", options)?,
            tot_mean: Column::create::<f64>(group, "tot avg", "s", options)?,
            tot_max: Column::create::<f64>(group, "tot max", "s", options)?,
            size: Column::create::<u32>(group, "clustersize", "pixel", options)?,
            rows: 0,
        })
    }

    fn append(&mut self, batch: &CentroidBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let at = self.rows;
        self.trigger.extend(at, &batch.shot)?;
        self.x.extend(at, &batch.x)?;
        self.y.extend(at, &batch.y)?;
        self.tof.extend(at, &batch.tof)?;
        self.tot_mean.extend(at, &batch.tot_mean)?;
        self.tot_max.extend(at, &batch.tot_max)?;
        self.size.extend(at, &batch.size)?;
        self.rows += batch.len();
        Ok(())
    }
}

struct TimingTable {
    trigger: Column,
    timestamp: Column,
    rows: usize,
}

impl TimingTable {
    fn new(group: &Group, options: &SinkOptions) -> Result<Self> {
        Ok(Self {
            trigger: Column::create::<u64>(group, "trigger nr", "id", options)?,
            timestamp: Column::create::<u64>(group, "timestamp", "ns", options)?,
            rows: 0,
        })
    }

    fn append(&mut self, stamps: &TriggerTimestamps) -> Result<()> {
        if stamps.is_empty() {
            return Ok(());
        }
        let at = self.rows;
        self.trigger.extend(at, &stamps.trigger_id)?;
        self.timestamp.extend(at, &stamps.wall_clock_ns)?;
        self.rows += stamps.len();
        Ok(())
    }
}

/// One table column: an unlimited 1-D dataset tagged with its units.
struct Column(Dataset);

impl Column {
    fn create<T: H5Type>(
        group: &Group,
        name: &str,
        units: &str,
        options: &SinkOptions,
    ) -> Result<Self> {
        let builder = group
            .new_dataset::<T>()
            .shape((0..,))
            .chunk((options.chunk_rows,));
        let builder = match options.compression {
            Some(level) => builder.deflate(level),
            None => builder,
        };
        let builder = if options.shuffle {
            builder.shuffle()
        } else {
            builder
        };

        let dataset = builder.create(name)?;
        write_text_attr(&dataset, "units", units)?;
        Ok(Self(dataset))
    }

    /// Grows the column to hold `values` starting at row `at`.
    fn extend<T: H5Type>(&self, at: usize, values: &[T]) -> Result<()> {
        let end = at + values.len();
        self.0.resize((end,))?;
        self.0.write_slice(ArrayView1::from(values), s![at..end])?;
        Ok(())
    }
}

fn write_text_attr(location: &Location, name: &str, value: &str) -> Result<()> {
    let text: VarLenUnicode = value
        .parse()
        .map_err(|e| Error::InvalidFormat(format!("attribute `{name}` is not valid text: {e}")))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use tpxflow_core::{Centroid, Event};
    use tpxflow_pipeline::Centroided;

    fn read_units(group: &Group, name: &str) -> String {
        let attr: VarLenUnicode = group
            .dataset(name)
            .unwrap()
            .attr("units")
            .unwrap()
            .read_scalar()
            .unwrap();
        attr.to_string()
    }

    #[test]
    fn test_tables_and_units() {
        let file = NamedTempFile::new().unwrap();
        {
            let _sink = Hdf5Sink::create(file.path(), &SinkOptions::default()).unwrap();
        }

        let h5 = File::open(file.path()).unwrap();
        let raw = h5.group("raw").unwrap();
        assert_eq!(read_units(&raw, "trigger nr"), "id");
        assert_eq!(read_units(&raw, "tof"), "s");
        assert_eq!(read_units(&raw, "x"), "pixel");

        let centroided = h5.group("centroided").unwrap();
        assert_eq!(read_units(&centroided, "tot avg"), "s");
        assert_eq!(read_units(&centroided, "clustersize"), "pixel");

        let timing = h5.group("timing/timepix").unwrap();
        assert_eq!(read_units(&timing, "timestamp"), "ns");
    }

    #[test]
    fn test_format_version_attribute() {
        let file = NamedTempFile::new().unwrap();
        drop(Hdf5Sink::create(file.path(), &SinkOptions::default()).unwrap());

        let h5 = File::open(file.path()).unwrap();
        let version: VarLenUnicode = h5
            .attr("tpxflow_format_version")
            .unwrap()
            .read_scalar()
            .unwrap();
        assert_eq!(version.as_str(), "0.1");
    }

    #[test]
    fn test_write_message_appends_across_batches() {
        let file = NamedTempFile::new().unwrap();
        let options = SinkOptions {
            chunk_rows: 2,
            ..SinkOptions::default()
        };
        let mut sink = Hdf5Sink::create(file.path(), &options).unwrap();

        let mut first: EventBatch = [Event::new(0, 1, 2, 1e-6, 50e-9), Event::new(0, 3, 4, 2e-6, 75e-9)]
            .into_iter()
            .collect();
        first.timestamps.push(0, 1_000);
        sink.write_message(&Message::EventBatch(first)).unwrap();

        let mut centroids = CentroidBatch::default();
        centroids.push(Centroid {
            shot: 1,
            x: 10.5,
            y: 20.25,
            tof: 3e-6,
            tot_mean: 60e-9,
            tot_max: 100e-9,
            size: 4,
        });
        let mut stamps = TriggerTimestamps::default();
        stamps.push(1, 2_000);
        let events: EventBatch = std::iter::once(Event::new(1, 5, 6, 3e-6, 25e-9)).collect();
        sink.write_message(&Message::CentroidBatch(Centroided {
            centroids,
            timestamps: stamps,
            events: Some(events),
        }))
        .unwrap();
        sink.write_message(&Message::Sentinel).unwrap();

        assert_eq!(
            sink.counts(),
            SinkCounts {
                events: 3,
                centroids: 1,
                timestamps: 2
            }
        );
        sink.flush().unwrap();
        drop(sink);

        let h5 = File::open(file.path()).unwrap();
        let triggers: Vec<u64> = h5.dataset("raw/trigger nr").unwrap().read_raw().unwrap();
        assert_eq!(triggers, vec![0, 0, 1]);
        let xs: Vec<u16> = h5.dataset("raw/x").unwrap().read_raw().unwrap();
        assert_eq!(xs, vec![1, 3, 5]);
        let cx: Vec<f64> = h5.dataset("centroided/x").unwrap().read_raw().unwrap();
        assert_eq!(cx, vec![10.5]);
        let sizes: Vec<u32> = h5.dataset("centroided/clustersize").unwrap().read_raw().unwrap();
        assert_eq!(sizes, vec![4]);
        let stamps: Vec<u64> = h5.dataset("timing/timepix/timestamp").unwrap().read_raw().unwrap();
        assert_eq!(stamps, vec![1_000, 2_000]);
    }
}
