use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_EVENT_BYTES;
use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Why replay stopped before end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tail {
    Clean,
    Truncated,
    BadChecksum,
    Undecodable,
}

/// Append-only booking log, one file per tenant.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is discarded on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Nothing is durable until `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write compacted events to `{wal}.tmp` and fsync.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let file = File::create(&tmp_path)?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the WAL and reopen for appending.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(Self::scan(path)?.events)
    }

    /// Replay, then cut any damaged tail off the file so later appends
    /// land directly after the last valid frame.
    pub fn recover(path: &Path) -> io::Result<Vec<Event>> {
        let scanned = Self::scan(path)?;
        if scanned.tail != Tail::Clean {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scanned.valid_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                valid_len = scanned.valid_len,
                "truncated damaged WAL tail"
            );
        }
        Ok(scanned.events)
    }

    fn scan(path: &Path) -> io::Result<Scanned> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Scanned {
                    events: Vec::new(),
                    valid_len: 0,
                    tail: Tail::Clean,
                });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len: u64 = 0;

        let tail = loop {
            let mut len_buf = [0u8; 4];
            match read_full(&mut reader, &mut len_buf)? {
                Filled::Full => {}
                Filled::Empty => break Tail::Clean,
                Filled::Partial => break Tail::Truncated,
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_EVENT_BYTES {
                break Tail::Undecodable;
            }

            let mut payload = vec![0u8; len];
            if read_full(&mut reader, &mut payload)? != Filled::Full {
                break Tail::Truncated;
            }

            let mut crc_buf = [0u8; 4];
            if read_full(&mut reader, &mut crc_buf)? != Filled::Full {
                break Tail::Truncated;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break Tail::BadChecksum;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break Tail::Undecodable,
            }
            valid_len += 8 + len as u64;
        };

        if tail != Tail::Clean {
            warn!(
                path = %path.display(),
                replayed = events.len(),
                tail = ?tail,
                "discarding damaged WAL tail"
            );
        }
        Ok(Scanned {
            events,
            valid_len,
            tail,
        })
    }
}

struct Scanned {
    events: Vec<Event>,
    /// Byte length of the prefix made of whole, valid frames.
    valid_len: u64,
    tail: Tail,
}

#[derive(Debug, PartialEq, Eq)]
enum Filled {
    Full,
    Partial,
    Empty,
}

/// `read_exact` that tells a clean EOF apart from a short read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Filled> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(match filled {
        n if n == buf.len() => Filled::Full,
        0 => Filled::Empty,
        _ => Filled::Partial,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveTime;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("intrabook_test_wal");
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn room(id: Ulid) -> Resource {
        Resource {
            id,
            name: "Room".into(),
            work_hours_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            work_hours_end: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
            min_duration: 30,
            max_duration: 240,
            capacity: Some(6),
            active: true,
        }
    }

    fn created(resource_id: Ulid, start: Ms) -> Event {
        Event::BookingCreated {
            booking: Booking {
                id: Ulid::new(),
                resource_id,
                owner_id: Ulid::new(),
                title: "retro".into(),
                span: Span::new(start, start + 1_800_000),
                status: BookingStatus::Confirmed,
                recurrence_group_id: None,
                recurrence_rule: None,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let events = vec![
            Event::ResourceRegistered { resource: room(rid) },
            created(rid, 1_000),
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let _ = fs::remove_file(&path);

        let event = Event::ResourceRegistered { resource: room(Ulid::new()) };

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }

        // partial second entry
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_truncates_torn_tail_before_new_appends() {
        let path = tmp_path("recover_torn_tail.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let registered = Event::ResourceRegistered { resource: room(rid) };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered).unwrap();
        }
        let clean_len = fs::metadata(&path).unwrap().len();
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[7u8; 3]).unwrap();
        }

        // first restart
        assert_eq!(Wal::recover(&path).unwrap(), vec![registered.clone()]);
        assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);
        let booked = created(rid, 9_000_000);
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&booked).unwrap();
        }

        // second restart sees everything committed after the first
        assert_eq!(Wal::recover(&path).unwrap(), vec![registered, booked]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn recover_leaves_clean_file_alone() {
        let path = tmp_path("recover_clean.wal");
        let _ = fs::remove_file(&path);

        let event = Event::ResourceDeactivated { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();

        assert_eq!(Wal::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert!(Wal::recover(&tmp_path("recover_missing.wal")).unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_rejected() {
        let path = tmp_path("oversized_len.wal");
        let _ = fs::remove_file(&path);

        let event = Event::ResourceDeactivated { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        let valid = fs::metadata(&path).unwrap().len();
        {
            // claims a ~4 GiB payload
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[1u8; 16]).unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), vec![event.clone()]);
        assert_eq!(Wal::recover(&path).unwrap(), vec![event]);
        assert_eq!(fs::metadata(&path).unwrap().len(), valid);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        let _ = fs::remove_file(&path);
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_corrupt_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let _ = fs::remove_file(&path);

        let event = Event::ResourceDeactivated { id: Ulid::new() };
        {
            let payload = bincode::serialize(&event).unwrap();
            let len = payload.len() as u32;
            let mut f = File::create(&path).unwrap();
            f.write_all(&len.to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().is_empty());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_append.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let registered = Event::ResourceRegistered { resource: room(rid) };
        let kept = created(rid, 5_000);

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&registered).unwrap();
            for i in 0..10 {
                let churn = created(rid, i * 10_000_000);
                let id = match &churn {
                    Event::BookingCreated { booking } => booking.id,
                    _ => unreachable!(),
                };
                wal.append(&churn).unwrap();
                wal.append(&Event::BookingCancelled { id, resource_id: rid }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(std::slice::from_ref(&registered)).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&kept).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");
        assert_eq!(Wal::replay(&path).unwrap(), vec![registered, kept]);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn append_buffered_then_flush_sync() {
        let path = tmp_path("buffered_flush.wal");
        let _ = fs::remove_file(&path);

        let rid = Ulid::new();
        let events: Vec<Event> = (0..5).map(|i| created(rid, i * 3_600_000)).collect();

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }

        assert_eq!(Wal::replay(&path).unwrap(), events);

        let _ = fs::remove_file(&path);
    }
}
