use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Fill `buf` completely. `Ok(false)` on a clean or torn EOF.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// What a replay recovered from disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// A torn or corrupt record ended the log early.
    pub discarded_tail: bool,
}

/// Append-only ledger journal.
///
/// Records are length-prefixed and CRC-checked, so a write interrupted by a
/// crash is detected and dropped on the next replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
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

    /// Buffer an event; durable only after `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the journal as `events`: write a sibling temp file, fsync,
    /// rename it over the live file and reopen for appends.
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for event in events {
                encode_event(&mut writer, event)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    /// Read every intact record. A missing file is an empty ledger.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read(&mut len_buf[..1])? {
                0 => break,
                _ => {
                    if !read_full(&mut reader, &mut len_buf[1..])? {
                        replay.discarded_tail = true;
                        break;
                    }
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;

            let mut payload = vec![0u8; len];
            let mut crc_buf = [0u8; 4];
            if !read_full(&mut reader, &mut payload)? || !read_full(&mut reader, &mut crc_buf)? {
                replay.discarded_tail = true;
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                replay.discarded_tail = true;
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => {
                    replay.discarded_tail = true;
                    break;
                }
            }
        }

        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("seatkeep_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn closure(day: u32) -> Event {
        Event::ClosureAdded {
            date: NaiveDate::from_ymd_opt(2099, 3, day).unwrap(),
            reason: Some("private event".into()),
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let events = vec![
            closure(1),
            Event::ClosureRemoved {
                date: NaiveDate::from_ymd_opt(2099, 3, 1).unwrap(),
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, events);
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&closure(2)).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![closure(2)]);
        assert!(replay.discarded_tail);
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        {
            let payload = bincode::serialize(&closure(3)).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(replay.discarded_tail);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        let replay = Wal::replay(&path).unwrap();
        assert!(replay.events.is_empty());
        assert!(!replay.discarded_tail);
    }

    #[test]
    fn compact_then_append() {
        let path = tmp_path("compact_then_append.wal");
        let mut wal = Wal::open(&path).unwrap();
        for day in 1..=10 {
            wal.append(&closure(day)).unwrap();
        }
        assert_eq!(wal.appends_since_compact(), 10);
        let before = fs::metadata(&path).unwrap().len();

        wal.compact(&[closure(4)]).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);

        wal.append(&closure(5)).unwrap();
        drop(wal);
        assert_eq!(Wal::replay(&path).unwrap().events, vec![closure(4), closure(5)]);
    }
}
