//! Connection statistics journal.
//!
//! While a data call is live, records are appended to a small journal file:
//! one 'S' record at start, 'P' records on every sampling tick, one 'F'
//! record at teardown. The final record is mirrored to syslog and the file
//! removed. A journal found at startup is scanned backwards for its last
//! well-formed record, which is reported and then discarded; a mid-session
//! crash thus still yields a best-effort final record.

use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};

/// Default journal location.
pub const STATS_FILE_PATH: &str = "/var/log/rmfd.stats";

/// Records never exceed this many bytes on the wire, newline included.
const MAX_LINE_LENGTH: usize = 255;

const N_FIELDS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Start,
    Partial,
    Final,
}

impl RecordType {
    fn tag(self) -> char {
        match self {
            RecordType::Start => 'S',
            RecordType::Partial => 'P',
            RecordType::Final => 'F',
        }
    }
}

/// The last well-formed record salvaged from a leftover journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredRecord {
    pub record_type: String,
    pub from: String,
    pub to: String,
    pub duration_secs: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Record line capped at [`MAX_LINE_LENGTH`] bytes; overflow is dropped on
/// character boundaries.
struct CappedLine(heapless::String<MAX_LINE_LENGTH>);

impl core::fmt::Write for CappedLine {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Formats a modem wallclock given in milliseconds since the GPS epoch
/// (1980-01-06 UTC) as `YYYY-MM-DD HH:MM:SS`.
pub fn format_gps_time(ms: u64) -> String {
    const GPS_UNIX_OFFSET: i64 = 315_964_800;
    let unix = GPS_UNIX_OFFSET + (ms / 1000) as i64;

    let days = unix.div_euclid(86_400);
    let secs = unix.rem_euclid(86_400);

    // Civil-from-days, Gregorian calendar.
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);

    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02}",
        secs / 3600,
        (secs % 3600) / 60,
        secs % 60
    )
}

/// System time when available, otherwise the Unix timestamp.
fn build_date_string(system_time: Option<&str>, unix: u64) -> String {
    match system_time {
        Some(t) => t.to_string(),
        None => format!("(unix) {unix}"),
    }
}

fn write_syslog_record(from: &str, to: &str, duration: u64, rx_bytes: u64, tx_bytes: u64) {
    info!(
        target: "stats",
        "Connection stats [From: {from}] [To: {to}] [Duration: {duration}] [RX: {rx_bytes}] [TX: {tx_bytes}]"
    );
}

/// One stats session context. Owned by the processor; the journal file is
/// only open between `start` and `stop`.
#[derive(Debug)]
pub struct Stats {
    path: PathBuf,
    file: Option<File>,
    start_system_time: Option<String>,
    start_unix: u64,
}

impl Stats {
    /// Sets up the context, salvaging a journal left behind by a previous
    /// run.
    pub fn setup(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        recover_last_record(&path);
        Self {
            path,
            file: None,
            start_system_time: None,
            start_unix: 0,
        }
    }

    /// Opens the journal and writes the 'S' record with zero counters.
    pub fn start(&mut self, system_time: Option<String>) {
        match OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)
        {
            Ok(file) => self.file = Some(file),
            Err(e) => {
                warn!("error: cannot open stats file: {e}");
                return;
            }
        }

        self.start_system_time = system_time;
        self.start_unix = now_unix();

        self.write_record(
            RecordType::Start,
            self.start_system_time.clone(),
            self.start_unix,
            0,
            0,
        );
    }

    /// Appends a 'P' record with the current counters.
    pub fn partial(&mut self, to_system_time: Option<String>, rx_bytes: u64, tx_bytes: u64) {
        self.write_record(RecordType::Partial, to_system_time, now_unix(), rx_bytes, tx_bytes);
    }

    /// Appends the 'F' record, mirrors the summary to syslog and removes the
    /// journal. Repeated stops are no-ops.
    pub fn stop(&mut self, to_system_time: Option<String>, rx_bytes: u64, tx_bytes: u64) {
        if self.start_unix == 0 && self.start_system_time.is_none() {
            return;
        }

        let stop_unix = now_unix();
        self.write_record(
            RecordType::Final,
            to_system_time.clone(),
            stop_unix,
            rx_bytes,
            tx_bytes,
        );

        let from = build_date_string(self.start_system_time.as_deref(), self.start_unix);
        let to = build_date_string(to_system_time.as_deref(), stop_unix);
        debug!("writing stats to syslog...");
        write_syslog_record(
            &from,
            &to,
            stop_unix.saturating_sub(self.start_unix),
            rx_bytes,
            tx_bytes,
        );

        self.start_system_time = None;
        self.start_unix = 0;
        self.file = None;

        debug!("removing stats file...");
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("couldn't remove stats file: {e}");
        }
    }

    fn write_record(
        &mut self,
        record_type: RecordType,
        to_system_time: Option<String>,
        to_unix: u64,
        rx_bytes: u64,
        tx_bytes: u64,
    ) {
        // Stats are disabled when the journal could not be opened.
        let Some(file) = self.file.as_mut() else {
            return;
        };

        let from = build_date_string(self.start_system_time.as_deref(), self.start_unix);
        let to = build_date_string(to_system_time.as_deref(), to_unix);
        let duration = to_unix.saturating_sub(self.start_unix);

        let mut line = CappedLine(heapless::String::new());
        let _ = write!(
            line,
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            record_type.tag(),
            from,
            to,
            duration,
            rx_bytes,
            tx_bytes
        );

        if let Err(e) = file.write_all(line.0.as_bytes()).and_then(|()| file.flush()) {
            warn!("error: cannot write to stats file: {e}");
        }
    }
}

fn parse_record(line: &str) -> Option<RecoveredRecord> {
    let line = line.strip_suffix('\n')?;
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != N_FIELDS {
        return None;
    }
    Some(RecoveredRecord {
        record_type: fields[0].to_string(),
        from: fields[1].to_string(),
        to: fields[2].to_string(),
        duration_secs: fields[3].parse().unwrap_or(0),
        rx_bytes: fields[4].parse().unwrap_or(0),
        tx_bytes: fields[5].parse().unwrap_or(0),
    })
}

/// Reads one line of at most [`MAX_LINE_LENGTH`] bytes from the current file
/// position.
fn read_line(file: &mut File) -> Option<String> {
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];
    while line.len() <= MAX_LINE_LENGTH {
        match file.read(&mut byte) {
            Ok(1) => {
                line.push(byte[0]);
                if byte[0] == b'\n' {
                    break;
                }
            }
            _ => break,
        }
    }
    if line.is_empty() {
        return None;
    }
    String::from_utf8(line).ok()
}

/// Rewinds, one byte at a time, until the file position sits at the start of
/// the current record.
fn seek_current_record(file: &mut File) -> Option<()> {
    let offset = file.stream_position().ok()?;
    if offset == 0 {
        return Some(());
    }

    file.seek(SeekFrom::Current(-1)).ok()?;

    let mut n_rewinds = 0;
    loop {
        if file.stream_position().ok()? == 0 {
            return Some(());
        }

        let mut byte = [0u8; 1];
        if file.read(&mut byte).ok()? != 1 {
            return None;
        }

        // The read left the position just past the EOL, on the record start.
        if byte[0] == b'\n' {
            return Some(());
        }

        if n_rewinds == MAX_LINE_LENGTH {
            warn!("stats file record line too long");
            return None;
        }
        n_rewinds += 1;

        file.seek(SeekFrom::Current(-2)).ok()?;
    }
}

fn process_last_record(file: &mut File) -> Option<RecoveredRecord> {
    file.seek(SeekFrom::End(0)).ok()?;

    loop {
        seek_current_record(file)?;
        let offset = file.stream_position().ok()?;

        if let Some(record) = read_line(file).and_then(|line| parse_record(&line)) {
            return Some(record);
        }

        // Malformed tail; go backwards one more line.
        if offset == 0 {
            return None;
        }
        file.seek(SeekFrom::Start(offset - 1)).ok()?;
    }
}

/// Salvages the last well-formed record of a leftover journal, reports it to
/// syslog and removes the file. Returns the salvaged record, if any.
pub fn recover_last_record(path: &Path) -> Option<RecoveredRecord> {
    let mut file = File::open(path).ok()?;

    let record = process_last_record(&mut file);
    drop(file);

    if let Some(record) = &record {
        debug!("previous stats file found");
        write_syslog_record(
            &record.from,
            &record.to,
            record.duration_secs,
            record.rx_bytes,
            record.tx_bytes,
        );
    }

    debug!(
        "removing previous stats file ({})",
        if record.is_some() { "processed" } else { "couldn't be processed" }
    );
    if let Err(e) = fs::remove_file(path) {
        debug!("couldn't remove previous stats file: {e}");
    }

    record
}
