use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use env_logger::{Env, Target};
use log::Level;

const SEPARATOR_WIDTH: usize = 80;

/// Route `log` records to stderr and append them, timestamped, to `log_path`.
///
/// The log file is best effort: if it cannot be opened or written the run
/// continues with console output only.
pub fn init(log_path: &Path, verbose: bool) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .ok();
    if let Some(f) = file.as_mut() {
        let _ = writeln!(f, "{}", "=".repeat(SEPARATOR_WIDTH));
    }

    let default_filter = if verbose {
        "warn,triquetra=debug"
    } else {
        "warn,triquetra=info"
    };
    let result = env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format(|buf, record| {
            let ts = timestamp();
            match record.level() {
                Level::Error | Level::Warn => {
                    writeln!(buf, "{ts}\t{}: {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{ts}\t{}", record.args()),
            }
        })
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init();
    if let Err(err) = result {
        eprintln!("logging already initialised: {err}");
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%SZ").to_string()
}

/// Full lines go to the log file; the console copy drops the timestamp column.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(file) = self.file.as_mut()
            && file.write_all(buf).is_err()
        {
            self.file = None;
        }
        let console = console_part(buf);
        let _ = io::stderr().write_all(console);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            let _ = file.flush();
        }
        let _ = io::stderr().flush();
        Ok(())
    }
}

fn console_part(line: &[u8]) -> &[u8] {
    match line.iter().position(|b| *b == b'\t') {
        Some(pos) => &line[pos + 1..],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_copy_drops_timestamp() {
        assert_eq!(
            console_part(b"2025-01-01 10:00:00Z\tLocal build: 26100.1500\n"),
            b"Local build: 26100.1500\n"
        );
        assert_eq!(console_part(b"plain\n"), b"plain\n");
    }

    #[test]
    fn tee_survives_missing_file() {
        let mut tee = TeeWriter { file: None };
        assert_eq!(tee.write(b"ts\tmessage\n").unwrap(), 11);
        assert!(tee.flush().is_ok());
    }

    #[test]
    fn tee_appends_full_lines_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .unwrap();
        let mut tee = TeeWriter { file: Some(file) };
        tee.write_all(b"2025-01-01 10:00:00Z\tSelected remote build: 26100.2000\n")
            .unwrap();
        tee.flush().unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "2025-01-01 10:00:00Z\tSelected remote build: 26100.2000\n");
    }
}
