use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Run log with timestamped lines plus a console status line that is
/// overwritten in place.
pub struct Logger {
    writer: BufWriter<File>,
    status: String,
}

impl Logger {
    pub fn new(file: File) -> Self {
        Self {
            writer: BufWriter::new(file),
            status: String::new(),
        }
    }

    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }

    /// Append `[YYYY-mm-dd HH:MM:SS] message` to the log file.
    pub fn log(&mut self, message: &str) -> io::Result<()> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
        writeln!(self.writer, "[{}] {}", timestamp, message)?;
        self.writer.flush()
    }

    /// Logs a pipeline step and shows it as the console status line,
    /// blanking out whatever longer status was there before.
    pub fn step(&mut self, message: &str) -> io::Result<()> {
        self.log(message)?;
        let pad = self.status.chars().count().saturating_sub(message.chars().count());
        print!("\r{}{}", message, " ".repeat(pad));
        io::stdout().flush()?;
        self.status = message.to_string();
        Ok(())
    }

    /// Moves the console past the status line, if one is showing.
    pub fn end_steps(&mut self) {
        if !self.status.is_empty() {
            println!();
            self.status.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn lines_are_timestamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut logger = Logger::create(&path).unwrap();
        logger.log("=== Depth Log ===").unwrap();
        logger.log("Samples: 3").unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let re = regex::Regex::new(r"^\[\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\] Samples: 3$").unwrap();
        assert!(re.is_match(lines[1]));
    }

    #[test]
    fn steps_are_logged_and_status_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.log");
        let mut logger = Logger::create(&path).unwrap();
        logger.step("Reading depth table").unwrap();
        logger.step("Normalizing").unwrap();
        assert_eq!(logger.status, "Normalizing");
        logger.end_steps();
        assert!(logger.status.is_empty());

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("] Reading depth table"));
        assert!(lines[1].ends_with("] Normalizing"));
    }
}
