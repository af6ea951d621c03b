use std::io::{self, Write};

/// Descriptive progress displayer
pub struct DescriptiveProgress {
    total: usize,
    current: usize,
    description: String,
}

impl DescriptiveProgress {
    /// Create a new descriptive progress displayer
    pub fn new(total: usize, description: &str) -> Self {
        Self {
            total,
            current: 0,
            description: description.to_string(),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Advance by one completed item and redraw the line
    pub fn increment(&mut self) -> io::Result<()> {
        self.update(self.current + 1)
    }

    /// Update progress
    pub fn update(&mut self, current: usize) -> io::Result<()> {
        self.current = current.min(self.total);
        print!("\r{} {}/{}", self.description, self.current, self.total);
        io::stdout().flush()?;
        Ok(())
    }

    /// Finish progress display
    pub fn finish(&mut self) -> io::Result<()> {
        println!();
        Ok(())
    }
}

/// Format time as "xx h xx m xx.xxx s" format
pub fn format_time_used(elapsed: std::time::Duration) -> String {
    let total_secs = elapsed.as_secs_f64();
    let hours = (total_secs / 3600.0) as u64;
    let minutes = ((total_secs % 3600.0) / 60.0) as u64;
    let seconds = total_secs % 60.0;

    if hours > 0 {
        format!("[Time used] {:02} h {:02} m {:05.3} s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("[Time used] {:02} m {:05.3} s", minutes, seconds)
    } else {
        format!("[Time used] {:05.3} s", seconds)
    }
}
