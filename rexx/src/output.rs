use parking_lot::Mutex;

/// Where SAY and trace output go.
pub trait Output: Send + Sync {
    fn say(&self, text: &str);
    fn trace(&self, text: &str);
}

/// SAY to stdout, trace to stderr.
#[derive(Debug, Default)]
pub struct StdOutput;

impl Output for StdOutput {
    fn say(&self, text: &str) {
        println!("{text}");
    }

    fn trace(&self, text: &str) {
        eprintln!("{text}");
    }
}

/// Collects output in memory.
#[derive(Debug, Default)]
pub struct BufferedOutput {
    said: Mutex<Vec<String>>,
    traced: Mutex<Vec<String>>,
}

impl BufferedOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// SAY lines so far.
    pub fn lines(&self) -> Vec<String> {
        self.said.lock().clone()
    }

    pub fn trace_lines(&self) -> Vec<String> {
        self.traced.lock().clone()
    }
}

impl Output for BufferedOutput {
    fn say(&self, text: &str) {
        self.said.lock().push(text.to_string());
    }

    fn trace(&self, text: &str) {
        self.traced.lock().push(text.to_string());
    }
}
