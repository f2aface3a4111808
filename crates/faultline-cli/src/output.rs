/// Prints command results either for humans or as JSON documents.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn is_json(&self) -> bool {
        self.json
    }

    pub fn success(&self, message: &str) {
        if !self.json {
            println!("\u{2713} {message}");
        }
    }

    pub fn error(&self, message: &str) {
        if !self.json {
            eprintln!("\u{2717} Error: {message}");
        }
    }

    pub fn info(&self, message: &str) {
        if !self.json {
            println!("  {message}");
        }
    }

    pub fn print_json(&self, value: &serde_json::Value) {
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(value).unwrap_or_default()
            );
        }
    }
}
