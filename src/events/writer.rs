use std::fs::{File, OpenOptions};
use std::io::{self, Write as _};
use std::path::Path;

use serde_json::Value;

/// Appends server events to a file, one JSON object per line, exactly as
/// the API returned them.
#[derive(Debug)]
pub struct JsonFileWriter {
    file: File,
}

impl JsonFileWriter {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn write(&mut self, event: &Value) -> io::Result<()> {
        let mut line = serde_json::to_string(event).map_err(io::Error::from)?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn events_are_passed_through_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        let mut writer = JsonFileWriter::create(&path).unwrap();

        writer
            .write(&json!({"type": "c2_traffic", "severity": 4}))
            .unwrap();
        writer.write(&json!({"type": "dga_domain"})).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "c2_traffic");
        assert_eq!(first["severity"], 4);
    }

    #[test]
    fn create_appends_to_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.ndjson");
        fs::write(&path, "{\"type\":\"old\"}\n").unwrap();

        let mut writer = JsonFileWriter::create(&path).unwrap();
        writer.write(&json!({"type": "new"})).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
