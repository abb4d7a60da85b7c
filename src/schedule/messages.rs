//! Admin message file
//!
//! Operators control the queue-server by dropping a single JSON message
//! into `schedules/queue_server_messages.txt`. The scheduler loop reads
//! and deletes it (consume-and-delete), applying the command on its next
//! iteration. One file, one writer, one pending command at a time.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Name of the admin message file under `schedules/`
pub const MESSAGE_FILE: &str = "queue_server_messages.txt";

/// Command verb in an admin message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminStatus {
    NewCrawl,
    StopCrawl,
    ResumeCrawl,
}

/// One operator command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminMessage {
    pub status: AdminStatus,
    /// Crawl timestamp for NEW_CRAWL / RESUME_CRAWL; ignored for stop
    #[serde(default)]
    pub crawl_time: u64,
}

/// Reads and deletes the pending admin message, if any
///
/// An unparseable message file is deleted too, with a warning; a stuck
/// bad message must not wedge the control channel.
pub fn consume_admin_message(schedules_dir: &Path) -> std::io::Result<Option<AdminMessage>> {
    let path = schedules_dir.join(MESSAGE_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)?;
    fs::remove_file(&path)?;

    match serde_json::from_str(&content) {
        Ok(message) => Ok(Some(message)),
        Err(e) => {
            tracing::warn!(error = %e, "Discarding unparseable admin message");
            Ok(None)
        }
    }
}

/// Writes an admin message for the scheduler loop to pick up
pub fn write_admin_message(schedules_dir: &Path, message: &AdminMessage) -> std::io::Result<()> {
    fs::create_dir_all(schedules_dir)?;
    let content = serde_json::to_string(message)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(schedules_dir.join(MESSAGE_FILE), content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_message_consumed_and_deleted() {
        let dir = TempDir::new().unwrap();
        write_admin_message(
            dir.path(),
            &AdminMessage {
                status: AdminStatus::NewCrawl,
                crawl_time: 1724572800,
            },
        )
        .unwrap();

        let message = consume_admin_message(dir.path()).unwrap().unwrap();
        assert_eq!(message.status, AdminStatus::NewCrawl);
        assert_eq!(message.crawl_time, 1724572800);

        assert!(consume_admin_message(dir.path()).unwrap().is_none());
        assert!(!dir.path().join(MESSAGE_FILE).exists());
    }

    #[test]
    fn test_bad_message_discarded() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(MESSAGE_FILE), "{not json").unwrap();

        assert!(consume_admin_message(dir.path()).unwrap().is_none());
        assert!(!dir.path().join(MESSAGE_FILE).exists());
    }

    #[test]
    fn test_wire_status_names() {
        let json = serde_json::to_string(&AdminStatus::StopCrawl).unwrap();
        assert_eq!(json, "\"STOP_CRAWL\"");
    }
}
