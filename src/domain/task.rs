use super::block::Block;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Queue carrying [`DownloadTask`]s.
pub const DOWNLOAD_QUEUE: &str = "downloadQueue";
/// Queue carrying [`ProcessTask`]s.
pub const PROCESS_QUEUE: &str = "processQueue";

static LAST_SESSION_KEY: AtomicU64 = AtomicU64::new(0);

/// Generation identifier of one pipeline run.
///
/// Keys are strictly increasing within a process and are seeded from the
/// wall clock, so a durable queue still holding tasks from an earlier process
/// never sees a key reused.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
#[serde(transparent)]
pub struct SessionKey(pub u64);

impl SessionKey {
    /// Carried by tasks no guard has stamped yet; never an active key.
    pub const UNSTAMPED: SessionKey = SessionKey(0);

    /// Allocates the next generation.
    pub fn next() -> Self {
        let floor = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let mut current = LAST_SESSION_KEY.load(Ordering::Relaxed);
        loop {
            let candidate = floor.max(current + 1);
            match LAST_SESSION_KEY.compare_exchange_weak(
                current,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(observed) => current = observed,
            }
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything crossing a queue boundary that belongs to a run.
pub trait Stamped {
    fn session_key(&self) -> SessionKey;
    fn task_number(&self) -> u32;
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub task_number: u32,
    pub block_number_hex: String,
    pub session_key: SessionKey,
    /// Set on the last task of a run, for engines that cannot see end-of-stream.
    pub terminate_task: bool,
}

impl DownloadTask {
    /// An unstamped task; see [`SessionKey::UNSTAMPED`].
    pub fn new(task_number: u32, block_number_hex: impl Into<String>, blocks_amount: u32) -> Self {
        Self {
            task_number,
            block_number_hex: block_number_hex.into(),
            session_key: SessionKey::UNSTAMPED,
            terminate_task: task_number >= blocks_amount,
        }
    }

    /// The task's result, keeping its number and session.
    pub fn into_process_task(self, content: Block) -> ProcessTask {
        ProcessTask {
            task_number: self.task_number,
            block_number_hex: self.block_number_hex,
            session_key: self.session_key,
            terminate_task: self.terminate_task,
            content,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProcessTask {
    pub task_number: u32,
    pub block_number_hex: String,
    pub session_key: SessionKey,
    pub terminate_task: bool,
    pub content: Block,
}

impl Stamped for DownloadTask {
    fn session_key(&self) -> SessionKey {
        self.session_key
    }

    fn task_number(&self) -> u32 {
        self.task_number
    }
}

impl Stamped for ProcessTask {
    fn session_key(&self) -> SessionKey {
        self.session_key
    }

    fn task_number(&self) -> u32 {
        self.task_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_strictly_increase() {
        let keys: Vec<SessionKey> = (0..1000).map(|_| SessionKey::next()).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
        assert!(keys[0] > SessionKey::UNSTAMPED);
    }

    #[test]
    fn test_terminate_flag_marks_last_task() {
        assert!(!DownloadTask::new(1, "0xff", 3).terminate_task);
        assert!(!DownloadTask::new(2, "0xfe", 3).terminate_task);
        assert!(DownloadTask::new(3, "0xfd", 3).terminate_task);
    }

    #[test]
    fn test_download_task_wire_format() {
        let mut task = DownloadTask::new(2, "0xfe", 2);
        task.session_key = SessionKey(42);
        let json = serde_json::to_value(&task).unwrap();

        assert_eq!(json["taskNumber"], 2);
        assert_eq!(json["blockNumberHex"], "0xfe");
        assert_eq!(json["sessionKey"], 42);
        assert_eq!(json["terminateTask"], true);
    }

    #[test]
    fn test_process_task_keeps_download_fields() {
        let mut task = DownloadTask::new(1, "0xff", 2);
        task.session_key = SessionKey(9);
        let process = task.into_process_task(Block::default());

        assert_eq!(process.task_number, 1);
        assert_eq!(process.block_number_hex, "0xff");
        assert_eq!(process.session_key, SessionKey(9));
        assert!(!process.terminate_task);
    }
}
