use crate::domain::task::{DownloadTask, SessionKey, Stamped};

/// Admits only tasks stamped with the active run's key.
///
/// Engines can hold on to or redeliver tasks from an earlier run, so every
/// consumption edge asks the guard before touching run state.
#[derive(Debug, Clone, Copy)]
pub struct SessionGuard {
    active: SessionKey,
}

impl SessionGuard {
    pub fn new(active: SessionKey) -> Self {
        Self { active }
    }

    /// Opens a guard on a freshly allocated generation.
    pub fn begin() -> Self {
        Self::new(SessionKey::next())
    }

    pub fn active(&self) -> SessionKey {
        self.active
    }

    /// Stamps a task with this run's key.
    pub fn tag(&self, mut task: DownloadTask) -> DownloadTask {
        task.session_key = self.active;
        task
    }

    /// True if `item` was stamped by this run.
    pub fn accept<T: Stamped>(&self, item: &T) -> bool {
        item.session_key() == self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::block::Block;

    #[test]
    fn test_tag_then_accept() {
        let guard = SessionGuard::begin();
        let task = guard.tag(DownloadTask::new(1, "0xff", 1));

        assert_eq!(task.session_key, guard.active());
        assert!(guard.accept(&task));
    }

    #[test]
    fn test_unstamped_tasks_are_rejected() {
        let guard = SessionGuard::begin();
        assert!(!guard.accept(&DownloadTask::new(1, "0xff", 1)));
    }

    #[test]
    fn test_rejects_other_generations() {
        let previous = SessionGuard::begin();
        let current = SessionGuard::begin();
        let stale = previous.tag(DownloadTask::new(1, "0xff", 1));

        assert!(!current.accept(&stale));
        assert!(!current.accept(&stale.clone().into_process_task(Block::default())));
        assert!(previous.accept(&stale));
    }
}
