// Port for persisting the active session identity across restarts
use crate::domain::session::SessionRecord;
use std::sync::Mutex;

pub trait SessionStore: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<SessionRecord>>;

    fn save(&self, record: &SessionRecord) -> anyhow::Result<()>;

    /// Removes the session id and start time together
    fn clear(&self) -> anyhow::Result<()>;
}

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(Some(record)),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> anyhow::Result<Option<SessionRecord>> {
        let guard = self
            .record
            .lock()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let mut guard = self
            .record
            .lock()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        *guard = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let mut guard = self
            .record
            .lock()
            .map_err(|_| anyhow::anyhow!("session store lock poisoned"))?;
        *guard = None;
        Ok(())
    }
}
