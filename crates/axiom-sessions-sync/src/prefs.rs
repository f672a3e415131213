//! Persisted sync preferences

use axiom_storage::Database;

use crate::Result;

const SESSIONS_PREF_PREFIX: &str = "sessions.";
const SESSIONS_GUID_PREF: &str = "sessions.sync_guid";

pub trait SyncPrefs: Send + Sync {
    /// Machine tag chosen by an earlier run
    fn sessions_guid(&self) -> Result<Option<String>>;

    fn set_sessions_guid(&self, guid: &str) -> Result<()>;

    /// Forget everything, e.g. when the user turns sync off
    fn clear(&self) -> Result<()>;
}

impl SyncPrefs for Database {
    fn sessions_guid(&self) -> Result<Option<String>> {
        Ok(self
            .get_pref(SESSIONS_GUID_PREF)?
            .filter(|guid| !guid.is_empty()))
    }

    fn set_sessions_guid(&self, guid: &str) -> Result<()> {
        self.set_pref(SESSIONS_GUID_PREF, guid)?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.clear_prefs(SESSIONS_PREF_PREFIX)?;
        Ok(())
    }
}
