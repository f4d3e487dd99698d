use adcrelay_protocol::DispatchKey;
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Files already handed to the uploader.
///
/// Written only by the detector on the event loop; clones are cheap and
/// may be read from any thread.
#[derive(Debug, Clone, Default)]
pub struct DispatchLedger {
    keys: Arc<RwLock<HashSet<DispatchKey>>>,
}

impl DispatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a key. Returns false if it was already present.
    pub fn insert(&self, key: DispatchKey) -> bool {
        self.keys
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key)
    }

    pub fn contains(&self, key: &DispatchKey) -> bool {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted copy of the current keys, for diagnostics.
    pub fn snapshot(&self) -> Vec<DispatchKey> {
        let mut keys: Vec<DispatchKey> = self
            .keys
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adcrelay_protocol::CaptureFile;

    #[test]
    fn insert_is_idempotent() {
        let ledger = DispatchLedger::new();
        let key = DispatchKey::for_capture(&CaptureFile::new("/data/run1", 0));
        assert!(ledger.insert(key.clone()));
        assert!(!ledger.insert(key.clone()));
        assert!(ledger.contains(&key));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn clones_share_state() {
        let ledger = DispatchLedger::new();
        let reader = ledger.clone();
        let handle = std::thread::spawn(move || {
            ledger.insert(DispatchKey::for_capture(&CaptureFile::new("/data/run1", 2)));
            ledger.insert(DispatchKey::for_capture(&CaptureFile::new("/data/run1", 1)));
        });
        handle.join().unwrap();
        let snapshot = reader.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].path().ends_with("adc_data_Raw_1.bin"));
    }
}
