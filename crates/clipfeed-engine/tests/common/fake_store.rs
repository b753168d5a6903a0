use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clipfeed_engine::error::{EngineError, EngineResult};
use clipfeed_engine::recorder::{ClipRecorder, RecordedClip};
use clipfeed_engine::store::{ObjectInfo, ObjectStore};

/// In-memory bucket.  Uploaded objects show up in later listings.
#[derive(Default)]
pub struct FakeStore {
    pub objects: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, usize, String)>>,
    pub lists: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_upload: AtomicBool,
}

impl FakeStore {
    pub fn with_objects(names: &[&str]) -> Arc<Self> {
        let store = Self::default();
        *store.objects.lock().unwrap() = names.iter().map(|n| n.to_string()).collect();
        Arc::new(store)
    }

    pub fn url_of(name: &str) -> String {
        format!("mem://bucket/{}", name)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn list(&self) -> EngineResult<Vec<ObjectInfo>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(EngineError::Fetch("HTTP 503 Service Unavailable".into()));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .map(|name| ObjectInfo {
                name: name.clone(),
                created_at: None,
            })
            .collect())
    }

    fn public_url(&self, name: &str) -> String {
        Self::url_of(name)
    }

    async fn upload(&self, name: &str, bytes: Vec<u8>, content_type: &str) -> EngineResult<()> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(EngineError::Upload {
                name: name.to_string(),
                reason: "HTTP 413".into(),
            });
        }
        self.uploads
            .lock()
            .unwrap()
            .push((name.to_string(), bytes.len(), content_type.to_string()));
        self.objects.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

/// Recorder that "captures" a fixed blob.
#[derive(Default)]
pub struct FakeRecorder {
    recording: bool,
    pub takes: usize,
}

#[async_trait]
impl ClipRecorder for FakeRecorder {
    fn is_recording(&self) -> bool {
        self.recording
    }

    async fn start(&mut self) -> EngineResult<()> {
        if self.recording {
            return Err(EngineError::Recording("already recording".into()));
        }
        self.recording = true;
        Ok(())
    }

    async fn stop(&mut self) -> EngineResult<RecordedClip> {
        if !self.recording {
            return Err(EngineError::Recording("not recording".into()));
        }
        self.recording = false;
        self.takes += 1;
        Ok(RecordedClip {
            name: format!("snippet-{}.webm", 1_700_000_000_000u64 + self.takes as u64),
            bytes: vec![0x1a, 0x45, 0xdf, 0xa3],
            content_type: "audio/webm".into(),
        })
    }
}
