//! Registration, recognition and search on top of the store, registry and engine.

use crate::engine::{EngineError, EngineHandle};
use crate::store::{InsertOutcome, Store, StoreError, StoredFace};
use facereg_core::{Extraction, MatchOutcome, MatchStrategy, Registry};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RegisterOutcome {
    Created,
    DuplicateName,
    NoFaceFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    Matched { name: String, distance: f32 },
    Unknown,
    NoFaceFound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceSearch {
    Found { person: String, faces: Vec<StoredFace> },
    Unknown,
    NoFaceFound,
}

/// Snapshot of service state for the status endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Status {
    pub version: &'static str,
    pub registered: usize,
    pub strategy: String,
    pub threshold: f32,
}

pub struct FaceService {
    store: Store,
    engine: EngineHandle,
    registry: RwLock<Registry>,
    strategy: MatchStrategy,
    threshold: f32,
}

impl FaceService {
    /// Service with an empty registry; call [`load_registry`](Self::load_registry)
    /// to populate it from the store.
    pub fn new(store: Store, engine: EngineHandle, strategy: MatchStrategy, threshold: f32) -> Self {
        Self {
            store,
            engine,
            registry: RwLock::new(Registry::new()),
            strategy,
            threshold,
        }
    }

    /// Append every stored user to the registry. Returns the number loaded.
    pub async fn load_registry(&self) -> Result<usize, ServiceError> {
        let users = self.store.load_users().await?;
        let count = users.len();
        self.registry.write().await.load(users);
        tracing::info!(count, "registry loaded from store");
        Ok(count)
    }

    pub async fn register(&self, user_name: &str, image: Vec<u8>) -> Result<RegisterOutcome, ServiceError> {
        if self.store.user_exists(user_name).await? {
            tracing::info!(user_name, "register: user already exists");
            return Ok(RegisterOutcome::DuplicateName);
        }

        let encoding = match self.engine.extract(image.clone()).await? {
            Extraction::Face(encoding) => encoding,
            Extraction::NoFaceFound => {
                tracing::info!(user_name, "register: no face detected");
                return Ok(RegisterOutcome::NoFaceFound);
            }
        };

        // The name may have been taken while the engine was busy.
        match self.store.insert_user(user_name, &encoding, image).await? {
            InsertOutcome::DuplicateName => {
                tracing::info!(user_name, "register: user already exists");
                Ok(RegisterOutcome::DuplicateName)
            }
            InsertOutcome::Created => {
                self.registry.write().await.enroll(user_name, encoding);
                tracing::info!(user_name, "register: user enrolled");
                Ok(RegisterOutcome::Created)
            }
        }
    }

    pub async fn recognize(&self, image: Vec<u8>) -> Result<Recognition, ServiceError> {
        let encoding = match self.engine.extract(image).await? {
            Extraction::Face(encoding) => encoding,
            Extraction::NoFaceFound => return Ok(Recognition::NoFaceFound),
        };

        let outcome = self
            .registry
            .read()
            .await
            .find(&encoding, &self.strategy, self.threshold);

        Ok(match outcome {
            MatchOutcome::Matched { name, distance } => {
                tracing::info!(user_name = %name, distance, "recognize: matched");
                Recognition::Matched { name, distance }
            }
            MatchOutcome::Unknown => {
                tracing::info!("recognize: unknown face");
                Recognition::Unknown
            }
        })
    }

    /// Recognize the face, then return the images stored for that person.
    pub async fn face_search(&self, image: Vec<u8>) -> Result<FaceSearch, ServiceError> {
        match self.recognize(image).await? {
            Recognition::Matched { name, .. } => {
                let faces = self.store.faces_for(&name).await?;
                Ok(FaceSearch::Found { person: name, faces })
            }
            Recognition::Unknown => Ok(FaceSearch::Unknown),
            Recognition::NoFaceFound => Ok(FaceSearch::NoFaceFound),
        }
    }

    pub async fn person_search(&self, person: &str) -> Result<Vec<StoredFace>, ServiceError> {
        Ok(self.store.faces_for(person).await?)
    }

    pub async fn add_face(&self, person: &str, document_id: &str, image: Vec<u8>) -> Result<String, ServiceError> {
        let id = self.store.add_face(person, document_id, image).await?;
        tracing::info!(person, document_id, id = %id, "face image stored");
        Ok(id)
    }

    pub async fn status(&self) -> Status {
        Status {
            version: env!("CARGO_PKG_VERSION"),
            registered: self.registry.read().await.len(),
            strategy: self.strategy.to_string(),
            threshold: self.threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::spawn_engine;
    use crate::engine::tests::{png, ColourModel};
    use facereg_core::{Encoding, ExtractSettings, DEFAULT_MATCH_THRESHOLD};

    async fn service_with(store: Store, strategy: MatchStrategy) -> FaceService {
        let engine = spawn_engine(ColourModel, ExtractSettings::default()).unwrap();
        FaceService::new(store, engine, strategy, DEFAULT_MATCH_THRESHOLD)
    }

    async fn service() -> FaceService {
        service_with(Store::open_in_memory().await.unwrap(), MatchStrategy::First).await
    }

    #[tokio::test]
    async fn test_register_then_recognize() {
        let svc = service().await;
        let outcome = svc.register("alice", png([200, 10, 10])).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::Created);

        match svc.recognize(png([200, 10, 10])).await.unwrap() {
            Recognition::Matched { name, distance } => {
                assert_eq!(name, "alice");
                assert_eq!(distance, 0.0);
            }
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_duplicate_name() {
        let svc = service().await;
        svc.register("bob", png([10, 200, 10])).await.unwrap();
        let outcome = svc.register("bob", png([10, 10, 200])).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::DuplicateName);
        assert_eq!(svc.status().await.registered, 1);
    }

    #[tokio::test]
    async fn test_register_without_face() {
        let svc = service().await;
        let outcome = svc.register("nobody", png([0, 0, 0])).await.unwrap();
        assert_eq!(outcome, RegisterOutcome::NoFaceFound);
        assert_eq!(svc.status().await.registered, 0);
        assert_eq!(svc.store.count_users().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recognize_unknown_and_no_face() {
        let svc = service().await;
        assert_eq!(svc.recognize(png([255, 255, 255])).await.unwrap(), Recognition::Unknown);

        svc.register("carol", png([255, 0, 0])).await.unwrap();
        // Distance from (1, 0, 0) to (0, 0, 1) is √2.
        assert_eq!(svc.recognize(png([0, 0, 255])).await.unwrap(), Recognition::Unknown);
        assert_eq!(svc.recognize(png([0, 0, 0])).await.unwrap(), Recognition::NoFaceFound);
    }

    #[tokio::test]
    async fn test_strategy_changes_winner() {
        // Probe ≈ (0.5, 0, 0): 0.5 from "first" at (1, 0, 0), 0.1 from "second" at (0.6, 0, 0).
        for (strategy, expected) in [(MatchStrategy::First, "first"), (MatchStrategy::Nearest, "second")] {
            let svc = service_with(Store::open_in_memory().await.unwrap(), strategy).await;
            svc.register("first", png([255, 0, 0])).await.unwrap();
            svc.register("second", png([153, 0, 0])).await.unwrap();

            match svc.recognize(png([128, 0, 0])).await.unwrap() {
                Recognition::Matched { name, .. } => assert_eq!(name, expected, "strategy {strategy}"),
                other => panic!("expected a match, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_reload_from_store_keeps_order() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_user("a", &Encoding::new(vec![0.5, 0.0, 0.0]), vec![]).await.unwrap();
        store.insert_user("b", &Encoding::new(vec![0.6, 0.0, 0.0]), vec![]).await.unwrap();

        let svc = service_with(store, MatchStrategy::First).await;
        assert_eq!(svc.load_registry().await.unwrap(), 2);
        assert_eq!(svc.status().await.registered, 2);

        // Probe (0.6, 0, 0) is within range of both; "a" was stored first.
        match svc.recognize(png([153, 0, 0])).await.unwrap() {
            Recognition::Matched { name, .. } => assert_eq!(name, "a"),
            other => panic!("expected a match, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_face_search_and_person_search() {
        let svc = service().await;
        svc.register("dave", png([0, 255, 0])).await.unwrap();
        svc.add_face("dave", "doc-9", vec![9, 9]).await.unwrap();

        match svc.face_search(png([0, 255, 0])).await.unwrap() {
            FaceSearch::Found { person, faces } => {
                assert_eq!(person, "dave");
                assert_eq!(faces.len(), 1);
                assert_eq!(faces[0].document_id, "doc-9");
            }
            other => panic!("expected results, got {other:?}"),
        }
        assert_eq!(svc.face_search(png([0, 0, 255])).await.unwrap(), FaceSearch::Unknown);
        assert_eq!(svc.face_search(png([0, 0, 0])).await.unwrap(), FaceSearch::NoFaceFound);

        assert_eq!(svc.person_search("dave").await.unwrap().len(), 1);
        assert!(svc.person_search("erin").await.unwrap().is_empty());
    }
}
