//! Full-rebuild training over the gallery.

use crate::error::{AttendanceError, Result};
use crate::gallery::Gallery;
use crate::labels::IdentityLabelMap;
use crate::lbph::{LbphModel, LbphParams};
use crate::model_store::ModelStore;
use crate::models::TrainedModel;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub identities: usize,
    pub samples: usize,
    pub trained_at: DateTime<Utc>,
}

impl TrainingReport {
    pub fn message(&self) -> String {
        format!(
            "model trained on {} sample(s) from {} student(s)",
            self.samples, self.identities
        )
    }
}

impl TrainedModel {
    pub fn report(&self) -> TrainingReport {
        TrainingReport {
            identities: self.label_map.len(),
            samples: self.artifact.sample_count(),
            trained_at: self.trained_at,
        }
    }
}

pub struct Trainer<'a> {
    gallery: &'a Gallery,
    store: &'a ModelStore,
    params: LbphParams,
}

impl<'a> Trainer<'a> {
    pub fn new(gallery: &'a Gallery, store: &'a ModelStore, params: LbphParams) -> Self {
        Self {
            gallery,
            store,
            params,
        }
    }

    /// Scans the gallery once, fits a fresh classifier and replaces the stored
    /// model. On an empty gallery nothing is written.
    pub async fn train(&self) -> Result<TrainedModel> {
        let mut label_map = IdentityLabelMap::new();
        let mut artifact = LbphModel::new(self.params)?;

        let mut samples = self.gallery.all_samples();
        while let Some(sample) = samples.next().await {
            let sample = sample?;
            let label = label_map.label_for_or_insert(&sample.identity());
            artifact.add(&sample.pixels, label);
        }
        drop(samples);

        if artifact.sample_count() == 0 {
            return Err(AttendanceError::NoTrainingData);
        }

        let model = TrainedModel {
            artifact,
            label_map,
            trained_at: Utc::now(),
        };
        self.store.save(&model)?;
        info!("{}", model.report().message());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lbph::tests::{checker_face, gradient_face, params};
    use crate::models::IdentityKey;

    async fn setup(name: &str) -> (Gallery, ModelStore, tempfile::TempDir) {
        let url = format!("sqlite://file:{name}?mode=memory&cache=shared");
        let pool = storage::connect(&url).await.unwrap();
        storage::migrate(&pool).await.unwrap();
        let temp = tempfile::tempdir().unwrap();
        let store = ModelStore::new(temp.path().join("model.bin"));
        (Gallery::new(pool), store, temp)
    }

    #[tokio::test]
    async fn empty_gallery_fails_and_keeps_previous_model() {
        let (gallery, store, _temp) = setup("trainer_empty").await;
        let trainer = Trainer::new(&gallery, &store, params());

        assert!(matches!(trainer.train().await, Err(AttendanceError::NoTrainingData)));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn label_map_is_dense_bijection_in_first_seen_order() {
        let (gallery, store, _temp) = setup("trainer_bijection").await;
        gallery.add_samples("ClassA", "7", &[gradient_face(0), gradient_face(5)]).await.unwrap();
        gallery.add_samples("ClassA", "9", &[checker_face()]).await.unwrap();
        gallery.add_samples("ClassA", "7", &[gradient_face(9)]).await.unwrap();

        let model = Trainer::new(&gallery, &store, params()).train().await.unwrap();
        assert_eq!(model.label_map.len(), 2);
        assert_eq!(model.label_map.label_of(&IdentityKey::new("ClassA", "7")), Some(0));
        assert_eq!(model.label_map.label_of(&IdentityKey::new("ClassA", "9")), Some(1));
        for (label, key) in model.label_map.iter() {
            let parsed = IdentityKey::parse(key).unwrap();
            assert_eq!(model.label_map.label_of(&parsed), Some(label));
        }
        assert_eq!(model.report().samples, 4);

        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.label_map, model.label_map);
    }

    #[tokio::test]
    async fn retraining_unchanged_gallery_reproduces_labels() {
        let (gallery, store, _temp) = setup("trainer_repeat").await;
        gallery.add_samples("ClassB", "3", &[checker_face()]).await.unwrap();
        gallery.add_samples("ClassA", "1", &[gradient_face(0)]).await.unwrap();

        let trainer = Trainer::new(&gallery, &store, params());
        let first = trainer.train().await.unwrap();
        let second = trainer.train().await.unwrap();
        assert_eq!(first.label_map, second.label_map);
        assert!(second.trained_at >= first.trained_at);
    }

    #[tokio::test]
    async fn trained_model_recognizes_enrolled_face() {
        let (gallery, store, _temp) = setup("trainer_recognize").await;
        gallery.add_samples("ClassA", "7", &[gradient_face(0)]).await.unwrap();
        gallery.add_samples("ClassA", "9", &[checker_face()]).await.unwrap();

        let model = Trainer::new(&gallery, &store, params()).train().await.unwrap();
        let (label, distance) = model.artifact.predict(&checker_face()).unwrap();
        assert_eq!(model.label_map.key_of(label), Some("ClassA-9"));
        assert!(distance < 1e-9);
    }
}
