//! Self-healing of the artifact cache inside a job directory.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use tally_core::{ArtifactCache, CacheState, JobBuilder, TallyConfig};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Mesh {
    nodes: Vec<(f64, f64)>,
    resolution_m: u32,
}

fn mesh() -> Mesh {
    Mesh {
        nodes: vec![(0.0, 0.0), (10.0, 0.0), (10.0, 12.5)],
        resolution_m: 30,
    }
}

#[tokio::test]
async fn truncated_artifact_is_recomputed_once() {
    let dir = TempDir::new().unwrap();
    let job = JobBuilder::from_config(&TallyConfig::for_job_dir(dir.path()))
        .build()
        .unwrap();
    let cache = job.cache().unwrap().namespace("tract_01");
    let computes = AtomicU32::new(0);

    cache.store("mesh", &mesh()).await.unwrap();
    // simulate a writer killed mid-file
    let path = cache.path_for("mesh");
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    for _ in 0..3 {
        let value = cache
            .get_or_compute("mesh", || async {
                computes.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(mesh())
            })
            .await
            .unwrap();
        assert_eq!(value, mesh());
    }

    assert_eq!(computes.load(Ordering::SeqCst), 1);
    assert!(cache.try_load::<Mesh>("mesh").await.unwrap().is_valid());
}

#[tokio::test]
async fn artifact_from_an_older_schema_is_evicted() {
    let dir = TempDir::new().unwrap();
    let cache = ArtifactCache::new(dir.path());
    cache.store("mesh", &serde_json::json!({ "nodes": [] })).await.unwrap();

    let state = cache.try_load::<Mesh>("mesh").await.unwrap();

    assert_eq!(state, CacheState::Absent);
    assert!(!cache.contains("mesh").await.unwrap());
}
