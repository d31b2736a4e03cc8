//! Integration tests for the ingestion pipeline
//!
//! These tests run the indexer against a migrated in-memory database and
//! check what ends up in storage:
//! - Entities and counts produced by a mixed album/no-album batch
//! - Count additivity across batches
//! - Re-ingestion of an identical batch
//! - Overlapping ingestions running at once on a file-backed store
//! - The background path through the task server

use async_trait::async_trait;
use core_indexing::{
    open_store, IndexUserHandler, Indexer, IndexingError, RawPlay, ScrobbleSource, TaskServer,
    TestTaskHandler,
};
use core_library::db::create_test_pool;
use core_library::repositories::{
    CountRepository, EntityRepository, PlayRepository, SqliteAlbumRepository,
    SqliteArtistRepository, SqliteCountRepository, SqlitePlayRepository, SqliteTrackRepository,
    SqliteUserRepository, UserRepository,
};
use core_library::{AlbumKey, TrackKey};
use core_runtime::config::{IndexerConfig, WorkerConfig};
use core_runtime::events::{CoreEvent, EventBus, EventStream, JobEvent};
use mockall::mock;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

// ============================================================================
// Mock Implementations
// ============================================================================

mock! {
    Source {}

    #[async_trait]
    impl ScrobbleSource for Source {
        async fn fetch_plays(&self, username: &str, token: &str) -> core_indexing::Result<Vec<RawPlay>>;
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn scenario_batch() -> Vec<RawPlay> {
    vec![
        RawPlay::new("X", Some(""), "T1", 1000),
        RawPlay::new("X", Some("A1"), "T2", 1001),
        RawPlay::new("X", Some("A1"), "T2", 1002),
    ]
}

struct Storage {
    pool: SqlitePool,
}

impl Storage {
    async fn user_id(&self, username: &str) -> i64 {
        SqliteUserRepository::new(self.pool.clone())
            .find_by_username(username)
            .await
            .unwrap()
            .expect("user exists")
            .id
    }

    async fn artist_id(&self, name: &str) -> i64 {
        let found = SqliteArtistRepository::new(self.pool.clone())
            .find_by_keys(&[name.to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        found[0].id
    }

    async fn album_id(&self, artist: &str, album: &str) -> i64 {
        let found = SqliteAlbumRepository::new(self.pool.clone())
            .find_by_keys(&[AlbumKey::new(artist, album)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        found[0].id
    }

    async fn track_id(&self, artist: &str, album: Option<&str>, track: &str) -> i64 {
        let found = SqliteTrackRepository::new(self.pool.clone())
            .find_by_keys(&[TrackKey::new(artist, album, track)])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        found[0].id
    }

    async fn artist_count(&self, user_id: i64, artist_id: i64) -> i64 {
        let counts = SqliteCountRepository::new(self.pool.clone())
            .find_artist_counts(user_id, &[artist_id])
            .await
            .unwrap();
        counts.first().map(|c| c.playcount).unwrap_or(0)
    }

    async fn album_count(&self, user_id: i64, album_id: i64) -> i64 {
        let counts = SqliteCountRepository::new(self.pool.clone())
            .find_album_counts(user_id, &[album_id])
            .await
            .unwrap();
        counts.first().map(|c| c.playcount).unwrap_or(0)
    }

    async fn track_count(&self, user_id: i64, track_id: i64) -> i64 {
        let counts = SqliteCountRepository::new(self.pool.clone())
            .find_track_counts(user_id, &[track_id])
            .await
            .unwrap();
        counts.first().map(|c| c.playcount).unwrap_or(0)
    }

    async fn entity_totals(&self) -> (i64, i64, i64) {
        (
            SqliteArtistRepository::new(self.pool.clone()).count().await.unwrap(),
            SqliteAlbumRepository::new(self.pool.clone()).count().await.unwrap(),
            SqliteTrackRepository::new(self.pool.clone()).count().await.unwrap(),
        )
    }

    async fn play_total(&self, user_id: i64) -> i64 {
        SqlitePlayRepository::new(self.pool.clone())
            .count_for_user(user_id)
            .await
            .unwrap()
    }
}

async fn setup() -> (Indexer, Storage) {
    let pool = create_test_pool().await.unwrap();
    (Indexer::sqlite(pool.clone(), 2), Storage { pool })
}

// ============================================================================
// Pipeline
// ============================================================================

#[tokio::test]
async fn test_mixed_album_batch_on_empty_storage() {
    let (indexer, storage) = setup().await;

    let summary = indexer.ingest_plays("U", &scenario_batch()).await.unwrap();

    assert_eq!(summary.artists_created, 1);
    assert_eq!(summary.albums_created, 1);
    assert_eq!(summary.tracks_created, 2);
    assert_eq!(summary.plays, 3);
    assert_eq!(storage.entity_totals().await, (1, 1, 2));

    let user = storage.user_id("U").await;
    let artist = storage.artist_id("X").await;
    let album = storage.album_id("X", "A1").await;
    let t1 = storage.track_id("X", None, "T1").await;
    let t2 = storage.track_id("X", Some("A1"), "T2").await;

    assert_eq!(storage.play_total(user).await, 3);
    assert_eq!(storage.artist_count(user, artist).await, 3);
    assert_eq!(storage.album_count(user, album).await, 2);
    assert_eq!(storage.track_count(user, t2).await, 2);
    assert_eq!(storage.track_count(user, t1).await, 1);
}

#[tokio::test]
async fn test_same_track_name_with_and_without_album() {
    let (indexer, storage) = setup().await;
    let plays = vec![
        RawPlay::new("X", None, "Intro", 1),
        RawPlay::new("X", Some("A1"), "Intro", 2),
    ];

    indexer.ingest_plays("U", &plays).await.unwrap();

    let loose = storage.track_id("X", None, "Intro").await;
    let on_album = storage.track_id("X", Some("A1"), "Intro").await;
    assert_ne!(loose, on_album);
}

#[tokio::test]
async fn test_counts_are_additive_across_batches() {
    let (indexer, storage) = setup().await;
    let first: Vec<RawPlay> = (0..4).map(|i| RawPlay::new("A", None, "Song", i)).collect();
    let second: Vec<RawPlay> = (0..7)
        .map(|i| RawPlay::new("A", Some("LP"), format!("Song {}", i), 100 + i))
        .collect();

    indexer.ingest_plays("U", &first).await.unwrap();
    let user = storage.user_id("U").await;
    let artist = storage.artist_id("A").await;
    assert_eq!(storage.artist_count(user, artist).await, 4);

    indexer.ingest_plays("U", &second).await.unwrap();
    assert_eq!(storage.artist_count(user, artist).await, 11);
}

#[tokio::test]
async fn test_counts_are_per_user() {
    let (indexer, storage) = setup().await;

    indexer.ingest_plays("U", &scenario_batch()).await.unwrap();
    indexer.ingest_plays("V", &scenario_batch()[..1]).await.unwrap();

    let artist = storage.artist_id("X").await;
    assert_eq!(storage.artist_count(storage.user_id("U").await, artist).await, 3);
    assert_eq!(storage.artist_count(storage.user_id("V").await, artist).await, 1);
    assert_eq!(storage.entity_totals().await, (1, 1, 2));
}

#[tokio::test]
async fn test_reingest_creates_no_entities_but_doubles_counts() {
    let (indexer, storage) = setup().await;

    indexer.ingest_plays("U", &scenario_batch()).await.unwrap();
    let again = indexer.ingest_plays("U", &scenario_batch()).await.unwrap();

    assert_eq!(again.artists_created, 0);
    assert_eq!(again.albums_created, 0);
    assert_eq!(again.tracks_created, 0);
    assert_eq!(storage.entity_totals().await, (1, 1, 2));

    let user = storage.user_id("U").await;
    let artist = storage.artist_id("X").await;
    let t2 = storage.track_id("X", Some("A1"), "T2").await;
    assert_eq!(storage.artist_count(user, artist).await, 6);
    assert_eq!(storage.track_count(user, t2).await, 4);
    assert_eq!(storage.play_total(user).await, 6);
}

#[tokio::test]
async fn test_large_batch_spans_many_chunks() {
    let (indexer, storage) = setup().await;
    let plays: Vec<RawPlay> = (0..50)
        .map(|i| {
            let album = format!("Album {}", i % 3);
            RawPlay::new(
                format!("Artist {}", i % 7),
                Some(album.as_str()),
                format!("Track {}", i),
                i,
            )
        })
        .collect();

    let summary = indexer.ingest_plays("U", &plays).await.unwrap();

    assert_eq!(summary.artists_created, 7);
    assert_eq!(summary.tracks_created, 50);
    assert_eq!(storage.play_total(summary.user_id).await, 50);
}

#[tokio::test]
async fn test_index_user_through_source() {
    let (indexer, storage) = setup().await;
    let mut source = MockSource::new();
    source
        .expect_fetch_plays()
        .withf(|username, token| username.to_string() == "U" && token.to_string() == "t0k3n")
        .times(1)
        .returning(|_, _| Ok(scenario_batch()));

    let indexer = indexer.with_source(Arc::new(source));
    indexer.index_user("U", "t0k3n").await.unwrap();

    let user = storage.user_id("U").await;
    assert_eq!(storage.play_total(user).await, 3);
    assert!(SqliteUserRepository::new(storage.pool.clone())
        .find_by_username("U")
        .await
        .unwrap()
        .and_then(|u| u.last_indexed_at)
        .is_some());
}

#[tokio::test]
async fn test_source_failure_writes_nothing() {
    let (indexer, storage) = setup().await;
    let mut source = MockSource::new();
    source
        .expect_fetch_plays()
        .returning(|_, _| Err(IndexingError::SourceUnavailable("timeout".to_string())));

    let indexer = indexer.with_source(Arc::new(source));
    let result = indexer.index_user("U", "t0k3n").await;

    assert!(matches!(result, Err(IndexingError::SourceUnavailable(_))));
    assert_eq!(storage.entity_totals().await, (0, 0, 0));
}

// ============================================================================
// Concurrency
// ============================================================================

/// Database file removed again when the test ends
struct TempStore {
    path: PathBuf,
}

impl TempStore {
    fn new() -> Self {
        Self {
            path: std::env::temp_dir().join(format!("ingest-{}.db", uuid::Uuid::new_v4())),
        }
    }
}

impl Drop for TempStore {
    fn drop(&mut self) {
        for suffix in ["", "-wal", "-shm"] {
            std::fs::remove_file(format!("{}{}", self.path.display(), suffix)).ok();
        }
    }
}

/// Every user plays the shared track plus three artists overlapping the
/// next two users' artists.
fn overlapping_batch(user: i64) -> Vec<RawPlay> {
    let mut plays = vec![RawPlay::new("Shared", Some("Together"), "Anthem", 1_700_000_000)];
    for offset in 0..3 {
        plays.push(RawPlay::new(
            format!("Artist {}", user + offset),
            None,
            "Intro",
            1_700_000_100 + offset,
        ));
    }
    plays
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_overlapping_ingestions_create_each_entity_once() {
    let store = TempStore::new();
    let config = IndexerConfig::builder()
        .database_path(&store.path)
        .chunk_size(3)
        .worker(WorkerConfig::new("ingest", 8))
        .build()
        .unwrap();
    let pool = open_store(&config).await.unwrap();
    let storage = Storage { pool: pool.clone() };
    let indexer = Arc::new(Indexer::from_config(pool.clone(), &config));

    let mut ingestions = JoinSet::new();
    for user in 0..8 {
        let indexer = Arc::clone(&indexer);
        ingestions.spawn(async move {
            indexer
                .ingest_plays(&format!("user-{}", user), &overlapping_batch(user))
                .await
        });
    }

    let mut errors = Vec::new();
    while let Some(joined) = ingestions.join_next().await {
        if let Err(e) = joined.unwrap() {
            errors.push(e.to_string());
        }
    }
    assert!(errors.is_empty(), "ingestions failed: {:?}", errors);

    // "Shared" + "Artist 0" ..= "Artist 9"; "Anthem" + one "Intro" per artist
    assert_eq!(storage.entity_totals().await, (11, 1, 11));

    let shared = storage.artist_id("Shared").await;
    let anthem = storage
        .track_id("Shared", Some("Together"), "Anthem")
        .await;
    for user in 0..8 {
        let user_id = storage.user_id(&format!("user-{}", user)).await;
        assert_eq!(storage.play_total(user_id).await, 4);
        assert_eq!(storage.artist_count(user_id, shared).await, 1);
        assert_eq!(storage.track_count(user_id, anthem).await, 1);
    }

    pool.close().await;
}

// ============================================================================
// Task Server
// ============================================================================

fn server_config() -> IndexerConfig {
    IndexerConfig::builder()
        .database_path(":memory:")
        .worker(WorkerConfig::new("ingest", 2))
        .poll_interval(Duration::from_millis(10))
        .job_timeout(Duration::from_secs(10))
        .max_attempts(2)
        .build()
        .unwrap()
}

async fn next_finished(stream: &mut EventStream) -> JobEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), stream.recv())
            .await
            .expect("job finished in time")
            .unwrap();
        match event {
            CoreEvent::Job(e @ JobEvent::Completed { .. }) => return e,
            CoreEvent::Job(e @ JobEvent::Failed { will_retry: false, .. }) => return e,
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_index_user_task_runs_on_worker() {
    let config = server_config();
    let pool = open_store(&config).await.unwrap();
    let storage = Storage { pool: pool.clone() };

    let mut source = MockSource::new();
    source
        .expect_fetch_plays()
        .times(1)
        .returning(|_, _| Ok(scenario_batch()));
    let indexer = Arc::new(Indexer::from_config(pool.clone(), &config).with_source(Arc::new(source)));

    let events = EventBus::default();
    let mut stream = EventStream::new(events.subscribe());
    let mut server = TaskServer::connect(pool, &config, events)
        .await
        .unwrap();
    server.register(Arc::new(IndexUserHandler::new(indexer)));
    server.register(Arc::new(TestTaskHandler));
    server.launch_workers();

    let job_id = server.send_index_user_task("U", "t0k3n").await.unwrap();
    let finished = next_finished(&mut stream).await;
    server.shutdown().await;

    assert!(matches!(finished, JobEvent::Completed { .. }));
    assert_eq!(finished.job_id(), job_id.to_string());

    let user = storage.user_id("U").await;
    assert_eq!(storage.play_total(user).await, 3);
    assert!(server.stats().await.unwrap().is_idle());
}

#[tokio::test]
async fn test_index_user_task_with_missing_token_fails_permanently() {
    let config = server_config();
    let pool = open_store(&config).await.unwrap();
    let indexer = Arc::new(Indexer::from_config(pool.clone(), &config));

    let events = EventBus::default();
    let mut stream = EventStream::new(events.subscribe());
    let mut server = TaskServer::connect(pool, &config, events)
        .await
        .unwrap();
    server.register(Arc::new(IndexUserHandler::new(indexer)));
    server.launch_workers();

    let job_id = server
        .send_task("index_user", vec!["U".to_string()])
        .await
        .unwrap();
    let finished = next_finished(&mut stream).await;
    server.shutdown().await;

    assert!(matches!(finished, JobEvent::Failed { will_retry: false, .. }));
    let job = server.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
}
