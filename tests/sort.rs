// End-to-end runs of the sort engine against the local and in-memory blob backends
use assert_fs::prelude::*;
use mediasort::mediasort_core::backend::{LocalBackend, ReadSeek, StorageBackend};
use mediasort::mediasort_core::config::{BlobServiceConfig, SortConfig};
use mediasort::mediasort_core::error::{MediasortError, Result};
use mediasort::mediasort_core::media::MediaItem;
use mediasort::mediasort_core::planner::{EnglishMonthNames, plan};
use mediasort::mediasort_core::runlog::LogSink;
use mediasort::mediasort_core::{
    BlobBackend, MemoryBlobStore, ObjectBlobStore, RunStatus, RunSummary, SortRequest, Sorter,
    sort,
};
use std::fs;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use time::macros::datetime;

mod common;
use common::{
    ExifDates, QT_2024_03_15, bare_jpeg, jpeg_with_exif, path_str, quicktime_movie, workspace,
    write_media,
};

/// 2023-11-02T12:00:00Z
const NOV_2_2023: i64 = 1_698_926_400;

fn local_sort(request: &SortRequest) -> RunSummary {
    sort(Arc::new(LocalBackend::new()), SortConfig::default(), request).unwrap()
}

fn read_log(summary: &RunSummary) -> String {
    fs::read_to_string(summary.log_location.as_ref().unwrap()).unwrap()
}

/// Delegates to [`LocalBackend`], optionally misbehaving on selected files.
#[derive(Default)]
struct FaultyBackend {
    inner: LocalBackend,
    fail_copy_of: Option<&'static str>,
    fail_delete: bool,
    slow_copy: Option<Duration>,
    /// Report the next probed name as free even if it exists.
    hide_next_probe: AtomicBool,
}

impl StorageBackend for FaultyBackend {
    fn enumerate(&self, location: &str, prefix: Option<&str>) -> Result<Vec<MediaItem>> {
        self.inner.enumerate(location, prefix)
    }

    fn ensure_location(&self, location: &str) -> Result<()> {
        self.inner.ensure_location(location)
    }

    fn prepare_prefix(&self, location: &str, prefix: &str) -> Result<()> {
        self.inner.prepare_prefix(location, prefix)
    }

    fn exists(&self, location: &str, key: &str) -> Result<bool> {
        if self.hide_next_probe.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        self.inner.exists(location, key)
    }

    fn open_read(&self, item: &MediaItem) -> Result<Box<dyn ReadSeek + Send>> {
        self.inner.open_read(item)
    }

    fn copy_stream(
        &self,
        item: &MediaItem,
        location: &str,
        key: &str,
        content_type: Option<&str>,
    ) -> Result<()> {
        if self.fail_copy_of == Some(item.file_name()) {
            return Err(MediasortError::Other("disk quota exceeded".to_string()));
        }
        if let Some(delay) = self.slow_copy {
            thread::sleep(delay);
        }
        self.inner.copy_stream(item, location, key, content_type)
    }

    fn delete(&self, item: &MediaItem) -> Result<()> {
        if self.fail_delete {
            return Err(MediasortError::Other("file is locked".to_string()));
        }
        self.inner.delete(item)
    }

    fn locate(&self, location: &str, key: &str) -> String {
        self.inner.locate(location, key)
    }

    fn item_location(&self, item: &MediaItem) -> String {
        self.inner.item_location(item)
    }

    fn open_log_sink(&self, log_location: &str, temp_name: &str) -> Result<Box<dyn LogSink>> {
        self.inner.open_log_sink(log_location, temp_name)
    }
}

#[test]
fn test_exif_and_fallback_dates() {
    let (_temp, source, destination, logs) = workspace();
    write_media(
        &source,
        "f1.jpg",
        &jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00")),
        NOV_2_2023,
    );
    let f2 = write_media(&source, "f2.jpg", &bare_jpeg(), NOV_2_2023);
    source.child("readme.txt").write_str("ignored").unwrap();

    // The no-metadata file lands wherever the backend's fallback timestamp says.
    let fallback = LocalBackend::item_for(f2.path()).unwrap().last_modified_fallback;
    let fallback_folder = plan(&fallback, &EnglishMonthNames).prefix();

    let summary = local_sort(
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .with_log_location(path_str(logs.path())),
    );

    assert_eq!(summary.moved_count, 2);
    assert_eq!(summary.skipped_count, 0);
    assert_eq!(summary.error_count, 0);
    assert_eq!(summary.status, RunStatus::Completed);
    destination
        .child("2024/03 - March/f1.jpg")
        .assert(predicates::path::exists());
    destination
        .child(format!("{}/f2.jpg", fallback_folder))
        .assert(predicates::path::exists());
    source.child("f1.jpg").assert(predicates::path::exists());

    let log_path = summary.log_location.clone().unwrap();
    assert!(log_path.ends_with("2 - inbox.txt"));
    let log = read_log(&summary);
    assert!(log.starts_with(&format!("Source: {}\n", path_str(source.path()))));
    assert!(log.contains("2024/03 - March/f1.jpg"));
    assert!(log.ends_with("Summary -> Moved: 2, Skipped: 0, Errors: 0\n"));
    assert!(!log.contains("readme.txt"));
}

#[test]
fn test_blob_fallback_uses_last_modified() {
    let store = Arc::new(MemoryBlobStore::new());
    let nov = datetime!(2023-11-02 12:00 UTC);
    store
        .put(
            "uploads",
            "phone/f1.jpg",
            jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00")),
            Some("image/jpeg"),
            nov,
        )
        .unwrap();
    store.put("uploads", "phone/f2.jpg", bare_jpeg(), None, nov).unwrap();
    store.put("uploads", "phone/", Vec::<u8>::new(), None, nov).unwrap();

    let backend = Arc::new(BlobBackend::new(Arc::clone(&store)));
    let summary = sort(
        backend,
        SortConfig::default(),
        &SortRequest::new("uploads", "sorted")
            .with_prefix("phone/")
            .moving(true)
            .with_log_location("audit/runs"),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 2);
    assert_eq!(
        store.blob_names("sorted"),
        vec!["2023/11 - November/f2.jpg", "2024/03 - March/f1.jpg"]
    );
    assert_eq!(
        store.content_type("sorted", "2024/03 - March/f1.jpg").as_deref(),
        Some("image/jpeg")
    );
    assert_eq!(
        store.content_type("sorted", "2023/11 - November/f2.jpg").as_deref(),
        Some("image/jpeg")
    );
    assert_eq!(store.blob_names("uploads"), vec!["phone/"]);
    assert_eq!(summary.log_location.as_deref(), Some("audit/runs/2 - phone.txt"));

    let log = String::from_utf8(store.get("audit", "runs/2 - phone.txt").unwrap()).unwrap();
    assert!(log.contains("Moved: phone/f1.jpg -> sorted/2024/03 - March/f1.jpg"));
}

#[test]
fn test_object_store_containers_on_disk() {
    let temp = assert_fs::TempDir::new().unwrap();
    let blobs = temp.child("blobs");
    let uploads = blobs.child("uploads");
    uploads.create_dir_all().unwrap();
    write_media(
        &uploads,
        "phone/f1.jpg",
        &jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00")),
        NOV_2_2023,
    );
    write_media(&uploads, "phone/clip.mov", &quicktime_movie(QT_2024_03_15, 0), NOV_2_2023);
    write_media(&uploads, "other/skip.jpg", &bare_jpeg(), NOV_2_2023);

    let store = ObjectBlobStore::new(&BlobServiceConfig {
        url: format!("file://{}/{{container}}", blobs.path().display()),
        ..Default::default()
    })
    .unwrap();
    let summary = sort(
        Arc::new(BlobBackend::new(Arc::new(store))),
        SortConfig::default(),
        &SortRequest::new("uploads", "sorted")
            .with_prefix("phone/")
            .moving(true)
            .with_log_location("audit/runs"),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 2);
    assert_eq!(summary.error_count, 0);
    blobs
        .child("sorted/2024/03 - March/f1.jpg")
        .assert(predicates::path::exists());
    blobs
        .child("sorted/2024/03 - March/clip.mov")
        .assert(predicates::path::exists());
    uploads.child("phone/f1.jpg").assert(predicates::path::missing());
    uploads.child("other/skip.jpg").assert(predicates::path::exists());
    assert_eq!(summary.log_location.as_deref(), Some("audit/runs/2 - phone.txt"));
    blobs
        .child("audit/runs/2 - phone.txt")
        .assert(predicates::str::contains("Moved: phone/f1.jpg -> sorted/2024/03 - March/f1.jpg"));
}

#[test]
fn test_name_collision_gets_counter() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    destination
        .child("2024/03 - March/photo.jpg")
        .write_str("already here")
        .unwrap();
    write_media(&source, "photo.jpg", &march, NOV_2_2023);

    let summary = local_sort(
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .with_log_location(path_str(logs.path())),
    );

    assert_eq!(summary.moved_count, 1);
    destination
        .child("2024/03 - March/photo.jpg")
        .assert("already here");
    destination
        .child("2024/03 - March/photo (1).jpg")
        .assert(predicates::path::exists());
}

#[test]
fn test_one_failed_transfer_is_isolated() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    for name in ["a.jpg", "b.jpg", "c.jpg"] {
        write_media(&source, name, &march, NOV_2_2023);
    }

    let backend = Arc::new(FaultyBackend {
        fail_copy_of: Some("b.jpg"),
        ..Default::default()
    });
    let summary = sort(
        backend,
        SortConfig::default(),
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .with_log_location(path_str(logs.path())),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 2);
    assert_eq!(summary.error_count, 1);
    let log = read_log(&summary);
    let errors: Vec<&str> = log.lines().filter(|l| l.starts_with("Error: ")).collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].ends_with("b.jpg | Reason: disk quota exceeded"));
    destination
        .child("2024/03 - March/c.jpg")
        .assert(predicates::path::exists());
}

#[test]
fn test_second_move_run_is_empty() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    write_media(&source, "a.jpg", &march, NOV_2_2023);
    write_media(&source, "nested/b.jpg", &march, NOV_2_2023);

    let request = SortRequest::new(path_str(source.path()), path_str(destination.path()))
        .moving(true)
        .with_log_location(path_str(logs.path()));

    let first = local_sort(&request);
    assert_eq!(first.moved_count, 2);
    source.child("a.jpg").assert(predicates::path::missing());
    source.child("nested/b.jpg").assert(predicates::path::missing());

    let second = local_sort(&request);
    assert_eq!(second.moved_count, 0);
    assert_eq!(second.error_count, 0);
    assert!(second.log_location.unwrap().ends_with("0 - inbox.txt"));
    logs.child("2 - inbox.txt").assert(predicates::path::exists());
}

#[test]
fn test_files_already_in_place_are_skipped() {
    let (temp, _source, _destination, logs) = workspace();
    let library = temp.child("library");
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    write_media(&library, "2024/03 - March/a.jpg", &march, NOV_2_2023);

    let summary = local_sort(
        &SortRequest::new(path_str(library.path()), path_str(library.path()))
            .moving(true)
            .with_log_location(path_str(logs.path())),
    );

    assert_eq!(summary.moved_count, 0);
    assert_eq!(summary.skipped_count, 1);
    library
        .child("2024/03 - March/a.jpg")
        .assert(predicates::path::exists());
    library
        .child("2024/03 - March/a (1).jpg")
        .assert(predicates::path::missing());
    assert!(read_log(&summary).contains("Skipped (same destination): "));
}

#[test]
fn test_in_place_detection_sees_through_dot_dot() {
    let (temp, _source, _destination, logs) = workspace();
    let library = temp.child("library");
    temp.child("other").create_dir_all().unwrap();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    write_media(&library, "2024/03 - March/a.jpg", &march, NOV_2_2023);

    let roundabout = temp.path().join("other").join("..").join("library");
    let summary = local_sort(
        &SortRequest::new(path_str(&roundabout), path_str(library.path()))
            .with_log_location(path_str(logs.path())),
    );

    assert_eq!(summary.moved_count, 0);
    assert_eq!(summary.skipped_count, 1);
    library
        .child("2024/03 - March/a (1).jpg")
        .assert(predicates::path::missing());
}

#[test]
fn test_quicktime_movie_header_date() {
    let (_temp, source, destination, logs) = workspace();
    write_media(&source, "clip.mov", &quicktime_movie(QT_2024_03_15, 0), NOV_2_2023);
    write_media(&source, "track-only.mp4", &quicktime_movie(0, QT_2024_03_15), NOV_2_2023);

    let summary = local_sort(
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .with_log_location(path_str(logs.path())),
    );

    assert_eq!(summary.moved_count, 2);
    destination
        .child("2024/03 - March/clip.mov")
        .assert(predicates::path::exists());
    destination
        .child("2024/03 - March/track-only.mp4")
        .assert(predicates::path::exists());
}

#[test]
fn test_failed_delete_counts_as_error() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    write_media(&source, "a.jpg", &march, NOV_2_2023);

    let backend = Arc::new(FaultyBackend {
        fail_delete: true,
        ..Default::default()
    });
    let summary = sort(
        backend,
        SortConfig::default(),
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .moving(true)
            .with_log_location(path_str(logs.path())),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 0);
    assert_eq!(summary.error_count, 1);
    source.child("a.jpg").assert(predicates::path::exists());
    destination
        .child("2024/03 - March/a.jpg")
        .assert(predicates::path::exists());
    let log = read_log(&summary);
    assert!(log.contains("could not be deleted: file is locked"));
    assert!(log.contains("2024/03 - March/a.jpg"));
}

#[test]
fn test_transfer_timeout() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    write_media(&source, "slow.jpg", &march, NOV_2_2023);

    let backend = Arc::new(FaultyBackend {
        slow_copy: Some(Duration::from_secs(3)),
        ..Default::default()
    });
    let config = SortConfig {
        item_timeout_secs: Some(1),
        ..Default::default()
    };
    let summary = sort(
        backend,
        config,
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .moving(true)
            .with_log_location(path_str(logs.path())),
    )
    .unwrap();

    assert_eq!(summary.error_count, 1);
    assert!(read_log(&summary).contains("timed out after 1s"));
    source.child("slow.jpg").assert(predicates::path::exists());
}

#[test]
fn test_name_claimed_between_probe_and_copy() {
    let (_temp, source, destination, logs) = workspace();
    let march = jpeg_with_exif(ExifDates::original("2024:03:15 10:00:00"));
    destination
        .child("2024/03 - March/photo.jpg")
        .write_str("someone else")
        .unwrap();
    write_media(&source, "photo.jpg", &march, NOV_2_2023);

    let backend = Arc::new(FaultyBackend {
        hide_next_probe: AtomicBool::new(true),
        ..Default::default()
    });
    let summary = sort(
        backend,
        SortConfig::default(),
        &SortRequest::new(path_str(source.path()), path_str(destination.path()))
            .with_log_location(path_str(logs.path())),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 1);
    assert_eq!(summary.error_count, 0);
    destination
        .child("2024/03 - March/photo.jpg")
        .assert("someone else");
    destination
        .child("2024/03 - March/photo (1).jpg")
        .assert(predicates::path::exists());
}

#[test]
fn test_missing_source_is_fatal() {
    let (temp, _source, destination, _logs) = workspace();
    let result = Sorter::new(Arc::new(LocalBackend::new()), SortConfig::default())
        .unwrap()
        .run(&SortRequest::new(
            path_str(temp.child("nowhere").path()),
            path_str(destination.path()),
        ));
    assert!(matches!(result, Err(MediasortError::SourceNotFound(_))));
    destination.assert(predicates::path::missing());
}

#[test]
fn test_custom_month_names_and_default_log_dir() {
    let (_temp, source, destination, _logs) = workspace();
    write_media(
        &source,
        "a.jpg",
        &jpeg_with_exif(ExifDates {
            digitized: Some("2024:03:15 10:00:00"),
            modified: Some("2020:01:01 00:00:00"),
            ..Default::default()
        }),
        NOV_2_2023,
    );
    let config = SortConfig::from_json(&format!(
        r#"{{"default_log_location": "{}", "month_names": ["Januar", "Februar", "März", "April",
            "Mai", "Juni", "Juli", "August", "September", "Oktober", "November", "Dezember"]}}"#,
        path_str(&destination.path().join("_logs")).replace('\\', "\\\\")
    ))
    .unwrap();

    let summary = sort(
        Arc::new(LocalBackend::new()),
        config,
        &SortRequest::new(path_str(source.path()), path_str(destination.path())),
    )
    .unwrap();

    assert_eq!(summary.moved_count, 1);
    destination
        .child("2024/03 - März/a.jpg")
        .assert(predicates::path::exists());
    destination
        .child("_logs/1 - inbox.txt")
        .assert(predicates::path::exists());
}
