//! Target-less loads, downloads and engine lifecycle.

mod common;

use bytes::Bytes;
use common::*;
use pretty_assertions::assert_eq;
use quiver_decode::FetchError;
use quiver_engine::{
    DecodedImage, Engine, EngineConfig, LoadError, LoadListener, LoadedFrom, PixelLayout, Size,
    Transport,
};
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn load_then_hit_memory_cache() {
    let fetcher = CountingFetcher::new();
    fetcher.insert("a", png_bytes(40, 30));
    let engine = engine_with(&fetcher, 2);

    let first = engine.load("resource://a").size(10, 10).fire().wait().unwrap();
    assert_eq!(first.from, LoadedFrom::Source);
    assert_eq!(first.image.size(), Size::new(20, 15));
    assert_eq!(first.image.subsample(), 2);

    let second = engine.load("resource://a").size(10, 10).fire().wait().unwrap();
    assert_eq!(second.from, LoadedFrom::MemoryCache);
    assert!(Arc::ptr_eq(&first.image, &second.image));

    // A different layout is a different key.
    let gray = engine
        .load("resource://a")
        .size(10, 10)
        .layout(PixelLayout::Luma8)
        .fire()
        .wait()
        .unwrap();
    assert_eq!(gray.from, LoadedFrom::Source);
    assert_eq!(gray.image.pixels().len(), 20 * 15);
    assert_eq!(fetcher.calls("a"), 2);

    let stats = engine.stats();
    assert_eq!(stats.memory.entries, 2);
    assert_eq!(stats.memory.hit_count, 1);
}

#[tokio::test]
async fn load_can_be_awaited() {
    let fetcher = CountingFetcher::new();
    fetcher.insert("a", png_bytes(16, 16));
    let engine = engine_with(&fetcher, 1);

    let loaded = engine
        .load("resource://a")
        .original_size()
        .fire()
        .recv_async()
        .await
        .unwrap();
    assert_eq!(loaded.image.size(), Size::new(16, 16));
}

#[test]
fn load_listener_and_failure() {
    #[derive(Default)]
    struct Counts {
        complete: AtomicUsize,
        failed: AtomicUsize,
    }
    impl LoadListener for Counts {
        fn on_complete(&self, _uri: &str, _image: &Arc<DecodedImage>, _from: LoadedFrom) {
            self.complete.fetch_add(1, Ordering::SeqCst);
        }
        fn on_failed(&self, _uri: &str, _error: &LoadError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    let fetcher = CountingFetcher::new();
    fetcher.insert("garbage", b"definitely not an image".to_vec());
    let engine = engine_with(&fetcher, 1);
    let counts = Arc::new(Counts::default());

    let err = engine
        .load("resource://garbage")
        .listener(counts.clone())
        .fire()
        .wait()
        .unwrap_err();
    assert!(matches!(err, LoadError::Decode(_)));
    assert!(err.is_fatal());

    let err = engine
        .load("resource://nope")
        .listener(counts.clone())
        .fire()
        .wait()
        .unwrap_err();
    assert_eq!(err, LoadError::Fetch(FetchError::NotFound("nope".into())));

    let err = engine.load("").fire().wait().unwrap_err();
    assert!(matches!(err, LoadError::InvalidUri(_)));

    engine.flush();
    assert_eq!(counts.complete.load(Ordering::SeqCst), 0);
    assert_eq!(counts.failed.load(Ordering::SeqCst), 2);
}

#[test]
fn cancelled_load_resolves_to_cancelled() {
    let fetcher = CountingFetcher::new();
    fetcher.insert("a", png_bytes(8, 8));
    let gate = Gate::closed();
    fetcher.gate_with(Arc::clone(&gate));
    let engine = engine_with(&fetcher, 1);

    let kept = engine.load("resource://a").fire();
    let dropped = engine.load("resource://a").fire();
    assert!(kept.key().is_some());
    assert!(wait_until(|| fetcher.calls("a") == 1));
    assert!(kept.wait_timeout(Duration::from_millis(10)).is_none());

    dropped.cancel();
    gate.open();
    assert_eq!(dropped.wait(), Err(LoadError::Cancelled));
    assert!(kept.wait().is_ok());
}

#[test]
fn paused_load_is_refused() {
    let fetcher = CountingFetcher::new();
    fetcher.insert("a", png_bytes(8, 8));
    let engine = engine_with(&fetcher, 1);
    engine.pause();
    let err = engine.load("resource://a").fire().wait().unwrap_err();
    assert_eq!(err, LoadError::Paused);
    assert!(err.is_retryable());
    assert_eq!(fetcher.total_calls(), 0);
}

#[test]
fn concurrent_downloads_share_one_fetch() {
    let fetcher = CountingFetcher::new();
    fetcher.insert("blob", vec![1, 2, 3, 4]);
    let gate = Gate::closed();
    fetcher.gate_with(Arc::clone(&gate));
    let engine = engine_with(&fetcher, 2);

    let handles: Vec<_> = (0..4).map(|_| engine.download("resource://blob").fire()).collect();
    assert!(wait_until(|| engine.stats().downloads_in_flight == 1));
    gate.open();
    for handle in handles {
        assert_eq!(handle.wait().unwrap(), Bytes::from_static(&[1, 2, 3, 4]));
    }
    assert_eq!(fetcher.calls("blob"), 1);
}

#[test]
fn default_fetchers_serve_resources_files_and_assets() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("on-disk.png"), png_bytes(12, 6)).unwrap();
    std::fs::create_dir(dir.path().join("icons")).unwrap();
    std::fs::write(dir.path().join("icons/star.png"), png_bytes(6, 6)).unwrap();

    let engine = Engine::builder(test_config(2))
        .resource("logo", png_bytes(24, 12))
        .asset_root(dir.path())
        .build()
        .unwrap();

    let logo = engine.load("RESOURCE://logo").original_size().fire().wait().unwrap();
    assert_eq!(logo.image.size(), Size::new(24, 12));

    let path = dir.path().join("on-disk.png");
    let file = engine
        .load(path.to_string_lossy())
        .original_size()
        .fire()
        .wait()
        .unwrap();
    assert_eq!(file.image.size(), Size::new(12, 6));

    let asset = engine
        .load("assets://icons/star.png")
        .original_size()
        .fire()
        .wait()
        .unwrap();
    assert_eq!(asset.image.size(), Size::new(6, 6));

    engine.resources().register("late", png_bytes(3, 3));
    assert!(engine.load("resource://late").fire().wait().is_ok());

    let err = engine.load("https://example.com/a.png").fire().wait().unwrap_err();
    assert!(matches!(err, LoadError::Fetch(FetchError::Unsupported(_))));
}

struct CountingTransport {
    body: Vec<u8>,
    opens: AtomicUsize,
}

impl Transport for CountingTransport {
    fn open(&self, _url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(self.body.clone())))
    }
}

#[test]
fn remote_images_persist_in_disk_cache() {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(CountingTransport {
        body: png_bytes(20, 20),
        opens: AtomicUsize::new(0),
    });
    let config = EngineConfig::builder()
        .disk_cache_root(dir.path())
        .worker_pool_size(2)
        .build()
        .unwrap();
    let engine = Engine::builder(config)
        .transport(transport.clone())
        .build()
        .unwrap();

    let url = "https://images.example.com/cat.png";
    let first = engine.load(url).fire().wait().unwrap();
    assert_eq!(first.from, LoadedFrom::Source);

    engine.clear_memory_cache();
    let second = engine.load(url).fire().wait().unwrap();
    assert_eq!(second.from, LoadedFrom::DiskCache);
    assert_eq!(transport.opens.load(Ordering::SeqCst), 1);

    let disk = engine.stats().disk.unwrap();
    assert_eq!(disk.entries, 1);
    assert_eq!(disk.write_count, 1);

    engine.clear_disk_cache().unwrap();
    engine.clear_memory_cache();
    let third = engine.load(url).fire().wait().unwrap();
    assert_eq!(third.from, LoadedFrom::Source);
    assert_eq!(transport.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn shutdown_drains_queued_work() {
    let fetcher = CountingFetcher::new();
    for i in 0..8 {
        fetcher.insert(&format!("img{i}"), png_bytes(8 + i, 8));
    }
    let engine = engine_with(&fetcher, 2);

    let handles: Vec<_> = (0..8)
        .map(|i| engine.load(format!("resource://img{i}")).fire())
        .collect();
    engine.shutdown();

    for handle in handles {
        assert!(handle.wait().is_ok());
    }
    assert_eq!(fetcher.total_calls(), 8);
}

#[test]
fn config_presets_reach_the_options_registry() {
    let config = EngineConfig::from_toml_str(
        r#"
        worker_pool_size = 1
        enable_disk_cache = false

        [options.thumb]
        size = { width = 4, height = 4 }
        decode = { layout = "luma8" }
        "#,
    )
    .unwrap();
    let engine = Engine::builder(config)
        .resource("a", png_bytes(16, 16))
        .build()
        .unwrap();
    assert_eq!(engine.options().names(), vec!["thumb".to_string()]);

    let loaded = engine.load("resource://a").options("thumb").fire().wait().unwrap();
    assert_eq!(loaded.image.layout(), PixelLayout::Luma8);
    assert_eq!(loaded.image.size(), Size::new(8, 8));
}
